pub mod document;
pub mod receipt;
pub mod result;
pub mod transaction;

pub use document::{DocumentRef, Fingerprint, RawDocument, SourceTag};
pub use receipt::{AppliedRate, ExtractedReceipt, NormalizedReceipt, RawReceiptFields};
pub use result::{ExtractionFailure, Failure, Match, MatchResult, MatchScore, ResolutionFailure};
pub use transaction::{LedgerMetadata, Transaction};
