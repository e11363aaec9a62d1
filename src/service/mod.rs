pub mod matcher;
pub mod reconciler;

pub use matcher::MatchingEngine;
pub use reconciler::{
    attach_all, AttachmentSink, AttachmentSummary, DateRange, DocumentSource, ReceiptMatcher, ReceiptReconciler,
    ReconcileReport, TransactionSource,
};
