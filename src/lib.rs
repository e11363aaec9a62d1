pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod extraction;
pub mod fx;
pub mod models;
pub mod service;
pub mod store;

pub use config::AppConfig;
pub use db::create_pool;
pub use error::AppError;
pub use extraction::{ExtractionOrchestrator, Extractor};
pub use fx::{CurrencyResolver, RateProvider};
pub use service::{MatchingEngine, ReceiptMatcher, ReceiptReconciler};
