pub mod orchestrator;

use crate::error::ExtractionError;
use crate::models::{ExtractedReceipt, ExtractionFailure, Fingerprint, RawDocument, RawReceiptFields};
use async_trait::async_trait;
use rayon::prelude::*;

pub use orchestrator::ExtractionOrchestrator;

/// 外部抽取函数 (视觉模型/OCR), 返回原始字段集
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, document: &RawDocument) -> Result<RawReceiptFields, ExtractionError>;
}

/// 一批文档的抽取结果, 顺序不保证与输入一致
#[derive(Debug, Clone, Default)]
pub struct ExtractionBatch {
    pub receipts: Vec<ExtractedReceipt>,
    pub failures: Vec<ExtractionFailure>,
}

/// 并行计算文档指纹, 输出与输入同序
pub fn fingerprint_all(documents: Vec<RawDocument>) -> Vec<(Fingerprint, RawDocument)> {
    documents
        .into_par_iter()
        .map(|doc| (doc.fingerprint(), doc))
        .collect()
}
