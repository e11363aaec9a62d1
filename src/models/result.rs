use crate::error::MatchError;
use crate::models::{DocumentRef, ExtractedReceipt, Fingerprint, NormalizedReceipt, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 候选对的评分明细
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchScore {
    pub transaction_id: String,
    pub receipt: Fingerprint,
    pub date_exact: bool,
    /// 金额相对差 (百分比)
    pub amount_diff_pct: f64,
    pub amount_score: f64,
    /// 对方名称相似度, 任一方为空时为 None
    pub name_similarity: Option<f64>,
    pub confidence: f64,
}

/// 已确认的一对一匹配
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub transaction: Transaction,
    pub receipt: NormalizedReceipt,
    pub score: MatchScore,
}

impl std::fmt::Display for Match {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Match(tx={}, receipt={}, diff={:.2}%, conf={:.2})",
            self.transaction.id, self.receipt.receipt.source, self.score.amount_diff_pct, self.score.confidence
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionFailure {
    pub document: DocumentRef,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionFailure {
    pub receipt: ExtractedReceipt,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    Extraction(ExtractionFailure),
    Resolution(ResolutionFailure),
}

impl From<ExtractionFailure> for Failure {
    fn from(f: ExtractionFailure) -> Self {
        Failure::Extraction(f)
    }
}

impl From<ResolutionFailure> for Failure {
    fn from(f: ResolutionFailure) -> Self {
        Failure::Resolution(f)
    }
}

/// 一次匹配运行的完整结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub matches: Vec<Match>,
    /// 低于最低置信度被丢弃的候选
    pub rejected: Vec<MatchScore>,
    pub unmatched_transactions: Vec<Transaction>,
    pub unmatched_receipts: Vec<NormalizedReceipt>,
    pub failures: Vec<Failure>,
}

impl MatchResult {
    /// 检查一对一约束
    pub fn verify_one_to_one(&self) -> Result<(), MatchError> {
        let mut transactions = HashSet::new();
        let mut receipts = HashSet::new();
        for m in &self.matches {
            if !transactions.insert(m.transaction.id.as_str()) {
                return Err(MatchError::AssignmentInvariantViolation(format!(
                    "transaction {}",
                    m.transaction.id
                )));
            }
            if !receipts.insert(m.receipt.fingerprint()) {
                return Err(MatchError::AssignmentInvariantViolation(format!(
                    "receipt {}",
                    m.receipt.fingerprint()
                )));
            }
        }
        Ok(())
    }

    pub fn with_failures<I, F>(mut self, failures: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Failure>,
    {
        self.failures.extend(failures.into_iter().map(Into::into));
        self
    }
}
