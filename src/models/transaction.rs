use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// 账本附加信息, 原样透传
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerMetadata {
    pub tax_category: Option<String>,
    pub account_code: Option<String>,
}

/// 待匹配的账本交易 (金额为本币正数)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub date: NaiveDate,
    pub amount: BigDecimal,
    #[serde(default)]
    pub counterpart: String,
    #[serde(default)]
    pub metadata: LedgerMetadata,
    /// 账本中已挂有领据
    #[serde(default)]
    pub has_receipt: bool,
}

impl Transaction {
    pub fn new(id: impl Into<String>, date: NaiveDate, amount: BigDecimal) -> Self {
        Self {
            id: id.into(),
            date,
            amount,
            counterpart: String::new(),
            metadata: LedgerMetadata::default(),
            has_receipt: false,
        }
    }

    pub fn with_counterpart(mut self, counterpart: impl Into<String>) -> Self {
        self.counterpart = counterpart.into();
        self
    }

    pub fn with_metadata(mut self, metadata: LedgerMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_receipt_attached(mut self) -> Self {
        self.has_receipt = true;
        self
    }
}

impl std::fmt::Display for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Transaction(id={}, date={}, amount={}, counterpart={})",
            self.id, self.date, self.amount, self.counterpart
        )
    }
}
