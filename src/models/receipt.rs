use crate::error::ExtractionError;
use crate::models::{DocumentRef, Fingerprint};
use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 模型未给出置信度时的默认值
pub const DEFAULT_EXTRACTION_CONFIDENCE: f64 = 0.5;

/// 抽取模型返回的原始字段集 (全部可缺失)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawReceiptFields {
    #[serde(default)]
    pub merchant_name: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub amount: Option<serde_json::Value>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl RawReceiptFields {
    /// 解析视觉模型的文本回复 (兼容 ```json 代码块包裹)
    pub fn from_model_output(text: &str) -> Result<Self, ExtractionError> {
        let trimmed = text.trim();
        let body = if trimmed.starts_with("```") {
            let mut lines: Vec<&str> = trimmed.lines().skip(1).collect();
            if lines.last().map(|l| l.trim_start().starts_with("```")).unwrap_or(false) {
                lines.pop();
            }
            lines.join("\n")
        } else {
            trimmed.to_string()
        };

        serde_json::from_str(&body).map_err(|e| ExtractionError::MalformedOutput(e.to_string()))
    }
}

/// 从文档抽取出的领据事实, 创建后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedReceipt {
    pub counterpart: String,
    pub date: NaiveDate,
    pub amount: BigDecimal,
    pub currency: String,
    pub extraction_confidence: f64,
    pub source: DocumentRef,
}

impl ExtractedReceipt {
    pub fn new(
        counterpart: impl Into<String>,
        date: NaiveDate,
        amount: BigDecimal,
        currency: &str,
        source: DocumentRef,
    ) -> Self {
        Self {
            counterpart: counterpart.into(),
            date,
            amount,
            currency: currency.trim().to_ascii_uppercase(),
            extraction_confidence: DEFAULT_EXTRACTION_CONFIDENCE,
            source,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.extraction_confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// 缓存命中时重新指向当前的物理文档
    pub fn with_source(mut self, source: DocumentRef) -> Self {
        self.source = source;
        self
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.source.fingerprint
    }

    /// 校验原始字段并构造领据
    pub fn from_raw(fields: RawReceiptFields, source: DocumentRef) -> Result<Self, ExtractionError> {
        let date_text = fields
            .date
            .filter(|d| !d.trim().is_empty())
            .ok_or(ExtractionError::MissingField("date"))?;
        let date = NaiveDate::parse_from_str(date_text.trim(), "%Y-%m-%d").map_err(|_| {
            ExtractionError::InvalidField {
                field: "date",
                value: date_text.clone(),
            }
        })?;

        let amount_value = fields
            .amount
            .filter(|v| !v.is_null())
            .ok_or(ExtractionError::MissingField("amount"))?;
        let amount = parse_amount(&amount_value)?;

        let currency = fields
            .currency
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty())
            .ok_or(ExtractionError::MissingField("currency"))?;
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ExtractionError::InvalidField {
                field: "currency",
                value: currency,
            });
        }

        let confidence = fields
            .confidence
            .filter(|c| c.is_finite())
            .unwrap_or(DEFAULT_EXTRACTION_CONFIDENCE);

        Ok(Self::new(
            fields.merchant_name.unwrap_or_default().trim(),
            date,
            amount,
            &currency,
            source,
        )
        .with_confidence(confidence))
    }
}

fn parse_amount(value: &serde_json::Value) -> Result<BigDecimal, ExtractionError> {
    let text = match value {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.trim().replace(',', ""),
        other => other.to_string(),
    };
    let amount = BigDecimal::from_str(&text).map_err(|_| ExtractionError::InvalidField {
        field: "amount",
        value: text.clone(),
    })?;
    if amount <= BigDecimal::zero() {
        return Err(ExtractionError::InvalidField {
            field: "amount",
            value: text,
        });
    }
    Ok(amount)
}

impl std::fmt::Display for ExtractedReceipt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Receipt(counterpart={}, date={}, amount={} {}, confidence={:.2}, source={})",
            self.counterpart, self.date, self.amount, self.currency, self.extraction_confidence, self.source
        )
    }
}

/// 实际使用的汇率及其日期 (可能早于领据日期)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedRate {
    pub rate: BigDecimal,
    pub rate_date: NaiveDate,
}

/// 金额已折算为本币的领据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedReceipt {
    pub receipt: ExtractedReceipt,
    pub domestic_amount: BigDecimal,
    pub applied_rate: Option<AppliedRate>,
}

impl NormalizedReceipt {
    /// 本币领据: 金额原样
    pub fn domestic(receipt: ExtractedReceipt) -> Self {
        let domestic_amount = receipt.amount.clone();
        Self {
            receipt,
            domestic_amount,
            applied_rate: None,
        }
    }

    pub fn converted(receipt: ExtractedReceipt, applied: AppliedRate) -> Self {
        let domestic_amount = &receipt.amount * &applied.rate;
        Self {
            receipt,
            domestic_amount,
            applied_rate: Some(applied),
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        self.receipt.fingerprint()
    }

    pub fn date(&self) -> NaiveDate {
        self.receipt.date
    }
}
