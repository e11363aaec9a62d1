use chrono::NaiveDate;
use thiserror::Error;

/// 单个文档的抽取失败 (记录到失败列表, 不中断批次)
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExtractionError {
    #[error("document unreadable: {0}")]
    Unreadable(String),

    #[error("unsupported document: {0}")]
    Unsupported(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid field {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("malformed model output: {0}")]
    MalformedOutput(String),

    #[error("extraction task aborted: {0}")]
    Aborted(String),
}

/// 汇率提供方错误
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RateError {
    /// 该日期没有汇率 (非交易日等)
    #[error("no {currency} rate published for {date}")]
    Unavailable { currency: String, date: NaiveDate },

    #[error("rate provider error: {0}")]
    Provider(String),
}

/// 换汇失败 (回退窗口耗尽或提供方故障)
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolutionError {
    #[error("no {currency} rate on {date} or the preceding {window} days")]
    RateUnavailable {
        currency: String,
        date: NaiveDate,
        window: u32,
    },

    #[error("rate lookup for {currency} on {date} failed: {reason}")]
    Provider {
        currency: String,
        date: NaiveDate,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("invalid matching config: {0}")]
    InvalidConfig(String),

    /// 同一交易或领据出现在多个匹配中, 属于程序缺陷
    #[error("assignment invariant violated: {0} appears in more than one match")]
    AssignmentInvariantViolation(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// 外部协作方 (账本/邮箱/附件) 错误
#[derive(Debug, Clone, Error)]
#[error("{source_name}: {message}")]
pub struct SourceError {
    pub source_name: String,
    pub message: String,
}

impl SourceError {
    pub fn new(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

/// 按配置组装服务时的错误
#[derive(Debug, Error)]
pub enum AppError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("matching error: {0}")]
    Match(#[from] MatchError),
}
