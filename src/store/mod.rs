//! 持久化缓存: 抽取结果 (按文档指纹) 与历史汇率 (按币种+日期)。
//!
//! 两类缓存键空间独立。历史数据不会变化, 因此没有淘汰策略。

pub mod file;
pub mod postgres;

use crate::config::{AppConfig, StorageBackend};
use crate::db::create_pool;
use crate::error::StoreError;
use crate::models::{ExtractedReceipt, Fingerprint};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use file::FileStore;
pub use postgres::PgStore;

/// 存储生命周期: 运行结束后调用 flush
#[async_trait]
pub trait StoreLifecycle: Send + Sync {
    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// 抽取缓存: 指纹 -> 抽取结果
#[async_trait]
pub trait ExtractionStore: StoreLifecycle {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<ExtractedReceipt>, StoreError>;

    /// 相同键后写覆盖
    async fn put(&self, fingerprint: &Fingerprint, receipt: &ExtractedReceipt) -> Result<(), StoreError>;
}

/// 汇率缓存键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey {
    pub currency: String,
    pub quote: String,
    pub date: NaiveDate,
}

impl RateKey {
    pub fn new(currency: &str, quote: &str, date: NaiveDate) -> Self {
        Self {
            currency: currency.to_ascii_uppercase(),
            quote: quote.to_ascii_uppercase(),
            date,
        }
    }

    pub fn cache_key(&self) -> String {
        format!("{}_{}_{}", self.date.format("%Y-%m-%d"), self.currency, self.quote)
    }
}

/// 缓存的汇率; rate_date 为实际发布日期
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateEntry {
    pub rate: BigDecimal,
    pub rate_date: NaiveDate,
    pub fetched_at: DateTime<Utc>,
}

#[async_trait]
pub trait RateStore: StoreLifecycle {
    async fn get_rate(&self, key: &RateKey) -> Result<Option<RateEntry>, StoreError>;

    async fn put_rate(&self, key: &RateKey, entry: &RateEntry) -> Result<(), StoreError>;
}

/// 按配置打开两类缓存; postgres 后端两者共用一个连接池
pub async fn open_stores(config: &AppConfig) -> Result<(Arc<dyn ExtractionStore>, Arc<dyn RateStore>), StoreError> {
    match config.storage.backend {
        StorageBackend::File => {
            let extraction = FileStore::<ExtractedReceipt>::open(config.storage.extraction_cache_path()).await?;
            let rates = FileStore::<RateEntry>::open(config.storage.rate_cache_path()).await?;
            tracing::info!(
                "File caches opened under {} ({} extractions, {} rates)",
                config.storage.cache_dir.display(),
                extraction.len(),
                rates.len()
            );
            let extraction: Arc<dyn ExtractionStore> = Arc::new(extraction);
            let rates: Arc<dyn RateStore> = Arc::new(rates);
            Ok((extraction, rates))
        }
        StorageBackend::Postgres => {
            let pool = create_pool(&config.database.url, config.database.max_connections).await?;
            tracing::info!("Database pool created");
            let store = Arc::new(PgStore::open(pool).await?);
            let extraction: Arc<dyn ExtractionStore> = store.clone();
            let rates: Arc<dyn RateStore> = store;
            Ok((extraction, rates))
        }
    }
}
