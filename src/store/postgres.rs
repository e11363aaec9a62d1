use super::{ExtractionStore, RateEntry, RateKey, RateStore, StoreLifecycle};
use crate::db::queries;
use crate::error::StoreError;
use crate::models::{ExtractedReceipt, Fingerprint};
use async_trait::async_trait;
use sqlx::PgPool;

/// PostgreSQL 缓存, 两张表分别存抽取结果与汇率
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 建表后返回
    pub async fn open(pool: PgPool) -> Result<Self, StoreError> {
        queries::ensure_schema(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl StoreLifecycle for PgStore {}

#[async_trait]
impl ExtractionStore for PgStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<ExtractedReceipt>, StoreError> {
        let row = queries::get_extraction(&self.pool, fingerprint.as_str()).await?;
        Ok(row.map(ExtractedReceipt::from))
    }

    async fn put(&self, fingerprint: &Fingerprint, receipt: &ExtractedReceipt) -> Result<(), StoreError> {
        queries::upsert_extraction(&self.pool, fingerprint.as_str(), receipt).await?;
        Ok(())
    }
}

#[async_trait]
impl RateStore for PgStore {
    async fn get_rate(&self, key: &RateKey) -> Result<Option<RateEntry>, StoreError> {
        let row = queries::get_rate(&self.pool, key).await?;
        Ok(row.map(RateEntry::from))
    }

    async fn put_rate(&self, key: &RateKey, entry: &RateEntry) -> Result<(), StoreError> {
        queries::upsert_rate(&self.pool, key, entry).await?;
        Ok(())
    }
}
