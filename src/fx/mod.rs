//! 汇率换算: 外币金额按领据日期折算为本币。
//!
//! 当日没有汇率 (周末、节假日) 时向前逐日回退, 最多 `fallback_days` 天。
//! 成功的查询按 (币种, 日期) 永久缓存。

pub mod frankfurter;

use crate::error::{RateError, ResolutionError};
use crate::models::{AppliedRate, ExtractedReceipt, NormalizedReceipt, ResolutionFailure};
use crate::store::{RateEntry, RateKey, RateStore};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{Duration, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;

pub use frankfurter::FrankfurterProvider;

/// 外部汇率源: 1 单位 `currency` 折合多少本币
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// 该日期没有发布汇率时返回 `RateError::Unavailable`
    async fn rate(&self, currency: &str, date: NaiveDate) -> Result<BigDecimal, RateError>;
}

/// 换算结果; 本币时 applied 为 None
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub domestic_amount: BigDecimal,
    pub applied: Option<AppliedRate>,
}

pub struct CurrencyResolver {
    provider: Arc<dyn RateProvider>,
    store: Arc<dyn RateStore>,
    domestic: String,
    fallback_days: u32,
    max_concurrent: usize,
}

impl CurrencyResolver {
    pub fn new(provider: Arc<dyn RateProvider>, store: Arc<dyn RateStore>, domestic: &str) -> Self {
        Self {
            provider,
            store,
            domestic: domestic.trim().to_ascii_uppercase(),
            fallback_days: 3,
            max_concurrent: 4,
        }
    }

    pub fn with_fallback_days(mut self, days: u32) -> Self {
        self.fallback_days = days;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn domestic_currency(&self) -> &str {
        &self.domestic
    }

    pub async fn flush(&self) -> Result<(), crate::error::StoreError> {
        self.store.flush().await
    }

    /// 折算为本币; 本币金额原样返回, 不访问汇率源
    pub async fn resolve(
        &self,
        amount: &BigDecimal,
        currency: &str,
        date: NaiveDate,
    ) -> Result<Conversion, ResolutionError> {
        let currency = currency.trim().to_ascii_uppercase();
        if currency == self.domestic {
            return Ok(Conversion {
                domestic_amount: amount.clone(),
                applied: None,
            });
        }

        let applied = self.rate_as_of(&currency, date).await?;
        Ok(Conversion {
            domestic_amount: amount * &applied.rate,
            applied: Some(applied),
        })
    }

    /// 查询 `date` 当日汇率, 不可用时依次尝试前 1..=fallback_days 天
    pub async fn rate_as_of(&self, currency: &str, date: NaiveDate) -> Result<AppliedRate, ResolutionError> {
        let requested = RateKey::new(currency, &self.domestic, date);

        for offset in 0..=self.fallback_days {
            let day = date - Duration::days(i64::from(offset));
            let key = RateKey::new(currency, &self.domestic, day);

            if let Some(entry) = self.cached(&key).await {
                tracing::debug!("Cache hit: {}/{} on {} = {}", currency, self.domestic, day, entry.rate);
                if offset > 0 {
                    self.remember_as_of(&requested, &entry).await;
                }
                return Ok(applied(entry));
            }

            match self.provider.rate(currency, day).await {
                Ok(rate) => {
                    let entry = RateEntry {
                        rate,
                        rate_date: day,
                        fetched_at: Utc::now(),
                    };
                    self.remember(&key, &entry).await;
                    if offset > 0 {
                        tracing::info!(
                            "Using {} rate from {} for {}: 1 {} = {} {}",
                            currency, day, date, currency, entry.rate, self.domestic
                        );
                        self.remember_as_of(&requested, &entry).await;
                    }
                    return Ok(applied(entry));
                }
                Err(RateError::Unavailable { .. }) => {
                    tracing::debug!("No {} rate on {}, trying earlier date", currency, day);
                }
                Err(RateError::Provider(reason)) => {
                    tracing::error!("Failed to get FX rate for {}/{} on {}: {}", currency, self.domestic, day, reason);
                    return Err(ResolutionError::Provider {
                        currency: currency.to_string(),
                        date,
                        reason,
                    });
                }
            }
        }

        tracing::warn!(
            "Could not find {} rate for {} or the preceding {} days",
            currency, date, self.fallback_days
        );
        Err(ResolutionError::RateUnavailable {
            currency: currency.to_string(),
            date,
            window: self.fallback_days,
        })
    }

    /// 批量折算, 输出保持输入顺序; 失败的领据不会进入匹配
    pub async fn normalize_all(
        &self,
        receipts: Vec<ExtractedReceipt>,
    ) -> (Vec<NormalizedReceipt>, Vec<ResolutionFailure>) {
        let outcomes: Vec<(ExtractedReceipt, Result<Conversion, ResolutionError>)> =
            stream::iter(receipts)
                .map(|receipt| async move {
                    let outcome = self.resolve(&receipt.amount, &receipt.currency, receipt.date).await;
                    (receipt, outcome)
                })
                .buffered(self.max_concurrent)
                .collect()
                .await;

        let mut normalized = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (receipt, outcome) in outcomes {
            match outcome {
                Ok(Conversion { applied: None, .. }) => normalized.push(NormalizedReceipt::domestic(receipt)),
                Ok(Conversion { applied: Some(rate), .. }) => {
                    normalized.push(NormalizedReceipt::converted(receipt, rate))
                }
                Err(e) => {
                    tracing::warn!("Failed to convert {} to {}: {}", receipt, self.domestic, e);
                    failures.push(ResolutionFailure {
                        receipt,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "Normalized {} receipts to {}, {} failed",
            normalized.len(),
            self.domestic,
            failures.len()
        );
        (normalized, failures)
    }

    async fn cached(&self, key: &RateKey) -> Option<RateEntry> {
        match self.store.get_rate(key).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Rate cache read failed for {}: {}", key.cache_key(), e);
                None
            }
        }
    }

    async fn remember(&self, key: &RateKey, entry: &RateEntry) {
        if let Err(e) = self.store.put_rate(key, entry).await {
            tracing::warn!("Rate cache write failed for {}: {}", key.cache_key(), e);
        }
    }

    /// 回退得到的汇率也记在请求日期下; 今天及以后的汇率可能尚未发布, 不记
    async fn remember_as_of(&self, requested: &RateKey, entry: &RateEntry) {
        if requested.date < Utc::now().date_naive() {
            self.remember(requested, entry).await;
        }
    }
}

fn applied(entry: RateEntry) -> AppliedRate {
    AppliedRate {
        rate: entry.rate,
        rate_date: entry.rate_date,
    }
}
