#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use receipt_matcher::error::{ExtractionError, RateError};
use receipt_matcher::extraction::Extractor;
use receipt_matcher::fx::RateProvider;
use receipt_matcher::models::{RawDocument, RawReceiptFields, SourceTag};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

/// 模型回复格式的领据 JSON
pub fn receipt_json(merchant: &str, date: &str, amount: &str, currency: &str) -> String {
    format!(
        r#"{{"merchant_name":"{merchant}","date":"{date}","amount":"{amount}","currency":"{currency}","confidence":0.9}}"#
    )
}

pub fn doc(name: &str, source: &str, body: &str) -> RawDocument {
    RawDocument::new(name, SourceTag::new(source), body.as_bytes().to_vec())
}

/// 把文档内容当作模型回复解析, 统计调用次数与并发峰值。
/// 内容以 PANIC 开头时直接 panic。
#[derive(Default)]
pub struct CountingExtractor {
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub peak: AtomicUsize,
    delay: Duration,
}

impl CountingExtractor {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for CountingExtractor {
    async fn extract(&self, document: &RawDocument) -> Result<RawReceiptFields, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if document.bytes.starts_with(b"PANIC") {
            panic!("extractor crashed on {}", document.name);
        }
        let text = std::str::from_utf8(&document.bytes)
            .map_err(|e| ExtractionError::Unreadable(e.to_string()))?;
        RawReceiptFields::from_model_output(text)
    }
}

/// 固定汇率表; 表中没有的日期视为未发布
#[derive(Default)]
pub struct FixedRates {
    rates: HashMap<(String, NaiveDate), BigDecimal>,
    pub calls: AtomicUsize,
}

impl FixedRates {
    pub fn with(mut self, currency: &str, date: NaiveDate, rate: &str) -> Self {
        self.rates.insert((currency.to_string(), date), dec(rate));
        self
    }
}

#[async_trait]
impl RateProvider for FixedRates {
    async fn rate(&self, currency: &str, date: NaiveDate) -> Result<BigDecimal, RateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.rates
            .get(&(currency.to_string(), date))
            .cloned()
            .ok_or(RateError::Unavailable {
                currency: currency.to_string(),
                date,
            })
    }
}
