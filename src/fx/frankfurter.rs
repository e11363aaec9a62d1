use super::RateProvider;
use crate::config::FxConfig;
use crate::error::RateError;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// Frankfurter (ECB 数据) 历史汇率接口, 无需 API key
pub struct FrankfurterProvider {
    client: Client,
    base_url: String,
    quote: String,
    /// 总请求次数上限 (含第一次)
    max_retries: u32,
    initial_backoff: Duration,
}

/// 响应格式: {"amount":1.0,"base":"USD","date":"2026-02-13","rates":{"JPY":150.5}}
#[derive(Debug, Deserialize)]
pub struct FrankfurterResponse {
    pub date: NaiveDate,
    #[serde(default)]
    pub rates: HashMap<String, serde_json::Value>,
}

enum FetchError {
    NotFound,
    Retryable(String),
    Fatal(String),
}

impl FrankfurterProvider {
    pub fn new(config: &FxConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            quote: config.domestic_currency.to_ascii_uppercase(),
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(500),
        })
    }

    async fn fetch_once(&self, url: &str, currency: &str) -> Result<FrankfurterResponse, FetchError> {
        let response = self
            .client
            .get(url)
            .query(&[("from", currency), ("to", self.quote.as_str())])
            .send()
            .await
            .map_err(|e| FetchError::Retryable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::Retryable(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(FetchError::Fatal(format!("HTTP {}", status)));
        }

        response
            .json::<FrankfurterResponse>()
            .await
            .map_err(|e| FetchError::Fatal(format!("Failed to parse API response: {}", e)))
    }
}

#[async_trait]
impl RateProvider for FrankfurterProvider {
    async fn rate(&self, currency: &str, date: NaiveDate) -> Result<BigDecimal, RateError> {
        let url = format!("{}/{}", self.base_url, date.format("%Y-%m-%d"));
        let mut attempt = 0u32;

        loop {
            match self.fetch_once(&url, currency).await {
                Ok(body) => return rate_from_response(body, currency, &self.quote, date),
                Err(FetchError::NotFound) => {
                    return Err(RateError::Unavailable {
                        currency: currency.to_string(),
                        date,
                    })
                }
                Err(FetchError::Fatal(reason)) => return Err(RateError::Provider(reason)),
                Err(FetchError::Retryable(reason)) => {
                    if !should_retry(attempt, self.max_retries) {
                        tracing::error!("Failed to fetch rate after {} attempts: {}", attempt + 1, reason);
                        return Err(RateError::Provider(reason));
                    }
                    let wait = self.initial_backoff * 2u32.saturating_pow(attempt);
                    tracing::warn!(
                        "Rate request failed (attempt {}/{}): {}, retrying in {:?}",
                        attempt + 1,
                        self.max_retries.max(1),
                        reason,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// `attempt` 从 0 开始; 至少请求一次
fn should_retry(attempt: u32, max_attempts: u32) -> bool {
    attempt + 1 < max_attempts.max(1)
}

/// Frankfurter 对非交易日会返回前一交易日的汇率; 日期不一致视为当日无汇率
pub fn rate_from_response(
    body: FrankfurterResponse,
    currency: &str,
    quote: &str,
    date: NaiveDate,
) -> Result<BigDecimal, RateError> {
    let unavailable = || RateError::Unavailable {
        currency: currency.to_string(),
        date,
    };

    if body.date != date {
        return Err(unavailable());
    }

    let value = body.rates.get(quote).ok_or_else(unavailable)?;
    let text = match value {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => return Err(RateError::Provider(format!("unexpected rate value: {}", other))),
    };
    BigDecimal::from_str(&text).map_err(|e| RateError::Provider(format!("invalid rate {}: {}", text, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> FrankfurterResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn max_retries_bounds_total_attempts() {
        let attempts = |max: u32| (0..10).take_while(|&a| should_retry(a, max)).count() + 1;
        assert_eq!(attempts(3), 3);
        assert_eq!(attempts(1), 1);
        assert_eq!(attempts(0), 1);
    }

    #[test]
    fn reads_rate_for_exact_date() {
        let body = response(r#"{"amount":1.0,"base":"USD","date":"2026-02-13","rates":{"JPY":150.5}}"#);
        let rate = rate_from_response(body, "USD", "JPY", NaiveDate::from_ymd_opt(2026, 2, 13).unwrap()).unwrap();
        assert_eq!(rate, BigDecimal::from_str("150.5").unwrap());
    }

    #[test]
    fn substituted_date_counts_as_unavailable() {
        let body = response(r#"{"amount":1.0,"base":"USD","date":"2026-02-13","rates":{"JPY":150.5}}"#);
        let saturday = NaiveDate::from_ymd_opt(2026, 2, 14).unwrap();
        assert_eq!(
            rate_from_response(body, "USD", "JPY", saturday),
            Err(RateError::Unavailable {
                currency: "USD".to_string(),
                date: saturday,
            })
        );
    }

    #[test]
    fn missing_quote_is_unavailable() {
        let body = response(r#"{"amount":1.0,"base":"USD","date":"2026-02-13","rates":{"EUR":0.92}}"#);
        let date = NaiveDate::from_ymd_opt(2026, 2, 13).unwrap();
        assert!(matches!(
            rate_from_response(body, "USD", "JPY", date),
            Err(RateError::Unavailable { .. })
        ));
    }
}
