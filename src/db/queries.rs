use crate::models::{DocumentRef, ExtractedReceipt, Fingerprint, MatchResult, SourceTag};
use crate::store::{RateEntry, RateKey};
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgPool};
use std::path::Path;

/// 抽取缓存行
#[derive(Debug, Clone, FromRow)]
pub struct ExtractionRow {
    pub fingerprint: String,
    pub counterpart: String,
    pub receipt_date: NaiveDate,
    pub amount: BigDecimal,
    pub currency: String,
    pub confidence: f64,
    pub source_tag: String,
    pub document_name: String,
}

impl From<ExtractionRow> for ExtractedReceipt {
    fn from(row: ExtractionRow) -> Self {
        ExtractedReceipt::new(
            row.counterpart,
            row.receipt_date,
            row.amount,
            &row.currency,
            DocumentRef {
                fingerprint: Fingerprint::from_hex(row.fingerprint),
                source: SourceTag::new(row.source_tag),
                name: row.document_name,
            },
        )
        .with_confidence(row.confidence)
    }
}

/// 汇率缓存行
#[derive(Debug, Clone, FromRow)]
pub struct RateRow {
    pub rate: BigDecimal,
    pub rate_date: NaiveDate,
    pub fetched_at: DateTime<Utc>,
}

impl From<RateRow> for RateEntry {
    fn from(row: RateRow) -> Self {
        RateEntry {
            rate: row.rate,
            rate_date: row.rate_date,
            fetched_at: row.fetched_at,
        }
    }
}

/// 建表 (幂等)
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS receipt_extraction_cache (
            fingerprint   VARCHAR(64) PRIMARY KEY,
            counterpart   TEXT NOT NULL,
            receipt_date  DATE NOT NULL,
            amount        NUMERIC NOT NULL,
            currency      VARCHAR(3) NOT NULL,
            confidence    DOUBLE PRECISION NOT NULL,
            source_tag    TEXT NOT NULL,
            document_name TEXT NOT NULL,
            cached_at     TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fx_rate_cache (
            currency   VARCHAR(3) NOT NULL,
            quote      VARCHAR(3) NOT NULL,
            for_date   DATE NOT NULL,
            rate       NUMERIC NOT NULL,
            rate_date  DATE NOT NULL,
            fetched_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (currency, quote, for_date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// 按指纹查询抽取缓存
pub async fn get_extraction(
    pool: &PgPool,
    fingerprint: &str,
) -> Result<Option<ExtractionRow>, sqlx::Error> {
    sqlx::query_as::<_, ExtractionRow>(
        r#"
        SELECT fingerprint, counterpart, receipt_date, amount, currency,
               confidence, source_tag, document_name
        FROM receipt_extraction_cache
        WHERE fingerprint = $1
        "#,
    )
    .bind(fingerprint)
    .fetch_optional(pool)
    .await
}

/// 写入抽取缓存 (后写覆盖)
pub async fn upsert_extraction(
    pool: &PgPool,
    fingerprint: &str,
    receipt: &ExtractedReceipt,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO receipt_extraction_cache (
            fingerprint, counterpart, receipt_date, amount, currency,
            confidence, source_tag, document_name
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (fingerprint) DO UPDATE SET
            counterpart = EXCLUDED.counterpart,
            receipt_date = EXCLUDED.receipt_date,
            amount = EXCLUDED.amount,
            currency = EXCLUDED.currency,
            confidence = EXCLUDED.confidence,
            source_tag = EXCLUDED.source_tag,
            document_name = EXCLUDED.document_name,
            cached_at = now()
        "#,
    )
    .bind(fingerprint)
    .bind(&receipt.counterpart)
    .bind(receipt.date)
    .bind(receipt.amount.clone())
    .bind(&receipt.currency)
    .bind(receipt.extraction_confidence)
    .bind(&receipt.source.source.0)
    .bind(&receipt.source.name)
    .execute(pool)
    .await?;
    Ok(())
}

/// 查询汇率缓存
pub async fn get_rate(pool: &PgPool, key: &RateKey) -> Result<Option<RateRow>, sqlx::Error> {
    sqlx::query_as::<_, RateRow>(
        r#"
        SELECT rate, rate_date, fetched_at
        FROM fx_rate_cache
        WHERE currency = $1 AND quote = $2 AND for_date = $3
        "#,
    )
    .bind(&key.currency)
    .bind(&key.quote)
    .bind(key.date)
    .fetch_optional(pool)
    .await
}

/// 写入汇率缓存
pub async fn upsert_rate(pool: &PgPool, key: &RateKey, entry: &RateEntry) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO fx_rate_cache (currency, quote, for_date, rate, rate_date, fetched_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (currency, quote, for_date) DO UPDATE SET
            rate = EXCLUDED.rate,
            rate_date = EXCLUDED.rate_date,
            fetched_at = EXCLUDED.fetched_at
        "#,
    )
    .bind(&key.currency)
    .bind(&key.quote)
    .bind(key.date)
    .bind(entry.rate.clone())
    .bind(entry.rate_date)
    .bind(entry.fetched_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// 导出匹配结果到 CSV 文件 (每个匹配一行)
pub fn export_matches_csv(
    result: &MatchResult,
    output_path: &Path,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use csv::Writer;
    use std::fs::File;

    let file = File::create(output_path)?;
    let mut writer = Writer::from_writer(file);

    writer.write_record([
        "transaction_id",
        "transaction_date",
        "transaction_amount",
        "tax_category",
        "account_code",
        "receipt_source",
        "receipt_name",
        "receipt_fingerprint",
        "receipt_amount",
        "receipt_currency",
        "domestic_amount",
        "rate",
        "rate_date",
        "amount_diff_pct",
        "confidence",
    ])?;

    for m in &result.matches {
        let rate = m.receipt.applied_rate.as_ref();
        writer.write_record(&[
            m.transaction.id.clone(),
            m.transaction.date.to_string(),
            m.transaction.amount.to_string(),
            m.transaction.metadata.tax_category.clone().unwrap_or_default(),
            m.transaction.metadata.account_code.clone().unwrap_or_default(),
            m.receipt.receipt.source.source.to_string(),
            m.receipt.receipt.source.name.clone(),
            m.receipt.fingerprint().to_string(),
            m.receipt.receipt.amount.to_string(),
            m.receipt.receipt.currency.clone(),
            m.receipt.domestic_amount.to_string(),
            rate.map(|r| r.rate.to_string()).unwrap_or_default(),
            rate.map(|r| r.rate_date.to_string()).unwrap_or_default(),
            format!("{:.4}", m.score.amount_diff_pct),
            format!("{:.4}", m.score.confidence),
        ])?;
    }

    writer.flush()?;
    Ok(())
}
