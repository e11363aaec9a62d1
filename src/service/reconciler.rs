use super::MatchingEngine;
use crate::config::AppConfig;
use crate::error::{AppError, SourceError};
use crate::extraction::{ExtractionBatch, ExtractionOrchestrator, Extractor};
use crate::fx::{CurrencyResolver, RateProvider};
use crate::store::open_stores;
use crate::models::{ExtractedReceipt, Match, MatchResult, RawDocument, Transaction};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// 闭区间日期范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    /// `to - days` 到 `to` (两端都含)
    pub fn ending_at(to: NaiveDate, days: u32) -> Self {
        Self {
            from: to - Duration::days(i64::from(days)),
            to,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.from, self.to)
    }
}

/// 账本: 提供待匹配交易
#[async_trait]
pub trait TransactionSource: Send + Sync {
    async fn fetch(&self, range: DateRange) -> Result<Vec<Transaction>, SourceError>;
}

/// 文档来源 (邮箱/供应商门户/本地目录)
#[async_trait]
pub trait DocumentSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, range: DateRange) -> Result<Vec<RawDocument>, SourceError>;
}

/// 把确认的领据挂到账本交易上
#[async_trait]
pub trait AttachmentSink: Send + Sync {
    async fn attach(&self, matched: &Match) -> Result<(), SourceError>;
}

/// 折算 + 匹配; 不涉及文档来源, HTTP 接口直接使用
pub struct ReceiptMatcher {
    resolver: CurrencyResolver,
    engine: MatchingEngine,
}

impl ReceiptMatcher {
    pub fn new(resolver: CurrencyResolver, engine: MatchingEngine) -> Self {
        Self { resolver, engine }
    }

    pub fn engine(&self) -> &MatchingEngine {
        &self.engine
    }

    pub fn resolver(&self) -> &CurrencyResolver {
        &self.resolver
    }

    /// 折算失败的领据记入 failures, 不参与匹配
    pub async fn match_receipts(&self, transactions: &[Transaction], receipts: Vec<ExtractedReceipt>) -> MatchResult {
        let (normalized, failures) = self.resolver.normalize_all(receipts).await;
        self.engine
            .match_all(transactions, &normalized)
            .with_failures(failures)
    }
}

/// 一次对账运行的汇总
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub range: DateRange,
    /// 已挂领据而跳过的交易数
    pub skipped_with_receipt: usize,
    pub documents_fetched: usize,
    pub failed_sources: Vec<String>,
    pub result: MatchResult,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttachmentSummary {
    pub attached: usize,
    pub failed: usize,
    /// dry-run 时只统计不写入
    pub skipped: usize,
}

/// 完整流程: 拉取交易与文档 -> 抽取 -> 折算 -> 匹配
pub struct ReceiptReconciler {
    transactions: Arc<dyn TransactionSource>,
    documents: Vec<Arc<dyn DocumentSource>>,
    orchestrator: ExtractionOrchestrator,
    matcher: Arc<ReceiptMatcher>,
    sink: Option<Arc<dyn AttachmentSink>>,
    window_days: u32,
}

impl ReceiptReconciler {
    pub fn new(
        transactions: Arc<dyn TransactionSource>,
        orchestrator: ExtractionOrchestrator,
        matcher: Arc<ReceiptMatcher>,
    ) -> Self {
        Self {
            transactions,
            documents: Vec::new(),
            orchestrator,
            matcher,
            sink: None,
            window_days: 90,
        }
    }

    /// 按配置打开缓存并组装抽取、换汇与匹配
    pub async fn from_config(
        config: &AppConfig,
        transactions: Arc<dyn TransactionSource>,
        extractor: Arc<dyn Extractor>,
        provider: Arc<dyn RateProvider>,
    ) -> Result<Self, AppError> {
        let (extraction_store, rate_store) = open_stores(config).await?;

        let orchestrator = ExtractionOrchestrator::new(extractor, extraction_store, config.extraction.max_workers);
        let resolver = CurrencyResolver::new(provider, rate_store, &config.fx.domestic_currency)
            .with_fallback_days(config.fx.fallback_days)
            .with_max_concurrent(config.fx.max_concurrent_lookups);
        let engine = MatchingEngine::new(config.matching.clone())?;

        Ok(Self::new(transactions, orchestrator, Arc::new(ReceiptMatcher::new(resolver, engine)))
            .with_window_days(config.matching.date_range_days))
    }

    pub fn with_window_days(mut self, days: u32) -> Self {
        self.window_days = days;
        self
    }

    /// 截止到 `today` 的默认检索窗口
    pub fn default_range(&self, today: NaiveDate) -> DateRange {
        DateRange::ending_at(today, self.window_days)
    }

    pub fn with_document_source(mut self, source: Arc<dyn DocumentSource>) -> Self {
        self.documents.push(source);
        self
    }

    pub fn with_attachment_sink(mut self, sink: Arc<dyn AttachmentSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 账本不可用时整次运行失败; 单个文档来源失败只跳过该来源
    pub async fn run(&self, range: DateRange) -> Result<ReconcileReport, SourceError> {
        tracing::info!("========== Reconciling {} ==========", range);

        let fetched = self.transactions.fetch(range).await?;
        let fetched_count = fetched.len();
        let pending: Vec<Transaction> = fetched.into_iter().filter(|tx| !tx.has_receipt).collect();
        let skipped_with_receipt = fetched_count - pending.len();
        tracing::info!(
            "Fetched {} transactions, {} already have receipts",
            fetched_count,
            skipped_with_receipt
        );

        let mut documents = Vec::new();
        let mut failed_sources = Vec::new();
        for source in &self.documents {
            match source.fetch(range).await {
                Ok(docs) => {
                    tracing::info!("Fetched {} documents from {}", docs.len(), source.name());
                    documents.extend(docs);
                }
                Err(e) => {
                    tracing::warn!("Document source {} unavailable, skipped: {}", source.name(), e);
                    failed_sources.push(source.name().to_string());
                }
            }
        }
        let documents_fetched = documents.len();

        let ExtractionBatch { receipts, failures } = self.orchestrator.run(documents).await;
        let mut matched = self.matcher.match_receipts(&pending, receipts).await;
        // 抽取失败排在折算失败之前
        let resolution_failures = std::mem::take(&mut matched.failures);
        let result = matched.with_failures(failures).with_failures(resolution_failures);

        if let Err(e) = self.orchestrator.flush().await {
            tracing::error!("Failed to flush extraction cache: {}", e);
        }
        if let Err(e) = self.matcher.resolver().flush().await {
            tracing::error!("Failed to flush rate cache: {}", e);
        }

        tracing::info!(
            "Reconcile finished: {} matches, {} unmatched transactions, {} unmatched receipts, {} failures",
            result.matches.len(),
            result.unmatched_transactions.len(),
            result.unmatched_receipts.len(),
            result.failures.len()
        );

        Ok(ReconcileReport {
            range,
            skipped_with_receipt,
            documents_fetched,
            failed_sources,
            result,
        })
    }

    /// 逐条挂载匹配结果; 单条失败不影响其余, 不重试
    pub async fn attach(&self, result: &MatchResult, dry_run: bool) -> AttachmentSummary {
        match &self.sink {
            Some(sink) => attach_all(sink.as_ref(), result, dry_run).await,
            None => {
                tracing::warn!("No attachment sink configured, {} matches left unattached", result.matches.len());
                AttachmentSummary {
                    skipped: result.matches.len(),
                    ..Default::default()
                }
            }
        }
    }
}

impl ReconcileReport {
    /// 匹配结果导出为 CSV, 每个匹配一行
    pub fn export_csv(&self, path: &Path) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        crate::db::export_matches_csv(&self.result, path)
    }
}

pub async fn attach_all(sink: &dyn AttachmentSink, result: &MatchResult, dry_run: bool) -> AttachmentSummary {
    let mut summary = AttachmentSummary::default();

    for matched in &result.matches {
        if dry_run {
            tracing::info!("[dry-run] Would attach: {}", matched);
            summary.skipped += 1;
            continue;
        }
        match sink.attach(matched).await {
            Ok(()) => {
                tracing::info!("✓ Attached: {}", matched);
                summary.attached += 1;
            }
            Err(e) => {
                tracing::warn!("✗ Attach failed for transaction {}: {}", matched.transaction.id, e);
                summary.failed += 1;
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_ending_at_includes_both_ends() {
        let to = NaiveDate::from_ymd_opt(2026, 3, 31).unwrap();
        let range = DateRange::ending_at(to, 90);
        assert_eq!(range.from, NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
        assert!(range.contains(range.from));
        assert!(range.contains(to));
        assert!(!range.contains(to + Duration::days(1)));

        assert_eq!(DateRange::ending_at(to, 0).from, to);
    }
}
