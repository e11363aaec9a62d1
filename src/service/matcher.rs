use crate::config::MatchingConfig;
use crate::error::MatchError;
use crate::models::{Match, MatchResult, MatchScore, NormalizedReceipt, Transaction};
use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

/// 金额恰好落在容差边界时的扣分: 边界处 amount_score = 0.7
pub const BOUNDARY_PENALTY: f64 = 0.3;
/// 名称相似度最多加 0.05, 只影响排序
pub const NAME_BONUS_WEIGHT: f64 = 0.05;
/// 置信度阈值比较时容忍的浮点误差
const SCORE_EPSILON: f64 = 1e-9;

/// 一个通过日期与金额筛选的候选对 (按输入下标)
#[derive(Debug, Clone)]
struct Candidate {
    tx_idx: usize,
    receipt_idx: usize,
    score: MatchScore,
}

/// 匹配引擎 (单线程, 同步)
///
/// 候选条件: 日期完全一致, 金额相对差 <= tolerance_percent (含边界)。
/// 分配: 按置信度降序贪心选择, 是最大权二分匹配的近似;
/// 同分时依次按金额差、交易 ID、领据指纹打破平局, 结果确定。
pub struct MatchingEngine {
    config: MatchingConfig,
    tolerance: BigDecimal,
}

impl MatchingEngine {
    pub fn new(config: MatchingConfig) -> Result<Self, MatchError> {
        if !config.tolerance_percent.is_finite() || config.tolerance_percent < 0.0 {
            return Err(MatchError::InvalidConfig(format!(
                "tolerance_percent must be a non-negative number, got {}",
                config.tolerance_percent
            )));
        }
        for (name, value) in [
            ("min_confidence", config.min_confidence),
            ("min_extraction_confidence", config.min_extraction_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(MatchError::InvalidConfig(format!("{} must be within [0, 1], got {}", name, value)));
            }
        }

        let tolerance = BigDecimal::from_str(&config.tolerance_percent.to_string())
            .map_err(|e| MatchError::InvalidConfig(format!("tolerance_percent: {}", e)))?;

        Ok(Self { config, tolerance })
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// 计算一对一匹配; 未入选的交易和领据作为未匹配返回
    pub fn match_all(&self, transactions: &[Transaction], receipts: &[NormalizedReceipt]) -> MatchResult {
        tracing::info!(
            "Matching {} transactions with {} receipts (tolerance: {}%, min_confidence: {})",
            transactions.len(),
            receipts.len(),
            self.config.tolerance_percent,
            self.config.min_confidence
        );

        // Phase 1: 按日期建立领据索引 (同一指纹只保留首个, 重复项不出现在结果中)
        let mut receipts_by_date: HashMap<NaiveDate, Vec<usize>> = HashMap::new();
        let mut seen_receipts = HashSet::new();
        let mut receipt_duplicate = vec![false; receipts.len()];
        for (idx, receipt) in receipts.iter().enumerate() {
            if !seen_receipts.insert(receipt.fingerprint()) {
                tracing::warn!("Duplicate receipt {} ignored", receipt.receipt.source);
                receipt_duplicate[idx] = true;
                continue;
            }
            receipts_by_date.entry(receipt.date()).or_default().push(idx);
        }

        // Phase 2: 生成候选并评分
        let mut accepted: Vec<Candidate> = Vec::new();
        let mut rejected: Vec<MatchScore> = Vec::new();
        let mut seen_transactions = HashSet::new();
        let mut tx_duplicate = vec![false; transactions.len()];
        for (tx_idx, tx) in transactions.iter().enumerate() {
            if !seen_transactions.insert(tx.id.as_str()) {
                tracing::warn!("Transaction {} listed twice, second entry ignored", tx.id);
                tx_duplicate[tx_idx] = true;
                continue;
            }
            let Some(same_day) = receipts_by_date.get(&tx.date) else {
                tracing::debug!("No receipts dated {} for transaction {}", tx.date, tx.id);
                continue;
            };

            for &receipt_idx in same_day {
                let Some(score) = self.score(tx, &receipts[receipt_idx]) else {
                    continue;
                };
                if score.amount_score + SCORE_EPSILON >= self.config.min_confidence {
                    accepted.push(Candidate {
                        tx_idx,
                        receipt_idx,
                        score,
                    });
                } else {
                    tracing::debug!(
                        "Rejected candidate tx={} receipt={} (confidence {:.3} < {})",
                        tx.id,
                        receipts[receipt_idx].receipt.source,
                        score.confidence,
                        self.config.min_confidence
                    );
                    rejected.push(score);
                }
            }
        }

        // Phase 3: 贪心分配, 选中即同时占用交易与领据
        accepted.sort_by(|a, b| compare_candidates(a, b, transactions, receipts));

        let mut tx_taken = vec![false; transactions.len()];
        let mut receipt_taken = vec![false; receipts.len()];
        let mut chosen: Vec<Candidate> = Vec::new();
        for candidate in accepted {
            if tx_taken[candidate.tx_idx] || receipt_taken[candidate.receipt_idx] {
                continue;
            }
            tx_taken[candidate.tx_idx] = true;
            receipt_taken[candidate.receipt_idx] = true;
            chosen.push(candidate);
        }
        chosen.sort_by_key(|c| c.tx_idx);

        // Phase 4: 组装结果
        let matches: Vec<Match> = chosen
            .into_iter()
            .map(|c| {
                let m = Match {
                    transaction: transactions[c.tx_idx].clone(),
                    receipt: receipts[c.receipt_idx].clone(),
                    score: c.score,
                };
                tracing::info!("Matched: {}", m);
                m
            })
            .collect();

        let unmatched_transactions: Vec<Transaction> = transactions
            .iter()
            .enumerate()
            .filter(|(idx, _)| !tx_taken[*idx] && !tx_duplicate[*idx])
            .map(|(_, tx)| tx.clone())
            .collect();
        let unmatched_receipts: Vec<NormalizedReceipt> = receipts
            .iter()
            .enumerate()
            .filter(|(idx, _)| !receipt_taken[*idx] && !receipt_duplicate[*idx])
            .map(|(_, r)| r.clone())
            .collect();

        tracing::info!(
            "Matching complete: {} matches, {} rejected candidates, {} unmatched transactions, {} unmatched receipts",
            matches.len(),
            rejected.len(),
            unmatched_transactions.len(),
            unmatched_receipts.len()
        );

        let result = MatchResult {
            matches,
            rejected,
            unmatched_transactions,
            unmatched_receipts,
            failures: Vec::new(),
        };
        debug_assert!(result.verify_one_to_one().is_ok());
        result
    }

    /// 单个交易与领据的评分; 不满足候选条件时返回 None
    pub fn score(&self, tx: &Transaction, receipt: &NormalizedReceipt) -> Option<MatchScore> {
        if tx.date != receipt.date() {
            return None;
        }

        if receipt.receipt.extraction_confidence < self.config.min_extraction_confidence {
            tracing::debug!(
                "Skipping low confidence receipt: {} (confidence: {:.2})",
                receipt.receipt.source,
                receipt.receipt.extraction_confidence
            );
            return None;
        }

        let tx_amount = tx.amount.abs();
        if tx_amount.is_zero() {
            tracing::warn!("Transaction amount is zero: {}", tx.id);
            return None;
        }

        let scaled_diff = (&receipt.domestic_amount - &tx_amount).abs() * BigDecimal::from(100);
        let diff_pct = &scaled_diff / &tx_amount;
        let within = diff_pct <= self.tolerance;

        tracing::debug!(
            "Amount check: tx={} ({}), receipt={} {} ({}), diff={}%, match={}",
            tx.id,
            tx_amount,
            receipt.receipt.amount,
            receipt.receipt.currency,
            receipt.domestic_amount,
            diff_pct.with_scale(4),
            within
        );
        if !within {
            return None;
        }

        let amount_diff_pct = diff_pct
            .with_scale(6)
            .to_string()
            .parse::<f64>()
            .unwrap_or(self.config.tolerance_percent);
        let amount_score = amount_score(amount_diff_pct, self.config.tolerance_percent);
        let name_similarity = name_similarity(&tx.counterpart, &receipt.receipt.counterpart);
        let confidence = (amount_score + NAME_BONUS_WEIGHT * name_similarity.unwrap_or(0.0)).min(1.0);

        Some(MatchScore {
            transaction_id: tx.id.clone(),
            receipt: receipt.fingerprint().clone(),
            date_exact: true,
            amount_diff_pct,
            amount_score,
            name_similarity,
            confidence,
        })
    }
}

/// 金额接近度: 完全一致为 1.0, 线性下降到容差边界处的 1 - BOUNDARY_PENALTY
pub fn amount_score(diff_pct: f64, tolerance_pct: f64) -> f64 {
    if tolerance_pct <= 0.0 {
        return if diff_pct <= 0.0 { 1.0 } else { 0.0 };
    }
    (1.0 - BOUNDARY_PENALTY * (diff_pct / tolerance_pct)).clamp(0.0, 1.0)
}

/// 对方名称的词元 Jaccard 相似度; 任一方为空时返回 None
pub fn name_similarity(a: &str, b: &str) -> Option<f64> {
    let left = tokens(a);
    let right = tokens(b);
    if left.is_empty() || right.is_empty() {
        return None;
    }
    let common = left.intersection(&right).count();
    let union = left.union(&right).count();
    Some(common as f64 / union as f64)
}

fn tokens(name: &str) -> HashSet<String> {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// 置信度降序 -> 金额差升序 -> 交易 ID -> 领据指纹 -> 输入位置
fn compare_candidates(
    a: &Candidate,
    b: &Candidate,
    transactions: &[Transaction],
    receipts: &[NormalizedReceipt],
) -> Ordering {
    b.score
        .confidence
        .total_cmp(&a.score.confidence)
        .then_with(|| a.score.amount_diff_pct.total_cmp(&b.score.amount_diff_pct))
        .then_with(|| transactions[a.tx_idx].id.cmp(&transactions[b.tx_idx].id))
        .then_with(|| receipts[a.receipt_idx].fingerprint().cmp(receipts[b.receipt_idx].fingerprint()))
        .then_with(|| a.tx_idx.cmp(&b.tx_idx))
        .then_with(|| a.receipt_idx.cmp(&b.receipt_idx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AppliedRate, DocumentRef, ExtractedReceipt, Fingerprint, SourceTag};

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, d).unwrap()
    }

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn tx(id: &str, d: u32, amount: &str) -> Transaction {
        Transaction::new(id, date(d), dec(amount))
    }

    fn receipt(key: &str, d: u32, amount: &str) -> NormalizedReceipt {
        receipt_named(key, "", d, amount)
    }

    fn receipt_named(key: &str, counterpart: &str, d: u32, amount: &str) -> NormalizedReceipt {
        NormalizedReceipt::domestic(
            ExtractedReceipt::new(
                counterpart,
                date(d),
                dec(amount),
                "JPY",
                DocumentRef {
                    fingerprint: Fingerprint::of(key.as_bytes()),
                    source: SourceTag::new("gmail"),
                    name: format!("{key}.pdf"),
                },
            )
            .with_confidence(0.9),
        )
    }

    fn engine() -> MatchingEngine {
        MatchingEngine::new(MatchingConfig::default()).unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        let negative = MatchingConfig {
            tolerance_percent: -1.0,
            ..Default::default()
        };
        assert!(matches!(MatchingEngine::new(negative), Err(MatchError::InvalidConfig(_))));

        let confidence = MatchingConfig {
            min_confidence: 1.5,
            ..Default::default()
        };
        assert!(matches!(MatchingEngine::new(confidence), Err(MatchError::InvalidConfig(_))));
    }

    #[test]
    fn tolerance_boundary_is_inclusive() {
        let engine = engine();
        let t = tx("t1", 10, "1000");

        let at_boundary = engine.score(&t, &receipt("r1", 10, "1030")).unwrap();
        assert_eq!(at_boundary.amount_diff_pct, 3.0);
        assert!((at_boundary.amount_score - 0.7).abs() < 1e-12);

        let below_boundary = engine.score(&t, &receipt("r2", 10, "970")).unwrap();
        assert_eq!(below_boundary.amount_diff_pct, 3.0);

        assert!(engine.score(&t, &receipt("r3", 10, "1030.01")).is_none());
        assert!(engine.score(&t, &receipt("r4", 10, "969.99")).is_none());
    }

    #[test]
    fn boundary_candidate_is_matched_at_default_threshold() {
        let result = engine().match_all(&[tx("t1", 10, "1000")], &[receipt("r1", 10, "1030")]);
        assert_eq!(result.matches.len(), 1);
        assert!(result.rejected.is_empty());
    }

    #[test]
    fn candidates_below_min_confidence_are_rejected() {
        let engine = MatchingEngine::new(MatchingConfig {
            min_confidence: 0.85,
            ..Default::default()
        })
        .unwrap();

        // 1.5% -> 0.85 (接受), 2% -> 0.8 (拒绝)
        let result = engine.match_all(
            &[tx("t1", 10, "1000"), tx("t2", 11, "1000")],
            &[receipt("r1", 10, "1015"), receipt("r2", 11, "1020")],
        );

        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].transaction.id, "t1");
        assert_eq!(result.rejected.len(), 1);
        assert_eq!(result.rejected[0].transaction_id, "t2");
        assert_eq!(result.unmatched_transactions.len(), 1);
        assert_eq!(result.unmatched_receipts.len(), 1);
    }

    #[test]
    fn date_must_match_exactly() {
        let result = engine().match_all(&[tx("t1", 10, "1000")], &[receipt("r1", 11, "1000")]);
        assert!(result.matches.is_empty());
        assert!(result.rejected.is_empty());
        assert_eq!(result.unmatched_transactions.len(), 1);
        assert_eq!(result.unmatched_receipts.len(), 1);
    }

    #[test]
    fn zero_amount_transaction_never_matches() {
        let result = engine().match_all(&[tx("t1", 10, "0")], &[receipt("r1", 10, "0.01")]);
        assert!(result.matches.is_empty());
    }

    #[test]
    fn low_extraction_confidence_receipt_is_not_a_candidate() {
        let mut blurry = receipt("r1", 10, "1000");
        blurry.receipt = blurry.receipt.with_confidence(0.3);
        let result = engine().match_all(&[tx("t1", 10, "1000")], &[blurry]);
        assert!(result.matches.is_empty());
        assert_eq!(result.unmatched_receipts.len(), 1);
    }

    #[test]
    fn closer_amount_wins_over_name_bonus() {
        let engine = engine();
        let t = tx("t1", 10, "1000").with_counterpart("Amazon Web Services");

        let named = engine
            .score(&t, &receipt_named("r1", "Amazon Web Services", 10, "1020"))
            .unwrap();
        let exact = engine.score(&t, &receipt("r2", 10, "1000")).unwrap();

        assert_eq!(named.name_similarity, Some(1.0));
        assert!(exact.confidence > named.confidence);
    }

    #[test]
    fn name_bonus_breaks_equal_amount_ties() {
        let t = tx("t1", 10, "1000").with_counterpart("OpenAI, LLC");
        let result = engine().match_all(
            &[t],
            &[
                receipt_named("r1", "Acme Corp", 10, "1000"),
                receipt_named("r2", "OpenAI LLC", 10, "1000"),
            ],
        );

        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].receipt.receipt.counterpart, "OpenAI LLC");
        assert_eq!(result.unmatched_receipts[0].receipt.counterpart, "Acme Corp");
    }

    #[test]
    fn name_never_creates_a_candidate() {
        let t = tx("t1", 10, "1000").with_counterpart("Stripe");
        let result = engine().match_all(&[t], &[receipt_named("r1", "Stripe", 10, "1100")]);
        assert!(result.matches.is_empty());
        assert!(result.rejected.is_empty());
    }

    #[test]
    fn converted_receipt_matches_on_domestic_amount() {
        let extracted = ExtractedReceipt::new(
            "OpenAI",
            date(10),
            dec("49.5"),
            "USD",
            DocumentRef {
                fingerprint: Fingerprint::of(b"usd"),
                source: SourceTag::new("openai-portal"),
                name: "invoice.pdf".to_string(),
            },
        )
        .with_confidence(0.95);
        let normalized = NormalizedReceipt::converted(
            extracted,
            AppliedRate {
                rate: dec("101.0"),
                rate_date: date(10),
            },
        );

        let result = engine().match_all(&[tx("t1", 10, "5000")], &[normalized]);
        assert_eq!(result.matches.len(), 1);
        let score = &result.matches[0].score;
        assert!((score.amount_diff_pct - 0.01).abs() < 1e-9);
        assert!(score.confidence > 0.99);
    }

    #[test]
    fn duplicate_transactions_with_distinct_ids_are_kept() {
        let result = engine().match_all(
            &[tx("t1", 10, "1000"), tx("t2", 10, "1000")],
            &[receipt("r1", 10, "1000")],
        );
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].transaction.id, "t1");
        assert_eq!(result.unmatched_transactions.len(), 1);
        assert_eq!(result.unmatched_transactions[0].id, "t2");
    }

    #[test]
    fn repeated_receipt_fingerprint_is_reported_once() {
        let original = receipt("a", 10, "1000");
        let mut copy = original.clone();
        copy.receipt.source.name = "copy.pdf".to_string();

        let result = engine().match_all(&[tx("t1", 10, "1000")], &[original.clone(), copy]);

        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].receipt.fingerprint(), original.fingerprint());
        assert!(result.unmatched_receipts.is_empty());
        assert!(result.verify_one_to_one().is_ok());
    }

    #[test]
    fn repeated_receipt_fingerprint_stays_single_when_unmatched() {
        let original = receipt("a", 12, "1000");
        let copy = original.clone();

        let result = engine().match_all(&[tx("t1", 10, "1000")], &[original, copy]);

        assert!(result.matches.is_empty());
        assert_eq!(result.unmatched_receipts.len(), 1);
    }

    #[test]
    fn repeated_transaction_id_is_reported_once() {
        let result = engine().match_all(
            &[tx("t1", 10, "1000"), tx("t1", 10, "1000")],
            &[receipt("r1", 10, "1000")],
        );
        assert_eq!(result.matches.len(), 1);
        assert!(result.unmatched_transactions.is_empty());
    }

    #[test]
    fn amount_score_is_monotonic_within_band() {
        let scores: Vec<f64> = [0.0, 0.5, 1.0, 2.0, 3.0].iter().map(|d| amount_score(*d, 3.0)).collect();
        assert_eq!(scores[0], 1.0);
        assert!(scores.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(amount_score(0.0, 0.0), 1.0);
    }

    #[test]
    fn name_similarity_ignores_case_and_punctuation() {
        assert_eq!(name_similarity("OPENAI, L.L.C.", ""), None);
        assert_eq!(name_similarity("Google Cloud", "google  CLOUD"), Some(1.0));
        assert_eq!(name_similarity("Google Cloud", "Google Workspace"), Some(1.0 / 3.0));
    }
}
