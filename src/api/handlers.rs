use crate::models::{ExtractedReceipt, MatchResult, Transaction};
use crate::service::ReceiptMatcher;
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 请求体: 账本交易 + 已抽取的领据
#[derive(Debug, Deserialize)]
pub struct MatchRequest {
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub receipts: Vec<ExtractedReceipt>,
}

/// 响应体
#[derive(Debug, Serialize)]
pub struct MatchResponse {
    pub success: bool,
    pub message: String,
    pub result: Option<MatchResult>,
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

/// 匹配接口: 先折算为本币, 再一对一匹配
pub async fn match_receipts(
    State(matcher): State<Arc<ReceiptMatcher>>,
    Json(req): Json<MatchRequest>,
) -> Response {
    if req.transactions.is_empty() {
        let response = MatchResponse {
            success: false,
            message: "No transactions provided".to_string(),
            result: None,
        };
        return (StatusCode::BAD_REQUEST, Json(response)).into_response();
    }

    let pending: Vec<Transaction> = req.transactions.into_iter().filter(|tx| !tx.has_receipt).collect();
    let result = matcher.match_receipts(&pending, req.receipts).await;

    if let Err(e) = matcher.resolver().flush().await {
        tracing::error!("Failed to flush rate cache: {}", e);
    }

    if let Err(e) = result.verify_one_to_one() {
        let response = MatchResponse {
            success: false,
            message: format!("Error: {}", e),
            result: None,
        };
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(response)).into_response();
    }

    let response = MatchResponse {
        success: true,
        message: format!(
            "Matched {} of {} transactions, {} receipts unmatched, {} failures",
            result.matches.len(),
            pending.len(),
            result.unmatched_receipts.len(),
            result.failures.len()
        ),
        result: Some(result),
    };
    (StatusCode::OK, Json(response)).into_response()
}
