//! 积分 API 处理器

use axum::{
    Json,
    extract::{Query, State},
};
use referral_core::models::{RewardLedgerEntry, RewardSummary};
use tracing::info;
use validator::Validate;

use crate::auth::{Principal, Role};
use crate::dto::{
    AdjustPointsRequest, ApiResponse, BalanceResponse, CourseCompletionRequest, HistoryQuery,
    RedeemPointsRequest,
};
use crate::error::Result;
use crate::state::AppState;

const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// GET /api/v1/rewards/balance
pub async fn get_balance(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<ApiResponse<BalanceResponse>>> {
    let summary = state.core.ledger.summary(&principal.id).await?;
    Ok(Json(ApiResponse::success(BalanceResponse {
        points: summary.points,
        tier: summary.tier,
    })))
}

/// 余额、等级与升级差额
///
/// GET /api/v1/rewards/summary
pub async fn get_summary(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<ApiResponse<RewardSummary>>> {
    let summary = state.core.ledger.summary(&principal.id).await?;
    Ok(Json(ApiResponse::success(summary)))
}

/// GET /api/v1/rewards/history
pub async fn get_history(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<RewardLedgerEntry>>>> {
    let entries = state
        .core
        .ledger
        .history(&principal.id, query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
        .await?;
    Ok(Json(ApiResponse::success(entries)))
}

/// 积分兑换
///
/// POST /api/v1/rewards/redeem
pub async fn redeem_points(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<RedeemPointsRequest>,
) -> Result<Json<ApiResponse<RewardLedgerEntry>>> {
    req.validate()?;
    let entry = state
        .core
        .ledger
        .debit(&principal.id, req.points, &req.reason)
        .await?;
    Ok(Json(ApiResponse::success(entry)))
}

/// 人工冲正
///
/// POST /api/v1/rewards/adjustments
pub async fn adjust_points(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<AdjustPointsRequest>,
) -> Result<Json<ApiResponse<RewardLedgerEntry>>> {
    principal.require_role(&[Role::Admin])?;
    req.validate()?;
    let entry = state
        .core
        .ledger
        .adjust(&req.owner_id, req.points, &req.source_ref, &req.reason)
        .await?;
    info!(
        operator = %principal.id,
        owner_id = %req.owner_id,
        points = req.points,
        "积分人工冲正"
    );
    Ok(Json(ApiResponse::success(entry)))
}

/// 课程完成奖励
///
/// POST /api/v1/rewards/course-completions
pub async fn course_completion(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<CourseCompletionRequest>,
) -> Result<Json<ApiResponse<RewardLedgerEntry>>> {
    principal.require_role(&[Role::Admin])?;
    req.validate()?;
    let entry = state
        .core
        .ledger
        .credit_course_completion(&req.owner_id, &req.course_id)
        .await?;
    Ok(Json(ApiResponse::success(entry)))
}
