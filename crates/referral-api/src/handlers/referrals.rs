//! 转诊 API 处理器

use axum::{
    Json,
    extract::{Path, Query, State},
};
use referral_core::models::{Referral, ReferralMessage};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{Principal, Role};
use crate::dto::{
    ApiResponse, CreateReferralRequest, ListReferralsQuery, MessageRequest, RatingRequest,
    ScheduleRequest, UpdateStatusRequest,
};
use crate::error::Result;
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: i64 = 50;

/// 直接发起转诊
///
/// POST /api/v1/referrals
pub async fn create_referral(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<CreateReferralRequest>,
) -> Result<Json<ApiResponse<Referral>>> {
    principal.require_role(&[Role::Provider])?;
    req.validate()?;
    let referral = state
        .core
        .lifecycle
        .create_referral(req.into_new_referral(&principal.id))
        .await?;
    Ok(Json(ApiResponse::success(referral)))
}

/// 列出调用方参与的转诊
///
/// GET /api/v1/referrals
pub async fn list_referrals(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<ListReferralsQuery>,
) -> Result<Json<ApiResponse<Vec<Referral>>>> {
    let referrals = state
        .core
        .lifecycle
        .list_for_party(
            &principal.id,
            query.status,
            query.limit.unwrap_or(DEFAULT_LIST_LIMIT),
        )
        .await?;
    Ok(Json(ApiResponse::success(referrals)))
}

/// GET /api/v1/referrals/{id}
pub async fn get_referral(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Referral>>> {
    let referral = state.core.lifecycle.get_referral(id, &principal.id).await?;
    Ok(Json(ApiResponse::success(referral)))
}

/// 状态流转
///
/// PUT /api/v1/referrals/{id}/status
pub async fn update_status(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<ApiResponse<Referral>>> {
    req.validate()?;
    let referral = state
        .core
        .lifecycle
        .transition(id, &principal.id, req.into())
        .await?;
    Ok(Json(ApiResponse::success(referral)))
}

/// PUT /api/v1/referrals/{id}/schedule
pub async fn schedule(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(req): Json<ScheduleRequest>,
) -> Result<Json<ApiResponse<Referral>>> {
    let referral = state
        .core
        .lifecycle
        .schedule(id, &principal.id, req.scheduled_at)
        .await?;
    Ok(Json(ApiResponse::success(referral)))
}

/// GET /api/v1/referrals/{id}/messages
pub async fn list_messages(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<ReferralMessage>>>> {
    let messages = state.core.lifecycle.list_messages(id, &principal.id).await?;
    Ok(Json(ApiResponse::success(messages)))
}

/// POST /api/v1/referrals/{id}/messages
pub async fn add_message(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(req): Json<MessageRequest>,
) -> Result<Json<ApiResponse<ReferralMessage>>> {
    req.validate()?;
    let message = state
        .core
        .lifecycle
        .add_message(id, &principal.id, &req.content)
        .await?;
    Ok(Json(ApiResponse::success(message)))
}

/// POST /api/v1/referrals/{id}/rating
pub async fn rate(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(req): Json<RatingRequest>,
) -> Result<Json<ApiResponse<Referral>>> {
    req.validate()?;
    let referral = state
        .core
        .lifecycle
        .rate(id, &principal.id, req.rating)
        .await?;
    Ok(Json(ApiResponse::success(referral)))
}
