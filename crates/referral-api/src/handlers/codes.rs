//! 兑换码 API 处理器

use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};
use referral_core::models::ReferralCode;
use tracing::info;
use validator::Validate;

use crate::auth::{Principal, Role};
use crate::dto::{
    ApiResponse, DeactivateResponse, RedeemCodeRequest, RedeemCodeResponse,
    UpdateRestrictionsRequest,
};
use crate::error::Result;
use crate::state::AppState;

/// 幂等键请求头，请求体中的 idempotencyKey 优先
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// 签发兑换码
///
/// POST /api/v1/codes
pub async fn issue_code(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<ApiResponse<ReferralCode>>> {
    principal.require_role(&[Role::Provider])?;
    let code = state.core.registry.issue_code(&principal.id).await?;
    info!(owner_id = %principal.id, code = %code.code, "签发兑换码");
    Ok(Json(ApiResponse::success(code)))
}

/// 查询自己的有效兑换码
///
/// GET /api/v1/codes/mine
pub async fn get_my_code(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<ApiResponse<ReferralCode>>> {
    principal.require_role(&[Role::Provider])?;
    let code = state.core.registry.get_mine(&principal.id).await?;
    Ok(Json(ApiResponse::success(code)))
}

/// 更新兑换限制
///
/// PUT /api/v1/codes/restrictions
pub async fn update_restrictions(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<UpdateRestrictionsRequest>,
) -> Result<Json<ApiResponse<ReferralCode>>> {
    principal.require_role(&[Role::Provider])?;
    req.validate()?;
    let code = state
        .core
        .registry
        .update_restrictions(&principal.id, req.into())
        .await?;
    Ok(Json(ApiResponse::success(code)))
}

/// 停用兑换码
///
/// POST /api/v1/codes/deactivate
pub async fn deactivate_code(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<ApiResponse<DeactivateResponse>>> {
    principal.require_role(&[Role::Provider])?;
    let deactivated = state.core.registry.deactivate(&principal.id).await?;
    Ok(Json(ApiResponse::success(DeactivateResponse { deactivated })))
}

/// 匿名兑换
///
/// POST /api/v1/codes/{code}/redeem
pub async fn redeem_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    Json(req): Json<RedeemCodeRequest>,
) -> Result<Json<ApiResponse<RedeemCodeResponse>>> {
    req.validate()?;

    let header_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let redemption = state
        .core
        .redemption
        .redeem(&code, req.into_payload(header_key))
        .await?;

    let message = if redemption.replayed {
        "幂等请求，返回已创建的转诊"
    } else {
        "兑换成功"
    };
    Ok(Json(ApiResponse::success_with_message(
        redemption.into(),
        message,
    )))
}
