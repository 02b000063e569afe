//! 响应 DTO 定义

use referral_core::models::{ReferralStatus, Tier};
use referral_core::service::Redemption;
use serde::Serialize;
use uuid::Uuid;

/// API 统一响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self::success_with_message(data, "操作成功")
    }

    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: message.into(),
            data: Some(data),
        }
    }
}

/// 兑换响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemCodeResponse {
    pub referral_tracking_id: String,
    pub referral_id: Uuid,
    pub status: ReferralStatus,
}

impl From<Redemption> for RedeemCodeResponse {
    fn from(redemption: Redemption) -> Self {
        Self {
            referral_id: redemption.referral_id(),
            status: redemption.status(),
            referral_tracking_id: redemption.tracking_id,
        }
    }
}

/// 积分余额
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub points: i64,
    pub tier: Tier,
}

/// 停用兑换码结果
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeactivateResponse {
    pub deactivated: bool,
}
