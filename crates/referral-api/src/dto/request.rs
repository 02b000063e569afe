//! 请求 DTO 定义

use chrono::{DateTime, Utc};
use referral_core::models::{CodeRestrictions, NewReferral, ReferralStatus, Urgency};
use referral_core::{RedemptionPayload, TransitionRequest};
use serde::Deserialize;
use serde_json::Value;
use validator::Validate;

/// 兑换请求（公开接口）
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RedeemCodeRequest {
    #[validate(length(min = 1, max = 64, message = "specialistId 长度必须在1-64个字符之间"))]
    pub specialist_id: String,
    pub urgency: Option<Urgency>,
    #[validate(length(max = 100))]
    pub specialty: Option<String>,
    #[validate(length(max = 100))]
    pub region: Option<String>,
    pub patient_data: Value,
    pub clinical_data: Option<Value>,
    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: Option<String>,
}

impl RedeemCodeRequest {
    pub fn into_payload(self, header_key: Option<String>) -> RedemptionPayload {
        RedemptionPayload {
            specialist_id: self.specialist_id,
            urgency: self.urgency,
            specialty: self.specialty,
            region: self.region,
            patient_data: self.patient_data,
            clinical_data: self.clinical_data,
            idempotency_key: self.idempotency_key.or(header_key),
        }
    }
}

/// 更新兑换限制请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRestrictionsRequest {
    #[validate(range(min = 1, max = 100, message = "maxPerDay 必须在1-100之间"))]
    pub max_per_day: u32,
    #[validate(range(min = 1, max = 1000, message = "maxPerMonth 必须在1-1000之间"))]
    pub max_per_month: u32,
    #[serde(default)]
    pub allowed_specialties: Vec<String>,
    #[serde(default)]
    pub allowed_regions: Vec<String>,
}

impl From<UpdateRestrictionsRequest> for CodeRestrictions {
    fn from(req: UpdateRestrictionsRequest) -> Self {
        Self {
            max_per_day: req.max_per_day,
            max_per_month: req.max_per_month,
            allowed_specialties: req.allowed_specialties,
            allowed_regions: req.allowed_regions,
        }
    }
}

/// 直接转诊请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateReferralRequest {
    #[validate(length(min = 1, max = 64, message = "toPartyId 长度必须在1-64个字符之间"))]
    pub to_party_id: String,
    #[serde(default)]
    pub urgency: Urgency,
    #[validate(length(max = 100))]
    pub specialty: Option<String>,
    #[validate(length(max = 100))]
    pub region: Option<String>,
    pub patient_data: Value,
    pub clinical_data: Option<Value>,
    #[validate(length(max = 1000))]
    pub note: Option<String>,
}

impl CreateReferralRequest {
    pub fn into_new_referral(self, from_party_id: &str) -> NewReferral {
        NewReferral {
            from_party_id: from_party_id.to_string(),
            to_party_id: self.to_party_id,
            urgency: self.urgency,
            specialty: self.specialty,
            region: self.region,
            patient_data: self.patient_data,
            clinical_data: self.clinical_data,
            source_code: None,
            note: self.note,
        }
    }
}

/// 转诊列表查询参数
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListReferralsQuery {
    pub status: Option<ReferralStatus>,
    pub limit: Option<i64>,
}

/// 状态流转请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub target_status: ReferralStatus,
    #[validate(length(max = 1000))]
    pub note: Option<String>,
    #[serde(default, rename = "override")]
    pub override_schedule: bool,
}

impl From<UpdateStatusRequest> for TransitionRequest {
    fn from(req: UpdateStatusRequest) -> Self {
        Self {
            target_status: req.target_status,
            note: req.note,
            override_schedule: req.override_schedule,
        }
    }
}

/// 排期请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub scheduled_at: DateTime<Utc>,
}

/// 留言请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    #[validate(length(min = 1, max = 4000, message = "留言长度必须在1-4000个字符之间"))]
    pub content: String,
}

/// 评分请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RatingRequest {
    #[validate(range(min = 1, max = 5, message = "评分必须在1-5之间"))]
    pub rating: u8,
}

/// 积分流水查询参数
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

/// 积分兑换请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RedeemPointsRequest {
    #[validate(range(min = 1, message = "积分必须大于0"))]
    pub points: i64,
    #[validate(length(min = 1, max = 200, message = "reason 长度必须在1-200个字符之间"))]
    pub reason: String,
}

/// 人工冲正请求（管理员）
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdjustPointsRequest {
    #[validate(length(min = 1, max = 64))]
    pub owner_id: String,
    pub points: i64,
    #[validate(length(min = 1, max = 128))]
    pub source_ref: String,
    #[validate(length(min = 1, max = 200))]
    pub reason: String,
}

/// 课程完成回调（管理员）
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CourseCompletionRequest {
    #[validate(length(min = 1, max = 64))]
    pub owner_id: String,
    #[validate(length(min = 1, max = 128))]
    pub course_id: String,
}
