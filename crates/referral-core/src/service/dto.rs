//! 服务层数据传输对象

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{Referral, ReferralStatus, Urgency};

/// 兑换请求载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionPayload {
    /// 接收转诊的专科医生
    pub specialist_id: String,
    #[serde(default)]
    pub urgency: Option<Urgency>,
    #[serde(default)]
    pub specialty: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    pub patient_data: Value,
    #[serde(default)]
    pub clinical_data: Option<Value>,
    /// 客户端生成的幂等键，同一兑换码下重复提交返回原转诊
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// 兑换结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Redemption {
    pub referral: Referral,
    /// 对外追踪号，等于转诊单号
    pub tracking_id: String,
    /// 是否为幂等重放
    pub replayed: bool,
}

impl Redemption {
    pub fn new(referral: Referral, replayed: bool) -> Self {
        Self {
            tracking_id: referral.referral_number.clone(),
            referral,
            replayed,
        }
    }

    pub fn referral_id(&self) -> Uuid {
        self.referral.id
    }

    pub fn status(&self) -> ReferralStatus {
        self.referral.status
    }
}

/// 状态流转请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequest {
    pub target_status: ReferralStatus,
    #[serde(default)]
    pub note: Option<String>,
    /// 未安排就诊时间也允许完成
    #[serde(default, rename = "override")]
    pub override_schedule: bool,
}
