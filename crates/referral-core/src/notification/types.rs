//! 通知类型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ReferralStatus;

/// 通知事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationEvent {
    #[serde(rename = "referral.created")]
    ReferralCreated,
    #[serde(rename = "referral.accepted")]
    ReferralAccepted,
    #[serde(rename = "referral.rejected")]
    ReferralRejected,
    #[serde(rename = "referral.completed")]
    ReferralCompleted,
    #[serde(rename = "referral.cancelled")]
    ReferralCancelled,
    #[serde(rename = "referral.scheduled")]
    ReferralScheduled,
    #[serde(rename = "message.received")]
    MessageReceived,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReferralCreated => "referral.created",
            Self::ReferralAccepted => "referral.accepted",
            Self::ReferralRejected => "referral.rejected",
            Self::ReferralCompleted => "referral.completed",
            Self::ReferralCancelled => "referral.cancelled",
            Self::ReferralScheduled => "referral.scheduled",
            Self::MessageReceived => "message.received",
        }
    }

    /// 状态流转对应的事件
    pub fn for_status(status: ReferralStatus) -> Self {
        match status {
            ReferralStatus::Pending => Self::ReferralCreated,
            ReferralStatus::Accepted => Self::ReferralAccepted,
            ReferralStatus::Rejected => Self::ReferralRejected,
            ReferralStatus::Completed => Self::ReferralCompleted,
            ReferralStatus::Cancelled => Self::ReferralCancelled,
        }
    }
}

impl std::fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 投递给下游的通知
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub notification_id: String,
    pub event: NotificationEvent,
    pub recipient_id: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        event: NotificationEvent,
        recipient_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            notification_id: Uuid::now_v7().to_string(),
            event,
            recipient_id: recipient_id.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}
