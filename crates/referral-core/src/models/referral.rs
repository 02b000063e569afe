//! 转诊相关实体定义
//!
//! 包含转诊单、状态历史、留言以及纯函数形式的状态流转校验

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::enums::{ActorRule, ReferralStatus, Urgency};
use crate::error::{ReferralError, Result};

const NUMBER_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// 生成转诊单号：RF + yyyyMMdd + 6 位字母数字
pub fn generate_referral_number(now: DateTime<Utc>) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..6)
        .map(|_| NUMBER_ALPHABET[rng.random_range(0..NUMBER_ALPHABET.len())] as char)
        .collect();
    format!("RF{}{}", now.format("%Y%m%d"), suffix)
}

/// 状态历史条目，只追加不修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    pub status: ReferralStatus,
    pub timestamp: DateTime<Utc>,
    pub actor_id: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// 操作人在转诊中的身份
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartyRole {
    /// 发起方
    Referring,
    /// 接收方
    Receiving,
}

/// 转诊单
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Referral {
    pub id: Uuid,
    /// 转诊单号（对外追踪号）
    pub referral_number: String,
    pub from_party_id: String,
    pub to_party_id: String,
    pub status: ReferralStatus,
    #[sqlx(json)]
    pub status_history: Vec<StatusHistoryEntry>,
    pub urgency: Urgency,
    #[sqlx(default)]
    pub clinical_data: Option<Value>,
    pub patient_data: Value,
    #[sqlx(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// 来源兑换码（直接转诊为空）
    #[sqlx(default)]
    pub source_code: Option<String>,
    #[sqlx(default)]
    pub specialty: Option<String>,
    #[sqlx(default)]
    pub region: Option<String>,
    /// 发起方评分（1-5）
    #[sqlx(default)]
    pub rating: Option<i16>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 创建转诊的参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReferral {
    pub from_party_id: String,
    pub to_party_id: String,
    #[serde(default)]
    pub urgency: Urgency,
    #[serde(default)]
    pub specialty: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    pub patient_data: Value,
    #[serde(default)]
    pub clinical_data: Option<Value>,
    #[serde(default)]
    pub source_code: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

impl NewReferral {
    pub fn validate(&self) -> Result<()> {
        if self.from_party_id.trim().is_empty() || self.to_party_id.trim().is_empty() {
            return Err(ReferralError::Validation("转诊双方不能为空".to_string()));
        }
        if self.from_party_id == self.to_party_id {
            return Err(ReferralError::Validation(
                "不能向自己发起转诊".to_string(),
            ));
        }
        if !self.patient_data.is_object() {
            return Err(ReferralError::Validation(
                "patientData 必须是 JSON 对象".to_string(),
            ));
        }
        Ok(())
    }
}

/// 一次状态流转要写入的内容
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: ReferralStatus,
    pub entry: StatusHistoryEntry,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// 流转校验结果
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionPlan {
    /// 目标即当前状态，视为重复请求
    NoOp,
    Apply(StatusUpdate),
}

impl Referral {
    /// 以 PENDING 状态新建转诊
    pub fn create(new: NewReferral, referral_number: String, now: DateTime<Utc>) -> Self {
        let entry = StatusHistoryEntry {
            status: ReferralStatus::Pending,
            timestamp: now,
            actor_id: new.from_party_id.clone(),
            note: new.note,
        };

        Self {
            id: Uuid::now_v7(),
            referral_number,
            from_party_id: new.from_party_id,
            to_party_id: new.to_party_id,
            status: ReferralStatus::Pending,
            status_history: vec![entry],
            urgency: new.urgency,
            clinical_data: new.clinical_data,
            patient_data: new.patient_data,
            scheduled_at: None,
            completed_at: None,
            source_code: new.source_code,
            specialty: new.specialty,
            region: new.region,
            rating: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn party_role(&self, actor_id: &str) -> Option<PartyRole> {
        if actor_id == self.to_party_id {
            Some(PartyRole::Receiving)
        } else if actor_id == self.from_party_id {
            Some(PartyRole::Referring)
        } else {
            None
        }
    }

    pub fn ensure_party(&self, actor_id: &str) -> Result<PartyRole> {
        self.party_role(actor_id).ok_or_else(|| {
            ReferralError::AccessDenied(format!(
                "{} 不是转诊 {} 的参与方",
                actor_id, self.referral_number
            ))
        })
    }

    /// 对方参与者
    pub fn counterpart_of(&self, actor_id: &str) -> &str {
        if actor_id == self.to_party_id {
            &self.from_party_id
        } else {
            &self.to_party_id
        }
    }

    /// 校验一次状态流转，不修改自身
    ///
    /// 顺序：参与方 → 重复请求 → 状态机边 → 操作人权限 → 完成前置条件
    pub fn plan_transition(
        &self,
        actor_id: &str,
        target: ReferralStatus,
        note: Option<String>,
        override_schedule: bool,
        now: DateTime<Utc>,
    ) -> Result<TransitionPlan> {
        let role = self.ensure_party(actor_id)?;

        let Some(rule) = target.required_actor() else {
            return Err(self.invalid_transition(target));
        };

        if target == self.status {
            self.ensure_actor_allowed(role, rule, target)?;
            return Ok(TransitionPlan::NoOp);
        }

        if !self.status.can_transition_to(target) {
            return Err(self.invalid_transition(target));
        }

        self.ensure_actor_allowed(role, rule, target)?;

        if target == ReferralStatus::Completed && self.scheduled_at.is_none() && !override_schedule
        {
            return Err(ReferralError::Validation(
                "完成转诊前需先安排就诊时间".to_string(),
            ));
        }

        Ok(TransitionPlan::Apply(StatusUpdate {
            status: target,
            entry: StatusHistoryEntry {
                status: target,
                timestamp: now,
                actor_id: actor_id.to_string(),
                note,
            },
            completed_at: (target == ReferralStatus::Completed).then_some(now),
            updated_at: now,
        }))
    }

    /// 在内存中应用一次流转
    pub fn apply(&mut self, update: &StatusUpdate) {
        self.status = update.status;
        self.status_history.push(update.entry.clone());
        if update.completed_at.is_some() {
            self.completed_at = update.completed_at;
        }
        self.updated_at = update.updated_at;
    }

    fn ensure_actor_allowed(
        &self,
        role: PartyRole,
        rule: ActorRule,
        target: ReferralStatus,
    ) -> Result<()> {
        match (rule, role) {
            (ActorRule::EitherParty, _) | (ActorRule::ReceivingParty, PartyRole::Receiving) => {
                Ok(())
            }
            (ActorRule::ReceivingParty, PartyRole::Referring) => Err(ReferralError::AccessDenied(
                format!("仅接收方可将转诊置为 {}", target),
            )),
        }
    }

    fn invalid_transition(&self, target: ReferralStatus) -> ReferralError {
        ReferralError::InvalidTransition {
            from: self.status.to_string(),
            to: target.to_string(),
        }
    }
}

/// 转诊留言
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReferralMessage {
    pub id: Uuid,
    pub referral_id: Uuid,
    /// 单个转诊内严格递增
    pub seq: i64,
    pub sender_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
