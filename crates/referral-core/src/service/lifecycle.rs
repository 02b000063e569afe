//! 转诊生命周期服务
//!
//! 负责转诊的创建、状态流转、排期、留言与评分。
//!
//! ## 状态机
//!
//! ```text
//! PENDING ──accept──> ACCEPTED ──complete──> COMPLETED
//!    │                   │
//!    ├──reject──> REJECTED
//!    └──cancel──> CANCELLED <──cancel──┘
//! ```
//!
//! 每次流转追加一条状态历史，写入以当前状态做 CAS，冲突时重新加载重试。
//! 流转成功后通知另一方；完成时给双方各入账一次完成积分（以转诊 ID 幂等）

use std::sync::Arc;

use chrono::{DateTime, Utc};
use referral_shared::observability::metrics;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::code_registry::CodeRegistry;
use super::dto::TransitionRequest;
use super::ledger::RewardLedger;
use crate::clock::Clock;
use crate::error::{ReferralError, Result};
use crate::models::{
    EntryType, NewReferral, PartyRole, Referral, ReferralMessage, ReferralStatus, TransitionPlan,
    generate_referral_number,
};
use crate::notification::{NotificationEvent, NotificationPublisher};
use crate::repository::ReferralRepositoryTrait;

/// CAS 冲突的最大重试次数
const MAX_CAS_ATTEMPTS: u32 = 5;

/// 转诊单号冲突的最大重试次数
const MAX_NUMBER_ATTEMPTS: u32 = 10;

/// 列表查询的最大条数
pub const MAX_LIST_LIMIT: i64 = 200;

/// 单条留言最大字符数
pub const MAX_MESSAGE_CHARS: usize = 4000;

pub struct LifecycleManager {
    referrals: Arc<dyn ReferralRepositoryTrait>,
    registry: Arc<CodeRegistry>,
    ledger: Arc<RewardLedger>,
    publisher: NotificationPublisher,
    clock: Arc<dyn Clock>,
}

impl LifecycleManager {
    pub fn new(
        referrals: Arc<dyn ReferralRepositoryTrait>,
        registry: Arc<CodeRegistry>,
        ledger: Arc<RewardLedger>,
        publisher: NotificationPublisher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            referrals,
            registry,
            ledger,
            publisher,
            clock,
        }
    }

    /// 创建转诊
    ///
    /// 兑换码路径与服务方直接转诊共用。单号冲突时重新生成
    #[instrument(skip(self, new), fields(from = %new.from_party_id, to = %new.to_party_id))]
    pub async fn create_referral(&self, new: NewReferral) -> Result<Referral> {
        new.validate()?;
        let now = self.clock.now();

        let mut created = None;
        for attempt in 1..=MAX_NUMBER_ATTEMPTS {
            let referral = Referral::create(new.clone(), generate_referral_number(now), now);
            if self.referrals.insert(&referral).await? {
                created = Some(referral);
                break;
            }
            debug!(attempt, number = %referral.referral_number, "转诊单号冲突，重新生成");
        }

        let Some(referral) = created else {
            error!(attempts = MAX_NUMBER_ATTEMPTS, "转诊单号生成重试耗尽");
            return Err(ReferralError::ConflictRetryExhausted {
                entity: "referral_number",
                attempts: MAX_NUMBER_ATTEMPTS,
            });
        };

        info!(
            referral_id = %referral.id,
            referral_number = %referral.referral_number,
            source_code = ?referral.source_code,
            "转诊已创建"
        );

        self.award_submission(&referral).await;
        self.notify(
            NotificationEvent::ReferralCreated,
            &referral.to_party_id,
            &referral,
            &referral.from_party_id,
        );

        Ok(referral)
    }

    /// 查询转诊，仅参与方可见
    pub async fn get_referral(&self, id: Uuid, viewer_id: &str) -> Result<Referral> {
        let referral = self.load(id).await?;
        referral.ensure_party(viewer_id)?;
        Ok(referral)
    }

    /// 列出参与方的转诊
    pub async fn list_for_party(
        &self,
        party_id: &str,
        status: Option<ReferralStatus>,
        limit: i64,
    ) -> Result<Vec<Referral>> {
        self.referrals
            .list_for_party(party_id, status, limit.clamp(1, MAX_LIST_LIMIT))
            .await
    }

    /// 状态流转
    ///
    /// 目标即当前状态且操作人有权时视为重复请求，直接返回，
    /// 完成状态下会幂等地补发完成积分
    #[instrument(skip(self, request), fields(referral_id = %id, actor_id = %actor_id, target = %request.target_status))]
    pub async fn transition(
        &self,
        id: Uuid,
        actor_id: &str,
        request: TransitionRequest,
    ) -> Result<Referral> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let mut referral = self.load(id).await?;
            let plan = referral.plan_transition(
                actor_id,
                request.target_status,
                request.note.clone(),
                request.override_schedule,
                self.clock.now(),
            )?;

            let update = match plan {
                TransitionPlan::NoOp => {
                    debug!("重复的状态流转请求");
                    if referral.status == ReferralStatus::Completed {
                        self.issue_completion_credits(&referral).await?;
                    }
                    return Ok(referral);
                }
                TransitionPlan::Apply(update) => update,
            };

            let expected = referral.status;
            if self
                .referrals
                .compare_and_set_status(id, expected, &update)
                .await?
            {
                referral.apply(&update);
                self.after_transition(&referral, expected, actor_id).await?;
                return Ok(referral);
            }

            debug!(attempt, "状态已被并发修改，重新加载");
        }

        warn!(attempts = MAX_CAS_ATTEMPTS, "状态流转 CAS 重试耗尽");
        Err(ReferralError::ConcurrencyConflict)
    }

    /// 安排就诊时间，仅接收方，且只在 PENDING/ACCEPTED 状态
    #[instrument(skip(self), fields(referral_id = %id, actor_id = %actor_id))]
    pub async fn schedule(
        &self,
        id: Uuid,
        actor_id: &str,
        scheduled_at: DateTime<Utc>,
    ) -> Result<Referral> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let mut referral = self.load(id).await?;
            if referral.ensure_party(actor_id)? != PartyRole::Receiving {
                return Err(ReferralError::AccessDenied(
                    "仅接收方可安排就诊时间".to_string(),
                ));
            }
            if !matches!(
                referral.status,
                ReferralStatus::Pending | ReferralStatus::Accepted
            ) {
                return Err(ReferralError::InvalidTransition {
                    from: referral.status.to_string(),
                    to: "SCHEDULED".to_string(),
                });
            }
            if scheduled_at < referral.created_at {
                return Err(ReferralError::Validation(
                    "就诊时间不能早于转诊创建时间".to_string(),
                ));
            }

            let now = self.clock.now();
            if self
                .referrals
                .set_schedule(id, referral.status, scheduled_at, now)
                .await?
            {
                referral.scheduled_at = Some(scheduled_at);
                referral.updated_at = now;
                info!(scheduled_at = %scheduled_at, "就诊时间已安排");
                self.notify(
                    NotificationEvent::ReferralScheduled,
                    referral.counterpart_of(actor_id),
                    &referral,
                    actor_id,
                );
                return Ok(referral);
            }
        }

        Err(ReferralError::ConcurrencyConflict)
    }

    /// 追加留言
    #[instrument(skip(self, content), fields(referral_id = %id, sender_id = %sender_id))]
    pub async fn add_message(
        &self,
        id: Uuid,
        sender_id: &str,
        content: &str,
    ) -> Result<ReferralMessage> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ReferralError::Validation("留言内容不能为空".to_string()));
        }
        if content.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ReferralError::Validation(format!(
                "留言不能超过 {} 个字符",
                MAX_MESSAGE_CHARS
            )));
        }

        let referral = self.load(id).await?;
        referral.ensure_party(sender_id)?;

        let message = self
            .referrals
            .append_message(id, sender_id, content, self.clock.now())
            .await?;

        self.publisher.publish(
            NotificationEvent::MessageReceived,
            referral.counterpart_of(sender_id),
            json!({
                "referralId": referral.id,
                "referralNumber": referral.referral_number,
                "messageId": message.id,
                "senderId": sender_id,
            }),
        );
        Ok(message)
    }

    pub async fn list_messages(&self, id: Uuid, viewer_id: &str) -> Result<Vec<ReferralMessage>> {
        let referral = self.load(id).await?;
        referral.ensure_party(viewer_id)?;
        self.referrals.list_messages(id).await
    }

    /// 发起方对已完成的兑换码转诊评分，每个转诊只能评一次
    #[instrument(skip(self), fields(referral_id = %id, actor_id = %actor_id))]
    pub async fn rate(&self, id: Uuid, actor_id: &str, rating: u8) -> Result<Referral> {
        if !(1..=5).contains(&rating) {
            return Err(ReferralError::Validation(format!(
                "评分必须在 1-5 之间: {}",
                rating
            )));
        }

        let mut referral = self.load(id).await?;
        if referral.ensure_party(actor_id)? != PartyRole::Referring {
            return Err(ReferralError::AccessDenied("仅发起方可评分".to_string()));
        }
        if referral.status != ReferralStatus::Completed {
            return Err(ReferralError::Validation("仅已完成的转诊可评分".to_string()));
        }
        let Some(code) = referral.source_code.clone() else {
            return Err(ReferralError::Validation(
                "仅兑换码发起的转诊可评分".to_string(),
            ));
        };

        let now = self.clock.now();
        if !self
            .referrals
            .set_rating(id, i16::from(rating), now)
            .await?
        {
            return Err(ReferralError::Validation("该转诊已评分".to_string()));
        }
        // 评分先占位，兑换码统计写入失败时撤销，允许重新评分
        if let Err(e) = self.registry.record_rating(&code, rating).await {
            if let Err(clear_err) = self.referrals.clear_rating(id, now).await {
                error!(error = %clear_err, "撤销评分失败");
            }
            return Err(e);
        }

        referral.rating = Some(i16::from(rating));
        referral.updated_at = now;
        info!(rating, code = %code, "转诊已评分");
        Ok(referral)
    }

    /// 按 ID 加载，不做权限检查
    pub(crate) async fn load(&self, id: Uuid) -> Result<Referral> {
        self.referrals
            .get(id)
            .await?
            .ok_or_else(|| ReferralError::not_found("转诊", id))
    }

    async fn after_transition(
        &self,
        referral: &Referral,
        from: ReferralStatus,
        actor_id: &str,
    ) -> Result<()> {
        metrics::record_transition(referral.status.as_str());
        info!(from = %from, to = %referral.status, "转诊状态已流转");

        self.notify(
            NotificationEvent::for_status(referral.status),
            referral.counterpart_of(actor_id),
            referral,
            actor_id,
        );

        if referral.status == ReferralStatus::Completed {
            if let Some(code) = &referral.source_code {
                if let Err(e) = self.registry.record_success(code).await {
                    warn!(code = %code, error = %e, "兑换码成功次数更新失败");
                }
            }
            self.issue_completion_credits(referral).await?;
        }
        Ok(())
    }

    /// 完成积分：发起方与接收方各一次，以转诊 ID 为幂等来源
    async fn issue_completion_credits(&self, referral: &Referral) -> Result<()> {
        let rewards = self.ledger.rewards();
        let source_ref = referral.id.to_string();
        let grants = [
            (&referral.from_party_id, rewards.referrer_completion_points),
            (&referral.to_party_id, rewards.specialist_completion_points),
        ];

        for (owner_id, points) in grants {
            if points <= 0 {
                continue;
            }
            match self
                .ledger
                .credit(owner_id, EntryType::ReferralCompleted, points, &source_ref)
                .await
            {
                Ok(_) | Err(ReferralError::DuplicateSource { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// 提交积分，失败不影响转诊创建
    async fn award_submission(&self, referral: &Referral) {
        let points = self.ledger.rewards().submission_points;
        if points <= 0 {
            return;
        }
        match self
            .ledger
            .credit(
                &referral.from_party_id,
                EntryType::ReferralSubmitted,
                points,
                &referral.id.to_string(),
            )
            .await
        {
            Ok(_) | Err(ReferralError::DuplicateSource { .. }) => {}
            Err(e) => warn!(
                referral_id = %referral.id,
                error = %e,
                "提交积分入账失败"
            ),
        }
    }

    fn notify(
        &self,
        event: NotificationEvent,
        recipient_id: &str,
        referral: &Referral,
        actor_id: &str,
    ) {
        self.publisher.publish(
            event,
            recipient_id,
            json!({
                "referralId": referral.id,
                "referralNumber": referral.referral_number,
                "status": referral.status,
                "actorId": actor_id,
            }),
        );
    }
}
