//! 积分账本服务
//!
//! 入账按 (owner, type, source_ref) 幂等，扣减与余额检查在仓储层原子完成。
//! 等级完全由余额推导

use std::sync::Arc;

use referral_shared::config::RewardsConfig;
use referral_shared::observability::metrics;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{ReferralError, Result};
use crate::models::{
    DebitOutcome, EntryType, NewLedgerEntry, RebuiltTotal, RewardLedgerEntry, RewardSummary, Tier, tier_of,
};
use crate::repository::LedgerRepositoryTrait;

/// 历史查询的最大条数
pub const MAX_HISTORY_LIMIT: i64 = 200;

pub struct RewardLedger {
    ledger: Arc<dyn LedgerRepositoryTrait>,
    clock: Arc<dyn Clock>,
    rewards: RewardsConfig,
}

impl RewardLedger {
    pub fn new(
        ledger: Arc<dyn LedgerRepositoryTrait>,
        clock: Arc<dyn Clock>,
        rewards: RewardsConfig,
    ) -> Self {
        Self {
            ledger,
            clock,
            rewards,
        }
    }

    /// 积分奖励配置
    pub fn rewards(&self) -> &RewardsConfig {
        &self.rewards
    }

    /// 入账
    ///
    /// 同一来源重复入账返回 DuplicateSource，不改变余额
    #[instrument(skip(self), fields(owner_id = %owner_id, entry_type = %entry_type))]
    pub async fn credit(
        &self,
        owner_id: &str,
        entry_type: EntryType,
        points: i64,
        source_ref: &str,
    ) -> Result<RewardLedgerEntry> {
        if !entry_type.is_credit() {
            return Err(ReferralError::Validation(format!(
                "{} 不是入账类型",
                entry_type
            )));
        }
        self.append_credit(owner_id, entry_type, points, source_ref, None)
            .await
    }

    /// 扣减积分
    #[instrument(skip(self, reason), fields(owner_id = %owner_id))]
    pub async fn debit(&self, owner_id: &str, points: i64, reason: &str) -> Result<RewardLedgerEntry> {
        let source_ref = Uuid::new_v4().to_string();
        self.append_debit(owner_id, EntryType::Redeemed, points, &source_ref, reason)
            .await
    }

    /// 人工冲正，正数入账、负数扣减，扣减同样不允许透支
    #[instrument(skip(self, reason), fields(owner_id = %owner_id))]
    pub async fn adjust(
        &self,
        owner_id: &str,
        points: i64,
        source_ref: &str,
        reason: &str,
    ) -> Result<RewardLedgerEntry> {
        match points {
            0 => Err(ReferralError::Validation("冲正积分不能为 0".to_string())),
            p if p > 0 => {
                self.append_credit(
                    owner_id,
                    EntryType::Adjustment,
                    p,
                    source_ref,
                    Some(reason.to_string()),
                )
                .await
            }
            p => {
                self.append_debit(owner_id, EntryType::Adjustment, -p, source_ref, reason)
                    .await
            }
        }
    }

    pub async fn balance_of(&self, owner_id: &str) -> Result<i64> {
        self.ledger.balance(owner_id).await
    }

    pub async fn tier_for(&self, owner_id: &str) -> Result<Tier> {
        Ok(tier_of(self.balance_of(owner_id).await?))
    }

    pub async fn summary(&self, owner_id: &str) -> Result<RewardSummary> {
        Ok(RewardSummary::from_balance(self.balance_of(owner_id).await?))
    }

    /// 最近的流水，时间倒序
    pub async fn history(&self, owner_id: &str, limit: i64) -> Result<Vec<RewardLedgerEntry>> {
        self.ledger
            .list_entries(owner_id, limit.clamp(1, MAX_HISTORY_LIMIT))
            .await
    }

    /// 由流水重算运行余额并覆盖
    #[instrument(skip(self), fields(owner_id = %owner_id))]
    pub async fn replay_balance(&self, owner_id: &str) -> Result<i64> {
        let RebuiltTotal { previous, total } = self.ledger.rebuild_running_total(owner_id).await?;
        if previous != total {
            warn!(previous, total, "运行余额与流水不一致，已按流水修正");
        }
        Ok(total)
    }

    /// 课程完成奖励
    pub async fn credit_course_completion(
        &self,
        owner_id: &str,
        course_id: &str,
    ) -> Result<RewardLedgerEntry> {
        self.credit(
            owner_id,
            EntryType::CourseCompleted,
            self.rewards.course_completion_points,
            course_id,
        )
        .await
    }

    async fn append_credit(
        &self,
        owner_id: &str,
        entry_type: EntryType,
        points: i64,
        source_ref: &str,
        remark: Option<String>,
    ) -> Result<RewardLedgerEntry> {
        validate_owner_and_points(owner_id, points)?;
        if source_ref.trim().is_empty() {
            return Err(ReferralError::Validation("sourceRef 不能为空".to_string()));
        }

        let entry = NewLedgerEntry {
            owner_id: owner_id.to_string(),
            entry_type,
            points,
            source_ref: source_ref.to_string(),
            remark,
            created_at: self.clock.now(),
        };

        let Some(created) = self.ledger.append_credit(&entry).await? else {
            return Err(ReferralError::DuplicateSource {
                owner_id: owner_id.to_string(),
                entry_type: entry_type.to_string(),
                source_ref: source_ref.to_string(),
            });
        };

        metrics::record_ledger_entry(entry_type.as_str());
        info!(entry_id = created.id, points, source_ref = %source_ref, "积分入账");
        Ok(created)
    }

    async fn append_debit(
        &self,
        owner_id: &str,
        entry_type: EntryType,
        points: i64,
        source_ref: &str,
        reason: &str,
    ) -> Result<RewardLedgerEntry> {
        validate_owner_and_points(owner_id, points)?;

        let entry = NewLedgerEntry {
            owner_id: owner_id.to_string(),
            entry_type,
            points: -points,
            source_ref: source_ref.to_string(),
            remark: Some(reason.to_string()),
            created_at: self.clock.now(),
        };

        match self.ledger.append_debit(&entry).await? {
            DebitOutcome::Applied(created) => {
                metrics::record_ledger_entry(entry_type.as_str());
                info!(entry_id = created.id, points, "积分扣减");
                Ok(created)
            }
            DebitOutcome::Insufficient { available } => Err(ReferralError::InsufficientBalance {
                required: points,
                available,
            }),
        }
    }
}

fn validate_owner_and_points(owner_id: &str, points: i64) -> Result<()> {
    if owner_id.trim().is_empty() {
        return Err(ReferralError::Validation("ownerId 不能为空".to_string()));
    }
    if points <= 0 {
        return Err(ReferralError::Validation(format!(
            "积分必须大于 0: {}",
            points
        )));
    }
    Ok(())
}
