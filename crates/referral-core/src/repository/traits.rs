//! 仓储 Trait 定义
//!
//! 服务层只依赖这些接口，PostgreSQL 与内存实现可互换，也便于 mock 测试

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    CodeRestrictions, CodeUsage, DebitOutcome, NewLedgerEntry, QuotaReceipt, RebuiltTotal,
    Referral, ReferralCode, ReferralMessage, ReferralStatus, RewardLedgerEntry, StatusUpdate,
};

/// 写入兑换码的结果
///
/// 唯一约束冲突由存储层报告，调用方据此决定是否重新生成
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertCodeOutcome {
    Inserted,
    /// code 已被占用
    CodeTaken,
    /// 该服务方已有启用中的码
    OwnerHasActive,
}

/// 兑换码仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CodeRepositoryTrait: Send + Sync {
    async fn insert_code(&self, code: &ReferralCode) -> Result<InsertCodeOutcome>;
    async fn find_by_code(&self, code: &str) -> Result<Option<ReferralCode>>;
    /// 服务方当前 active=true 的码（可能已过期）
    async fn find_active_by_owner(&self, owner_id: &str) -> Result<Option<ReferralCode>>;
    async fn deactivate_code(&self, code: &str, now: DateTime<Utc>) -> Result<bool>;
    async fn update_restrictions(
        &self,
        code: &str,
        restrictions: &CodeRestrictions,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    // 额度
    /// 原子地复核启用/有效期/滚动窗口并占用一个额度
    async fn consume_quota(
        &self,
        code: &str,
        now: DateTime<Utc>,
        idempotency_key: Option<String>,
    ) -> Result<QuotaReceipt>;
    /// 回滚一次额度占用
    async fn release_quota(&self, receipt: &QuotaReceipt) -> Result<()>;
    async fn attach_usage(&self, receipt: &QuotaReceipt, referral_id: Uuid) -> Result<()>;
    async fn find_usage_by_key(&self, code: &str, idempotency_key: &str)
    -> Result<Option<CodeUsage>>;

    // 统计
    async fn increment_successful(&self, code: &str, now: DateTime<Utc>) -> Result<()>;
    async fn record_rating(&self, code: &str, rating: u8, now: DateTime<Utc>) -> Result<bool>;

    /// 停用所有已过期但仍启用的码，返回影响条数
    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// 转诊仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReferralRepositoryTrait: Send + Sync {
    /// 转诊单号冲突时返回 false
    async fn insert(&self, referral: &Referral) -> Result<bool>;
    async fn get(&self, id: Uuid) -> Result<Option<Referral>>;
    async fn list_for_party(
        &self,
        party_id: &str,
        status: Option<ReferralStatus>,
        limit: i64,
    ) -> Result<Vec<Referral>>;
    /// 当前状态等于 expected 时应用流转并追加历史，否则返回 false
    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: ReferralStatus,
        update: &StatusUpdate,
    ) -> Result<bool>;
    async fn set_schedule(
        &self,
        id: Uuid,
        expected: ReferralStatus,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;
    /// 仅在未评分时写入
    async fn set_rating(&self, id: Uuid, rating: i16, now: DateTime<Utc>) -> Result<bool>;
    /// 撤销评分，兑换码统计写入失败时调用
    async fn clear_rating(&self, id: Uuid, now: DateTime<Utc>) -> Result<()>;

    // 留言
    async fn append_message(
        &self,
        referral_id: Uuid,
        sender_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<ReferralMessage>;
    async fn list_messages(&self, referral_id: Uuid) -> Result<Vec<ReferralMessage>>;
}

/// 积分账本仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerRepositoryTrait: Send + Sync {
    /// (owner, type, source_ref) 已存在时返回 None
    async fn append_credit(&self, entry: &NewLedgerEntry) -> Result<Option<RewardLedgerEntry>>;
    /// 余额检查与扣减在同一原子步骤内完成
    async fn append_debit(&self, entry: &NewLedgerEntry) -> Result<DebitOutcome>;
    /// 运行余额
    async fn balance(&self, owner_id: &str) -> Result<i64>;
    /// 持有该用户的余额锁，按流水求和并覆盖运行余额
    async fn rebuild_running_total(&self, owner_id: &str) -> Result<RebuiltTotal>;
    async fn list_entries(&self, owner_id: &str, limit: i64) -> Result<Vec<RewardLedgerEntry>>;
}
