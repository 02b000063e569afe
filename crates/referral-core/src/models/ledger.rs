//! 积分账本实体定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{EntryType, Tier};

/// 积分流水
///
/// 只追加不修改，冲正通过新增反向记录完成
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RewardLedgerEntry {
    pub id: i64,
    pub owner_id: String,
    pub entry_type: EntryType,
    /// 带符号积分，扣减为负
    pub points: i64,
    /// 幂等来源（转诊 ID、课程 ID 等）
    pub source_ref: String,
    #[sqlx(default)]
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 待写入的流水
#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerEntry {
    pub owner_id: String,
    pub entry_type: EntryType,
    pub points: i64,
    pub source_ref: String,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 扣减结果
#[derive(Debug, Clone)]
pub enum DebitOutcome {
    Applied(RewardLedgerEntry),
    Insufficient { available: i64 },
}

/// 运行余额重建结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuiltTotal {
    /// 重建前的运行余额
    pub previous: i64,
    /// 按流水求和得到的余额
    pub total: i64,
}

/// 积分概要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardSummary {
    pub points: i64,
    pub tier: Tier,
    pub next_tier: Option<Tier>,
    pub points_to_next_tier: Option<i64>,
}

/// 根据余额计算等级
pub fn tier_of(balance: i64) -> Tier {
    Tier::ALL
        .iter()
        .rev()
        .copied()
        .find(|tier| balance >= tier.threshold())
        .unwrap_or(Tier::Bronze)
}

/// 下一等级（已是最高等级时为 None）
pub fn next_tier(balance: i64) -> Option<Tier> {
    Tier::ALL
        .iter()
        .copied()
        .find(|tier| tier.threshold() > balance)
}

impl RewardSummary {
    pub fn from_balance(points: i64) -> Self {
        let next = next_tier(points);
        Self {
            points,
            tier: tier_of(points),
            next_tier: next,
            points_to_next_tier: next.map(|tier| tier.threshold() - points),
        }
    }
}
