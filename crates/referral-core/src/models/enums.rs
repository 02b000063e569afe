//! 转诊核心枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use serde::{Deserialize, Serialize};

/// 转诊状态
///
/// 初始为 Pending，Rejected/Completed/Cancelled 为终态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferralStatus {
    /// 待接收方处理
    #[default]
    Pending,
    /// 接收方已接受
    Accepted,
    /// 接收方已拒绝
    Rejected,
    /// 诊疗已完成
    Completed,
    /// 任一方取消
    Cancelled,
}

/// 流转操作人约束
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorRule {
    /// 仅接收方（专科医生）
    ReceivingParty,
    /// 发起方或接收方均可
    EitherParty,
}

impl ReferralStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Completed | Self::Cancelled)
    }

    /// 状态机的合法边
    pub fn can_transition_to(&self, target: ReferralStatus) -> bool {
        use ReferralStatus::*;
        matches!(
            (self, target),
            (Pending, Accepted)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Accepted, Completed)
                | (Accepted, Cancelled)
        )
    }

    /// 进入该状态所需的操作人
    ///
    /// 每个目标状态的操作人约束与来源状态无关；Pending 不可作为目标
    pub fn required_actor(&self) -> Option<ActorRule> {
        match self {
            Self::Pending => None,
            Self::Accepted | Self::Rejected | Self::Completed => Some(ActorRule::ReceivingParty),
            Self::Cancelled => Some(ActorRule::EitherParty),
        }
    }
}

impl std::fmt::Display for ReferralStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 紧急程度
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// 账本记录类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum EntryType {
    /// 提交转诊（+）
    ReferralSubmitted,
    /// 转诊完成（+）
    ReferralCompleted,
    /// 完成课程（+）
    CourseCompleted,
    /// 积分兑换（-）
    Redeemed,
    /// 人工冲正（±）
    Adjustment,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReferralSubmitted => "referral_submitted",
            Self::ReferralCompleted => "referral_completed",
            Self::CourseCompleted => "course_completed",
            Self::Redeemed => "redeemed",
            Self::Adjustment => "adjustment",
        }
    }

    /// 是否为入账类型（credit 仅接受此类）
    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            Self::ReferralSubmitted | Self::ReferralCompleted | Self::CourseCompleted
        )
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 会员等级
///
/// 完全由积分余额推导，不落库
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
}

impl Tier {
    /// 按门槛升序排列的全部等级
    pub const ALL: [Tier; 5] = [
        Tier::Bronze,
        Tier::Silver,
        Tier::Gold,
        Tier::Platinum,
        Tier::Diamond,
    ];

    /// 进入该等级所需的最低积分
    pub fn threshold(&self) -> i64 {
        match self {
            Self::Bronze => 0,
            Self::Silver => 500,
            Self::Gold => 1500,
            Self::Platinum => 3000,
            Self::Diamond => 5000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referral_status_serialization() {
        assert_eq!(
            serde_json::to_string(&ReferralStatus::Cancelled).unwrap(),
            "\"CANCELLED\""
        );
        assert_eq!(
            serde_json::from_str::<ReferralStatus>("\"ACCEPTED\"").unwrap(),
            ReferralStatus::Accepted
        );
    }

    #[test]
    fn test_state_machine_edges() {
        use ReferralStatus::*;
        let all = [Pending, Accepted, Rejected, Completed, Cancelled];
        let allowed = [
            (Pending, Accepted),
            (Pending, Rejected),
            (Pending, Cancelled),
            (Accepted, Completed),
            (Accepted, Cancelled),
        ];

        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_terminal_states_have_no_exit() {
        use ReferralStatus::*;
        for terminal in [Rejected, Completed, Cancelled] {
            assert!(terminal.is_terminal());
            for to in [Pending, Accepted, Rejected, Completed, Cancelled] {
                assert!(!terminal.can_transition_to(to));
            }
        }
    }

    #[test]
    fn test_required_actor() {
        assert_eq!(ReferralStatus::Pending.required_actor(), None);
        assert_eq!(
            ReferralStatus::Completed.required_actor(),
            Some(ActorRule::ReceivingParty)
        );
        assert_eq!(
            ReferralStatus::Cancelled.required_actor(),
            Some(ActorRule::EitherParty)
        );
    }

    #[test]
    fn test_entry_type_serialization() {
        assert_eq!(
            serde_json::to_string(&EntryType::ReferralCompleted).unwrap(),
            "\"referral_completed\""
        );
        assert_eq!(EntryType::Redeemed.as_str(), "redeemed");
        assert!(EntryType::CourseCompleted.is_credit());
        assert!(!EntryType::Redeemed.is_credit());
    }

    #[test]
    fn test_tier_thresholds_ascending() {
        let thresholds: Vec<i64> = Tier::ALL.iter().map(Tier::threshold).collect();
        assert_eq!(thresholds, vec![0, 500, 1500, 3000, 5000]);
        assert_eq!(serde_json::to_string(&Tier::Platinum).unwrap(), "\"platinum\"");
    }
}
