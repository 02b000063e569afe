//! 转诊核心领域模型

pub mod code;
pub mod enums;
pub mod ledger;
pub mod referral;

pub use code::{
    CODE_ALPHABET, CODE_LENGTH, CodeAnalytics, CodeRestrictions, CodeUsage, QuotaReceipt,
    ReferralCode, is_well_formed, normalize_code,
};
pub use enums::{ActorRule, EntryType, ReferralStatus, Tier, Urgency};
pub use ledger::{
    DebitOutcome, NewLedgerEntry, RebuiltTotal, RewardLedgerEntry, RewardSummary, next_tier, tier_of,
};
pub use referral::{
    NewReferral, PartyRole, Referral, ReferralMessage, StatusHistoryEntry, StatusUpdate,
    TransitionPlan, generate_referral_number,
};
