//! 服务层
//!
//! 兑换码注册、兑换校验、转诊生命周期与积分账本

pub mod code_registry;
pub mod dto;
pub mod ledger;
pub mod lifecycle;
pub mod redemption;

pub use code_registry::{CodeGenerator, CodeRegistry, generate_code};
pub use dto::{Redemption, RedemptionPayload, TransitionRequest};
pub use ledger::{MAX_HISTORY_LIMIT, RewardLedger};
pub use lifecycle::{LifecycleManager, MAX_LIST_LIMIT, MAX_MESSAGE_CHARS};
pub use redemption::RedemptionValidator;
