//! 仓储层
//!
//! 封装兑换码、转诊、积分账本的数据访问。
//!
//! ## 设计原则
//!
//! - 仓储只负责持久化和存储层原子性，业务规则在服务层
//! - 唯一性冲突由存储报告，不做先查后写
//! - PostgreSQL 实现用于生产，内存实现用于测试与本地开发

mod code_repo;
mod ledger_repo;
mod memory;
mod referral_repo;
mod traits;

pub use code_repo::CodeRepository;
pub use ledger_repo::LedgerRepository;
pub use memory::{MemoryCodeRepository, MemoryLedgerRepository, MemoryReferralRepository};
pub use referral_repo::ReferralRepository;
pub use traits::*;
