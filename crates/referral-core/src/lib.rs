//! 转诊受理与生命周期核心
//!
//! 提供兑换码签发与兑换、转诊状态机、积分账本，
//! 存储可选 PostgreSQL 或内存实现

pub mod clock;
pub mod error;
pub mod models;
pub mod notification;
pub mod repository;
pub mod service;

use std::sync::Arc;

use referral_shared::config::AppConfig;
use sqlx::PgPool;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ReferralError, Result};
pub use notification::{NotificationPublisher, NotificationSink};
pub use service::{
    CodeRegistry, LifecycleManager, RedemptionPayload, RedemptionValidator, RewardLedger,
    TransitionRequest,
};

use repository::{
    CodeRepository, CodeRepositoryTrait, LedgerRepository, LedgerRepositoryTrait,
    MemoryCodeRepository, MemoryLedgerRepository, MemoryReferralRepository, ReferralRepository,
    ReferralRepositoryTrait,
};

/// 三类仓储
#[derive(Clone)]
pub struct Repositories {
    pub codes: Arc<dyn CodeRepositoryTrait>,
    pub referrals: Arc<dyn ReferralRepositoryTrait>,
    pub ledger: Arc<dyn LedgerRepositoryTrait>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            codes: Arc::new(CodeRepository::new(pool.clone())),
            referrals: Arc::new(ReferralRepository::new(pool.clone())),
            ledger: Arc::new(LedgerRepository::new(pool)),
        }
    }

    pub fn memory() -> Self {
        Self {
            codes: Arc::new(MemoryCodeRepository::new()),
            referrals: Arc::new(MemoryReferralRepository::new()),
            ledger: Arc::new(MemoryLedgerRepository::new()),
        }
    }
}

/// 组装好的核心服务
#[derive(Clone)]
pub struct ReferralCore {
    pub registry: Arc<CodeRegistry>,
    pub redemption: Arc<RedemptionValidator>,
    pub lifecycle: Arc<LifecycleManager>,
    pub ledger: Arc<RewardLedger>,
}

impl ReferralCore {
    pub fn new(
        repos: Repositories,
        publisher: NotificationPublisher,
        clock: Arc<dyn Clock>,
        config: &AppConfig,
    ) -> Result<Self> {
        let registry = CodeRegistry::new(repos.codes.clone(), clock.clone(), config.codes.clone())?;
        Ok(Self::with_registry(registry, repos, publisher, clock, config))
    }

    /// 使用自定义的兑换码注册服务（如替换生成函数）
    pub fn with_registry(
        registry: CodeRegistry,
        repos: Repositories,
        publisher: NotificationPublisher,
        clock: Arc<dyn Clock>,
        config: &AppConfig,
    ) -> Self {
        let registry = Arc::new(registry);
        let ledger = Arc::new(RewardLedger::new(
            repos.ledger.clone(),
            clock.clone(),
            config.rewards.clone(),
        ));
        let lifecycle = Arc::new(LifecycleManager::new(
            repos.referrals.clone(),
            registry.clone(),
            ledger.clone(),
            publisher,
            clock.clone(),
        ));
        let redemption = Arc::new(RedemptionValidator::new(
            repos.codes.clone(),
            lifecycle.clone(),
            clock,
        ));

        Self {
            registry,
            redemption,
            lifecycle,
            ledger,
        }
    }
}
