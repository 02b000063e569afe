//! 应用状态定义

use referral_core::ReferralCore;
use referral_shared::database::Database;

use crate::auth::JwtManager;

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub core: ReferralCore,
    pub jwt: JwtManager,
    /// 内存存储时为 None
    pub database: Option<Database>,
}

impl AppState {
    pub fn new(core: ReferralCore, jwt: JwtManager, database: Option<Database>) -> Self {
        Self {
            core,
            jwt,
            database,
        }
    }
}
