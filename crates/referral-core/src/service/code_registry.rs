//! 兑换码注册服务
//!
//! 负责兑换码的签发、停用、限制策略维护与过期清理。
//!
//! ## 签发流程
//!
//! 1. 已有未过期的启用码 -> AlreadyIssued；已过期的先停用
//! 2. 随机生成 6 位码并直接插入
//! 3. 仅在存储报告 code 唯一冲突时重新生成，超过次数上限 -> ConflictRetryExhausted

use std::sync::Arc;

use chrono::Duration;
use rand::Rng;
use referral_shared::config::CodesConfig;
use referral_shared::observability::metrics;
use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::error::{ReferralError, Result};
use crate::models::{CODE_ALPHABET, CODE_LENGTH, CodeRestrictions, ReferralCode, normalize_code};
use crate::repository::{CodeRepositoryTrait, InsertCodeOutcome};

/// 兑换码生成函数
pub type CodeGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// 随机生成一个兑换码
pub fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// 新码有效期上限（天）
pub const MAX_VALIDITY_DAYS: i64 = 3650;

pub struct CodeRegistry {
    codes: Arc<dyn CodeRepositoryTrait>,
    clock: Arc<dyn Clock>,
    default_restrictions: CodeRestrictions,
    validity: Duration,
    max_attempts: u32,
    generator: CodeGenerator,
}

impl CodeRegistry {
    /// 默认限制与有效期在此处校验，非法配置直接拒绝启动
    pub fn new(
        codes: Arc<dyn CodeRepositoryTrait>,
        clock: Arc<dyn Clock>,
        config: CodesConfig,
    ) -> Result<Self> {
        let default_restrictions =
            CodeRestrictions::new(config.default_max_per_day, config.default_max_per_month);
        default_restrictions.validate().map_err(|e| {
            ReferralError::Validation(format!("codes.default_max_per_* 配置无效: {e}"))
        })?;
        if !(1..=MAX_VALIDITY_DAYS).contains(&config.default_validity_days) {
            return Err(ReferralError::Validation(format!(
                "codes.default_validity_days 必须在 1-{MAX_VALIDITY_DAYS} 之间: {}",
                config.default_validity_days
            )));
        }

        Ok(Self {
            codes,
            clock,
            default_restrictions,
            validity: Duration::days(config.default_validity_days),
            max_attempts: config.max_generation_attempts.max(1),
            generator: Arc::new(generate_code),
        })
    }

    /// 替换生成函数
    pub fn with_generator(mut self, generator: CodeGenerator) -> Self {
        self.generator = generator;
        self
    }

    /// 为服务方签发兑换码
    #[instrument(skip(self), fields(owner_id = %owner_id))]
    pub async fn issue_code(&self, owner_id: &str) -> Result<ReferralCode> {
        if owner_id.trim().is_empty() {
            return Err(ReferralError::Validation("ownerId 不能为空".to_string()));
        }

        let now = self.clock.now();
        if let Some(existing) = self.codes.find_active_by_owner(owner_id).await? {
            if existing.is_live(now) {
                return Err(ReferralError::AlreadyIssued(owner_id.to_string()));
            }
            // 过期但仍启用的码会占住服务方的唯一名额
            self.codes.deactivate_code(&existing.code, now).await?;
            info!(code = %existing.code, "停用已过期的兑换码");
        }

        let max_attempts = self.max_attempts;
        for attempt in 1..=max_attempts {
            let candidate = (self.generator)();
            let record = ReferralCode::issue(
                candidate,
                owner_id,
                self.default_restrictions.clone(),
                self.validity,
                now,
            );

            match self.codes.insert_code(&record).await? {
                InsertCodeOutcome::Inserted => {
                    metrics::record_code_issued(attempt);
                    info!(code = %record.code, attempt, "兑换码签发成功");
                    return Ok(record);
                }
                InsertCodeOutcome::CodeTaken => {
                    debug!(code = %record.code, attempt, "兑换码冲突，重新生成");
                }
                InsertCodeOutcome::OwnerHasActive => {
                    warn!("并发签发，服务方已有启用中的兑换码");
                    return Err(ReferralError::AlreadyIssued(owner_id.to_string()));
                }
            }
        }

        error!(
            attempts = max_attempts,
            "兑换码生成重试耗尽，请检查码空间与 codes.max_generation_attempts 配置"
        );
        Err(ReferralError::ConflictRetryExhausted {
            entity: "referral_code",
            attempts: max_attempts,
        })
    }

    /// 查询服务方当前有效的兑换码
    pub async fn get_mine(&self, owner_id: &str) -> Result<ReferralCode> {
        let now = self.clock.now();
        self.codes
            .find_active_by_owner(owner_id)
            .await?
            .filter(|code| code.is_live(now))
            .ok_or_else(|| ReferralError::not_found("兑换码", owner_id))
    }

    /// 按码查询
    pub async fn find(&self, code: &str) -> Result<ReferralCode> {
        let code = normalize_code(code);
        self.codes
            .find_by_code(&code)
            .await?
            .ok_or_else(|| ReferralError::not_found("兑换码", code))
    }

    /// 停用服务方的兑换码，没有启用码时同样返回成功
    #[instrument(skip(self), fields(owner_id = %owner_id))]
    pub async fn deactivate(&self, owner_id: &str) -> Result<bool> {
        let Some(existing) = self.codes.find_active_by_owner(owner_id).await? else {
            return Ok(false);
        };

        let changed = self
            .codes
            .deactivate_code(&existing.code, self.clock.now())
            .await?;
        if changed {
            info!(code = %existing.code, "兑换码已停用");
        }
        Ok(changed)
    }

    /// 替换限制策略
    #[instrument(skip(self, restrictions), fields(owner_id = %owner_id))]
    pub async fn update_restrictions(
        &self,
        owner_id: &str,
        restrictions: CodeRestrictions,
    ) -> Result<ReferralCode> {
        restrictions.validate()?;
        let restrictions = CodeRestrictions {
            allowed_specialties: clean_list(restrictions.allowed_specialties),
            allowed_regions: clean_list(restrictions.allowed_regions),
            ..restrictions
        };

        let mut code = self.get_mine(owner_id).await?;
        let now = self.clock.now();
        if !self
            .codes
            .update_restrictions(&code.code, &restrictions, now)
            .await?
        {
            return Err(ReferralError::not_found("兑换码", owner_id));
        }

        code.restrictions = restrictions;
        code.updated_at = now;
        info!(code = %code.code, "兑换限制已更新");
        Ok(code)
    }

    /// 停用所有已过期的兑换码
    pub async fn expire_stale(&self) -> Result<u64> {
        let expired = self.codes.expire_stale(self.clock.now()).await?;
        if expired > 0 {
            info!(expired, "已停用过期兑换码");
        }
        Ok(expired)
    }

    /// 记录一次评分
    pub async fn record_rating(&self, code: &str, rating: u8) -> Result<()> {
        if !(1..=5).contains(&rating) {
            return Err(ReferralError::Validation(format!(
                "评分必须在 1-5 之间: {}",
                rating
            )));
        }
        if !self
            .codes
            .record_rating(code, rating, self.clock.now())
            .await?
        {
            return Err(ReferralError::not_found("兑换码", code));
        }
        Ok(())
    }

    /// 记录一次成功转诊
    pub async fn record_success(&self, code: &str) -> Result<()> {
        self.codes.increment_successful(code, self.clock.now()).await
    }
}

fn clean_list(values: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    cleaned.dedup();
    cleaned
}
