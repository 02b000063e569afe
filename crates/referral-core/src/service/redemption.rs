//! 兑换校验服务
//!
//! 匿名患者凭兑换码发起转诊。校验顺序固定：
//! 停用 → 过期 → 限制策略 → 滚动窗口额度。
//! 额度在仓储层原子占用，转诊创建失败时回滚占用

use std::sync::Arc;
use std::time::Instant;

use referral_shared::observability::metrics;
use tracing::{error, info, instrument, warn};

use super::dto::{Redemption, RedemptionPayload};
use super::lifecycle::LifecycleManager;
use crate::clock::Clock;
use crate::error::{ReferralError, Result};
use crate::models::{NewReferral, is_well_formed, normalize_code};
use crate::repository::CodeRepositoryTrait;

/// 幂等键最大长度
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

pub struct RedemptionValidator {
    codes: Arc<dyn CodeRepositoryTrait>,
    lifecycle: Arc<LifecycleManager>,
    clock: Arc<dyn Clock>,
}

impl RedemptionValidator {
    pub fn new(
        codes: Arc<dyn CodeRepositoryTrait>,
        lifecycle: Arc<LifecycleManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            codes,
            lifecycle,
            clock,
        }
    }

    /// 兑换
    #[instrument(skip(self, payload), fields(code = %raw_code.trim()))]
    pub async fn redeem(&self, raw_code: &str, payload: RedemptionPayload) -> Result<Redemption> {
        let start = Instant::now();
        let result = self.redeem_inner(raw_code, payload).await;

        let label = match &result {
            Ok(r) if r.replayed => "replayed",
            Ok(_) => "success",
            Err(e) => e.error_code(),
        };
        metrics::record_redemption(label, start.elapsed().as_secs_f64());
        result
    }

    async fn redeem_inner(&self, raw_code: &str, payload: RedemptionPayload) -> Result<Redemption> {
        let code = normalize_code(raw_code);
        if !is_well_formed(&code) {
            return Err(ReferralError::not_found("兑换码", code));
        }

        let key = payload
            .idempotency_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string);
        if let Some(k) = &key {
            if k.len() > MAX_IDEMPOTENCY_KEY_LEN {
                return Err(ReferralError::Validation(format!(
                    "idempotencyKey 不能超过 {} 个字符",
                    MAX_IDEMPOTENCY_KEY_LEN
                )));
            }
            if let Some(replayed) = self.replay(&code, k).await? {
                return Ok(replayed);
            }
        }

        let record = self
            .codes
            .find_by_code(&code)
            .await?
            .ok_or_else(|| ReferralError::not_found("兑换码", &code))?;

        // 预检，额度占用时在锁内复核
        record.ensure_redeemable(self.clock.now())?;
        record
            .restrictions
            .permits(payload.specialty.as_deref(), payload.region.as_deref())?;

        let new = NewReferral {
            from_party_id: record.owner_id.clone(),
            to_party_id: payload.specialist_id,
            urgency: payload.urgency.unwrap_or_default(),
            specialty: payload.specialty,
            region: payload.region,
            patient_data: payload.patient_data,
            clinical_data: payload.clinical_data,
            source_code: Some(code.clone()),
            note: None,
        };
        new.validate()?;

        let receipt = match self
            .codes
            .consume_quota(&code, self.clock.now(), key.clone())
            .await
        {
            Ok(receipt) => receipt,
            Err(ReferralError::DuplicateSource { .. }) => {
                // 同一幂等键的并发请求已先占用额度
                let Some(k) = &key else {
                    return Err(ReferralError::ConcurrencyConflict);
                };
                return self
                    .replay(&code, k)
                    .await?
                    .ok_or(ReferralError::ConcurrencyConflict);
            }
            Err(e) => return Err(e),
        };

        let referral = match self.lifecycle.create_referral(new).await {
            Ok(referral) => referral,
            Err(e) => {
                if let Err(release_err) = self.codes.release_quota(&receipt).await {
                    error!(
                        usage_id = %receipt.usage_id,
                        error = %release_err,
                        "转诊创建失败后回滚额度失败"
                    );
                }
                warn!(error = %e, "转诊创建失败，已回滚额度");
                return Err(e);
            }
        };

        if let Err(e) = self.codes.attach_usage(&receipt, referral.id).await {
            error!(
                usage_id = %receipt.usage_id,
                referral_id = %referral.id,
                error = %e,
                "兑换记录关联转诊失败"
            );
        }

        info!(
            referral_id = %referral.id,
            tracking_id = %referral.referral_number,
            owner_id = %receipt.owner_id,
            "兑换成功"
        );
        Ok(Redemption::new(referral, false))
    }

    /// 按幂等键查找已有兑换
    ///
    /// 记录存在但尚未关联转诊说明前一个请求仍在处理中
    async fn replay(&self, code: &str, key: &str) -> Result<Option<Redemption>> {
        let Some(usage) = self.codes.find_usage_by_key(code, key).await? else {
            return Ok(None);
        };
        let Some(referral_id) = usage.referral_id else {
            return Err(ReferralError::ConcurrencyConflict);
        };

        let referral = self.lifecycle.load(referral_id).await?;
        info!(referral_id = %referral.id, "幂等重放兑换");
        Ok(Some(Redemption::new(referral, true)))
    }
}
