//! 兑换码仓储（PostgreSQL）
//!
//! 唯一性依赖表约束：`referral_codes_code_key` 保证 code 全局唯一，
//! 部分唯一索引 `uq_referral_codes_active_owner` 保证每个服务方至多一个启用中的码

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, types::Json};
use uuid::Uuid;

use super::traits::{CodeRepositoryTrait, InsertCodeOutcome};
use crate::error::{ReferralError, Result};
use crate::models::code::{daily_window, monthly_window};
use crate::models::{CodeRestrictions, CodeUsage, QuotaReceipt, ReferralCode};

const CODE_COLUMNS: &str = r#"
    code, owner_id, active, expires_at, usage_count, last_used_at, restrictions,
    total_referrals, successful_referrals, average_rating, rating_count, last_referral_date,
    created_at, updated_at
"#;

const CODE_UNIQUE: &str = "referral_codes_code_key";
const ACTIVE_OWNER_UNIQUE: &str = "uq_referral_codes_active_owner";
const USAGE_IDEMPOTENCY_UNIQUE: &str = "uq_code_usages_idempotency";

/// 返回唯一约束名（非唯一冲突时为 None）
pub(crate) fn unique_violation(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            Some(db_err.constraint().unwrap_or_default().to_string())
        }
        _ => None,
    }
}

pub struct CodeRepository {
    pool: PgPool,
}

impl CodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 在事务中锁定兑换码行
    async fn lock_code_in_tx(tx: &mut PgConnection, code: &str) -> Result<Option<ReferralCode>> {
        let sql = format!("SELECT {CODE_COLUMNS} FROM referral_codes WHERE code = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, ReferralCode>(&sql)
            .bind(code)
            .fetch_optional(tx)
            .await?;
        Ok(row)
    }

    /// 统计滚动窗口内的兑换次数，返回 (24 小时, 30 天)
    async fn window_counts_in_tx(
        tx: &mut PgConnection,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<(i64, i64)> {
        let counts: (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE used_at > $2),
                COUNT(*) FILTER (WHERE used_at > $3)
            FROM referral_code_usages
            WHERE code = $1
            "#,
        )
        .bind(code)
        .bind(now - daily_window())
        .bind(now - monthly_window())
        .fetch_one(tx)
        .await?;
        Ok(counts)
    }
}

#[async_trait]
impl CodeRepositoryTrait for CodeRepository {
    async fn insert_code(&self, code: &ReferralCode) -> Result<InsertCodeOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO referral_codes (code, owner_id, active, expires_at, usage_count, restrictions, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 0, $5, $6, $7)
            "#,
        )
        .bind(&code.code)
        .bind(&code.owner_id)
        .bind(code.active)
        .bind(code.expires_at)
        .bind(Json(&code.restrictions))
        .bind(code.created_at)
        .bind(code.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(InsertCodeOutcome::Inserted),
            Err(err) => match unique_violation(&err).as_deref() {
                Some(CODE_UNIQUE) => Ok(InsertCodeOutcome::CodeTaken),
                Some(ACTIVE_OWNER_UNIQUE) => Ok(InsertCodeOutcome::OwnerHasActive),
                _ => Err(err.into()),
            },
        }
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<ReferralCode>> {
        let sql = format!("SELECT {CODE_COLUMNS} FROM referral_codes WHERE code = $1");
        let row = sqlx::query_as::<_, ReferralCode>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_active_by_owner(&self, owner_id: &str) -> Result<Option<ReferralCode>> {
        let sql =
            format!("SELECT {CODE_COLUMNS} FROM referral_codes WHERE owner_id = $1 AND active");
        let row = sqlx::query_as::<_, ReferralCode>(&sql)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn deactivate_code(&self, code: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE referral_codes SET active = FALSE, updated_at = $2 WHERE code = $1 AND active",
        )
        .bind(code)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_restrictions(
        &self,
        code: &str,
        restrictions: &CodeRestrictions,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE referral_codes SET restrictions = $2, updated_at = $3 WHERE code = $1 AND active",
        )
        .bind(code)
        .bind(Json(restrictions))
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn consume_quota(
        &self,
        code: &str,
        now: DateTime<Utc>,
        idempotency_key: Option<String>,
    ) -> Result<QuotaReceipt> {
        let mut tx = self.pool.begin().await?;

        let current = Self::lock_code_in_tx(&mut tx, code)
            .await?
            .ok_or_else(|| ReferralError::not_found("兑换码", code))?;
        current.ensure_redeemable(now)?;

        // 重复的幂等键先于额度判断，重放不受上限影响
        if let Some(key) = idempotency_key.as_deref() {
            let seen: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM referral_code_usages WHERE code = $1 AND idempotency_key = $2)",
            )
            .bind(code)
            .bind(key)
            .fetch_one(&mut *tx)
            .await?;
            if seen {
                return Err(ReferralError::DuplicateSource {
                    owner_id: current.owner_id,
                    entry_type: "code_usage".to_string(),
                    source_ref: key.to_string(),
                });
            }
        }

        let (daily, monthly) = Self::window_counts_in_tx(&mut tx, code, now).await?;
        current.check_quota(daily, monthly)?;

        let usage_id = Uuid::now_v7();
        let inserted = sqlx::query(
            r#"
            INSERT INTO referral_code_usages (id, code, used_at, idempotency_key)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(usage_id)
        .bind(code)
        .bind(now)
        .bind(idempotency_key.as_deref())
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            if unique_violation(&err).as_deref() == Some(USAGE_IDEMPOTENCY_UNIQUE) {
                return Err(ReferralError::DuplicateSource {
                    owner_id: current.owner_id,
                    entry_type: "code_usage".to_string(),
                    source_ref: idempotency_key.unwrap_or_default(),
                });
            }
            return Err(err.into());
        }

        sqlx::query(
            r#"
            UPDATE referral_codes
            SET usage_count = usage_count + 1,
                last_used_at = $2,
                total_referrals = total_referrals + 1,
                last_referral_date = $2,
                updated_at = $2
            WHERE code = $1
            "#,
        )
        .bind(code)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(QuotaReceipt {
            usage_id,
            code: current.code,
            owner_id: current.owner_id,
            used_at: now,
        })
    }

    async fn release_quota(&self, receipt: &QuotaReceipt) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // 先锁码行，与 consume_quota 保持相同的加锁顺序
        Self::lock_code_in_tx(&mut tx, &receipt.code).await?;

        let deleted = sqlx::query("DELETE FROM referral_code_usages WHERE id = $1")
            .bind(receipt.usage_id)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() > 0 {
            sqlx::query(
                r#"
                UPDATE referral_codes
                SET usage_count = GREATEST(usage_count - 1, 0),
                    total_referrals = GREATEST(total_referrals - 1, 0),
                    last_used_at = (SELECT MAX(used_at) FROM referral_code_usages WHERE code = $1),
                    last_referral_date = (SELECT MAX(used_at) FROM referral_code_usages WHERE code = $1)
                WHERE code = $1
                "#,
            )
            .bind(&receipt.code)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn attach_usage(&self, receipt: &QuotaReceipt, referral_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE referral_code_usages SET referral_id = $2 WHERE id = $1")
            .bind(receipt.usage_id)
            .bind(referral_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_usage_by_key(
        &self,
        code: &str,
        idempotency_key: &str,
    ) -> Result<Option<CodeUsage>> {
        let usage = sqlx::query_as::<_, CodeUsage>(
            r#"
            SELECT id, code, used_at, referral_id, idempotency_key
            FROM referral_code_usages
            WHERE code = $1 AND idempotency_key = $2
            "#,
        )
        .bind(code)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(usage)
    }

    async fn increment_successful(&self, code: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE referral_codes
            SET successful_referrals = successful_referrals + 1, updated_at = $2
            WHERE code = $1
            "#,
        )
        .bind(code)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_rating(&self, code: &str, rating: u8, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE referral_codes
            SET average_rating = (average_rating * rating_count + $2) / (rating_count + 1),
                rating_count = rating_count + 1,
                updated_at = $3
            WHERE code = $1
            "#,
        )
        .bind(code)
        .bind(f64::from(rating))
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE referral_codes SET active = FALSE, updated_at = $1 WHERE active AND expires_at <= $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
