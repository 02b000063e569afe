//! 转诊仓储（PostgreSQL）
//!
//! 状态历史以 JSONB 数组内嵌存储，流转通过 `WHERE status = expected` 做 CAS

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, types::Json};
use uuid::Uuid;

use super::code_repo::unique_violation;
use super::traits::ReferralRepositoryTrait;
use crate::error::Result;
use crate::models::{Referral, ReferralMessage, ReferralStatus, StatusUpdate};

const REFERRAL_COLUMNS: &str = r#"
    id, referral_number, from_party_id, to_party_id, status, status_history, urgency,
    clinical_data, patient_data, scheduled_at, completed_at, source_code, specialty, region,
    rating, created_at, updated_at
"#;

const NUMBER_UNIQUE: &str = "referrals_referral_number_key";

pub struct ReferralRepository {
    pool: PgPool,
}

impl ReferralRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReferralRepositoryTrait for ReferralRepository {
    async fn insert(&self, referral: &Referral) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO referrals (
                id, referral_number, from_party_id, to_party_id, status, status_history, urgency,
                clinical_data, patient_data, scheduled_at, completed_at, source_code, specialty,
                region, rating, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(referral.id)
        .bind(&referral.referral_number)
        .bind(&referral.from_party_id)
        .bind(&referral.to_party_id)
        .bind(referral.status)
        .bind(Json(&referral.status_history))
        .bind(referral.urgency)
        .bind(&referral.clinical_data)
        .bind(&referral.patient_data)
        .bind(referral.scheduled_at)
        .bind(referral.completed_at)
        .bind(&referral.source_code)
        .bind(&referral.specialty)
        .bind(&referral.region)
        .bind(referral.rating)
        .bind(referral.created_at)
        .bind(referral.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) if unique_violation(&err).as_deref() == Some(NUMBER_UNIQUE) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Referral>> {
        let sql = format!("SELECT {REFERRAL_COLUMNS} FROM referrals WHERE id = $1");
        let referral = sqlx::query_as::<_, Referral>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(referral)
    }

    async fn list_for_party(
        &self,
        party_id: &str,
        status: Option<ReferralStatus>,
        limit: i64,
    ) -> Result<Vec<Referral>> {
        let sql = format!(
            r#"
            SELECT {REFERRAL_COLUMNS}
            FROM referrals
            WHERE (from_party_id = $1 OR to_party_id = $1)
              AND ($2::varchar IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#
        );
        let referrals = sqlx::query_as::<_, Referral>(&sql)
            .bind(party_id)
            .bind(status)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(referrals)
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: ReferralStatus,
        update: &StatusUpdate,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE referrals
            SET status = $3,
                status_history = status_history || $4::jsonb,
                completed_at = COALESCE($5, completed_at),
                updated_at = $6
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(update.status)
        .bind(Json(vec![&update.entry]))
        .bind(update.completed_at)
        .bind(update.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_schedule(
        &self,
        id: Uuid,
        expected: ReferralStatus,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE referrals SET scheduled_at = $3, updated_at = $4 WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(expected)
        .bind(scheduled_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_rating(&self, id: Uuid, rating: i16, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE referrals SET rating = $2, updated_at = $3 WHERE id = $1 AND rating IS NULL",
        )
        .bind(id)
        .bind(rating)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_rating(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE referrals SET rating = NULL, updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_message(
        &self,
        referral_id: Uuid,
        sender_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<ReferralMessage> {
        let mut tx = self.pool.begin().await?;

        // 锁转诊行，串行化同一转诊的 seq 分配
        sqlx::query("SELECT id FROM referrals WHERE id = $1 FOR UPDATE")
            .bind(referral_id)
            .fetch_one(&mut *tx)
            .await?;

        let next_seq: i64 = sqlx::query(
            "SELECT COALESCE(MAX(seq), 0) + 1 AS next_seq FROM referral_messages WHERE referral_id = $1",
        )
        .bind(referral_id)
        .fetch_one(&mut *tx)
        .await?
        .get("next_seq");

        let message = sqlx::query_as::<_, ReferralMessage>(
            r#"
            INSERT INTO referral_messages (id, referral_id, seq, sender_id, content, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, referral_id, seq, sender_id, content, created_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(referral_id)
        .bind(next_seq)
        .bind(sender_id)
        .bind(content)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(message)
    }

    async fn list_messages(&self, referral_id: Uuid) -> Result<Vec<ReferralMessage>> {
        let messages = sqlx::query_as::<_, ReferralMessage>(
            r#"
            SELECT id, referral_id, seq, sender_id, content, created_at
            FROM referral_messages
            WHERE referral_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(referral_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }
}
