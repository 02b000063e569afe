//! 积分账本仓储（PostgreSQL）
//!
//! 流水表是事实来源，`reward_balances` 是可由流水重放得到的运行余额。
//! 扣减通过对余额行的条件更新串行化：`points >= 扣减额` 不成立时不写入任何流水

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Row};

use super::traits::LedgerRepositoryTrait;
use crate::error::{ReferralError, Result};
use crate::models::{DebitOutcome, NewLedgerEntry, RebuiltTotal, RewardLedgerEntry};

const ENTRY_COLUMNS: &str = "id, owner_id, entry_type, points, source_ref, remark, created_at";

pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 在事务中写入流水，来源重复时返回 None
    async fn insert_entry_in_tx(
        tx: &mut PgConnection,
        entry: &NewLedgerEntry,
    ) -> Result<Option<RewardLedgerEntry>> {
        let sql = format!(
            r#"
            INSERT INTO reward_ledger_entries (owner_id, entry_type, points, source_ref, remark, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (owner_id, entry_type, source_ref) DO NOTHING
            RETURNING {ENTRY_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, RewardLedgerEntry>(&sql)
            .bind(&entry.owner_id)
            .bind(entry.entry_type)
            .bind(entry.points)
            .bind(&entry.source_ref)
            .bind(&entry.remark)
            .bind(entry.created_at)
            .fetch_optional(tx)
            .await?;
        Ok(row)
    }

    /// 在事务中累加运行余额
    async fn add_to_balance_in_tx(tx: &mut PgConnection, owner_id: &str, delta: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reward_balances (owner_id, points, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (owner_id) DO UPDATE
            SET points = reward_balances.points + EXCLUDED.points, updated_at = NOW()
            "#,
        )
        .bind(owner_id)
        .bind(delta)
        .execute(tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerRepositoryTrait for LedgerRepository {
    async fn append_credit(&self, entry: &NewLedgerEntry) -> Result<Option<RewardLedgerEntry>> {
        let mut tx = self.pool.begin().await?;

        let Some(created) = Self::insert_entry_in_tx(&mut tx, entry).await? else {
            return Ok(None);
        };
        Self::add_to_balance_in_tx(&mut tx, &entry.owner_id, entry.points).await?;

        tx.commit().await?;
        Ok(Some(created))
    }

    async fn append_debit(&self, entry: &NewLedgerEntry) -> Result<DebitOutcome> {
        let amount = -entry.points;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO reward_balances (owner_id, points) VALUES ($1, 0) ON CONFLICT (owner_id) DO NOTHING",
        )
        .bind(&entry.owner_id)
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query(
            r#"
            UPDATE reward_balances
            SET points = points - $2, updated_at = NOW()
            WHERE owner_id = $1 AND points >= $2
            RETURNING points
            "#,
        )
        .bind(&entry.owner_id)
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await?;

        if updated.is_none() {
            let available: i64 =
                sqlx::query("SELECT points FROM reward_balances WHERE owner_id = $1")
                    .bind(&entry.owner_id)
                    .fetch_one(&mut *tx)
                    .await?
                    .get("points");
            return Ok(DebitOutcome::Insufficient { available });
        }

        let created = Self::insert_entry_in_tx(&mut tx, entry).await?;
        let Some(created) = created else {
            // source_ref 为随机 UUID，冲突意味着上游重复提交同一请求
            return Err(ReferralError::DuplicateSource {
                owner_id: entry.owner_id.clone(),
                entry_type: entry.entry_type.to_string(),
                source_ref: entry.source_ref.clone(),
            });
        };

        tx.commit().await?;
        Ok(DebitOutcome::Applied(created))
    }

    async fn balance(&self, owner_id: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COALESCE((SELECT points FROM reward_balances WHERE owner_id = $1), 0) AS points",
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("points"))
    }

    async fn rebuild_running_total(&self, owner_id: &str) -> Result<RebuiltTotal> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO reward_balances (owner_id, points) VALUES ($1, 0) ON CONFLICT (owner_id) DO NOTHING",
        )
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;

        // 余额行锁住后，并发的入账与扣减都排在本事务之后
        let previous: i64 =
            sqlx::query("SELECT points FROM reward_balances WHERE owner_id = $1 FOR UPDATE")
                .bind(owner_id)
                .fetch_one(&mut *tx)
                .await?
                .get("points");

        let total: i64 = sqlx::query(
            "SELECT COALESCE(SUM(points), 0)::BIGINT AS total FROM reward_ledger_entries WHERE owner_id = $1",
        )
        .bind(owner_id)
        .fetch_one(&mut *tx)
        .await?
        .get("total");

        sqlx::query("UPDATE reward_balances SET points = $2, updated_at = NOW() WHERE owner_id = $1")
            .bind(owner_id)
            .bind(total)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(RebuiltTotal { previous, total })
    }

    async fn list_entries(&self, owner_id: &str, limit: i64) -> Result<Vec<RewardLedgerEntry>> {
        let sql = format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM reward_ledger_entries
            WHERE owner_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#
        );
        let entries = sqlx::query_as::<_, RewardLedgerEntry>(&sql)
            .bind(owner_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(entries)
    }
}
