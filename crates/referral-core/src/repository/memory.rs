//! 内存仓储实现
//!
//! 用于测试与 `storage.backend = "memory"` 的开发模式。
//! 原子性依赖 DashMap 分片锁与按服务方划分的互斥锁；持锁期间不跨越 await。
//! 加锁顺序固定为 服务方映射 → 兑换码，避免死锁

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use uuid::Uuid;

use super::traits::{
    CodeRepositoryTrait, InsertCodeOutcome, LedgerRepositoryTrait, ReferralRepositoryTrait,
};
use crate::error::{ReferralError, Result};
use crate::models::code::{daily_window, monthly_window};
use crate::models::{
    CodeRestrictions, CodeUsage, DebitOutcome, EntryType, NewLedgerEntry, QuotaReceipt,
    RebuiltTotal, Referral, ReferralCode, ReferralMessage, ReferralStatus, RewardLedgerEntry,
    StatusUpdate,
};

// ==================== 兑换码 ====================

/// 兑换码及其使用记录，同一分片锁下修改
#[derive(Debug)]
struct CodeSlot {
    code: ReferralCode,
    usages: Vec<CodeUsage>,
}

#[derive(Default)]
pub struct MemoryCodeRepository {
    codes: DashMap<String, CodeSlot>,
    /// owner_id -> 启用中的 code
    active_owners: DashMap<String, String>,
}

impl MemoryCodeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 停用指定码；若该码仍登记为服务方的启用码则一并解除
    fn deactivate_locked(&self, code: &str, now: DateTime<Utc>) -> bool {
        let Some(owner_id) = self.codes.get(code).map(|slot| slot.code.owner_id.clone()) else {
            return false;
        };

        let owner_entry = self.active_owners.entry(owner_id);
        let changed = match self.codes.get_mut(code) {
            Some(mut slot) if slot.code.active => {
                slot.code.active = false;
                slot.code.updated_at = now;
                true
            }
            _ => false,
        };

        if let Entry::Occupied(occupied) = owner_entry {
            if occupied.get() == code {
                occupied.remove();
            }
        }
        changed
    }
}

#[async_trait]
impl CodeRepositoryTrait for MemoryCodeRepository {
    async fn insert_code(&self, code: &ReferralCode) -> Result<InsertCodeOutcome> {
        let owner_entry = match self.active_owners.entry(code.owner_id.clone()) {
            Entry::Occupied(_) => return Ok(InsertCodeOutcome::OwnerHasActive),
            Entry::Vacant(vacant) => vacant,
        };

        match self.codes.entry(code.code.clone()) {
            Entry::Occupied(_) => Ok(InsertCodeOutcome::CodeTaken),
            Entry::Vacant(vacant) => {
                vacant.insert(CodeSlot {
                    code: code.clone(),
                    usages: Vec::new(),
                });
                owner_entry.insert(code.code.clone());
                Ok(InsertCodeOutcome::Inserted)
            }
        }
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<ReferralCode>> {
        Ok(self.codes.get(code).map(|slot| slot.code.clone()))
    }

    async fn find_active_by_owner(&self, owner_id: &str) -> Result<Option<ReferralCode>> {
        let Some(code) = self.active_owners.get(owner_id).map(|c| c.clone()) else {
            return Ok(None);
        };
        Ok(self
            .codes
            .get(&code)
            .filter(|slot| slot.code.active)
            .map(|slot| slot.code.clone()))
    }

    async fn deactivate_code(&self, code: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.deactivate_locked(code, now))
    }

    async fn update_restrictions(
        &self,
        code: &str,
        restrictions: &CodeRestrictions,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        match self.codes.get_mut(code) {
            Some(mut slot) if slot.code.active => {
                slot.code.restrictions = restrictions.clone();
                slot.code.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn consume_quota(
        &self,
        code: &str,
        now: DateTime<Utc>,
        idempotency_key: Option<String>,
    ) -> Result<QuotaReceipt> {
        let mut slot = self
            .codes
            .get_mut(code)
            .ok_or_else(|| ReferralError::not_found("兑换码", code))?;

        slot.code.ensure_redeemable(now)?;

        // 重复的幂等键先于额度判断，重放不受上限影响
        if let Some(key) = &idempotency_key {
            if slot
                .usages
                .iter()
                .any(|u| u.idempotency_key.as_deref() == Some(key.as_str()))
            {
                return Err(ReferralError::DuplicateSource {
                    owner_id: slot.code.owner_id.clone(),
                    entry_type: "code_usage".to_string(),
                    source_ref: key.clone(),
                });
            }
        }

        let day_start = now - daily_window();
        let month_start = now - monthly_window();
        // 窗口外且无幂等键的记录不再参与任何判断
        slot.usages
            .retain(|u| u.used_at > month_start || u.idempotency_key.is_some());
        let daily = slot.usages.iter().filter(|u| u.used_at > day_start).count() as i64;
        let monthly = slot.usages.iter().filter(|u| u.used_at > month_start).count() as i64;
        slot.code.check_quota(daily, monthly)?;

        let usage_id = Uuid::now_v7();
        slot.usages.push(CodeUsage {
            id: usage_id,
            code: code.to_string(),
            used_at: now,
            referral_id: None,
            idempotency_key,
        });

        let record = &mut slot.code;
        record.usage_count += 1;
        record.last_used_at = Some(now);
        record.analytics.total_referrals += 1;
        record.analytics.last_referral_date = Some(now);
        record.updated_at = now;

        Ok(QuotaReceipt {
            usage_id,
            code: record.code.clone(),
            owner_id: record.owner_id.clone(),
            used_at: now,
        })
    }

    async fn release_quota(&self, receipt: &QuotaReceipt) -> Result<()> {
        let Some(mut slot) = self.codes.get_mut(&receipt.code) else {
            return Ok(());
        };

        let before = slot.usages.len();
        slot.usages.retain(|u| u.id != receipt.usage_id);
        if slot.usages.len() == before {
            return Ok(());
        }

        let latest = slot.usages.iter().map(|u| u.used_at).max();
        let record = &mut slot.code;
        record.usage_count = (record.usage_count - 1).max(0);
        record.analytics.total_referrals = (record.analytics.total_referrals - 1).max(0);
        record.last_used_at = latest;
        record.analytics.last_referral_date = latest;
        Ok(())
    }

    async fn attach_usage(&self, receipt: &QuotaReceipt, referral_id: Uuid) -> Result<()> {
        if let Some(mut slot) = self.codes.get_mut(&receipt.code) {
            if let Some(usage) = slot.usages.iter_mut().find(|u| u.id == receipt.usage_id) {
                usage.referral_id = Some(referral_id);
            }
        }
        Ok(())
    }

    async fn find_usage_by_key(
        &self,
        code: &str,
        idempotency_key: &str,
    ) -> Result<Option<CodeUsage>> {
        Ok(self.codes.get(code).and_then(|slot| {
            slot.usages
                .iter()
                .find(|u| u.idempotency_key.as_deref() == Some(idempotency_key))
                .cloned()
        }))
    }

    async fn increment_successful(&self, code: &str, now: DateTime<Utc>) -> Result<()> {
        if let Some(mut slot) = self.codes.get_mut(code) {
            slot.code.analytics.successful_referrals += 1;
            slot.code.updated_at = now;
        }
        Ok(())
    }

    async fn record_rating(&self, code: &str, rating: u8, now: DateTime<Utc>) -> Result<bool> {
        match self.codes.get_mut(code) {
            Some(mut slot) => {
                slot.code.analytics.record_rating(rating);
                slot.code.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64> {
        let stale: Vec<String> = self
            .codes
            .iter()
            .filter(|slot| slot.code.active && slot.code.is_expired(now))
            .map(|slot| slot.key().clone())
            .collect();

        let mut expired = 0;
        for code in stale {
            if self.deactivate_locked(&code, now) {
                expired += 1;
            }
        }
        Ok(expired)
    }
}

// ==================== 转诊 ====================

#[derive(Default)]
pub struct MemoryReferralRepository {
    referrals: DashMap<Uuid, Referral>,
    numbers: DashMap<String, Uuid>,
    messages: DashMap<Uuid, Vec<ReferralMessage>>,
}

impl MemoryReferralRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReferralRepositoryTrait for MemoryReferralRepository {
    async fn insert(&self, referral: &Referral) -> Result<bool> {
        match self.numbers.entry(referral.referral_number.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                self.referrals.insert(referral.id, referral.clone());
                vacant.insert(referral.id);
                Ok(true)
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Referral>> {
        Ok(self.referrals.get(&id).map(|r| r.clone()))
    }

    async fn list_for_party(
        &self,
        party_id: &str,
        status: Option<ReferralStatus>,
        limit: i64,
    ) -> Result<Vec<Referral>> {
        let mut found: Vec<Referral> = self
            .referrals
            .iter()
            .filter(|r| r.from_party_id == party_id || r.to_party_id == party_id)
            .filter(|r| status.is_none_or(|s| r.status == s))
            .map(|r| r.clone())
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        found.truncate(limit.max(0) as usize);
        Ok(found)
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: ReferralStatus,
        update: &StatusUpdate,
    ) -> Result<bool> {
        match self.referrals.get_mut(&id) {
            Some(mut referral) if referral.status == expected => {
                referral.apply(update);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_schedule(
        &self,
        id: Uuid,
        expected: ReferralStatus,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        match self.referrals.get_mut(&id) {
            Some(mut referral) if referral.status == expected => {
                referral.scheduled_at = Some(scheduled_at);
                referral.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_rating(&self, id: Uuid, rating: i16, now: DateTime<Utc>) -> Result<bool> {
        match self.referrals.get_mut(&id) {
            Some(mut referral) if referral.rating.is_none() => {
                referral.rating = Some(rating);
                referral.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear_rating(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        if let Some(mut referral) = self.referrals.get_mut(&id) {
            referral.rating = None;
            referral.updated_at = now;
        }
        Ok(())
    }

    async fn append_message(
        &self,
        referral_id: Uuid,
        sender_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<ReferralMessage> {
        if !self.referrals.contains_key(&referral_id) {
            return Err(ReferralError::not_found("转诊", referral_id));
        }

        let mut log = self.messages.entry(referral_id).or_default();
        let message = ReferralMessage {
            id: Uuid::now_v7(),
            referral_id,
            seq: log.len() as i64 + 1,
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            created_at: now,
        };
        log.push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, referral_id: Uuid) -> Result<Vec<ReferralMessage>> {
        Ok(self
            .messages
            .get(&referral_id)
            .map(|log| log.clone())
            .unwrap_or_default())
    }
}

// ==================== 积分账本 ====================

#[derive(Debug, Default)]
struct OwnerBook {
    entries: Vec<RewardLedgerEntry>,
    sources: HashSet<(EntryType, String)>,
    running_total: i64,
}

impl OwnerBook {
    fn push(&mut self, id: i64, entry: &NewLedgerEntry) -> Option<RewardLedgerEntry> {
        if !self
            .sources
            .insert((entry.entry_type, entry.source_ref.clone()))
        {
            return None;
        }
        let created = RewardLedgerEntry {
            id,
            owner_id: entry.owner_id.clone(),
            entry_type: entry.entry_type,
            points: entry.points,
            source_ref: entry.source_ref.clone(),
            remark: entry.remark.clone(),
            created_at: entry.created_at,
        };
        self.running_total += entry.points;
        self.entries.push(created.clone());
        Some(created)
    }
}

#[derive(Default)]
pub struct MemoryLedgerRepository {
    books: DashMap<String, Arc<Mutex<OwnerBook>>>,
    next_id: AtomicI64,
}

impl MemoryLedgerRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn book(&self, owner_id: &str) -> Arc<Mutex<OwnerBook>> {
        self.books.entry(owner_id.to_string()).or_default().clone()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl LedgerRepositoryTrait for MemoryLedgerRepository {
    async fn append_credit(&self, entry: &NewLedgerEntry) -> Result<Option<RewardLedgerEntry>> {
        let book = self.book(&entry.owner_id);
        let mut book = book.lock();
        Ok(book.push(self.next_id(), entry))
    }

    async fn append_debit(&self, entry: &NewLedgerEntry) -> Result<DebitOutcome> {
        let book = self.book(&entry.owner_id);
        let mut book = book.lock();

        if book.running_total < -entry.points {
            return Ok(DebitOutcome::Insufficient {
                available: book.running_total,
            });
        }

        match book.push(self.next_id(), entry) {
            Some(created) => Ok(DebitOutcome::Applied(created)),
            None => Err(ReferralError::DuplicateSource {
                owner_id: entry.owner_id.clone(),
                entry_type: entry.entry_type.to_string(),
                source_ref: entry.source_ref.clone(),
            }),
        }
    }

    async fn balance(&self, owner_id: &str) -> Result<i64> {
        Ok(self
            .books
            .get(owner_id)
            .map(|book| book.lock().running_total)
            .unwrap_or(0))
    }

    async fn rebuild_running_total(&self, owner_id: &str) -> Result<RebuiltTotal> {
        let book = self.book(owner_id);
        let mut book = book.lock();
        let total = book.entries.iter().map(|e| e.points).sum();
        let previous = std::mem::replace(&mut book.running_total, total);
        Ok(RebuiltTotal { previous, total })
    }

    async fn list_entries(&self, owner_id: &str, limit: i64) -> Result<Vec<RewardLedgerEntry>> {
        Ok(self
            .books
            .get(owner_id)
            .map(|book| {
                book.lock()
                    .entries
                    .iter()
                    .rev()
                    .take(limit.max(0) as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
