//! 兑换校验集成测试

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{harness, harness_with_codes, payload};
use referral_core::models::{
    CodeRestrictions, Referral, ReferralMessage, ReferralStatus, StatusUpdate,
};
use referral_core::repository::{MemoryReferralRepository, ReferralRepositoryTrait};
use referral_core::{Clock, NotificationPublisher, ReferralCore, ReferralError, Result};
use referral_shared::config::AppConfig;
use uuid::Uuid;

async fn restrict(h: &common::Harness, owner: &str, per_day: u32, per_month: u32) {
    h.core
        .registry
        .update_restrictions(owner, CodeRestrictions::new(per_day, per_month))
        .await
        .unwrap();
}

#[tokio::test]
async fn unknown_code_is_not_found() {
    let h = harness();
    let result = h.core.redemption.redeem("ZZZZZZ", payload("specialist-1")).await;
    assert!(matches!(result, Err(ReferralError::NotFound { .. })));
}

#[tokio::test]
async fn redemption_creates_pending_referral_from_owner() {
    let h = harness_with_codes(&["AB12C3"]);
    h.core.registry.issue_code("provider-a").await.unwrap();

    let redemption = h
        .core
        .redemption
        .redeem("  ab12c3 ", payload("specialist-1"))
        .await
        .unwrap();

    assert_eq!(redemption.status(), ReferralStatus::Pending);
    assert_eq!(redemption.referral.from_party_id, "provider-a");
    assert_eq!(redemption.referral.to_party_id, "specialist-1");
    assert_eq!(redemption.tracking_id, redemption.referral.referral_number);

    let code = h.core.registry.find("AB12C3").await.unwrap();
    assert_eq!(code.usage_count, 1);
    assert_eq!(code.analytics.total_referrals, 1);
    assert_eq!(code.last_used_at, Some(h.clock.now()));
    assert_eq!(code.analytics.last_referral_date, Some(h.clock.now()));
}

#[tokio::test]
async fn inactive_code_is_rejected() {
    let h = harness_with_codes(&["AB12C3"]);
    h.core.registry.issue_code("provider-a").await.unwrap();
    h.core.registry.deactivate("provider-a").await.unwrap();

    let result = h.core.redemption.redeem("AB12C3", payload("specialist-1")).await;
    assert!(matches!(result, Err(ReferralError::Inactive(_))));
}

#[tokio::test]
async fn expired_wins_over_rate_limited() {
    let h = harness_with_codes(&["AB12C3"]);
    h.core.registry.issue_code("provider-a").await.unwrap();
    restrict(&h, "provider-a", 1, 300).await;

    h.clock.advance(Duration::days(364) + Duration::hours(23));
    h.core
        .redemption
        .redeem("AB12C3", payload("specialist-1"))
        .await
        .unwrap();

    // 额度已满且已过期
    h.clock.advance(Duration::hours(2));
    let result = h.core.redemption.redeem("AB12C3", payload("specialist-2")).await;
    assert!(matches!(result, Err(ReferralError::Expired(_))));
}

#[tokio::test]
async fn daily_limit_uses_rolling_window() {
    let h = harness_with_codes(&["AB12C3"]);
    h.core.registry.issue_code("provider-a").await.unwrap();
    restrict(&h, "provider-a", 2, 300).await;

    for specialist in ["specialist-1", "specialist-2"] {
        h.core
            .redemption
            .redeem("AB12C3", payload(specialist))
            .await
            .unwrap();
    }

    let limited = h.core.redemption.redeem("AB12C3", payload("specialist-3")).await;
    assert!(matches!(
        limited,
        Err(ReferralError::RateLimited { limit: 2, .. })
    ));

    // 跨过自然日但仍在 24 小时内
    h.clock.advance(Duration::hours(23));
    assert!(matches!(
        h.core.redemption.redeem("AB12C3", payload("specialist-3")).await,
        Err(ReferralError::RateLimited { .. })
    ));

    h.clock.advance(Duration::hours(1) + Duration::seconds(1));
    h.core
        .redemption
        .redeem("AB12C3", payload("specialist-3"))
        .await
        .unwrap();
}

#[tokio::test]
async fn monthly_limit_uses_rolling_window() {
    let h = harness_with_codes(&["AB12C3"]);
    h.core.registry.issue_code("provider-a").await.unwrap();
    restrict(&h, "provider-a", 1, 3).await;

    for _ in 0..3 {
        h.core
            .redemption
            .redeem("AB12C3", payload("specialist-1"))
            .await
            .unwrap();
        h.clock.advance(Duration::days(2));
    }

    let limited = h.core.redemption.redeem("AB12C3", payload("specialist-1")).await;
    assert!(matches!(
        limited,
        Err(ReferralError::RateLimited { limit: 3, .. })
    ));

    // 第一条用量滑出 30 天窗口
    h.clock.advance(Duration::days(25));
    h.core
        .redemption
        .redeem("AB12C3", payload("specialist-1"))
        .await
        .unwrap();
}

#[tokio::test]
async fn repeated_idempotency_key_replays_without_quota() {
    let h = harness_with_codes(&["AB12C3"]);
    h.core.registry.issue_code("provider-a").await.unwrap();

    let mut body = payload("specialist-1");
    body.idempotency_key = Some("client-req-7".to_string());

    let first = h
        .core
        .redemption
        .redeem("AB12C3", body.clone())
        .await
        .unwrap();
    let second = h.core.redemption.redeem("AB12C3", body).await.unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.referral_id(), second.referral_id());
    assert_eq!(h.core.registry.find("AB12C3").await.unwrap().usage_count, 1);
}

#[tokio::test]
async fn restriction_mismatch_consumes_no_quota() {
    let h = harness_with_codes(&["AB12C3"]);
    h.core.registry.issue_code("provider-a").await.unwrap();
    let mut restrictions = CodeRestrictions::new(20, 300);
    restrictions.allowed_specialties = vec!["Cardiology".to_string()];
    restrictions.allowed_regions = vec!["North".to_string()];
    h.core
        .registry
        .update_restrictions("provider-a", restrictions)
        .await
        .unwrap();

    let mut body = payload("specialist-1");
    body.specialty = Some("Dermatology".to_string());
    body.region = Some("north".to_string());
    let result = h.core.redemption.redeem("AB12C3", body.clone()).await;
    assert!(matches!(result, Err(ReferralError::Validation(_))));
    assert_eq!(h.core.registry.find("AB12C3").await.unwrap().usage_count, 0);

    body.specialty = Some("cardiology".to_string());
    h.core.redemption.redeem("AB12C3", body).await.unwrap();
}

/// 插入总是失败的转诊仓储
struct FailingInsert(MemoryReferralRepository);

#[async_trait]
impl ReferralRepositoryTrait for FailingInsert {
    async fn insert(&self, _referral: &Referral) -> Result<bool> {
        Err(ReferralError::Database(sqlx::Error::PoolTimedOut))
    }
    async fn get(&self, id: Uuid) -> Result<Option<Referral>> {
        self.0.get(id).await
    }
    async fn list_for_party(
        &self,
        party_id: &str,
        status: Option<ReferralStatus>,
        limit: i64,
    ) -> Result<Vec<Referral>> {
        self.0.list_for_party(party_id, status, limit).await
    }
    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: ReferralStatus,
        update: &StatusUpdate,
    ) -> Result<bool> {
        self.0.compare_and_set_status(id, expected, update).await
    }
    async fn set_schedule(
        &self,
        id: Uuid,
        expected: ReferralStatus,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.0.set_schedule(id, expected, scheduled_at, now).await
    }
    async fn set_rating(&self, id: Uuid, rating: i16, now: DateTime<Utc>) -> Result<bool> {
        self.0.set_rating(id, rating, now).await
    }
    async fn clear_rating(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        self.0.clear_rating(id, now).await
    }
    async fn append_message(
        &self,
        referral_id: Uuid,
        sender_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<ReferralMessage> {
        self.0.append_message(referral_id, sender_id, content, now).await
    }
    async fn list_messages(&self, referral_id: Uuid) -> Result<Vec<ReferralMessage>> {
        self.0.list_messages(referral_id).await
    }
}

#[tokio::test]
async fn failed_referral_creation_releases_quota() {
    let h = harness_with_codes(&["AB12C3"]);
    h.core.registry.issue_code("provider-a").await.unwrap();
    restrict(&h, "provider-a", 1, 300).await;

    let mut repos = h.repos.clone();
    repos.referrals = Arc::new(FailingInsert(MemoryReferralRepository::new()));
    let clock: Arc<dyn Clock> = h.clock.clone();
    let failing = ReferralCore::new(
        repos,
        NotificationPublisher::disabled(),
        clock,
        &AppConfig::default(),
    )
    .unwrap();

    let result = failing.redemption.redeem("AB12C3", payload("specialist-1")).await;
    assert!(matches!(result, Err(ReferralError::Database(_))));

    let code = h.core.registry.find("AB12C3").await.unwrap();
    assert_eq!(code.usage_count, 0);
    assert_eq!(code.analytics.total_referrals, 0);
    assert_eq!(code.last_used_at, None);

    // 额度已归还，1/日的上限仍可用
    h.core
        .redemption
        .redeem("AB12C3", payload("specialist-1"))
        .await
        .unwrap();
}
