//! 兑换码注册集成测试（内存仓储）

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;
use common::{harness, harness_with_codes, harness_with_generator};
use futures::future::join_all;
use rand::Rng;
use referral_core::ReferralError;
use referral_core::models::{CodeRestrictions, is_well_formed};

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn parallel_issuance_yields_unique_codes() {
    let h = harness();
    let registry = h.core.registry.clone();

    let handles: Vec<_> = (0..64)
        .map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.issue_code(&format!("provider-{i}")).await })
        })
        .collect();

    let mut seen = HashSet::new();
    for joined in join_all(handles).await {
        let code = joined.unwrap().unwrap();
        assert!(is_well_formed(&code.code));
        assert!(seen.insert(code.code), "duplicate code issued");
    }
    assert_eq!(seen.len(), 64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn contended_issuance_never_duplicates() {
    const POOL: [&str; 4] = ["AAAA11", "BBBB22", "CCCC33", "DDDD44"];
    let h = harness_with_generator(Arc::new(|| {
        POOL[rand::rng().random_range(0..POOL.len())].to_string()
    }));
    let registry = h.core.registry.clone();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.issue_code(&format!("provider-{i}")).await })
        })
        .collect();

    let mut seen = HashSet::new();
    for joined in join_all(handles).await {
        match joined.unwrap() {
            Ok(code) => assert!(seen.insert(code.code), "duplicate code issued"),
            Err(ReferralError::ConflictRetryExhausted { attempts: 10, .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(!seen.is_empty());
    assert!(seen.len() <= POOL.len());
}

#[tokio::test]
async fn colliding_generator_retries_until_free_code() {
    let h = harness_with_codes(&["AB12C3", "AB12C3", "AB12C3", "ZZ99Y8"]);

    let first = h.core.registry.issue_code("provider-a").await.unwrap();
    let second = h.core.registry.issue_code("provider-b").await.unwrap();

    assert_eq!(first.code, "AB12C3");
    assert_eq!(second.code, "ZZ99Y8");
}

#[tokio::test]
async fn exhausted_generator_is_conflict_retry_exhausted() {
    let h = harness_with_codes(&["AB12C3"]);
    h.core.registry.issue_code("provider-a").await.unwrap();

    let result = h.core.registry.issue_code("provider-b").await;
    assert!(matches!(
        result,
        Err(ReferralError::ConflictRetryExhausted { attempts: 10, .. })
    ));
}

#[tokio::test]
async fn second_issue_for_owner_is_already_issued() {
    let h = harness();
    h.core.registry.issue_code("provider-a").await.unwrap();

    let result = h.core.registry.issue_code("provider-a").await;
    assert!(matches!(result, Err(ReferralError::AlreadyIssued(_))));
}

#[tokio::test]
async fn expired_code_is_replaced_on_issue() {
    let h = harness_with_codes(&["AB12C3", "CD34E5"]);
    let old = h.core.registry.issue_code("provider-a").await.unwrap();

    h.clock.advance(Duration::days(366));
    let fresh = h.core.registry.issue_code("provider-a").await.unwrap();

    assert_eq!(fresh.code, "CD34E5");
    let old = h.core.registry.find(&old.code).await.unwrap();
    assert!(!old.active);
}

#[tokio::test]
async fn deactivate_is_idempotent_and_frees_owner_slot() {
    let h = harness_with_codes(&["AB12C3", "CD34E5"]);
    h.core.registry.issue_code("provider-a").await.unwrap();

    assert!(h.core.registry.deactivate("provider-a").await.unwrap());
    assert!(!h.core.registry.deactivate("provider-a").await.unwrap());
    assert!(matches!(
        h.core.registry.get_mine("provider-a").await,
        Err(ReferralError::NotFound { .. })
    ));

    let next = h.core.registry.issue_code("provider-a").await.unwrap();
    assert_eq!(next.code, "CD34E5");
}

#[tokio::test]
async fn expire_stale_deactivates_only_past_codes() {
    let h = harness_with_codes(&["AB12C3", "CD34E5"]);
    h.core.registry.issue_code("provider-a").await.unwrap();
    h.clock.advance(Duration::days(200));
    h.core.registry.issue_code("provider-b").await.unwrap();

    h.clock.advance(Duration::days(170));
    assert_eq!(h.core.registry.expire_stale().await.unwrap(), 1);
    assert_eq!(h.core.registry.expire_stale().await.unwrap(), 0);

    assert!(!h.core.registry.find("AB12C3").await.unwrap().active);
    assert!(h.core.registry.find("cd34e5").await.unwrap().active);
}

#[tokio::test]
async fn update_restrictions_replaces_policy() {
    let h = harness();
    h.core.registry.issue_code("provider-a").await.unwrap();

    let mut restrictions = CodeRestrictions::new(5, 50);
    restrictions.allowed_regions = vec![" North ".to_string()];
    let updated = h
        .core
        .registry
        .update_restrictions("provider-a", restrictions)
        .await
        .unwrap();

    assert_eq!(updated.restrictions.max_per_day, 5);
    assert_eq!(updated.restrictions.allowed_regions, vec!["North".to_string()]);

    let invalid = h
        .core
        .registry
        .update_restrictions("provider-a", CodeRestrictions::new(60, 50))
        .await;
    assert!(matches!(invalid, Err(ReferralError::Validation(_))));
}
