//! 积分账本集成测试

mod common;

use common::harness;
use futures::future::join_all;
use referral_core::ReferralError;
use referral_core::models::{EntryType, Tier, tier_of};

#[test]
fn tier_thresholds() {
    assert_eq!(tier_of(0), Tier::Bronze);
    assert_eq!(tier_of(499), Tier::Bronze);
    assert_eq!(tier_of(500), Tier::Silver);
    assert_eq!(tier_of(1499), Tier::Silver);
    assert_eq!(tier_of(1500), Tier::Gold);
    assert_eq!(tier_of(2999), Tier::Gold);
    assert_eq!(tier_of(3000), Tier::Platinum);
    assert_eq!(tier_of(4999), Tier::Platinum);
    assert_eq!(tier_of(5000), Tier::Diamond);
}

#[tokio::test]
async fn duplicate_credit_increments_once() {
    let h = harness();
    let ledger = &h.core.ledger;

    ledger
        .credit("gp-1", EntryType::ReferralCompleted, 200, "ref-1")
        .await
        .unwrap();
    let again = ledger
        .credit("gp-1", EntryType::ReferralCompleted, 200, "ref-1")
        .await;
    assert!(matches!(again, Err(ReferralError::DuplicateSource { .. })));

    // 同一来源不同类型互不影响
    ledger
        .credit("gp-1", EntryType::ReferralSubmitted, 50, "ref-1")
        .await
        .unwrap();

    assert_eq!(ledger.balance_of("gp-1").await.unwrap(), 250);
    assert_eq!(ledger.history("gp-1", 10).await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_debits_never_overdraw() {
    let h = harness();
    let ledger = h.core.ledger.clone();
    ledger
        .adjust("gp-1", 1000, "seed", "opening balance")
        .await
        .unwrap();

    let handles: Vec<_> = (0..25)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.debit("gp-1", 100, "gift card").await })
        })
        .collect();

    let mut applied = 0;
    let mut rejected = 0;
    for joined in join_all(handles).await {
        match joined.unwrap() {
            Ok(_) => applied += 1,
            Err(ReferralError::InsufficientBalance { required: 100, .. }) => rejected += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(applied, 10);
    assert_eq!(rejected, 15);
    assert_eq!(ledger.balance_of("gp-1").await.unwrap(), 0);
    assert_eq!(ledger.replay_balance("gp-1").await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn replay_racing_debits_never_overdraws() {
    let h = harness();
    let ledger = h.core.ledger.clone();
    ledger
        .adjust("gp-1", 4000, "seed", "opening balance")
        .await
        .unwrap();

    let debits: Vec<_> = (0..4)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                let mut applied = 0;
                for _ in 0..1500 {
                    match ledger.debit("gp-1", 1, "sticker").await {
                        Ok(_) => applied += 1,
                        Err(ReferralError::InsufficientBalance { .. }) => {}
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
                applied
            })
        })
        .collect();
    let replays: Vec<_> = (0..4)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                for _ in 0..1500 {
                    ledger.replay_balance("gp-1").await.unwrap();
                }
            })
        })
        .collect();

    let applied: i64 = join_all(debits).await.into_iter().map(|j| j.unwrap()).sum();
    for joined in join_all(replays).await {
        joined.unwrap();
    }

    assert_eq!(applied, 4000);
    assert_eq!(ledger.replay_balance("gp-1").await.unwrap(), 0);
    assert_eq!(ledger.balance_of("gp-1").await.unwrap(), 0);
}

#[tokio::test]
async fn summary_reports_next_tier() {
    let h = harness();
    let ledger = &h.core.ledger;
    ledger
        .credit("specialist-1", EntryType::ReferralCompleted, 1200, "ref-9")
        .await
        .unwrap();

    let summary = ledger.summary("specialist-1").await.unwrap();
    assert_eq!(summary.points, 1200);
    assert_eq!(summary.tier, Tier::Silver);
    assert_eq!(summary.next_tier, Some(Tier::Gold));
    assert_eq!(summary.points_to_next_tier, Some(300));
    assert_eq!(ledger.tier_for("specialist-1").await.unwrap(), Tier::Silver);
}

#[tokio::test]
async fn history_is_newest_first() {
    let h = harness();
    let ledger = &h.core.ledger;
    ledger
        .credit("gp-1", EntryType::ReferralSubmitted, 50, "ref-1")
        .await
        .unwrap();
    h.clock.advance(chrono::Duration::minutes(1));
    ledger.credit_course_completion("gp-1", "course-7").await.unwrap();
    h.clock.advance(chrono::Duration::minutes(1));
    ledger.debit("gp-1", 30, "coffee voucher").await.unwrap();

    let history = ledger.history("gp-1", 10).await.unwrap();
    let kinds: Vec<_> = history.iter().map(|e| e.entry_type).collect();
    assert_eq!(
        kinds,
        vec![
            EntryType::Redeemed,
            EntryType::CourseCompleted,
            EntryType::ReferralSubmitted
        ]
    );
    assert_eq!(history[0].points, -30);
    assert_eq!(history[0].remark.as_deref(), Some("coffee voucher"));
    assert_eq!(ledger.balance_of("gp-1").await.unwrap(), 45);
}

#[tokio::test]
async fn negative_adjustment_cannot_overdraw() {
    let h = harness();
    let ledger = &h.core.ledger;
    ledger
        .credit("gp-1", EntryType::ReferralSubmitted, 50, "ref-1")
        .await
        .unwrap();

    let result = ledger.adjust("gp-1", -80, "fix-1", "manual correction").await;
    assert!(matches!(
        result,
        Err(ReferralError::InsufficientBalance {
            required: 80,
            available: 50
        })
    ));

    ledger
        .adjust("gp-1", -20, "fix-2", "manual correction")
        .await
        .unwrap();
    assert_eq!(ledger.balance_of("gp-1").await.unwrap(), 30);
}
