//! 转诊生命周期集成测试

mod common;

use chrono::Duration;
use common::{harness, payload, settle};
use referral_core::models::{EntryType, NewReferral, Referral, ReferralStatus, Urgency};
use referral_core::notification::NotificationEvent;
use referral_core::{Clock, ReferralError, TransitionRequest};
use serde_json::json;

fn direct(from: &str, to: &str) -> NewReferral {
    NewReferral {
        from_party_id: from.to_string(),
        to_party_id: to.to_string(),
        urgency: Urgency::Urgent,
        specialty: Some("Cardiology".to_string()),
        region: None,
        patient_data: json!({"name": "John Roe"}),
        clinical_data: None,
        source_code: None,
        note: Some("please see this week".to_string()),
    }
}

fn to(status: ReferralStatus) -> TransitionRequest {
    TransitionRequest {
        target_status: status,
        note: None,
        override_schedule: false,
    }
}

fn assert_history_matches(referral: &Referral) {
    let last = referral.status_history.last().unwrap();
    assert_eq!(last.status, referral.status);
}

#[tokio::test]
async fn create_credits_submission_and_notifies_receiver() {
    let h = harness();
    let referral = h
        .core
        .lifecycle
        .create_referral(direct("gp-1", "specialist-1"))
        .await
        .unwrap();

    assert_eq!(referral.status, ReferralStatus::Pending);
    assert_eq!(referral.status_history.len(), 1);
    assert!(referral.referral_number.starts_with("RF20260302"));
    assert_eq!(h.core.ledger.balance_of("gp-1").await.unwrap(), 50);

    settle().await;
    let received = h.sink.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].event, NotificationEvent::ReferralCreated);
    assert_eq!(received[0].recipient_id, "specialist-1");
}

#[tokio::test]
async fn history_grows_with_each_transition() {
    let h = harness();
    let lifecycle = &h.core.lifecycle;
    let referral = lifecycle
        .create_referral(direct("gp-1", "specialist-1"))
        .await
        .unwrap();

    let accepted = lifecycle
        .transition(referral.id, "specialist-1", to(ReferralStatus::Accepted))
        .await
        .unwrap();
    assert_eq!(accepted.status_history.len(), 2);
    assert_history_matches(&accepted);

    h.clock.advance(Duration::hours(1));
    lifecycle
        .schedule(referral.id, "specialist-1", h.clock.now() + Duration::days(3))
        .await
        .unwrap();

    let completed = lifecycle
        .transition(referral.id, "specialist-1", to(ReferralStatus::Completed))
        .await
        .unwrap();
    assert_eq!(completed.status_history.len(), 3);
    assert_history_matches(&completed);
    assert_eq!(completed.completed_at, Some(h.clock.now()));

    let stored = lifecycle.get_referral(referral.id, "gp-1").await.unwrap();
    let statuses: Vec<_> = stored.status_history.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![
            ReferralStatus::Pending,
            ReferralStatus::Accepted,
            ReferralStatus::Completed
        ]
    );
}

#[tokio::test]
async fn invalid_transitions_never_mutate() {
    let h = harness();
    let lifecycle = &h.core.lifecycle;
    let referral = lifecycle
        .create_referral(direct("gp-1", "specialist-1"))
        .await
        .unwrap();

    let skip = lifecycle
        .transition(referral.id, "specialist-1", to(ReferralStatus::Completed))
        .await;
    assert!(matches!(skip, Err(ReferralError::InvalidTransition { .. })));

    let back = lifecycle
        .transition(referral.id, "specialist-1", to(ReferralStatus::Pending))
        .await;
    assert!(matches!(back, Err(ReferralError::InvalidTransition { .. })));

    lifecycle
        .transition(referral.id, "gp-1", to(ReferralStatus::Cancelled))
        .await
        .unwrap();
    let from_terminal = lifecycle
        .transition(referral.id, "specialist-1", to(ReferralStatus::Accepted))
        .await;
    assert!(matches!(
        from_terminal,
        Err(ReferralError::InvalidTransition { .. })
    ));

    let stored = lifecycle.get_referral(referral.id, "specialist-1").await.unwrap();
    assert_eq!(stored.status, ReferralStatus::Cancelled);
    assert_eq!(stored.status_history.len(), 2);
}

#[tokio::test]
async fn actor_rules_are_enforced() {
    let h = harness();
    let lifecycle = &h.core.lifecycle;
    let referral = lifecycle
        .create_referral(direct("gp-1", "specialist-1"))
        .await
        .unwrap();

    let stranger = lifecycle
        .transition(referral.id, "someone-else", to(ReferralStatus::Cancelled))
        .await;
    assert!(matches!(stranger, Err(ReferralError::AccessDenied(_))));

    let referrer_accepts = lifecycle
        .transition(referral.id, "gp-1", to(ReferralStatus::Accepted))
        .await;
    assert!(matches!(referrer_accepts, Err(ReferralError::AccessDenied(_))));

    assert!(matches!(
        lifecycle.get_referral(referral.id, "someone-else").await,
        Err(ReferralError::AccessDenied(_))
    ));
}

#[tokio::test]
async fn completion_requires_schedule_unless_overridden() {
    let h = harness();
    let lifecycle = &h.core.lifecycle;
    let referral = lifecycle
        .create_referral(direct("gp-1", "specialist-1"))
        .await
        .unwrap();
    lifecycle
        .transition(referral.id, "specialist-1", to(ReferralStatus::Accepted))
        .await
        .unwrap();

    let unscheduled = lifecycle
        .transition(referral.id, "specialist-1", to(ReferralStatus::Completed))
        .await;
    assert!(matches!(unscheduled, Err(ReferralError::Validation(_))));

    let mut forced = to(ReferralStatus::Completed);
    forced.override_schedule = true;
    let completed = lifecycle
        .transition(referral.id, "specialist-1", forced)
        .await
        .unwrap();
    assert_eq!(completed.status, ReferralStatus::Completed);
}

#[tokio::test]
async fn duplicate_completion_credits_once() {
    let h = harness();
    let lifecycle = &h.core.lifecycle;
    let referral = lifecycle
        .create_referral(direct("gp-1", "specialist-1"))
        .await
        .unwrap();
    lifecycle
        .transition(referral.id, "specialist-1", to(ReferralStatus::Accepted))
        .await
        .unwrap();

    let mut complete = to(ReferralStatus::Completed);
    complete.override_schedule = true;
    lifecycle
        .transition(referral.id, "specialist-1", complete.clone())
        .await
        .unwrap();
    let again = lifecycle
        .transition(referral.id, "specialist-1", complete)
        .await
        .unwrap();
    assert_eq!(again.status_history.len(), 3);

    // 提交 50 + 完成 200
    assert_eq!(h.core.ledger.balance_of("gp-1").await.unwrap(), 250);
    assert_eq!(h.core.ledger.balance_of("specialist-1").await.unwrap(), 100);

    let completions = h
        .core
        .ledger
        .history("specialist-1", 50)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.entry_type == EntryType::ReferralCompleted)
        .count();
    assert_eq!(completions, 1);
}

#[tokio::test]
async fn transitions_notify_counterpart() {
    let h = harness();
    let lifecycle = &h.core.lifecycle;
    let referral = lifecycle
        .create_referral(direct("gp-1", "specialist-1"))
        .await
        .unwrap();
    lifecycle
        .transition(referral.id, "specialist-1", to(ReferralStatus::Rejected))
        .await
        .unwrap();

    settle().await;
    let rejected: Vec<_> = h
        .sink
        .received()
        .into_iter()
        .filter(|n| n.event == NotificationEvent::ReferralRejected)
        .collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].recipient_id, "gp-1");
}

#[tokio::test]
async fn schedule_is_receiver_only_and_state_bound() {
    let h = harness();
    let lifecycle = &h.core.lifecycle;
    let referral = lifecycle
        .create_referral(direct("gp-1", "specialist-1"))
        .await
        .unwrap();
    let at = h.clock.now() + Duration::days(2);

    assert!(matches!(
        lifecycle.schedule(referral.id, "gp-1", at).await,
        Err(ReferralError::AccessDenied(_))
    ));

    let scheduled = lifecycle.schedule(referral.id, "specialist-1", at).await.unwrap();
    assert_eq!(scheduled.scheduled_at, Some(at));

    lifecycle
        .transition(referral.id, "specialist-1", to(ReferralStatus::Rejected))
        .await
        .unwrap();
    assert!(matches!(
        lifecycle.schedule(referral.id, "specialist-1", at).await,
        Err(ReferralError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn messages_are_ordered_and_party_only() {
    let h = harness();
    let lifecycle = &h.core.lifecycle;
    let referral = lifecycle
        .create_referral(direct("gp-1", "specialist-1"))
        .await
        .unwrap();

    lifecycle
        .add_message(referral.id, "gp-1", "lab results attached")
        .await
        .unwrap();
    h.clock.advance(Duration::minutes(5));
    lifecycle
        .add_message(referral.id, "specialist-1", "thanks, reviewing")
        .await
        .unwrap();

    assert!(matches!(
        lifecycle.add_message(referral.id, "intruder", "hi").await,
        Err(ReferralError::AccessDenied(_))
    ));

    let messages = lifecycle.list_messages(referral.id, "specialist-1").await.unwrap();
    let seqs: Vec<_> = messages.iter().map(|m| m.seq).collect();
    assert_eq!(seqs, vec![1, 2]);
    assert_eq!(messages[1].sender_id, "specialist-1");

    settle().await;
    assert!(
        h.sink
            .received()
            .iter()
            .any(|n| n.event == NotificationEvent::MessageReceived && n.recipient_id == "specialist-1")
    );
}

#[tokio::test]
async fn rating_applies_once_to_code_referrals() {
    let h = harness();
    h.core.registry.issue_code("gp-1").await.unwrap();
    let code = h.core.registry.get_mine("gp-1").await.unwrap().code;
    let lifecycle = &h.core.lifecycle;

    let referral = h
        .core
        .redemption
        .redeem(&code, payload("specialist-1"))
        .await
        .unwrap()
        .referral;

    assert!(matches!(
        lifecycle.rate(referral.id, "gp-1", 4).await,
        Err(ReferralError::Validation(_))
    ));

    lifecycle
        .transition(referral.id, "specialist-1", to(ReferralStatus::Accepted))
        .await
        .unwrap();
    let mut complete = to(ReferralStatus::Completed);
    complete.override_schedule = true;
    lifecycle
        .transition(referral.id, "specialist-1", complete)
        .await
        .unwrap();

    assert!(matches!(
        lifecycle.rate(referral.id, "specialist-1", 4).await,
        Err(ReferralError::AccessDenied(_))
    ));
    let rated = lifecycle.rate(referral.id, "gp-1", 4).await.unwrap();
    assert_eq!(rated.rating, Some(4));
    assert!(matches!(
        lifecycle.rate(referral.id, "gp-1", 5).await,
        Err(ReferralError::Validation(_))
    ));

    let analytics = h.core.registry.find(&code).await.unwrap().analytics;
    assert_eq!(analytics.successful_referrals, 1);
    assert_eq!(analytics.rating_count, 1);
    assert!((analytics.average_rating - 4.0).abs() < f64::EPSILON);

    let direct_referral = lifecycle
        .create_referral(direct("gp-1", "specialist-2"))
        .await
        .unwrap();
    lifecycle
        .transition(direct_referral.id, "specialist-2", to(ReferralStatus::Accepted))
        .await
        .unwrap();
    let mut complete = to(ReferralStatus::Completed);
    complete.override_schedule = true;
    lifecycle
        .transition(direct_referral.id, "specialist-2", complete)
        .await
        .unwrap();
    assert!(matches!(
        lifecycle.rate(direct_referral.id, "gp-1", 5).await,
        Err(ReferralError::Validation(_))
    ));
}

#[tokio::test]
async fn list_for_party_filters_by_status() {
    let h = harness();
    let lifecycle = &h.core.lifecycle;
    let a = lifecycle
        .create_referral(direct("gp-1", "specialist-1"))
        .await
        .unwrap();
    lifecycle
        .create_referral(direct("gp-1", "specialist-2"))
        .await
        .unwrap();
    lifecycle
        .transition(a.id, "specialist-1", to(ReferralStatus::Accepted))
        .await
        .unwrap();

    assert_eq!(lifecycle.list_for_party("gp-1", None, 50).await.unwrap().len(), 2);
    let accepted = lifecycle
        .list_for_party("gp-1", Some(ReferralStatus::Accepted), 50)
        .await
        .unwrap();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].id, a.id);
    assert_eq!(lifecycle.list_for_party("specialist-2", None, 50).await.unwrap().len(), 1);
}
