//! 集成测试公共构件：内存仓储 + 手动时钟 + 记录型通知下游

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use referral_core::notification::RecordingSink;
use referral_core::service::CodeGenerator;
use referral_core::{
    Clock, CodeRegistry, ManualClock, NotificationPublisher, RedemptionPayload, ReferralCore,
    Repositories,
};
use referral_shared::config::AppConfig;
use referral_shared::observability::logging;
use referral_shared::retry::RetryPolicy;
use serde_json::json;

pub struct Harness {
    pub core: ReferralCore,
    pub repos: Repositories,
    pub clock: Arc<ManualClock>,
    pub sink: RecordingSink,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub fn harness() -> Harness {
    build(None)
}

/// 使用固定序列的生成函数，序列用完后重复最后一个
pub fn harness_with_codes(codes: &[&str]) -> Harness {
    let codes: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
    let cursor = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let generator: CodeGenerator = Arc::new(move || {
        let i = cursor.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        codes[i.min(codes.len() - 1)].clone()
    });
    build(Some(generator))
}

pub fn harness_with_generator(generator: CodeGenerator) -> Harness {
    build(Some(generator))
}

fn build(generator: Option<CodeGenerator>) -> Harness {
    logging::init_for_tests();
    let config = AppConfig::default();
    let repos = Repositories::memory();
    let clock = Arc::new(ManualClock::new(start_time()));
    let sink = RecordingSink::new();
    let publisher = NotificationPublisher::new(
        Arc::new(sink.clone()),
        RetryPolicy::none(),
        Duration::from_millis(200),
    );

    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let mut registry =
        CodeRegistry::new(repos.codes.clone(), dyn_clock.clone(), config.codes.clone()).unwrap();
    if let Some(generator) = generator {
        registry = registry.with_generator(generator);
    }
    let core = ReferralCore::with_registry(registry, repos.clone(), publisher, dyn_clock, &config);

    Harness {
        core,
        repos,
        clock,
        sink,
    }
}

pub fn payload(specialist_id: &str) -> RedemptionPayload {
    RedemptionPayload {
        specialist_id: specialist_id.to_string(),
        urgency: None,
        specialty: None,
        region: None,
        patient_data: json!({"name": "Jane Doe", "dob": "1980-04-12"}),
        clinical_data: Some(json!({"reason": "chest pain"})),
        idempotency_key: None,
    }
}

/// 等待 fire-and-forget 通知落地
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}
