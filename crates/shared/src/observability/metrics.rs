//! Prometheus 指标
//!
//! 业务代码只调用本模块的 `record_*` 函数，指标名集中在这里。
//! recorder 未安装时这些调用为空操作。

use std::net::SocketAddr;

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

const COUNTERS: &[(&str, &str)] = &[
    ("http_requests_total", "HTTP requests served"),
    ("code_issued_total", "Referral codes issued"),
    (
        "code_generation_conflicts_total",
        "Code uniqueness conflicts hit during issuance",
    ),
    ("redemptions_total", "Code redemptions by result"),
    ("referral_transitions_total", "Referral status transitions by target"),
    ("ledger_entries_total", "Reward ledger entries by type"),
];

const HISTOGRAMS: &[(&str, &str)] = &[
    ("http_request_duration_seconds", "HTTP request latency"),
    ("redemption_duration_seconds", "Redemption latency"),
];

/// 安装全局 recorder，并在 `addr` 上暴露 `/metrics`
pub async fn install(service_name: &str, addr: SocketAddr) -> Result<JoinHandle<()>> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe();
    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "指标端口已监听");
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router(handle)).await {
            error!(error = %e, "指标服务异常退出");
        }
    }))
}

fn describe() {
    for (name, help) in COUNTERS {
        metrics::describe_counter!(*name, *help);
    }
    for (name, help) in HISTOGRAMS {
        metrics::describe_histogram!(*name, *help);
    }
    metrics::describe_gauge!(
        "worker_last_run_timestamp",
        "Unix timestamp of the last background worker run"
    );
}

fn router(handle: PrometheusHandle) -> Router {
    Router::new().route("/metrics", get(move || std::future::ready(handle.render())))
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录兑换码签发
#[inline]
pub fn record_code_issued(attempts: u32) {
    metrics::counter!("code_issued_total").increment(1);
    if attempts > 1 {
        metrics::counter!("code_generation_conflicts_total").increment(u64::from(attempts - 1));
    }
}

/// 记录兑换
#[inline]
pub fn record_redemption(result: &str, duration_secs: f64) {
    metrics::counter!("redemptions_total", "result" => result.to_string()).increment(1);
    metrics::histogram!("redemption_duration_seconds", "result" => result.to_string())
        .record(duration_secs);
}

/// 记录转诊状态流转
#[inline]
pub fn record_transition(to_status: &str) {
    metrics::counter!("referral_transitions_total", "to" => to_status.to_string()).increment(1);
}

/// 记录账本写入
#[inline]
pub fn record_ledger_entry(entry_type: &str) {
    metrics::counter!("ledger_entries_total", "type" => entry_type.to_string()).increment(1);
}

/// 更新后台任务最近一次运行时间
#[inline]
pub fn set_worker_last_run(worker: &str) {
    metrics::gauge!("worker_last_run_timestamp", "worker" => worker.to_string())
        .set(chrono::Utc::now().timestamp() as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 未初始化 recorder 时也不应 panic
        record_http_request("GET", "/codes/mine", 200, 0.1);
        record_code_issued(3);
        record_redemption("success", 0.3);
        record_transition("ACCEPTED");
        record_ledger_entry("referral_completed");
        set_worker_last_run("code_expiry_worker");
    }

    #[tokio::test]
    async fn test_metrics_route_renders_snapshot() {
        use axum::body::Body;
        use axum::http::{Request, StatusCode};
        use tower::ServiceExt;

        let recorder = PrometheusBuilder::new().build_recorder();
        let response = router(recorder.handle())
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
