//! 可观测性
//!
//! 进程启动时调用一次 `init`：装好日志订阅器，再按配置开放指标端口。

pub mod logging;
pub mod metrics;
pub mod middleware;

use std::net::SocketAddr;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::info;

pub use crate::config::ObservabilityConfig;

/// 持有指标导出任务，drop 时停止导出
pub struct ObservabilityGuard {
    exporter: Option<JoinHandle<()>>,
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        if let Some(exporter) = self.exporter.take() {
            exporter.abort();
            info!("指标导出已停止");
        }
    }
}

pub async fn init(config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    logging::init(config)?;

    let exporter = if config.metrics_enabled {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
        Some(metrics::install(&config.service_name, addr).await?)
    } else {
        None
    };

    info!(
        service = %config.service_name,
        metrics = exporter.is_some(),
        "可观测性已初始化"
    );
    Ok(ObservabilityGuard { exporter })
}
