//! 兑换码过期 Worker
//!
//! 定期停用已过期但仍启用的兑换码，释放服务方的签发名额。
//! 兑换路径本身会拒绝过期码，这里只负责状态收敛

use std::sync::Arc;
use std::time::Duration;

use referral_core::{CodeRegistry, Result};
use referral_shared::config::WorkerConfig;
use referral_shared::observability::metrics;
use tokio::sync::watch;
use tracing::{error, info};

const WORKER_NAME: &str = "code_expiry_worker";

pub struct CodeExpiryWorker {
    registry: Arc<CodeRegistry>,
    poll_interval: Duration,
}

impl CodeExpiryWorker {
    pub fn new(registry: Arc<CodeRegistry>, poll_interval: Duration) -> Self {
        Self {
            registry,
            poll_interval,
        }
    }

    pub fn from_config(registry: Arc<CodeRegistry>, config: &WorkerConfig) -> Self {
        Self::new(
            registry,
            Duration::from_secs(config.code_expiry_interval_seconds.max(1)),
        )
    }

    /// 执行一轮过期处理
    pub async fn run_once(&self) -> Result<u64> {
        let expired = self.registry.expire_stale().await?;
        metrics::set_worker_last_run(WORKER_NAME);
        Ok(expired)
    }

    /// 主循环，收到关闭信号后退出
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_interval = ?self.poll_interval, "CodeExpiryWorker 已启动");

        loop {
            if let Err(e) = self.run_once().await {
                error!(error = %e, "处理过期兑换码出错");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {
                    info!("CodeExpiryWorker 已停止");
                    return;
                }
            }
        }
    }
}
