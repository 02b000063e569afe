//! 投递重试
//!
//! 通知等出站调用的指数退避重试。是否重试由调用方传入的判定函数决定，
//! 业务错误不进入重试。

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::NotificationConfig;

/// 退避策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 首次调用之外的最大重试次数
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 500)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay_ms: u64) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }

    /// 不重试，只调用一次
    pub fn none() -> Self {
        Self::new(0, 0)
    }

    /// 第 `retry` 次重试前的等待时间（从 0 计），不超过 `max_delay`
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.min(32) as i32);
        self.initial_delay.mul_f64(factor).min(self.max_delay)
    }
}

impl From<&NotificationConfig> for RetryPolicy {
    fn from(config: &NotificationConfig) -> Self {
        Self::new(config.max_retries, config.initial_backoff_ms)
    }
}

/// 按策略执行异步操作
///
/// 成功或遇到不可重试错误时立即返回；重试耗尽时返回最后一次错误
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut retry = 0;
    loop {
        let err = match operation().await {
            Ok(value) => {
                if retry > 0 {
                    debug!(operation = operation_name, retries = retry, "重试后成功");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_retryable(&err) || retry >= policy.max_retries {
            warn!(
                operation = operation_name,
                retries = retry,
                error = %err,
                "操作失败，不再重试"
            );
            return Err(err);
        }

        let delay = policy.backoff(retry);
        debug!(
            operation = operation_name,
            retry,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "操作失败，退避后重试"
        );
        tokio::time::sleep(delay).await;
        retry += 1;
    }
}
