//! 通知发布器
//!
//! 业务服务通过 `publish` 发出通知，投递在独立任务中进行，
//! 带超时与指数退避重试，失败只记录日志，不影响业务结果

use std::sync::Arc;
use std::time::Duration;

use referral_shared::config::{NotificationConfig, SinkKind};
use referral_shared::error::InfraError;
use referral_shared::retry::{RetryPolicy, retry_with_policy};
use tracing::{debug, error, warn};

use super::sinks::{LogSink, NotificationSink, WebhookSink};
use super::types::{Notification, NotificationEvent};

#[derive(Clone)]
pub struct NotificationPublisher {
    sink: Option<Arc<dyn NotificationSink>>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl NotificationPublisher {
    pub fn new(sink: Arc<dyn NotificationSink>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            sink: Some(sink),
            policy,
            timeout,
        }
    }

    /// 不投递任何通知
    pub fn disabled() -> Self {
        Self {
            sink: None,
            policy: RetryPolicy::none(),
            timeout: Duration::from_secs(1),
        }
    }

    /// 按配置选择下游
    pub fn from_config(config: &NotificationConfig) -> Result<Self, InfraError> {
        let policy = RetryPolicy::from(config);
        let timeout = Duration::from_millis(config.timeout_ms);

        let sink: Arc<dyn NotificationSink> = match config.sink {
            SinkKind::Disabled => return Ok(Self::disabled()),
            SinkKind::Log => Arc::new(LogSink),
            SinkKind::Webhook => {
                let url = config.webhook_url.as_deref().ok_or_else(|| {
                    InfraError::Internal("notifications.webhook_url 未配置".to_string())
                })?;
                Arc::new(WebhookSink::new(url))
            }
        };

        Ok(Self::new(sink, policy, timeout))
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// 发布通知（fire-and-forget）
    pub fn publish(
        &self,
        event: NotificationEvent,
        recipient_id: &str,
        payload: serde_json::Value,
    ) {
        let Some(sink) = self.sink.clone() else {
            return;
        };

        let notification = Notification::new(event, recipient_id, payload);
        let policy = self.policy.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            if let Err(e) = deliver_with_retry(&sink, &notification, &policy, timeout).await {
                error!(
                    notification_id = %notification.notification_id,
                    event = %notification.event,
                    recipient_id = %notification.recipient_id,
                    sink = sink.name(),
                    error = %e,
                    "通知投递失败"
                );
            }
        });
    }
}

/// 带超时和重试的单条投递
async fn deliver_with_retry(
    sink: &Arc<dyn NotificationSink>,
    notification: &Notification,
    policy: &RetryPolicy,
    timeout: Duration,
) -> Result<(), InfraError> {
    retry_with_policy(policy, "notification.deliver", InfraError::is_retryable, || {
        let sink = sink.clone();
        async move {
            match tokio::time::timeout(timeout, sink.deliver(notification)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(sink = sink.name(), "通知投递超时");
                    Err(InfraError::ExternalServiceTimeout {
                        service: sink.name().to_string(),
                    })
                }
            }
        }
    })
    .await?;

    debug!(
        notification_id = %notification.notification_id,
        event = %notification.event,
        "通知投递成功"
    );
    Ok(())
}
