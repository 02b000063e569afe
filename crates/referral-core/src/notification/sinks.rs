//! 通知下游
//!
//! 推送投递由外部系统负责，这里只定义投递接口与几种实现

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use referral_shared::error::{InfraError, Result};
use tracing::info;

use super::types::Notification;

/// 通知下游接口
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, notification: &Notification) -> Result<()>;
}

/// 日志下游，仅输出结构化日志
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, notification: &Notification) -> Result<()> {
        info!(
            notification_id = %notification.notification_id,
            event = %notification.event,
            recipient_id = %notification.recipient_id,
            payload = %notification.payload,
            "通知已发布"
        );
        Ok(())
    }
}

/// HTTP 回调下游，以 JSON POST 投递
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, notification: &Notification) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| InfraError::ExternalService {
                service: "webhook".to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(InfraError::ExternalService {
                service: "webhook".to_string(),
                message: format!("HTTP {}", status),
            });
        }
        Ok(())
    }
}

/// 内存下游，保存收到的通知供查看
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    received: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<Notification> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, notification: &Notification) -> Result<()> {
        self.received.lock().push(notification.clone());
        Ok(())
    }
}
