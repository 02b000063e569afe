//! 通知模块
//!
//! 转诊状态变化与留言会通知另一方参与者。投递是 fire-and-forget 的，
//! 下游可选日志、HTTP 回调或关闭

pub mod publisher;
pub mod sinks;
pub mod types;

pub use publisher::NotificationPublisher;
pub use sinks::{LogSink, NotificationSink, RecordingSink, WebhookSink};
pub use types::{Notification, NotificationEvent};
