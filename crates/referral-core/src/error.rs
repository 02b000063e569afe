//! 转诊核心错误类型
//!
//! 定义服务层的业务错误和系统错误

use thiserror::Error;

/// 转诊核心错误类型
#[derive(Debug, Error)]
pub enum ReferralError {
    // === 通用 ===
    #[error("{entity}不存在: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("无权操作: {0}")]
    AccessDenied(String),

    #[error("参数校验失败: {0}")]
    Validation(String),

    // === 兑换码 ===
    #[error("该服务方已有有效兑换码: owner_id={0}")]
    AlreadyIssued(String),

    #[error("兑换码已停用: {0}")]
    Inactive(String),

    #[error("兑换码已过期: {0}")]
    Expired(String),

    #[error("兑换码已达{window}兑换上限: code={code}, limit={limit}")]
    RateLimited {
        code: String,
        window: &'static str,
        limit: u32,
    },

    #[error("唯一值生成重试耗尽: {entity}, attempts={attempts}")]
    ConflictRetryExhausted { entity: &'static str, attempts: u32 },

    // === 转诊 ===
    #[error("状态流转不允许: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    // === 积分账本 ===
    #[error("积分记录已存在: owner_id={owner_id}, type={entry_type}, source_ref={source_ref}")]
    DuplicateSource {
        owner_id: String,
        entry_type: String,
        source_ref: String,
    },

    #[error("积分余额不足: 需要 {required}, 可用 {available}")]
    InsufficientBalance { required: i64, available: i64 },

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),

    #[error("并发冲突，请重试")]
    ConcurrencyConflict,
}

/// 转诊核心 Result 类型别名
pub type Result<T> = std::result::Result<T, ReferralError>;

impl ReferralError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::ConcurrencyConflict)
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::Database(_)
                | Self::Serialization(_)
                | Self::Internal(_)
                | Self::ConcurrencyConflict
                | Self::ConflictRetryExhausted { .. }
        )
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AccessDenied(_) => "ACCESS_DENIED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::AlreadyIssued(_) => "ALREADY_ISSUED",
            Self::Inactive(_) => "INACTIVE",
            Self::Expired(_) => "EXPIRED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::ConflictRetryExhausted { .. } => "CONFLICT_RETRY_EXHAUSTED",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::DuplicateSource { .. } => "DUPLICATE_SOURCE",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
        }
    }
}
