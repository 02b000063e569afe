//! API 错误类型
//!
//! 业务错误映射为带错误码的 4xx，系统错误统一返回 500 与通用提示，
//! 细节只写日志

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use referral_core::ReferralError;
use serde_json::json;

/// API 错误类型
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("未授权: {0}")]
    Unauthorized(String),
    #[error("禁止访问: {0}")]
    Forbidden(String),
    #[error("参数验证失败: {0}")]
    Validation(String),
    #[error(transparent)]
    Core(#[from] ReferralError),
    #[error("内部错误: {0}")]
    Internal(String),
}

impl ApiError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Core(e) => match e {
                ReferralError::NotFound { .. } => StatusCode::NOT_FOUND,
                ReferralError::AccessDenied(_) => StatusCode::FORBIDDEN,
                ReferralError::Validation(_) => StatusCode::BAD_REQUEST,
                ReferralError::AlreadyIssued(_)
                | ReferralError::InvalidTransition { .. }
                | ReferralError::DuplicateSource { .. }
                | ReferralError::ConcurrencyConflict => StatusCode::CONFLICT,
                ReferralError::Inactive(_) | ReferralError::Expired(_) => StatusCode::GONE,
                ReferralError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                ReferralError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                ReferralError::ConflictRetryExhausted { .. }
                | ReferralError::Database(_)
                | ReferralError::Serialization(_)
                | ReferralError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// 返回错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Core(e) => e.error_code(),
        }
    }

    fn is_system_error(&self) -> bool {
        match self {
            Self::Internal(_) => true,
            Self::Core(e) => !e.is_business_error() && !matches!(e, ReferralError::ConcurrencyConflict),
            _ => false,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = if self.is_system_error() {
            match &self {
                Self::Core(ReferralError::ConflictRetryExhausted { entity, attempts }) => {
                    tracing::error!(entity, attempts, "唯一值生成重试耗尽，检查配置");
                }
                other => tracing::error!(error = %other, "请求处理失败"),
            }
            "服务内部错误，请稍后重试".to_string()
        } else {
            self.to_string()
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

/// 从 validator 错误转换
impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
