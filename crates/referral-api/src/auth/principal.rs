//! 调用方主体

use std::str::FromStr;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// 角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// 服务方（发起转诊、持有兑换码）
    Provider,
    /// 专科医生（接收转诊）
    Specialist,
    Patient,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provider => "PROVIDER",
            Self::Specialist => "SPECIALIST",
            Self::Patient => "PATIENT",
            Self::Admin => "ADMIN",
        }
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PROVIDER" => Ok(Self::Provider),
            "SPECIALIST" => Ok(Self::Specialist),
            "PATIENT" => Ok(Self::Patient),
            "ADMIN" => Ok(Self::Admin),
            _ => Err(()),
        }
    }
}

/// 已认证的调用方，由认证中间件注入请求扩展
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

impl Principal {
    /// 要求调用方具备其中一个角色
    pub fn require_role(&self, allowed: &[Role]) -> Result<(), ApiError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!(
                "角色 {} 无权执行该操作",
                self.role.as_str()
            )))
        }
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("未认证".to_string()))
    }
}
