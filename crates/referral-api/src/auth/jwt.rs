//! JWT Token 处理

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use referral_shared::config::AuthConfig;
use serde::{Deserialize, Serialize};

use super::principal::{Principal, Role};
use crate::error::ApiError;

/// JWT 配置
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// HS256 共享密钥
    pub secret: String,
    /// Token 签发者
    pub issuer: String,
    /// 签发 Token 的有效期（秒），仅本地工具与测试使用
    pub expires_in_secs: i64,
}

impl From<&AuthConfig> for JwtConfig {
    fn from(config: &AuthConfig) -> Self {
        Self {
            secret: config.jwt_secret.clone(),
            issuer: config.issuer.clone(),
            expires_in_secs: 3600,
        }
    }
}

/// JWT Claims（Token 载荷）
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// 主体 ID
    pub sub: String,
    /// 角色
    pub role: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// JWT 管理器
#[derive(Clone)]
pub struct JwtManager {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtManager {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// 签发 Token
    pub fn generate_token(&self, principal_id: &str, role: Role) -> Result<String, ApiError> {
        let now = Utc::now();
        let claims = Claims {
            sub: principal_id.to_string(),
            role: role.as_str().to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(self.config.expires_in_secs)).timestamp(),
            iss: self.config.issuer.clone(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ApiError::Internal(format!("JWT 生成失败: {}", e)))
    }

    /// 校验 Token 并解析为调用方主体
    pub fn verify_token(&self, token: &str) -> Result<Principal, ApiError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.config.issuer]);

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(
            |e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ApiError::Unauthorized("Token 已过期".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidToken => {
                    ApiError::Unauthorized("无效的 Token".to_string())
                }
                _ => ApiError::Unauthorized(format!("Token 验证失败: {}", e)),
            },
        )?;

        let claims = token_data.claims;
        let role = claims
            .role
            .parse::<Role>()
            .map_err(|_| ApiError::Unauthorized(format!("未知角色: {}", claims.role)))?;
        if claims.sub.trim().is_empty() {
            return Err(ApiError::Unauthorized("Token 缺少 sub".to_string()));
        }

        Ok(Principal {
            id: claims.sub,
            role,
        })
    }
}
