//! JWT 认证中间件
//!
//! 校验 Bearer Token 并把调用方主体注入请求扩展

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;
use crate::state::AppState;

/// 公开路由：探针与匿名兑换
pub fn is_public_path(method: &Method, path: &str) -> bool {
    if matches!(path, "/health" | "/ready") {
        return true;
    }
    method == Method::POST
        && path
            .strip_prefix("/api/v1/codes/")
            .and_then(|rest| rest.strip_suffix("/redeem"))
            .is_some_and(|code| !code.is_empty() && !code.contains('/'))
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if is_public_path(request.method(), request.uri().path()) {
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let Some(token) = token else {
        return ApiError::Unauthorized("缺少认证 Token".to_string()).into_response();
    };

    match state.jwt.verify_token(token) {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}
