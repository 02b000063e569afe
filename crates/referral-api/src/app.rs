//! 应用路由组装

use std::time::Duration;

use axum::http::HeaderValue;
use axum::{Router, middleware, routing::get};
use referral_shared::config::ServerConfig;
use referral_shared::observability::middleware as obs_middleware;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use crate::handlers::health;
use crate::middleware::auth_middleware;
use crate::routes;
use crate::state::AppState;

/// 构建完整路由
///
/// 中间件自外向内：CORS → 请求 ID → 追踪与指标 → 超时 → 压缩 → 认证
pub fn build_router(state: AppState, server: &ServerConfig) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes())
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            server.request_timeout_seconds,
        )))
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .layer(cors_layer(&server.cors_origins))
        .with_state(state)
}

/// 按逗号分隔的来源列表构建 CORS 层
pub fn cors_layer(allowed_origins: &str) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.trim() == "*" {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();
    cors.allow_origin(origins)
}
