//! 探针

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::state::AppState;

const SERVICE_NAME: &str = "referral-api";

/// 存活探针
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME
    }))
}

/// 就绪探针：检查数据库连接
pub async fn readiness_check(State(state): State<AppState>) -> Json<Value> {
    let database = match &state.database {
        Some(db) if db.health_check().await.is_ok() => "ok",
        Some(_) => "fail",
        None => "memory",
    };

    Json(json!({
        "status": if database == "fail" { "degraded" } else { "ok" },
        "service": SERVICE_NAME,
        "checks": {
            "database": database
        }
    }))
}
