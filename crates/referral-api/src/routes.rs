//! 路由配置模块

use axum::{
    Router,
    routing::{get, post, put},
};

use crate::{handlers, state::AppState};

/// 兑换码路由
fn code_routes() -> Router<AppState> {
    Router::new()
        .route("/codes", post(handlers::codes::issue_code))
        .route("/codes/mine", get(handlers::codes::get_my_code))
        .route(
            "/codes/restrictions",
            put(handlers::codes::update_restrictions),
        )
        .route("/codes/deactivate", post(handlers::codes::deactivate_code))
        .route("/codes/{code}/redeem", post(handlers::codes::redeem_code))
}

/// 转诊路由
fn referral_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/referrals",
            post(handlers::referrals::create_referral).get(handlers::referrals::list_referrals),
        )
        .route("/referrals/{id}", get(handlers::referrals::get_referral))
        .route(
            "/referrals/{id}/status",
            put(handlers::referrals::update_status),
        )
        .route(
            "/referrals/{id}/schedule",
            put(handlers::referrals::schedule),
        )
        .route(
            "/referrals/{id}/messages",
            get(handlers::referrals::list_messages).post(handlers::referrals::add_message),
        )
        .route("/referrals/{id}/rating", post(handlers::referrals::rate))
}

/// 积分路由
fn reward_routes() -> Router<AppState> {
    Router::new()
        .route("/rewards/balance", get(handlers::rewards::get_balance))
        .route("/rewards/summary", get(handlers::rewards::get_summary))
        .route("/rewards/history", get(handlers::rewards::get_history))
        .route("/rewards/redeem", post(handlers::rewards::redeem_points))
        .route(
            "/rewards/adjustments",
            post(handlers::rewards::adjust_points),
        )
        .route(
            "/rewards/course-completions",
            post(handlers::rewards::course_completion),
        )
}

/// 全部业务路由，挂载在 /api/v1 下
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(code_routes())
        .merge(referral_routes())
        .merge(reward_routes())
}
