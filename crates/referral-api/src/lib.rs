//! 转诊服务 HTTP 接口
//!
//! 在转诊核心之上提供 REST API、JWT 主体解析与兑换码过期 Worker。
//!
//! ## 模块结构
//!
//! - `auth`: JWT 校验与调用方主体
//! - `dto`: 请求和响应的数据传输对象
//! - `error`: API 错误与统一错误响应
//! - `handlers`: HTTP 请求处理器
//! - `middleware`: 认证中间件
//! - `routes`: 路由配置
//! - `state`: 应用状态
//! - `worker`: 后台任务

pub mod app;
pub mod auth;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod worker;

pub use app::build_router;
pub use dto::ApiResponse;
pub use error::{ApiError, Result};
pub use state::AppState;
