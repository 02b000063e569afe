//! 认证模块
//!
//! 令牌由外部认证服务签发，这里只校验并解析出调用方主体

mod jwt;
mod principal;

pub use jwt::{Claims, JwtConfig, JwtManager};
pub use principal::{Principal, Role};
