//! HTTP 请求处理器

pub mod codes;
pub mod health;
pub mod referrals;
pub mod rewards;
