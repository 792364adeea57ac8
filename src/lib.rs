//! 认证与会话安全引擎
//! 密码哈希、令牌签发与校验、滑动窗口限流、账户锁定

pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod routes;
pub mod services;
pub mod telemetry;
