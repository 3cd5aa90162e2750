//! # MediPACS Web模块
//!
//! HTTP接口层：认证、检查流转、删除请求与管理端点。
//! 业务判定委托给access与workflow模块，本层负责装配。

pub mod admin;
pub mod auth;
pub mod handlers;
pub mod response;
pub mod server;

pub use auth::{InMemoryRateLimiter, RateLimiter, SessionManager};
pub use response::{ApiError, ApiResult};
pub use server::{AppState, WebServer};
