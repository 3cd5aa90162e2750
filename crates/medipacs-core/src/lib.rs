//! # MediPACS Core
//!
//! 多租户医学影像检查管理系统的核心模块，提供基础数据结构、错误定义、
//! 检查号生成和PHI脱敏工具。

pub mod error;
pub mod models;
pub mod redact;
pub mod utils;

pub use error::{AccessDenial, PacsError, Result};
pub use models::*;
