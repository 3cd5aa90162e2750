//! # MediPACS 数据库模块
//!
//! 负责用户、诊断中心、患者、检查、DICOM文件、删除请求与审计日志的
//! 持久化，提供PostgreSQL连接池与完整的CRUD操作。级联删除与审计
//! 写入在同一事务内完成。

pub mod audit;
pub mod connection;
pub mod models;
pub mod queries;

// 重新导出主要类型
pub use audit::{AuditEvent, AuditRecorder};
pub use connection::DatabasePool;
pub use models::*;
pub use queries::DatabaseQueries;
