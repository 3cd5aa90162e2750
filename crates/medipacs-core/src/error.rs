//! 错误定义模块

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// 拒绝访问时携带的结构化细节
///
/// 仅包含角色与租户标识，绝不包含患者PHI字段。
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AccessDenial {
    /// 本次操作要求的访问级别
    pub required_access: String,
    /// 请求者角色
    pub user_role: String,
    /// 请求者所属诊断中心
    pub user_center_id: Option<Uuid>,
    /// 目标资源所属诊断中心
    pub target_center_id: Option<Uuid>,
    /// 目标资源标识
    pub resource_id: Option<String>,
}

/// 系统统一错误类型
#[derive(Error, Debug)]
pub enum PacsError {
    #[error("未认证: {0}")]
    Unauthenticated(String),

    #[error("禁止访问: {message}")]
    Forbidden {
        message: String,
        denial: AccessDenial,
    },

    #[error("资源未找到: {resource} {id}")]
    NotFound { resource: String, id: String },

    #[error("资源冲突: {0}")]
    Conflict(String),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("请求过于频繁: {0}")]
    RateLimited(String),

    #[error("无效状态转换: 从 {from} 执行 {action}")]
    InvalidTransition { from: String, action: String },

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

impl PacsError {
    /// 构造资源未找到错误
    pub fn not_found(resource: &str, id: impl ToString) -> Self {
        PacsError::NotFound {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }

    /// 机器可读错误码，供HTTP层与审计使用
    pub fn code(&self) -> &'static str {
        match self {
            PacsError::Unauthenticated(_) => "unauthenticated",
            PacsError::Forbidden { .. } => "forbidden",
            PacsError::NotFound { .. } => "not_found",
            PacsError::Conflict(_) => "conflict",
            PacsError::Validation(_) => "validation_failed",
            PacsError::RateLimited(_) => "rate_limited",
            PacsError::InvalidTransition { .. } => "invalid_transition",
            PacsError::Database(_) => "database_error",
            PacsError::Storage(_) => "storage_error",
            PacsError::Serialization(_) => "serialization_error",
            PacsError::Internal(_) => "internal_error",
        }
    }
}

impl From<std::io::Error> for PacsError {
    fn from(e: std::io::Error) -> Self {
        PacsError::Storage(e.to_string())
    }
}

/// 系统统一结果类型
pub type Result<T> = std::result::Result<T, PacsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            PacsError::not_found("study", "AB12CD34").code(),
            "not_found"
        );
        assert_eq!(PacsError::Conflict("dup".into()).code(), "conflict");
        assert_eq!(
            PacsError::InvalidTransition {
                from: "queued".into(),
                action: "write_doctor_report".into()
            }
            .code(),
            "invalid_transition"
        );
    }

    #[test]
    fn test_denial_serializes_without_phi() {
        let denial = AccessDenial {
            required_access: "administrative".into(),
            user_role: "doctor".into(),
            user_center_id: None,
            target_center_id: None,
            resource_id: Some("AB12CD34".into()),
        };
        let value = serde_json::to_value(&denial).unwrap();
        let keys: Vec<&str> = value.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        for phi in ["patient_name", "first_name", "last_name", "email", "phone", "address"] {
            assert!(!keys.contains(&phi));
        }
    }
}
