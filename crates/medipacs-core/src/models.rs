//! 核心数据模型定义

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 用户角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// 系统管理员 - 全系统访问
    Admin,
    /// 诊断中心管理员 - 本中心管理权限
    DiagnosticCenterAdmin,
    /// 临床医生 - 上传、分配与报告
    Doctor,
    /// 技师 - 上传与基础查看
    Technician,
    /// 放射科医生 - 诊断与复核
    Radiologist,
}

impl UserRole {
    /// 持久化使用的角色字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::DiagnosticCenterAdmin => "diagnostic_center_admin",
            UserRole::Doctor => "doctor",
            UserRole::Technician => "technician",
            UserRole::Radiologist => "radiologist",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(UserRole::Admin),
            "diagnostic_center_admin" => Some(UserRole::DiagnosticCenterAdmin),
            "doctor" => Some(UserRole::Doctor),
            "technician" => Some(UserRole::Technician),
            "radiologist" => Some(UserRole::Radiologist),
            _ => None,
        }
    }

    /// 全部角色，供穷举测试使用
    pub fn all() -> [UserRole; 5] {
        [
            UserRole::Admin,
            UserRole::DiagnosticCenterAdmin,
            UserRole::Doctor,
            UserRole::Technician,
            UserRole::Radiologist,
        ]
    }
}

/// 用户信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub role: UserRole,
    pub is_active: bool,
    /// 所属诊断中心（admin等全局角色可为空）
    pub diagnostic_center_id: Option<Uuid>,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 诊断中心（租户）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticCenter {
    pub id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub is_active: bool,
    /// 存储配额（GB）
    pub storage_quota_gb: i64,
    /// 已用存储（字节），仅作统计，不作为上传门槛
    pub storage_used_bytes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DiagnosticCenter {
    /// 已用存储换算为GB（向上保留小数）
    pub fn storage_used_gb(&self) -> f64 {
        self.storage_used_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

/// 患者基本信息
///
/// 由首次上传时惰性创建，后续仅合并补充字段，本核心不删除患者。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    /// 外部有意义的患者编号（唯一）
    pub patient_id: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 检查状态
///
/// 完整枚举保留，即使实际流程只覆盖其中一部分，存量数据依赖这些取值。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StudyStatus {
    Queued,
    Processing,
    Uploaded,
    Assigned,
    InProgress,
    Completed,
    Reviewed,
}

impl StudyStatus {
    /// 持久化使用的状态字符串（线上数据兼容格式，不可更改）
    pub fn as_str(&self) -> &'static str {
        match self {
            StudyStatus::Queued => "queued",
            StudyStatus::Processing => "processing",
            StudyStatus::Uploaded => "uploaded",
            StudyStatus::Assigned => "assigned",
            StudyStatus::InProgress => "in_progress",
            StudyStatus::Completed => "completed",
            StudyStatus::Reviewed => "reviewed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(StudyStatus::Queued),
            "processing" => Some(StudyStatus::Processing),
            "uploaded" => Some(StudyStatus::Uploaded),
            "assigned" => Some(StudyStatus::Assigned),
            "in_progress" => Some(StudyStatus::InProgress),
            "completed" => Some(StudyStatus::Completed),
            "reviewed" => Some(StudyStatus::Reviewed),
            _ => None,
        }
    }

    pub fn all() -> [StudyStatus; 7] {
        [
            StudyStatus::Queued,
            StudyStatus::Processing,
            StudyStatus::Uploaded,
            StudyStatus::Assigned,
            StudyStatus::InProgress,
            StudyStatus::Completed,
            StudyStatus::Reviewed,
        ]
    }
}

/// 检查信息（工作流与访问控制的核心单元）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Study {
    pub id: Uuid,
    /// 8位大写字母数字检查号，生成时做碰撞检查
    pub study_uid: String,
    pub patient_id: Uuid,
    pub diagnostic_center_id: Uuid,
    pub uploaded_by_id: Uuid,
    pub assigned_doctor_id: Option<Uuid>,
    pub radiologist_id: Option<Uuid>,
    pub study_date: Option<DateTime<Utc>>,
    pub modality: Option<String>,
    pub body_part: Option<String>,
    pub description: Option<String>,
    pub priority: String,
    pub status: StudyStatus,
    pub ai_report: Option<String>,
    pub doctor_report: Option<String>,
    pub radiologist_report: Option<String>,
    pub final_report: Option<String>,
    /// 乐观并发版本号，状态更新均以此为条件
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// DICOM文件实例
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DicomFile {
    pub id: Uuid,
    pub study_id: Uuid,
    pub series_uid: String,
    pub instance_uid: String,
    /// 相对于存储根目录的路径
    pub file_path: String,
    pub file_size: i64,
    pub slice_number: Option<i32>,
    // 从文件本身冗余提取的元数据
    pub patient_name: Option<String>,
    pub patient_id_dicom: Option<String>,
    pub study_date_dicom: Option<String>,
    pub modality_dicom: Option<String>,
    pub body_part_dicom: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 删除请求状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeletionStatus {
    Pending,
    Approved,
    Rejected,
}

impl DeletionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionStatus::Pending => "pending",
            DeletionStatus::Approved => "approved",
            DeletionStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeletionStatus::Pending),
            "approved" => Some(DeletionStatus::Approved),
            "rejected" => Some(DeletionStatus::Rejected),
            _ => None,
        }
    }
}

/// 检查删除请求
///
/// 批准与实际删除是两个独立动作：批准不触发删除，管理员仍需单独执行删除。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionRequest {
    pub id: Uuid,
    pub study_id: Uuid,
    pub requested_by_id: Uuid,
    pub reason: String,
    pub status: DeletionStatus,
    pub approved_by_id: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// 审计日志记录（仅追加，本核心不修改不删除）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format_roundtrip() {
        // 状态字符串是存量数据兼容格式
        for status in StudyStatus::all() {
            assert_eq!(StudyStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(StudyStatus::Queued.as_str(), "queued");
        assert_eq!(StudyStatus::InProgress.as_str(), "in_progress");
        assert_eq!(StudyStatus::parse("canceled"), None);
    }

    #[test]
    fn test_role_wire_format_roundtrip() {
        for role in UserRole::all() {
            assert_eq!(UserRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(
            UserRole::DiagnosticCenterAdmin.as_str(),
            "diagnostic_center_admin"
        );
    }

    #[test]
    fn test_deletion_status_wire_format() {
        for status in [
            DeletionStatus::Pending,
            DeletionStatus::Approved,
            DeletionStatus::Rejected,
        ] {
            assert_eq!(DeletionStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_storage_used_gb() {
        let center = DiagnosticCenter {
            id: Uuid::new_v4(),
            name: "Center".into(),
            address: None,
            phone: None,
            email: None,
            is_active: true,
            storage_quota_gb: 100,
            storage_used_bytes: 2 * 1024 * 1024 * 1024,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!((center.storage_used_gb() - 2.0).abs() < f64::EPSILON);
    }
}
