//! 数据库模型
//!
//! 表行模型使用FromRow，枚举字段以字符串存储并在转换时解析。

use chrono::{DateTime, NaiveDate, Utc};
use medipacs_core::*;
use sqlx::FromRow;
use uuid::Uuid;

/// 数据库用户表
#[derive(Debug, FromRow)]
pub struct DbUser {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub hashed_password: String,
    pub role: String,
    pub is_active: bool,
    pub diagnostic_center_id: Option<Uuid>,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbUser> for User {
    fn from(db_user: DbUser) -> Self {
        User {
            id: db_user.id,
            email: db_user.email,
            username: db_user.username,
            full_name: db_user.full_name,
            // 未知角色按最小权限处理
            role: UserRole::parse(&db_user.role).unwrap_or(UserRole::Technician),
            is_active: db_user.is_active,
            diagnostic_center_id: db_user.diagnostic_center_id,
            last_login: db_user.last_login,
            created_at: db_user.created_at,
            updated_at: db_user.updated_at,
        }
    }
}

/// 数据库诊断中心表
#[derive(Debug, FromRow)]
pub struct DbDiagnosticCenter {
    pub id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub is_active: bool,
    pub storage_quota_gb: i64,
    pub storage_used_bytes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbDiagnosticCenter> for DiagnosticCenter {
    fn from(db_center: DbDiagnosticCenter) -> Self {
        DiagnosticCenter {
            id: db_center.id,
            name: db_center.name,
            address: db_center.address,
            phone: db_center.phone,
            email: db_center.email,
            is_active: db_center.is_active,
            storage_quota_gb: db_center.storage_quota_gb,
            storage_used_bytes: db_center.storage_used_bytes,
            created_at: db_center.created_at,
            updated_at: db_center.updated_at,
        }
    }
}

/// 数据库患者表
#[derive(Debug, FromRow)]
pub struct DbPatient {
    pub id: Uuid,
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

impl From<DbPatient> for Patient {
    fn from(db_patient: DbPatient) -> Self {
        Patient {
            id: db_patient.id,
            patient_id: db_patient.patient_id,
            first_name: db_patient.first_name,
            last_name: db_patient.last_name,
            date_of_birth: db_patient.date_of_birth,
            gender: db_patient.gender,
            phone: db_patient.phone,
            email: db_patient.email,
            address: db_patient.address,
            created_at: db_patient.created_at,
            updated_at: db_patient.updated_at,
        }
    }
}

/// 数据库检查表
#[derive(Debug, FromRow)]
pub struct DbStudy {
    pub id: Uuid,
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
    pub status: String,
    pub ai_report: Option<String>,
    pub doctor_report: Option<String>,
    pub radiologist_report: Option<String>,
    pub final_report: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbStudy> for Study {
    fn from(db_study: DbStudy) -> Self {
        Study {
            id: db_study.id,
            study_uid: db_study.study_uid,
            patient_id: db_study.patient_id,
            diagnostic_center_id: db_study.diagnostic_center_id,
            uploaded_by_id: db_study.uploaded_by_id,
            assigned_doctor_id: db_study.assigned_doctor_id,
            radiologist_id: db_study.radiologist_id,
            study_date: db_study.study_date,
            modality: db_study.modality,
            body_part: db_study.body_part,
            description: db_study.description,
            priority: db_study.priority,
            status: StudyStatus::parse(&db_study.status).unwrap_or(StudyStatus::Queued),
            ai_report: db_study.ai_report,
            doctor_report: db_study.doctor_report,
            radiologist_report: db_study.radiologist_report,
            final_report: db_study.final_report,
            version: db_study.version,
            created_at: db_study.created_at,
            updated_at: db_study.updated_at,
        }
    }
}

/// 数据库DICOM文件表
#[derive(Debug, FromRow)]
pub struct DbDicomFile {
    pub id: Uuid,
    pub study_id: Uuid,
    pub series_uid: String,
    pub instance_uid: String,
    pub file_path: String,
    pub file_size: i64,
    pub slice_number: Option<i32>,
    pub patient_name: Option<String>,
    pub patient_id_dicom: Option<String>,
    pub study_date_dicom: Option<String>,
    pub modality_dicom: Option<String>,
    pub body_part_dicom: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<DbDicomFile> for DicomFile {
    fn from(db_file: DbDicomFile) -> Self {
        DicomFile {
            id: db_file.id,
            study_id: db_file.study_id,
            series_uid: db_file.series_uid,
            instance_uid: db_file.instance_uid,
            file_path: db_file.file_path,
            file_size: db_file.file_size,
            slice_number: db_file.slice_number,
            patient_name: db_file.patient_name,
            patient_id_dicom: db_file.patient_id_dicom,
            study_date_dicom: db_file.study_date_dicom,
            modality_dicom: db_file.modality_dicom,
            body_part_dicom: db_file.body_part_dicom,
            created_at: db_file.created_at,
        }
    }
}

/// 数据库删除请求表
#[derive(Debug, FromRow)]
pub struct DbDeletionRequest {
    pub id: Uuid,
    pub study_id: Uuid,
    pub requested_by_id: Uuid,
    pub reason: String,
    pub status: String,
    pub approved_by_id: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<DbDeletionRequest> for DeletionRequest {
    fn from(db_request: DbDeletionRequest) -> Self {
        DeletionRequest {
            id: db_request.id,
            study_id: db_request.study_id,
            requested_by_id: db_request.requested_by_id,
            reason: db_request.reason,
            status: DeletionStatus::parse(&db_request.status).unwrap_or(DeletionStatus::Pending),
            approved_by_id: db_request.approved_by_id,
            approved_at: db_request.approved_at,
            created_at: db_request.created_at,
        }
    }
}

/// 数据库审计日志表
#[derive(Debug, FromRow)]
pub struct DbAuditLog {
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

impl From<DbAuditLog> for AuditLog {
    fn from(db_log: DbAuditLog) -> Self {
        AuditLog {
            id: db_log.id,
            user_id: db_log.user_id,
            action: db_log.action,
            resource_type: db_log.resource_type,
            resource_id: db_log.resource_id,
            ip_address: db_log.ip_address,
            user_agent: db_log.user_agent,
            details: db_log.details,
            timestamp: db_log.timestamp,
        }
    }
}

// ========== 写入参数 ==========

/// 新建用户参数
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub hashed_password: String,
    pub role: UserRole,
    pub diagnostic_center_id: Option<Uuid>,
}

/// 用户可更新字段（None表示保持不变）
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub full_name: Option<String>,
    pub role: Option<UserRole>,
    pub diagnostic_center_id: Option<Option<Uuid>>,
    pub is_active: Option<bool>,
}

/// 新建诊断中心参数
#[derive(Debug, Clone)]
pub struct NewDiagnosticCenter {
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub storage_quota_gb: i64,
}

/// 新建检查参数
#[derive(Debug, Clone)]
pub struct NewStudy {
    pub study_uid: String,
    pub patient_id: Uuid,
    pub diagnostic_center_id: Uuid,
    pub uploaded_by_id: Uuid,
    pub study_date: Option<DateTime<Utc>>,
    pub modality: Option<String>,
    pub body_part: Option<String>,
    pub description: Option<String>,
    pub priority: String,
    pub status: StudyStatus,
}

/// 新建DICOM文件参数
#[derive(Debug, Clone)]
pub struct NewDicomFile {
    pub study_id: Uuid,
    pub series_uid: String,
    pub instance_uid: String,
    pub file_path: String,
    pub file_size: i64,
    pub slice_number: Option<i32>,
    pub patient_name: Option<String>,
    pub patient_id_dicom: Option<String>,
    pub study_date_dicom: Option<String>,
    pub modality_dicom: Option<String>,
    pub body_part_dicom: Option<String>,
}
