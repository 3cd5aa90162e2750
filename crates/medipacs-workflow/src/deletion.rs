//! 删除审批流程
//!
//! 二级审批状态机：`pending → approved` 或 `pending → rejected`，
//! 两者均为终态，不可重开。批准本身不执行删除，实际删除是
//! 管理员单独发起的级联删除操作，两者在设计上解耦。

use chrono::{DateTime, Utc};
use medipacs_access::evaluator::{forbidden, AccessLevel};
use medipacs_core::{DeletionRequest, DeletionStatus, PacsError, Result, User, UserRole};

/// 允许发起删除请求的角色
const REQUEST_ROLES: [UserRole; 2] = [UserRole::Technician, UserRole::Doctor];

/// 审批决议
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Approve,
    Reject,
}

impl Resolution {
    fn target_status(&self) -> DeletionStatus {
        match self {
            Resolution::Approve => DeletionStatus::Approved,
            Resolution::Reject => DeletionStatus::Rejected,
        }
    }
}

/// 发起删除请求的角色检查：仅技师与医生
pub fn check_request_allowed(user: &User) -> Result<()> {
    if user.is_active && REQUEST_ROLES.contains(&user.role) {
        return Ok(());
    }
    Err(forbidden(
        "Only technicians and doctors can request deletions",
        AccessLevel::MedicalView,
        user,
        None,
        None,
    ))
}

/// 删除理由必填且非空白
pub fn validate_reason(reason: &str) -> Result<()> {
    if reason.trim().is_empty() {
        return Err(PacsError::Validation(
            "Deletion reason is required".to_string(),
        ));
    }
    Ok(())
}

/// 审批删除请求，返回更新后的请求
///
/// 仅admin可审批；已决议的请求不可再次审批。审批不校验检查
/// 当前是否仍然存在或被修改（与历史行为一致）。
pub fn resolve_request(
    request: &DeletionRequest,
    resolution: Resolution,
    approver: &User,
    now: DateTime<Utc>,
) -> Result<DeletionRequest> {
    if !approver.is_active || approver.role != UserRole::Admin {
        return Err(forbidden(
            "Only admins can resolve deletion requests",
            AccessLevel::SystemAdmin,
            approver,
            None,
            Some(request.id.to_string()),
        ));
    }

    if request.status != DeletionStatus::Pending {
        return Err(PacsError::Conflict(format!(
            "Deletion request already {}",
            request.status.as_str()
        )));
    }

    let mut resolved = request.clone();
    resolved.status = resolution.target_status();
    resolved.approved_by_id = Some(approver.id);
    resolved.approved_at = Some(now);
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use medipacs_access::scope::tests_support::user_with_role;
    use uuid::Uuid;

    fn pending_request() -> DeletionRequest {
        DeletionRequest {
            id: Uuid::new_v4(),
            study_id: Uuid::new_v4(),
            requested_by_id: Uuid::new_v4(),
            reason: "wrong patient".to_string(),
            status: DeletionStatus::Pending,
            approved_by_id: None,
            approved_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_request_roles() {
        for role in [UserRole::Technician, UserRole::Doctor] {
            let user = user_with_role(role, Some(Uuid::new_v4()));
            assert!(check_request_allowed(&user).is_ok());
        }
        for role in [
            UserRole::Admin,
            UserRole::Radiologist,
            UserRole::DiagnosticCenterAdmin,
        ] {
            let user = user_with_role(role, Some(Uuid::new_v4()));
            assert!(check_request_allowed(&user).is_err(), "role {:?}", role);
        }
    }

    #[test]
    fn test_reason_required() {
        assert!(validate_reason("wrong patient").is_ok());
        assert!(matches!(
            validate_reason(""),
            Err(PacsError::Validation(_))
        ));
        assert!(matches!(
            validate_reason("   "),
            Err(PacsError::Validation(_))
        ));
    }

    #[test]
    fn test_approve_stamps_approver_and_time() {
        let admin = user_with_role(UserRole::Admin, None);
        let request = pending_request();
        let now = Utc::now();

        let resolved = resolve_request(&request, Resolution::Approve, &admin, now).unwrap();
        assert_eq!(resolved.status, DeletionStatus::Approved);
        assert_eq!(resolved.approved_by_id, Some(admin.id));
        assert_eq!(resolved.approved_at, Some(now));
        // 审批不改变请求与检查的关联
        assert_eq!(resolved.study_id, request.study_id);
    }

    #[test]
    fn test_reject_is_terminal_too() {
        let admin = user_with_role(UserRole::Admin, None);
        let request = pending_request();
        let resolved =
            resolve_request(&request, Resolution::Reject, &admin, Utc::now()).unwrap();
        assert_eq!(resolved.status, DeletionStatus::Rejected);
    }

    #[test]
    fn test_non_admin_cannot_resolve() {
        let request = pending_request();
        for role in [
            UserRole::Doctor,
            UserRole::Technician,
            UserRole::Radiologist,
            UserRole::DiagnosticCenterAdmin,
        ] {
            let user = user_with_role(role, Some(Uuid::new_v4()));
            let result = resolve_request(&request, Resolution::Approve, &user, Utc::now());
            assert!(matches!(result, Err(PacsError::Forbidden { .. })), "role {:?}", role);
        }
    }

    #[test]
    fn test_no_reopening() {
        let admin = user_with_role(UserRole::Admin, None);
        let mut request = pending_request();
        request.status = DeletionStatus::Approved;

        for resolution in [Resolution::Approve, Resolution::Reject] {
            let result = resolve_request(&request, resolution, &admin, Utc::now());
            assert!(matches!(result, Err(PacsError::Conflict(_))));
        }
    }
}
