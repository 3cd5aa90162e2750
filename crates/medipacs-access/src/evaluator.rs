//! 访问谓词
//!
//! 基于声明式角色表的判定，取代散落在各端点的角色列表判断。

use medipacs_core::{AccessDenial, PacsError, Result, Study, User, UserRole};
use uuid::Uuid;

/// 系统访问级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    /// 医学查看：查看检查、DICOM影像与AI分析
    MedicalView,
    /// 管理：本中心内的检查管理、分配与设置
    Administrative,
    /// 系统管理：全系统访问
    SystemAdmin,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::MedicalView => "medical_view",
            AccessLevel::Administrative => "administrative",
            AccessLevel::SystemAdmin => "system_admin",
        }
    }
}

/// 具备医学查看权限的角色（全中心通用影像访问）
const MEDICAL_ROLES: [UserRole; 5] = [
    UserRole::Admin,
    UserRole::Radiologist,
    UserRole::Doctor,
    UserRole::Technician,
    UserRole::DiagnosticCenterAdmin,
];

/// 具备中心管理权限的角色（admin除外均受租户限制）
const ADMINISTRATIVE_ROLES: [UserRole; 3] = [
    UserRole::Admin,
    UserRole::DiagnosticCenterAdmin,
    UserRole::Doctor,
];

/// 医学查看权限：任何在职医疗角色均可查看影像数据
///
/// 此谓词有意不做租户限制，跨中心会诊依赖这一行为。
pub fn has_medical_access(user: &User) -> bool {
    user.is_active && MEDICAL_ROLES.contains(&user.role)
}

/// 对指定诊断中心的管理权限
///
/// admin无条件放行；中心管理员与医生要求租户一致，
/// 目标中心为空或请求者无租户时一律拒绝（admin除外）。
pub fn has_administrative_access(user: &User, target_center_id: Option<Uuid>) -> bool {
    if !user.is_active {
        return false;
    }
    if user.role == UserRole::Admin {
        return true;
    }
    if !ADMINISTRATIVE_ROLES.contains(&user.role) {
        return false;
    }
    match target_center_id {
        Some(target) => user.diagnostic_center_id == Some(target),
        // 未指定目标中心时仅校验角色本身
        None => true,
    }
}

/// 单检查详情访问
///
/// admin与radiologist全局放行（在职前提下），其余医疗角色要求租户一致。
/// 注意这与列表范围判定（`scope::study_scope`）并不一致，保留该差异。
pub fn can_view_study(user: &User, study: &Study) -> bool {
    if !user.is_active {
        return false;
    }
    match user.role {
        UserRole::Admin | UserRole::Radiologist => true,
        UserRole::Doctor | UserRole::Technician | UserRole::DiagnosticCenterAdmin => {
            user.diagnostic_center_id == Some(study.diagnostic_center_id)
        }
    }
}

/// 医学查看权限检查，失败时给出结构化拒绝
pub fn check_medical_access(user: &User) -> Result<()> {
    if has_medical_access(user) {
        return Ok(());
    }
    Err(forbidden(
        "Medical access required",
        AccessLevel::MedicalView,
        user,
        None,
        None,
    ))
}

/// 中心管理权限检查，失败时给出结构化拒绝
pub fn check_administrative_access(user: &User, target_center_id: Option<Uuid>) -> Result<()> {
    if has_administrative_access(user, target_center_id) {
        return Ok(());
    }
    Err(forbidden(
        "Administrative access required",
        AccessLevel::Administrative,
        user,
        target_center_id,
        None,
    ))
}

/// 要求请求者角色属于给定集合
pub fn require_roles(user: &User, roles: &[UserRole], message: &str) -> Result<()> {
    if user.is_active && roles.contains(&user.role) {
        return Ok(());
    }
    Err(forbidden(
        message,
        AccessLevel::Administrative,
        user,
        None,
        None,
    ))
}

/// 构造携带细节的禁止访问错误
pub fn forbidden(
    message: &str,
    required: AccessLevel,
    user: &User,
    target_center_id: Option<Uuid>,
    resource_id: Option<String>,
) -> PacsError {
    PacsError::Forbidden {
        message: message.to_string(),
        denial: AccessDenial {
            required_access: required.as_str().to_string(),
            user_role: user.role.as_str().to_string(),
            user_center_id: user.diagnostic_center_id,
            target_center_id,
            resource_id,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::tests_support::{study_in_center, user_with_role};
    use medipacs_core::UserRole;

    #[test]
    fn test_medical_access_all_medical_roles() {
        for role in UserRole::all() {
            let user = user_with_role(role, Some(Uuid::new_v4()));
            assert!(has_medical_access(&user), "role {:?}", role);
        }
    }

    #[test]
    fn test_medical_access_denied_when_inactive() {
        let mut user = user_with_role(UserRole::Doctor, Some(Uuid::new_v4()));
        user.is_active = false;
        assert!(!has_medical_access(&user));
        assert!(check_medical_access(&user).is_err());
    }

    #[test]
    fn test_administrative_access_admin_any_center() {
        let admin = user_with_role(UserRole::Admin, None);
        assert!(has_administrative_access(&admin, Some(Uuid::new_v4())));
        assert!(has_administrative_access(&admin, None));
    }

    #[test]
    fn test_administrative_access_tenant_scoped() {
        let center = Uuid::new_v4();
        let other = Uuid::new_v4();
        for role in [UserRole::DiagnosticCenterAdmin, UserRole::Doctor] {
            let user = user_with_role(role, Some(center));
            assert!(has_administrative_access(&user, Some(center)));
            assert!(!has_administrative_access(&user, Some(other)));
        }
        // 无租户的非admin被拒绝
        let stray = user_with_role(UserRole::Doctor, None);
        assert!(!has_administrative_access(&stray, Some(center)));
    }

    #[test]
    fn test_administrative_access_denied_roles() {
        let center = Uuid::new_v4();
        for role in [UserRole::Technician, UserRole::Radiologist] {
            let user = user_with_role(role, Some(center));
            assert!(!has_administrative_access(&user, Some(center)));
        }
    }

    #[test]
    fn test_detail_access_admin_radiologist_unconditional() {
        let study = study_in_center(Uuid::new_v4(), Uuid::new_v4());
        for role in [UserRole::Admin, UserRole::Radiologist] {
            // 详情访问不做租户限制，注意与列表范围的差异是有意保留的
            let user = user_with_role(role, Some(Uuid::new_v4()));
            assert!(can_view_study(&user, &study), "role {:?}", role);
        }
    }

    #[test]
    fn test_detail_access_center_roles_tenant_equality() {
        let center = Uuid::new_v4();
        let study = study_in_center(center, Uuid::new_v4());
        for role in [
            UserRole::Doctor,
            UserRole::Technician,
            UserRole::DiagnosticCenterAdmin,
        ] {
            let same = user_with_role(role, Some(center));
            let cross = user_with_role(role, Some(Uuid::new_v4()));
            assert!(can_view_study(&same, &study), "role {:?}", role);
            assert!(!can_view_study(&cross, &study), "role {:?}", role);
        }
    }

    #[test]
    fn test_forbidden_carries_structured_denial() {
        let center = Uuid::new_v4();
        let user = user_with_role(UserRole::Technician, Some(center));
        let target = Uuid::new_v4();
        let err = check_administrative_access(&user, Some(target)).unwrap_err();
        match err {
            PacsError::Forbidden { denial, .. } => {
                assert_eq!(denial.required_access, "administrative");
                assert_eq!(denial.user_role, "technician");
                assert_eq!(denial.user_center_id, Some(center));
                assert_eq!(denial.target_center_id, Some(target));
            }
            other => panic!("expected Forbidden, got {:?}", other),
        }
    }
}
