//! 检查列表范围
//!
//! 每个角色对检查集合的读取范围各不相同，范围既用于SQL过滤，
//! 也提供内存谓词供测试与二次过滤使用。

use medipacs_core::{Study, User, UserRole};
use uuid::Uuid;

/// 某个请求者可见的检查集合范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudyScope {
    /// 全部检查（admin）
    All,
    /// 本人上传的检查（technician）
    UploadedBy(Uuid),
    /// 本中心检查 ∪ 明确分配给本人的检查（doctor，并集而非交集）
    CenterOrAssigned {
        center_id: Option<Uuid>,
        doctor_id: Uuid,
    },
    /// 本中心检查（radiologist、diagnostic_center_admin）
    Center(Option<Uuid>),
}

impl StudyScope {
    /// 内存谓词：检查是否落在范围内
    pub fn matches(&self, study: &Study) -> bool {
        match self {
            StudyScope::All => true,
            StudyScope::UploadedBy(user_id) => study.uploaded_by_id == *user_id,
            StudyScope::CenterOrAssigned {
                center_id,
                doctor_id,
            } => {
                center_id
                    .map(|c| study.diagnostic_center_id == c)
                    .unwrap_or(false)
                    || study.assigned_doctor_id == Some(*doctor_id)
            }
            // 无租户的中心受限角色看不到任何检查
            StudyScope::Center(center_id) => center_id
                .map(|c| study.diagnostic_center_id == c)
                .unwrap_or(false),
        }
    }
}

/// 按角色计算列表范围
///
/// 放射科医生在此仅限本中心，尽管详情访问对其全局放行，
/// 该不一致是既有对外行为的一部分，调和会改变可见集合。
pub fn study_scope(user: &User) -> StudyScope {
    match user.role {
        UserRole::Admin => StudyScope::All,
        UserRole::Technician => StudyScope::UploadedBy(user.id),
        UserRole::Doctor => StudyScope::CenterOrAssigned {
            center_id: user.diagnostic_center_id,
            doctor_id: user.id,
        },
        UserRole::Radiologist | UserRole::DiagnosticCenterAdmin => {
            StudyScope::Center(user.diagnostic_center_id)
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod tests_support {
    //! 测试夹具

    use chrono::Utc;
    use medipacs_core::{Study, StudyStatus, User, UserRole};
    use uuid::Uuid;

    pub fn user_with_role(role: UserRole, center_id: Option<Uuid>) -> User {
        User {
            id: Uuid::new_v4(),
            email: format!("{}@example.org", role.as_str()),
            username: role.as_str().to_string(),
            full_name: format!("Test {}", role.as_str()),
            role,
            is_active: true,
            diagnostic_center_id: center_id,
            last_login: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn study_in_center(center_id: Uuid, uploader_id: Uuid) -> Study {
        Study {
            id: Uuid::new_v4(),
            study_uid: "AB12CD34".to_string(),
            patient_id: Uuid::new_v4(),
            diagnostic_center_id: center_id,
            uploaded_by_id: uploader_id,
            assigned_doctor_id: None,
            radiologist_id: None,
            study_date: Some(Utc::now()),
            modality: Some("CT".to_string()),
            body_part: Some("CHEST".to_string()),
            description: None,
            priority: "normal".to_string(),
            status: StudyStatus::Queued,
            ai_report: None,
            doctor_report: None,
            radiologist_report: None,
            final_report: None,
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::{study_in_center, user_with_role};
    use super::*;
    use medipacs_core::UserRole;

    #[test]
    fn test_admin_sees_all() {
        let admin = user_with_role(UserRole::Admin, None);
        let scope = study_scope(&admin);
        assert_eq!(scope, StudyScope::All);
        assert!(scope.matches(&study_in_center(Uuid::new_v4(), Uuid::new_v4())));
    }

    #[test]
    fn test_technician_only_own_uploads() {
        let center = Uuid::new_v4();
        let tech = user_with_role(UserRole::Technician, Some(center));
        let scope = study_scope(&tech);

        let own = study_in_center(center, tech.id);
        // 同中心但他人上传的检查不在范围内
        let colleague = study_in_center(center, Uuid::new_v4());
        assert!(scope.matches(&own));
        assert!(!scope.matches(&colleague));
    }

    #[test]
    fn test_doctor_center_union_assigned() {
        let center = Uuid::new_v4();
        let doctor = user_with_role(UserRole::Doctor, Some(center));
        let scope = study_scope(&doctor);

        let in_center = study_in_center(center, Uuid::new_v4());
        assert!(scope.matches(&in_center));

        // 跨中心但分配给本人的检查也可见（并集）
        let mut assigned_elsewhere = study_in_center(Uuid::new_v4(), Uuid::new_v4());
        assigned_elsewhere.assigned_doctor_id = Some(doctor.id);
        assert!(scope.matches(&assigned_elsewhere));

        let unrelated = study_in_center(Uuid::new_v4(), Uuid::new_v4());
        assert!(!scope.matches(&unrelated));
    }

    #[test]
    fn test_radiologist_center_only() {
        let center = Uuid::new_v4();
        let radiologist = user_with_role(UserRole::Radiologist, Some(center));
        let scope = study_scope(&radiologist);

        assert!(scope.matches(&study_in_center(center, Uuid::new_v4())));
        // 列表范围不随详情访问的全局放行而放宽
        assert!(!scope.matches(&study_in_center(Uuid::new_v4(), Uuid::new_v4())));
    }

    #[test]
    fn test_center_admin_center_only() {
        let center = Uuid::new_v4();
        let center_admin = user_with_role(UserRole::DiagnosticCenterAdmin, Some(center));
        let scope = study_scope(&center_admin);

        assert!(scope.matches(&study_in_center(center, Uuid::new_v4())));
        assert!(!scope.matches(&study_in_center(Uuid::new_v4(), Uuid::new_v4())));
    }

    #[test]
    fn test_tenantless_center_roles_see_nothing() {
        for role in [UserRole::Radiologist, UserRole::DiagnosticCenterAdmin] {
            let user = user_with_role(role, None);
            let scope = study_scope(&user);
            assert!(!scope.matches(&study_in_center(Uuid::new_v4(), Uuid::new_v4())));
        }
    }
}
