//! 检查状态机
//!
//! 管理检查生命周期的全部状态转换。状态表是唯一事实来源，
//! 任何调用点（HTTP处理器、后台回调）都必须经过 [`StudyStateMachine::transition`]，
//! 失败的转换不产生任何变更。

use medipacs_access::evaluator::{forbidden, AccessLevel};
use medipacs_core::{PacsError, Result, Study, StudyStatus, User, UserRole};

/// 状态转换动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudyAction {
    /// AI富化任务已派发（系统内部钩子）
    EnrichmentStarted,
    /// AI富化完成回调（系统内部钩子）
    EnrichmentFinished,
    /// 分配给指定医生
    AssignDoctor,
    /// 放射科医生自行认领
    SelfAssign,
    /// 医生提交报告
    WriteDoctorReport,
    /// 放射科医生/管理员提交终审报告
    WriteRadiologistReport,
}

impl StudyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StudyAction::EnrichmentStarted => "enrichment_started",
            StudyAction::EnrichmentFinished => "enrichment_finished",
            StudyAction::AssignDoctor => "assign_doctor",
            StudyAction::SelfAssign => "self_assign",
            StudyAction::WriteDoctorReport => "write_doctor_report",
            StudyAction::WriteRadiologistReport => "write_radiologist_report",
        }
    }
}

/// 转换发起方：后台钩子或具体用户
#[derive(Debug, Clone, Copy)]
pub enum Actor<'a> {
    /// 系统内部（富化派发与回调）
    System,
    User(&'a User),
}

/// 允许发起转换的角色集合
#[derive(Debug, Clone, Copy)]
enum RoleSet {
    /// 仅系统内部钩子
    System,
    Roles(&'static [UserRole]),
}

/// 允许的起始状态集合
#[derive(Debug, Clone, Copy)]
enum FromStates {
    Any,
    Only(&'static [StudyStatus]),
}

impl FromStates {
    fn contains(&self, status: StudyStatus) -> bool {
        match self {
            FromStates::Any => true,
            FromStates::Only(states) => states.contains(&status),
        }
    }
}

/// 单条转换规则
#[derive(Debug, Clone, Copy)]
struct TransitionRule {
    action: StudyAction,
    roles: RoleSet,
    from: FromStates,
    to: StudyStatus,
}

/// 分配动作允许的起始状态（分配前的各阶段）
const PRE_ASSIGNMENT: [StudyStatus; 3] = [
    StudyStatus::Queued,
    StudyStatus::Processing,
    StudyStatus::Uploaded,
];

/// 状态转换规则表
const RULES: [TransitionRule; 6] = [
    TransitionRule {
        action: StudyAction::EnrichmentStarted,
        roles: RoleSet::System,
        from: FromStates::Only(&[StudyStatus::Queued]),
        to: StudyStatus::Processing,
    },
    TransitionRule {
        action: StudyAction::EnrichmentFinished,
        roles: RoleSet::System,
        from: FromStates::Only(&[StudyStatus::Processing]),
        to: StudyStatus::Uploaded,
    },
    TransitionRule {
        action: StudyAction::AssignDoctor,
        roles: RoleSet::Roles(&[UserRole::DiagnosticCenterAdmin, UserRole::Doctor]),
        from: FromStates::Only(&PRE_ASSIGNMENT),
        to: StudyStatus::Assigned,
    },
    TransitionRule {
        action: StudyAction::SelfAssign,
        roles: RoleSet::Roles(&[UserRole::Radiologist]),
        from: FromStates::Any,
        to: StudyStatus::Assigned,
    },
    TransitionRule {
        action: StudyAction::WriteDoctorReport,
        roles: RoleSet::Roles(&[UserRole::Doctor]),
        from: FromStates::Any,
        to: StudyStatus::Completed,
    },
    TransitionRule {
        action: StudyAction::WriteRadiologistReport,
        roles: RoleSet::Roles(&[UserRole::Radiologist, UserRole::Admin]),
        from: FromStates::Any,
        to: StudyStatus::Reviewed,
    },
];

/// 允许发起上传（创建检查）的角色
const UPLOAD_ROLES: [UserRole; 2] = [UserRole::Technician, UserRole::Doctor];

/// 检查状态机
#[derive(Debug, Default)]
pub struct StudyStateMachine;

impl StudyStateMachine {
    pub fn new() -> Self {
        Self
    }

    /// 新建检查的初始状态（上传时、文件处理前）
    pub fn initial_status() -> StudyStatus {
        StudyStatus::Queued
    }

    /// 上传权限检查：仅技师与医生可创建检查，其余角色在建行前拒绝
    pub fn check_upload_permitted(user: &User) -> Result<()> {
        if user.is_active && UPLOAD_ROLES.contains(&user.role) {
            return Ok(());
        }
        Err(forbidden(
            "Only technicians and doctors can upload studies",
            AccessLevel::MedicalView,
            user,
            None,
            None,
        ))
    }

    /// 执行状态转换，返回目标状态
    ///
    /// 判定顺序：角色 → 起始状态 → 动作守卫。系统钩子幂等：
    /// 检查已处于目标状态时直接返回Ok，供后台工作者安全重放。
    pub fn transition(
        &self,
        study: &Study,
        action: StudyAction,
        actor: Actor<'_>,
    ) -> Result<StudyStatus> {
        let rule = RULES
            .iter()
            .find(|rule| rule.action == action)
            .ok_or_else(|| PacsError::Internal(format!("no rule for {}", action.as_str())))?;

        self.check_actor(rule, action, actor)?;

        // 系统钩子的幂等重放
        if matches!(rule.roles, RoleSet::System) && study.status == rule.to {
            return Ok(rule.to);
        }

        if !rule.from.contains(study.status) {
            return Err(PacsError::InvalidTransition {
                from: study.status.as_str().to_string(),
                action: action.as_str().to_string(),
            });
        }

        self.check_guard(study, action, actor)?;

        Ok(rule.to)
    }

    /// 判断转换是否会被接受（不构造错误细节）
    pub fn can_transition(&self, study: &Study, action: StudyAction, actor: Actor<'_>) -> bool {
        self.transition(study, action, actor).is_ok()
    }

    fn check_actor(&self, rule: &TransitionRule, action: StudyAction, actor: Actor<'_>) -> Result<()> {
        match (rule.roles, actor) {
            (RoleSet::System, Actor::System) => Ok(()),
            (RoleSet::System, Actor::User(user)) => Err(forbidden(
                "Internal transition not available to users",
                AccessLevel::SystemAdmin,
                user,
                None,
                None,
            )),
            (RoleSet::Roles(_), Actor::System) => Err(PacsError::Internal(format!(
                "action {} requires a user actor",
                action.as_str()
            ))),
            (RoleSet::Roles(roles), Actor::User(user)) => {
                if user.is_active && roles.contains(&user.role) {
                    Ok(())
                } else {
                    Err(forbidden(
                        "Role not permitted for this transition",
                        AccessLevel::Administrative,
                        user,
                        None,
                        Some(action.as_str().to_string()),
                    ))
                }
            }
        }
    }

    /// 动作级守卫
    fn check_guard(&self, study: &Study, action: StudyAction, _actor: Actor<'_>) -> Result<()> {
        match action {
            // 自行认领不允许覆盖已有的放射科医生
            StudyAction::SelfAssign if study.radiologist_id.is_some() => Err(PacsError::Conflict(
                "Study already assigned to a radiologist".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medipacs_access::scope::tests_support::{study_in_center, user_with_role};
    use uuid::Uuid;

    fn study_with_status(status: StudyStatus) -> Study {
        let mut study = study_in_center(Uuid::new_v4(), Uuid::new_v4());
        study.status = status;
        study
    }

    #[test]
    fn test_upload_roles() {
        for role in [UserRole::Technician, UserRole::Doctor] {
            let user = user_with_role(role, Some(Uuid::new_v4()));
            assert!(StudyStateMachine::check_upload_permitted(&user).is_ok());
        }
        for role in [
            UserRole::Admin,
            UserRole::Radiologist,
            UserRole::DiagnosticCenterAdmin,
        ] {
            let user = user_with_role(role, Some(Uuid::new_v4()));
            assert!(
                StudyStateMachine::check_upload_permitted(&user).is_err(),
                "role {:?}",
                role
            );
        }
        assert_eq!(StudyStateMachine::initial_status(), StudyStatus::Queued);
    }

    #[test]
    fn test_enrichment_hooks() {
        let sm = StudyStateMachine::new();

        let queued = study_with_status(StudyStatus::Queued);
        assert_eq!(
            sm.transition(&queued, StudyAction::EnrichmentStarted, Actor::System)
                .unwrap(),
            StudyStatus::Processing
        );

        let processing = study_with_status(StudyStatus::Processing);
        assert_eq!(
            sm.transition(&processing, StudyAction::EnrichmentFinished, Actor::System)
                .unwrap(),
            StudyStatus::Uploaded
        );
    }

    #[test]
    fn test_enrichment_hooks_idempotent() {
        let sm = StudyStateMachine::new();

        // 重放已生效的钩子是安全的空操作
        let processing = study_with_status(StudyStatus::Processing);
        assert_eq!(
            sm.transition(&processing, StudyAction::EnrichmentStarted, Actor::System)
                .unwrap(),
            StudyStatus::Processing
        );

        let uploaded = study_with_status(StudyStatus::Uploaded);
        assert_eq!(
            sm.transition(&uploaded, StudyAction::EnrichmentFinished, Actor::System)
                .unwrap(),
            StudyStatus::Uploaded
        );
    }

    #[test]
    fn test_enrichment_hooks_rejected_for_users() {
        let sm = StudyStateMachine::new();
        let queued = study_with_status(StudyStatus::Queued);
        let admin = user_with_role(UserRole::Admin, None);
        let result = sm.transition(&queued, StudyAction::EnrichmentStarted, Actor::User(&admin));
        assert!(matches!(result, Err(PacsError::Forbidden { .. })));
    }

    #[test]
    fn test_assign_doctor_pre_assignment_only() {
        let sm = StudyStateMachine::new();
        let center_admin = user_with_role(UserRole::DiagnosticCenterAdmin, Some(Uuid::new_v4()));

        for status in [
            StudyStatus::Queued,
            StudyStatus::Processing,
            StudyStatus::Uploaded,
        ] {
            let study = study_with_status(status);
            assert_eq!(
                sm.transition(&study, StudyAction::AssignDoctor, Actor::User(&center_admin))
                    .unwrap(),
                StudyStatus::Assigned
            );
        }

        for status in [
            StudyStatus::Assigned,
            StudyStatus::InProgress,
            StudyStatus::Completed,
            StudyStatus::Reviewed,
        ] {
            let study = study_with_status(status);
            let result =
                sm.transition(&study, StudyAction::AssignDoctor, Actor::User(&center_admin));
            assert!(
                matches!(result, Err(PacsError::InvalidTransition { .. })),
                "status {:?}",
                status
            );
        }
    }

    #[test]
    fn test_self_assign_sets_assigned() {
        let sm = StudyStateMachine::new();
        let radiologist = user_with_role(UserRole::Radiologist, Some(Uuid::new_v4()));
        let study = study_with_status(StudyStatus::Uploaded);

        assert_eq!(
            sm.transition(&study, StudyAction::SelfAssign, Actor::User(&radiologist))
                .unwrap(),
            StudyStatus::Assigned
        );
    }

    #[test]
    fn test_self_assign_conflict_when_taken() {
        let sm = StudyStateMachine::new();
        let radiologist = user_with_role(UserRole::Radiologist, Some(Uuid::new_v4()));
        let mut study = study_with_status(StudyStatus::Assigned);
        study.radiologist_id = Some(Uuid::new_v4());

        // 冲突而非覆盖
        let result = sm.transition(&study, StudyAction::SelfAssign, Actor::User(&radiologist));
        assert!(matches!(result, Err(PacsError::Conflict(_))));
    }

    #[test]
    fn test_self_assign_role_restricted() {
        let sm = StudyStateMachine::new();
        let study = study_with_status(StudyStatus::Uploaded);
        for role in [UserRole::Doctor, UserRole::Technician, UserRole::Admin] {
            let user = user_with_role(role, Some(Uuid::new_v4()));
            let result = sm.transition(&study, StudyAction::SelfAssign, Actor::User(&user));
            assert!(matches!(result, Err(PacsError::Forbidden { .. })), "role {:?}", role);
        }
    }

    #[test]
    fn test_report_transitions() {
        let sm = StudyStateMachine::new();
        let doctor = user_with_role(UserRole::Doctor, Some(Uuid::new_v4()));
        let radiologist = user_with_role(UserRole::Radiologist, Some(Uuid::new_v4()));
        let admin = user_with_role(UserRole::Admin, None);

        // 报告动作允许从任意状态发起
        for status in StudyStatus::all() {
            let study = study_with_status(status);
            assert_eq!(
                sm.transition(&study, StudyAction::WriteDoctorReport, Actor::User(&doctor))
                    .unwrap(),
                StudyStatus::Completed
            );
            assert_eq!(
                sm.transition(
                    &study,
                    StudyAction::WriteRadiologistReport,
                    Actor::User(&radiologist)
                )
                .unwrap(),
                StudyStatus::Reviewed
            );
            assert_eq!(
                sm.transition(
                    &study,
                    StudyAction::WriteRadiologistReport,
                    Actor::User(&admin)
                )
                .unwrap(),
                StudyStatus::Reviewed
            );
        }
    }

    #[test]
    fn test_inactive_user_rejected() {
        let sm = StudyStateMachine::new();
        let mut doctor = user_with_role(UserRole::Doctor, Some(Uuid::new_v4()));
        doctor.is_active = false;
        let study = study_with_status(StudyStatus::Uploaded);

        let result = sm.transition(&study, StudyAction::WriteDoctorReport, Actor::User(&doctor));
        assert!(matches!(result, Err(PacsError::Forbidden { .. })));
    }

    #[test]
    fn test_failed_transition_leaves_study_untouched() {
        let sm = StudyStateMachine::new();
        let center_admin = user_with_role(UserRole::DiagnosticCenterAdmin, Some(Uuid::new_v4()));
        let study = study_with_status(StudyStatus::Reviewed);
        let before = study.clone();

        let _ = sm.transition(&study, StudyAction::AssignDoctor, Actor::User(&center_admin));
        // transition不修改传入检查，失败不产生副作用
        assert_eq!(study.status, before.status);
        assert_eq!(study.version, before.version);
    }
}
