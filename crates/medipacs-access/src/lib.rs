//! # MediPACS 访问控制
//!
//! 角色与租户维度的纯函数访问判定。所有状态变更入口在执行前
//! 都必须先经过本模块的判定，判定本身不读写任何存储。
//!
//! 系统存在两层互不等价的检查访问谓词，属于有意保留的历史行为：
//! 列表范围内放射科医生仅限本中心，而单检查详情对放射科医生全局放行。
//! 两者不得互相"修复"对齐。

pub mod evaluator;
pub mod scope;

pub use evaluator::{
    can_view_study, check_administrative_access, check_medical_access, has_administrative_access,
    has_medical_access, require_roles, AccessLevel,
};
pub use scope::{study_scope, StudyScope};
