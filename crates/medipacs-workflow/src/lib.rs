//! # MediPACS 工作流
//!
//! 检查生命周期状态机、删除审批流程、上传信息回退合并与
//! AI报告协作方边界。所有状态字段变更必须通过这里的统一入口。

pub mod deletion;
pub mod enrichment;
pub mod intake;
pub mod state_machine;

pub use deletion::{check_request_allowed, resolve_request, validate_reason, Resolution};
pub use enrichment::{ReportGenerator, ReportRequest, StubReportGenerator};
pub use intake::{
    resolve_intake, ExtractedMetadata, MetadataExtractor, NoopExtractor, PatientIntake,
    StudyIntake, UploadForm,
};
pub use state_machine::{Actor, StudyAction, StudyStateMachine};
