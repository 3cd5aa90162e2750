//! AI报告协作方边界
//!
//! 报告生成是外部协作组件，本系统只负责派发请求、原样保存返回的
//! 报告文本，并通过状态机钩子推进 `queued → processing → uploaded`。
//! 报告内容不做任何解释。

use async_trait::async_trait;
use medipacs_core::Result;

/// 报告生成请求
#[derive(Debug, Clone)]
pub struct ReportRequest {
    pub study_uid: String,
    pub modality: String,
    pub body_part: String,
    pub description: String,
    /// 已落盘的DICOM目录（可选，生成方自行决定是否读取）
    pub dicom_path: Option<String>,
}

/// AI报告生成协作方
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    /// 生成报告文本，返回的内容被视为不透明数据
    async fn generate(&self, request: &ReportRequest) -> Result<String>;
}

/// 占位生成器：不做推理，返回一段标注了检查参数的固定文本
///
/// 部署时替换为真实的推理服务客户端。
#[derive(Debug, Default)]
pub struct StubReportGenerator;

#[async_trait]
impl ReportGenerator for StubReportGenerator {
    async fn generate(&self, request: &ReportRequest) -> Result<String> {
        Ok(format!(
            "AI preliminary report for study {} ({} / {}): pending radiologist review.",
            request.study_uid, request.modality, request.body_part
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_generator_echoes_study_params() {
        let generator = StubReportGenerator;
        let request = ReportRequest {
            study_uid: "AB12CD34".into(),
            modality: "CT".into(),
            body_part: "CHEST".into(),
            description: String::new(),
            dicom_path: None,
        };
        let report = generator.generate(&request).await.unwrap();
        assert!(report.contains("AB12CD34"));
        assert!(report.contains("CT"));
    }
}
