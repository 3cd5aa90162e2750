//! 上传信息合并
//!
//! 检查上传采取"降级而非失败"策略：DICOM元数据提取失败时，
//! 继续使用表单提供的人口学字段，两者都缺失时落到占位值，
//! 保证部分损坏的检查仍然可以被追踪。

use chrono::NaiveDate;
use medipacs_core::utils::generate_patient_id;

/// 上传表单中调用方提供的字段
#[derive(Debug, Clone, Default)]
pub struct UploadForm {
    pub patient_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
}

/// 从DICOM文件中提取出的元数据（提取方为外部协作组件）
#[derive(Debug, Clone, Default)]
pub struct ExtractedMetadata {
    pub patient_name: Option<String>,
    pub patient_id: Option<String>,
    pub patient_birth_date: Option<String>,
    pub patient_sex: Option<String>,
    pub study_description: Option<String>,
    pub modality: Option<String>,
    pub body_part: Option<String>,
    pub study_date: Option<String>,
}

/// DICOM元数据提取协作方
///
/// 解析失败返回None即可，上传流程据此走回退路径。
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Option<ExtractedMetadata>;
}

/// 不做任何提取的默认实现（DICOM解析工具链不在本系统范围内）
#[derive(Debug, Default)]
pub struct NoopExtractor;

impl MetadataExtractor for NoopExtractor {
    fn extract(&self, _bytes: &[u8]) -> Option<ExtractedMetadata> {
        None
    }
}

/// 合并后的患者人口学字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientIntake {
    pub patient_id: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
}

/// 合并后的检查字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyIntake {
    pub description: Option<String>,
    pub modality: Option<String>,
    pub body_part: Option<String>,
    pub priority: String,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// 合并表单与提取结果，得到入库字段
///
/// 优先级：表单 → DICOM → 占位值。姓名仅在表单完全未提供时
/// 才由DICOM患者姓名拆分；单段姓名的姓补"Unknown"。
pub fn resolve_intake(
    form: &UploadForm,
    extracted: Option<&ExtractedMetadata>,
) -> (PatientIntake, StudyIntake) {
    let empty = ExtractedMetadata::default();
    let meta = extracted.unwrap_or(&empty);

    let patient_id = non_empty(&form.patient_id)
        .or_else(|| non_empty(&meta.patient_id))
        .unwrap_or_else(generate_patient_id);

    let (mut first_name, mut last_name) = (non_empty(&form.first_name), non_empty(&form.last_name));
    if first_name.is_none() && last_name.is_none() {
        if let Some(name) = non_empty(&meta.patient_name) {
            let parts: Vec<&str> = name.split_whitespace().collect();
            match parts.len() {
                0 => {}
                1 => {
                    first_name = Some(parts[0].to_string());
                    last_name = Some("Unknown".to_string());
                }
                _ => {
                    first_name = Some(parts[0].to_string());
                    last_name = Some(parts[1..].join(" "));
                }
            }
        }
    }

    let gender = non_empty(&form.gender).or_else(|| {
        non_empty(&meta.patient_sex).map(|sex| match sex.to_ascii_uppercase().as_str() {
            "M" => "M".to_string(),
            "F" => "F".to_string(),
            _ => "O".to_string(),
        })
    });

    let date_of_birth = non_empty(&form.date_of_birth)
        .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
        .or_else(|| {
            // DICOM出生日期为YYYYMMDD
            non_empty(&meta.patient_birth_date)
                .filter(|s| s.len() == 8)
                .and_then(|s| NaiveDate::parse_from_str(&s, "%Y%m%d").ok())
        });

    let patient = PatientIntake {
        patient_id,
        first_name: first_name.unwrap_or_else(|| "Unknown".to_string()),
        last_name: last_name.unwrap_or_else(|| "Patient".to_string()),
        date_of_birth,
        gender,
        phone: non_empty(&form.phone),
        email: non_empty(&form.email),
        address: non_empty(&form.address),
    };

    let study = StudyIntake {
        description: non_empty(&form.description).or_else(|| non_empty(&meta.study_description)),
        modality: non_empty(&meta.modality),
        body_part: non_empty(&meta.body_part),
        priority: non_empty(&form.priority).unwrap_or_else(|| "normal".to_string()),
    };

    (patient, study)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_fields_take_precedence() {
        let form = UploadForm {
            patient_id: Some("PAT000001".into()),
            first_name: Some("Jane".into()),
            last_name: Some("Doe".into()),
            gender: Some("F".into()),
            description: Some("follow-up".into()),
            ..Default::default()
        };
        let meta = ExtractedMetadata {
            patient_id: Some("DICOM-77".into()),
            patient_name: Some("Other Name".into()),
            patient_sex: Some("M".into()),
            study_description: Some("from dicom".into()),
            modality: Some("CT".into()),
            ..Default::default()
        };

        let (patient, study) = resolve_intake(&form, Some(&meta));
        assert_eq!(patient.patient_id, "PAT000001");
        assert_eq!(patient.first_name, "Jane");
        assert_eq!(patient.last_name, "Doe");
        assert_eq!(patient.gender.as_deref(), Some("F"));
        assert_eq!(study.description.as_deref(), Some("follow-up"));
        // modality只来自DICOM
        assert_eq!(study.modality.as_deref(), Some("CT"));
    }

    #[test]
    fn test_dicom_fallback_for_missing_form() {
        let form = UploadForm::default();
        let meta = ExtractedMetadata {
            patient_id: Some("DICOM-77".into()),
            patient_name: Some("John Michael Smith".into()),
            patient_sex: Some("m".into()),
            patient_birth_date: Some("19800101".into()),
            study_description: Some("CT chest".into()),
            modality: Some("CT".into()),
            body_part: Some("CHEST".into()),
            ..Default::default()
        };

        let (patient, study) = resolve_intake(&form, Some(&meta));
        assert_eq!(patient.patient_id, "DICOM-77");
        assert_eq!(patient.first_name, "John");
        assert_eq!(patient.last_name, "Michael Smith");
        assert_eq!(patient.gender.as_deref(), Some("M"));
        assert_eq!(
            patient.date_of_birth,
            NaiveDate::from_ymd_opt(1980, 1, 1)
        );
        assert_eq!(study.body_part.as_deref(), Some("CHEST"));
    }

    #[test]
    fn test_single_part_name_gets_unknown_surname() {
        let meta = ExtractedMetadata {
            patient_name: Some("Cher".into()),
            ..Default::default()
        };
        let (patient, _) = resolve_intake(&UploadForm::default(), Some(&meta));
        assert_eq!(patient.first_name, "Cher");
        assert_eq!(patient.last_name, "Unknown");
    }

    #[test]
    fn test_placeholders_when_nothing_available() {
        // 提取失败且表单为空：降级到占位值而非报错
        let (patient, study) = resolve_intake(&UploadForm::default(), None);
        assert_eq!(patient.first_name, "Unknown");
        assert_eq!(patient.last_name, "Patient");
        assert!(patient.patient_id.starts_with("PAT"));
        assert_eq!(study.priority, "normal");
        assert!(study.modality.is_none());
    }

    #[test]
    fn test_unrecognized_sex_maps_to_other() {
        let meta = ExtractedMetadata {
            patient_sex: Some("X".into()),
            ..Default::default()
        };
        let (patient, _) = resolve_intake(&UploadForm::default(), Some(&meta));
        assert_eq!(patient.gender.as_deref(), Some("O"));
    }

    #[test]
    fn test_malformed_birth_date_ignored() {
        let form = UploadForm {
            date_of_birth: Some("not-a-date".into()),
            ..Default::default()
        };
        let meta = ExtractedMetadata {
            patient_birth_date: Some("1980".into()),
            ..Default::default()
        };
        let (patient, _) = resolve_intake(&form, Some(&meta));
        assert!(patient.date_of_birth.is_none());
    }
}
