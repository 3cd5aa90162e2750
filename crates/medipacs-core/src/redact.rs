//! PHI脱敏
//!
//! 审计等非临床存储在持久化前必须将固定的PHI字段集合替换为脱敏标记。

use serde_json::Value;

/// 脱敏标记
pub const REDACTION_TOKEN: &str = "***REDACTED***";

/// 需要脱敏的PHI字段集合（固定，与审计契约绑定）
pub const PHI_FIELDS: [&str; 7] = [
    "patient_name",
    "first_name",
    "last_name",
    "email",
    "phone",
    "address",
    "patient_id",
];

/// 将JSON对象顶层的PHI字段替换为脱敏标记
///
/// 非对象输入原样返回；重复脱敏结果不变（幂等）。
pub fn anonymize_phi(data: &Value) -> Value {
    let mut anonymized = data.clone();
    if let Some(map) = anonymized.as_object_mut() {
        for field in PHI_FIELDS {
            if let Some(value) = map.get_mut(field) {
                *value = Value::String(REDACTION_TOKEN.to_string());
            }
        }
    }
    anonymized
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redacts_all_phi_fields() {
        let details = json!({
            "patient_name": "John Doe",
            "first_name": "John",
            "last_name": "Doe",
            "email": "john@example.com",
            "phone": "555-0100",
            "address": "1 Main St",
            "patient_id": "PAT123456",
            "study_uid": "AB12CD34",
            "files_count": 12
        });

        let redacted = anonymize_phi(&details);
        for field in PHI_FIELDS {
            assert_eq!(redacted[field], REDACTION_TOKEN, "field {}", field);
        }
        // 非PHI字段保持原样
        assert_eq!(redacted["study_uid"], "AB12CD34");
        assert_eq!(redacted["files_count"], 12);
    }

    #[test]
    fn test_idempotent() {
        let details = json!({"patient_name": "Jane", "modality": "CT"});
        let once = anonymize_phi(&details);
        let twice = anonymize_phi(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_missing_fields_left_untouched() {
        let details = json!({"modality": "MR"});
        let redacted = anonymize_phi(&details);
        assert_eq!(redacted, details);
        assert!(redacted.get("patient_name").is_none());
    }

    #[test]
    fn test_non_object_passthrough() {
        let value = json!(["patient_name"]);
        assert_eq!(anonymize_phi(&value), value);
    }
}
