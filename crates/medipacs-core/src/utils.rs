//! 通用工具函数

use rand::Rng;

/// 检查号长度
pub const STUDY_UID_LEN: usize = 8;

/// 检查号字符集：大写字母与数字
const STUDY_UID_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// 检查号分配的最大碰撞重试次数
///
/// 字符空间约36^8，100次均碰撞说明数据已损坏而非运气问题，
/// 分配方应将耗尽视为致命错误。
pub const STUDY_UID_MAX_ATTEMPTS: u32 = 100;

/// 生成一个随机的8位检查号（不含唯一性检查）
pub fn random_study_uid() -> String {
    let mut rng = rand::thread_rng();
    (0..STUDY_UID_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..STUDY_UID_CHARSET.len());
            STUDY_UID_CHARSET[idx] as char
        })
        .collect()
}

/// 校验检查号格式：恰好8位大写字母或数字
pub fn is_valid_study_uid(uid: &str) -> bool {
    uid.len() == STUDY_UID_LEN
        && uid
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// 生成占位患者编号（上传时表单与DICOM均未提供patient_id的回退）
pub fn generate_patient_id() -> String {
    let mut rng = rand::thread_rng();
    let digits: String = (0..6).map(|_| rng.gen_range(0..10).to_string()).collect();
    format!("PAT{}", digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_study_uid_format() {
        for _ in 0..200 {
            let uid = random_study_uid();
            assert!(is_valid_study_uid(&uid), "invalid uid: {}", uid);
        }
    }

    #[test]
    fn test_is_valid_study_uid() {
        assert!(is_valid_study_uid("AB12CD34"));
        assert!(is_valid_study_uid("00000000"));
        assert!(!is_valid_study_uid("ab12cd34"));
        assert!(!is_valid_study_uid("AB12CD3"));
        assert!(!is_valid_study_uid("AB12CD345"));
        assert!(!is_valid_study_uid("AB12-D34"));
        assert!(!is_valid_study_uid(""));
    }

    #[test]
    fn test_generate_patient_id_format() {
        let pid = generate_patient_id();
        assert!(pid.starts_with("PAT"));
        assert_eq!(pid.len(), 9);
        assert!(pid[3..].chars().all(|c| c.is_ascii_digit()));
    }
}
