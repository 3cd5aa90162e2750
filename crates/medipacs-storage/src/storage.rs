//! 影像存储管理

use medipacs_core::Result;
use std::path::{Path, PathBuf};

/// 存储管理器
///
/// 文件按`<base>/<检查号>/<文件名>`布局存放，数据库中的
/// `file_path`记录相对于base的路径。
pub struct StorageManager {
    base_path: PathBuf,
}

impl StorageManager {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// 某检查的相对存储目录
    pub fn study_dir(study_uid: &str) -> String {
        format!("studies/{}", study_uid)
    }

    /// 存储文件，返回相对路径
    pub async fn store_file(&self, data: &[u8], relative_path: &str) -> Result<String> {
        let full_path = self.base_path.join(relative_path);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&full_path, data).await?;
        tracing::debug!("Stored {} bytes at {}", data.len(), full_path.display());
        Ok(relative_path.to_string())
    }

    /// 读取文件内容
    pub async fn read_file(&self, relative_path: &str) -> Result<Vec<u8>> {
        let data = tokio::fs::read(self.base_path.join(relative_path)).await?;
        Ok(data)
    }

    /// 尽力删除文件：缺失或IO失败只记录日志，不影响调用方的主流程
    pub async fn delete_file_best_effort(&self, relative_path: &str) {
        let full_path = self.base_path.join(relative_path);
        match tokio::fs::remove_file(&full_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("File already missing during delete: {}", full_path.display());
            }
            Err(e) => {
                tracing::error!("Failed to delete file {}: {}", full_path.display(), e);
            }
        }
    }

    /// 尽力删除某检查的整个目录
    pub async fn delete_study_dir_best_effort(&self, study_uid: &str) {
        let dir = self.base_path.join(Self::study_dir(study_uid));
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::error!("Failed to delete study dir {}: {}", dir.display(), e);
            }
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_base() -> PathBuf {
        std::env::temp_dir().join(format!("medipacs-storage-test-{}", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_store_and_read_roundtrip() {
        let manager = StorageManager::new(temp_base());
        let rel = format!("{}/slice_001.dcm", StorageManager::study_dir("AB12CD34"));

        let stored = manager.store_file(b"dicom-bytes", &rel).await.unwrap();
        assert_eq!(stored, rel);
        assert_eq!(manager.read_file(&rel).await.unwrap(), b"dicom-bytes");

        tokio::fs::remove_dir_all(manager.base_path()).await.ok();
    }

    #[tokio::test]
    async fn test_delete_missing_file_is_tolerated() {
        let manager = StorageManager::new(temp_base());
        // 不存在的文件删除不应panic或报错
        manager.delete_file_best_effort("studies/NOPE0000/gone.dcm").await;
        manager.delete_study_dir_best_effort("NOPE0000").await;
    }

    #[tokio::test]
    async fn test_delete_study_dir_removes_files() {
        let manager = StorageManager::new(temp_base());
        let rel = format!("{}/a.dcm", StorageManager::study_dir("ZZ99YY88"));
        manager.store_file(b"x", &rel).await.unwrap();

        manager.delete_study_dir_best_effort("ZZ99YY88").await;
        assert!(manager.read_file(&rel).await.is_err());

        tokio::fs::remove_dir_all(manager.base_path()).await.ok();
    }
}
