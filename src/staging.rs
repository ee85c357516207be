//! Temporary staging of audio bytes for the speaker backend.
//!
//! Both handlers stage bytes to disk because the model backend consumes file
//! paths. Files are named with a v4 uuid so concurrent requests cannot
//! collide, and the [`StagedAudio`] guard removes the file on drop no matter
//! how the request ends.

use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::AppError;

/// On-disk staged copy of one request's audio bytes.
pub struct StagedAudio {
    path: PathBuf,
}

impl StagedAudio {
    /// Writes `bytes` to a fresh uniquely named file under `dir`.
    pub async fn write(dir: &Path, bytes: &[u8]) -> Result<Self, AppError> {
        let path = dir.join(format!("tmp_{}.wav", Uuid::new_v4()));
        tokio::fs::write(&path, bytes).await.map_err(|err| {
            AppError::internal(format!("failed to stage audio at {path:?}: {err}"))
        })?;
        Ok(Self { path })
    }

    /// Path of the staged file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedAudio {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Creates the staging directory if it does not exist yet.
pub fn ensure_staging_dir(dir: &Path) -> Result<(), AppError> {
    fs::create_dir_all(dir).map_err(|err| {
        AppError::internal(format!("failed to create staging directory {dir:?}: {err}"))
    })
}

#[cfg(test)]
mod tests {
    use super::{ensure_staging_dir, StagedAudio};

    #[tokio::test]
    async fn staged_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = {
            let staged = StagedAudio::write(dir.path(), b"RIFF")
                .await
                .expect("stage");
            let path = staged.path().to_path_buf();
            assert_eq!(std::fs::read(&path).expect("read back"), b"RIFF");
            path
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn staged_files_do_not_collide() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = StagedAudio::write(dir.path(), b"a").await.expect("stage a");
        let b = StagedAudio::write(dir.path(), b"b").await.expect("stage b");
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn ensure_staging_dir_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("staging");
        ensure_staging_dir(&target).expect("first");
        ensure_staging_dir(&target).expect("second");
        assert!(target.is_dir());
    }
}
