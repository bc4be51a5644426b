use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

use crate::models::job::{StagedInputSet, StagedPhoto};

/// An upload as received from the submission endpoint, still in memory.
#[derive(Debug, Clone)]
pub struct UploadedPhoto {
    pub original_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Owner of every job's staged input directory.
///
/// Staging and cleanup both live here so the create-on-submit /
/// destroy-on-terminal lifecycle has a single enforcement point.
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub async fn init(root: impl Into<PathBuf>) -> Result<Self, StagingError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn job_dir(&self, job_id: Uuid) -> PathBuf {
        self.root.join(job_id.to_string())
    }

    /// Copy a submission's uploads into a directory owned by the job.
    ///
    /// All files are fully written before this returns, so the job can be
    /// enqueued immediately afterwards. On any write failure the partial
    /// directory is removed and the submission fails; the job is never
    /// enqueued.
    pub async fn stage(
        &self,
        job_id: Uuid,
        standing_photos: &[UploadedPhoto],
        outfit_photo: &UploadedPhoto,
    ) -> Result<StagedInputSet, StagingError> {
        let dir = self.job_dir(job_id);
        fs::create_dir_all(&dir).await?;

        match Self::write_photos(&dir, standing_photos, outfit_photo).await {
            Ok(set) => Ok(set),
            Err(e) => {
                let _ = fs::remove_dir_all(&dir).await;
                Err(e)
            }
        }
    }

    async fn write_photos(
        dir: &Path,
        standing_photos: &[UploadedPhoto],
        outfit_photo: &UploadedPhoto,
    ) -> Result<StagedInputSet, StagingError> {
        let mut staged_standing = Vec::with_capacity(standing_photos.len());
        for (index, photo) in standing_photos.iter().enumerate() {
            let filename = format!("standing_{}_{}", index, base_name(&photo.original_name));
            staged_standing.push(Self::write_photo(dir, &filename, photo).await?);
        }

        let outfit_filename = format!("outfit_{}", base_name(&outfit_photo.original_name));
        let staged_outfit = Self::write_photo(dir, &outfit_filename, outfit_photo).await?;

        Ok(StagedInputSet {
            temp_dir: dir.to_path_buf(),
            standing_photos: staged_standing,
            outfit_photo: staged_outfit,
        })
    }

    async fn write_photo(
        dir: &Path,
        filename: &str,
        photo: &UploadedPhoto,
    ) -> Result<StagedPhoto, StagingError> {
        let path = dir.join(filename);
        fs::write(&path, &photo.bytes).await?;
        Ok(StagedPhoto {
            path,
            mime_type: photo.mime_type.clone(),
            original_name: photo.original_name.clone(),
        })
    }

    /// Remove a job's staging directory and everything in it.
    ///
    /// Called on every terminal transition. Idempotent: a directory that is
    /// already gone is not an error. Other failures are logged and
    /// swallowed so cleanup can never change a job's outcome.
    pub async fn cleanup(&self, job_id: Uuid) {
        let dir = self.job_dir(job_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Failed to remove staging directory");
            }
        }
    }
}

/// Strip any path components from a client-supplied filename.
fn base_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("failed to stage input file: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(name: &str, bytes: &[u8]) -> UploadedPhoto {
        UploadedPhoto {
            original_name: name.to_string(),
            mime_type: "image/jpeg".to_string(),
            bytes: bytes.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_stage_writes_all_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::init(dir.path()).await.unwrap();
        let job_id = Uuid::new_v4();

        let set = staging
            .stage(
                job_id,
                &[photo("front.jpg", b"front"), photo("side.jpg", b"side")],
                &photo("flatlay.jpg", b"outfit"),
            )
            .await
            .unwrap();

        assert_eq!(set.temp_dir, dir.path().join(job_id.to_string()));
        assert_eq!(set.standing_photos.len(), 2);
        assert_eq!(std::fs::read(&set.standing_photos[0].path).unwrap(), b"front");
        assert_eq!(std::fs::read(&set.outfit_photo.path).unwrap(), b"outfit");
        assert!(set
            .outfit_photo
            .path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("outfit_"));
    }

    #[tokio::test]
    async fn test_cleanup_removes_directory_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::init(dir.path()).await.unwrap();
        let job_id = Uuid::new_v4();

        staging
            .stage(job_id, &[photo("a.jpg", b"a")], &photo("b.jpg", b"b"))
            .await
            .unwrap();
        assert!(dir.path().join(job_id.to_string()).exists());

        staging.cleanup(job_id).await;
        assert!(!dir.path().join(job_id.to_string()).exists());

        // Second pass over an already-removed directory is a no-op
        staging.cleanup(job_id).await;
    }

    #[tokio::test]
    async fn test_client_filenames_cannot_escape_job_dir() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::init(dir.path()).await.unwrap();
        let job_id = Uuid::new_v4();

        let set = staging
            .stage(
                job_id,
                &[photo("../../escape.jpg", b"x")],
                &photo("flatlay.jpg", b"outfit"),
            )
            .await
            .unwrap();

        let staged = &set.standing_photos[0];
        assert!(staged.path.starts_with(dir.path().join(job_id.to_string())));
        assert_eq!(
            staged.path.file_name().unwrap().to_string_lossy(),
            "standing_0_escape.jpg"
        );
    }
}
