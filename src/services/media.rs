use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

/// Durable store for generated result images.
///
/// Files are written once under a generated unique name and are served back
/// under the `/generated/` URL prefix.
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub async fn init(root: impl Into<PathBuf>) -> Result<Self, MediaError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist decoded image bytes and return the public result path.
    ///
    /// The write goes to a temporary sibling first and is renamed into
    /// place, so a partially written file is never observable under its
    /// final name.
    pub async fn save_generated(
        &self,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<String, MediaError> {
        let filename = format!("fit_{}.{}", Uuid::new_v4(), extension_for(mime_type));
        let final_path = self.root.join(&filename);
        let tmp_path = self.root.join(format!(".{filename}.tmp"));

        if let Err(e) = fs::write(&tmp_path, bytes).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        fs::rename(&tmp_path, &final_path).await?;

        Ok(format!("/generated/{filename}"))
    }
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/webp" => "webp",
        _ => "jpg",
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("failed to write generated image: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_mapping() {
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("image/png"), "png");
        assert_eq!(extension_for("image/webp"), "webp");
        assert_eq!(extension_for("application/octet-stream"), "jpg");
    }

    #[tokio::test]
    async fn test_save_generated_writes_file_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::init(dir.path()).await.unwrap();

        let result_path = store.save_generated(b"fake png bytes", "image/png").await.unwrap();
        assert!(result_path.starts_with("/generated/fit_"));
        assert!(result_path.ends_with(".png"));

        let filename = result_path.strip_prefix("/generated/").unwrap();
        let on_disk = std::fs::read(dir.path().join(filename)).unwrap();
        assert_eq!(on_disk, b"fake png bytes");

        // No temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_filenames_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::init(dir.path()).await.unwrap();

        let a = store.save_generated(b"a", "image/jpeg").await.unwrap();
        let b = store.save_generated(b"b", "image/jpeg").await.unwrap();
        assert_ne!(a, b);
    }
}
