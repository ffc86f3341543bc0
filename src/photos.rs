//! Photo storage: downloads submitted photos once and resolves them later.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{ChannelError, PhotoError};

/// Where photo bytes come from (the chat transport).
#[async_trait]
pub trait PhotoSource: Send + Sync {
    /// Download the payload identified by a transport file id.
    async fn fetch(&self, file_id: &str) -> Result<Vec<u8>, ChannelError>;
}

/// Write-once photo files under a single directory.
pub struct PhotoStore {
    dir: PathBuf,
    source: Arc<dyn PhotoSource>,
}

impl PhotoStore {
    pub fn new(dir: impl Into<PathBuf>, source: Arc<dyn PhotoSource>) -> Self {
        Self {
            dir: dir.into(),
            source,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fetch `file_id` and store it for `submitter_id`.
    ///
    /// Returns the reference to keep in the record (the file name).
    pub async fn ingest(&self, submitter_id: i64, file_id: &str) -> Result<String, PhotoError> {
        let bytes = self
            .source
            .fetch(file_id)
            .await
            .map_err(|source| PhotoError::Fetch {
                file_id: file_id.to_string(),
                source,
            })?;

        tokio::fs::create_dir_all(&self.dir).await?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("{submitter_id}_{stamp}.jpg")
            } else {
                format!("{submitter_id}_{stamp}_{attempt}.jpg")
            };
            let path = self.dir.join(&name);
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match opened {
                Ok(mut file) => {
                    file.write_all(&bytes).await?;
                    file.flush().await?;
                    info!(submitter_id, reference = %name, size = bytes.len(), "Photo stored");
                    return Ok(name);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && attempt < 8 => {
                    debug!(path = %path.display(), "Photo name taken, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Map a stored reference to a readable file, if it still exists.
    pub fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let reference = reference.trim();
        if reference.is_empty() {
            return None;
        }
        let candidate = Path::new(reference);
        let path = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else if candidate
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            self.dir.join(candidate)
        } else {
            warn!(reference, "Rejecting photo reference outside the photo directory");
            return None;
        };
        path.is_file().then_some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubSource {
        bytes: Option<Vec<u8>>,
    }

    #[async_trait]
    impl PhotoSource for StubSource {
        async fn fetch(&self, file_id: &str) -> Result<Vec<u8>, ChannelError> {
            self.bytes.clone().ok_or_else(|| ChannelError::DownloadFailed {
                name: "stub".into(),
                reason: format!("no such file {file_id}"),
            })
        }
    }

    fn store(dir: &Path, bytes: Option<Vec<u8>>) -> PhotoStore {
        PhotoStore::new(dir.join("photos"), Arc::new(StubSource { bytes }))
    }

    #[tokio::test]
    async fn ingest_writes_file_and_resolves() {
        let tmp = tempfile::tempdir().unwrap();
        let photos = store(tmp.path(), Some(vec![0xFF, 0xD8, 0xFF]));

        let reference = photos.ingest(42, "F1").await.unwrap();
        assert!(reference.starts_with("42_"));
        assert!(reference.ends_with(".jpg"));

        let path = photos.resolve(&reference).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), vec![0xFF, 0xD8, 0xFF]);
    }

    #[tokio::test]
    async fn ingest_never_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let photos = store(tmp.path(), Some(b"jpeg".to_vec()));
        let a = photos.ingest(7, "F1").await.unwrap();
        let b = photos.ingest(7, "F2").await.unwrap();
        assert_ne!(a, b);
        assert!(photos.resolve(&a).is_some());
        assert!(photos.resolve(&b).is_some());
    }

    #[tokio::test]
    async fn fetch_failure_is_reported_and_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let photos = store(tmp.path(), None);
        let err = photos.ingest(42, "missing").await.unwrap_err();
        assert!(matches!(err, PhotoError::Fetch { ref file_id, .. } if file_id == "missing"));
        assert!(!photos.dir().exists());
    }

    #[test]
    fn resolve_rejects_missing_and_escaping_references() {
        let tmp = tempfile::tempdir().unwrap();
        let photos = store(tmp.path(), None);
        assert!(photos.resolve("").is_none());
        assert!(photos.resolve("nope.jpg").is_none());
        assert!(photos.resolve("../secret.jpg").is_none());
    }
}
