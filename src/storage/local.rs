//! Filesystem backend.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use url::Url;
use uuid::Uuid;

use super::{Blob, BlobStore, DEFAULT_CONTENT_TYPE};
use crate::error::{AppError, ErrorKind};

/// Stores blobs as plain files under a root directory.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to a path under the root, rejecting anything that escapes it.
    pub fn resolve(&self, key: &str) -> Result<PathBuf, AppError> {
        let mut parts: Vec<&str> = Vec::new();
        for component in Path::new(key).components() {
            match component {
                Component::Normal(part) => match part.to_str() {
                    Some(s) => parts.push(s),
                    None => return Err(AppError::invalid_key(key, "key is not valid UTF-8")),
                },
                Component::CurDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(AppError::invalid_key(key, "key escapes the storage root"));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(AppError::invalid_key(key, "absolute keys are not allowed"));
                }
            }
        }

        if parts.is_empty() {
            return Err(AppError::invalid_key(key, "key is empty"));
        }

        let mut path = self.root.clone();
        path.extend(parts);
        Ok(path)
    }

    fn io_error(key: &str, op: &str, err: std::io::Error) -> AppError {
        let kind = match err.kind() {
            IoErrorKind::TimedOut => ErrorKind::StorageTimeout,
            _ => ErrorKind::Storage,
        };
        AppError::wrap(kind, format!("local storage {} failed", op), err)
            .with_context("key", key)
            .with_context("backend", "local")
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<String, AppError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::io_error(key, "create_dir", e))?;
        }

        // Temp sibling + rename so readers never see a partial file.
        let temp_path = path.with_file_name(format!(
            ".{}.{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("blob"),
            Uuid::new_v4().simple()
        ));
        let write = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &path).await
        };
        if let Err(e) = write.await {
            warn!(key, error = %e, "local storage: write failed");
            let _ = fs::remove_file(&temp_path).await;
            return Err(Self::io_error(key, "write", e));
        }

        Ok(key.to_string())
    }

    async fn download(&self, key: &str) -> Result<Blob, AppError> {
        let path = self.resolve(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Blob {
                bytes,
                content_type: mime_guess::from_path(&path)
                    .first_raw()
                    .unwrap_or(DEFAULT_CONTENT_TYPE)
                    .to_string(),
            }),
            Err(e) if e.kind() == IoErrorKind::NotFound => Err(AppError::blob_not_found(key)),
            Err(e) => Err(Self::io_error(key, "read", e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, AppError> {
        let path = self.resolve(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::io_error(key, "stat", e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::io_error(key, "delete", e)),
        }
    }

    async fn url(&self, key: &str, _ttl: Duration) -> Result<Option<String>, AppError> {
        if !self.exists(key).await? {
            return Ok(None);
        }
        let path = self.resolve(key)?;
        let absolute = match fs::canonicalize(&path).await {
            Ok(p) => p,
            Err(e) => return Err(Self::io_error(key, "canonicalize", e)),
        };
        Ok(Url::from_file_path(&absolute).ok().map(|u| u.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (LocalBlobStore, TempDir) {
        let dir = TempDir::new().unwrap();
        (LocalBlobStore::new(dir.path()), dir)
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let (store, _dir) = store();
        for key in ["../outside", "a/../../outside", "/etc/passwd", "", "./."] {
            let err = store.resolve(key).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidKey, "{}", key);
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_resolve_normalizes_inside_root() {
        let (store, dir) = store();
        assert_eq!(
            store.resolve("a/./b/../c.txt").unwrap(),
            dir.path().join("a").join("c.txt")
        );
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (store, _dir) = store();
        let key = "documents/ab/cd/abcd/report.pdf";

        assert!(!store.exists(key).await.unwrap());
        store.upload(key, b"%PDF", "application/pdf").await.unwrap();
        assert!(store.exists(key).await.unwrap());

        let blob = store.download(key).await.unwrap();
        assert_eq!(blob.bytes, b"%PDF");
        assert_eq!(blob.content_type, "application/pdf");

        let url = store.url(key, Duration::from_secs(60)).await.unwrap();
        assert!(url.unwrap().starts_with("file://"));

        assert!(store.delete(key).await.unwrap());
        assert!(!store.delete(key).await.unwrap());
        assert!(store.url(key, Duration::from_secs(60)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let (store, _dir) = store();
        let err = store.download("nope/missing.bin").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BlobNotFound);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_temp_files() {
        let (store, dir) = store();
        store.upload("x/blob.bin", b"one", "application/octet-stream").await.unwrap();
        store.upload("x/blob.bin", b"two", "application/octet-stream").await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path().join("x"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
        assert_eq!(store.download("x/blob.bin").await.unwrap().bytes, b"two");
    }
}
