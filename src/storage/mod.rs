//! Content-addressed blob storage.
//!
//! Two capability-equivalent backends sit behind [`BlobStore`]: a local
//! filesystem tree and an S3-compatible object store. [`BlobStorage`] picks
//! one at construction time from validated settings; callers never branch on
//! the backend again.

mod content;
mod local;
mod ocr_responses;
mod s3;
mod sigv4;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use crate::config::{Settings, StorageBackendConfig};
use crate::error::AppError;

pub use content::{compute_hash, document_key, download_verified, sanitize_filename, verify_checksum};
pub use local::LocalBlobStore;
pub use ocr_responses::{ocr_response_key, OcrResponseStore, OCR_RESPONSE_PREFIX};
pub use s3::S3BlobStore;

/// Content type used when nothing better is known.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A downloaded blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Storage contract shared by every backend.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, overwriting any previous value. Returns the key.
    async fn upload(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, AppError>;

    /// Fetch a blob; an absent key fails with `BlobNotFound`.
    async fn download(&self, key: &str) -> Result<Blob, AppError>;

    async fn exists(&self, key: &str) -> Result<bool, AppError>;

    /// Remove a blob. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, AppError>;

    /// An access URL valid for `ttl`, if the backend can produce one.
    async fn url(&self, key: &str, ttl: Duration) -> Result<Option<String>, AppError>;
}

/// The configured backend.
#[derive(Debug, Clone)]
pub enum BlobStorage {
    Local(LocalBlobStore),
    S3(S3BlobStore),
}

impl BlobStorage {
    /// Build the backend named by validated settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        Self::from_config(settings.storage_backend()?)
    }

    pub fn from_config(config: StorageBackendConfig) -> Result<Self, AppError> {
        match config {
            StorageBackendConfig::Local { root } => Ok(Self::Local(LocalBlobStore::new(root))),
            StorageBackendConfig::S3(cfg) => Ok(Self::S3(S3BlobStore::new(cfg)?)),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::S3(_) => "s3",
        }
    }

    fn inner(&self) -> &dyn BlobStore {
        match self {
            Self::Local(store) => store,
            Self::S3(store) => store,
        }
    }
}

#[async_trait]
impl BlobStore for BlobStorage {
    async fn upload(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, AppError> {
        let start = Instant::now();
        let result = self.inner().upload(key, bytes, content_type).await;
        debug!(
            backend = self.backend_name(),
            key,
            size = bytes.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "storage: upload"
        );
        result
    }

    async fn download(&self, key: &str) -> Result<Blob, AppError> {
        let start = Instant::now();
        let result = self.inner().download(key).await;
        debug!(
            backend = self.backend_name(),
            key,
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "storage: download"
        );
        result
    }

    async fn exists(&self, key: &str) -> Result<bool, AppError> {
        self.inner().exists(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        let result = self.inner().delete(key).await;
        debug!(backend = self.backend_name(), key, ?result, "storage: delete");
        result
    }

    async fn url(&self, key: &str, ttl: Duration) -> Result<Option<String>, AppError> {
        self.inner().url(key, ttl).await
    }
}
