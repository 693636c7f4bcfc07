//! Compressed storage for raw OCR engine responses.

use std::io::{Read, Write};
use std::time::Duration;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::{BlobStorage, BlobStore};
use crate::error::{AppError, ErrorKind};

/// Key prefix for stored engine responses.
pub const OCR_RESPONSE_PREFIX: &str = "ocr-runs";

const RESPONSE_CONTENT_TYPE: &str = "application/json";

/// `ocr-runs/{run_id}/{YYYYmmdd_HHMMSS_mmm}_{suffix}.json.gz`
///
/// The suffix keeps two stores in the same millisecond apart.
pub fn ocr_response_key(run_id: &str, at: DateTime<Utc>, suffix: &str) -> String {
    format!(
        "{}/{}/{}_{}.json.gz",
        OCR_RESPONSE_PREFIX,
        run_id,
        at.format("%Y%m%d_%H%M%S_%3f"),
        suffix
    )
}

fn decode_error(key: &str, message: &str) -> AppError {
    AppError::new(ErrorKind::Storage, message.to_string())
        .with_retryable(false)
        .with_context("key", key)
        .with_context("stage", "decode")
}

/// Gzip-compressed JSON blobs on top of the configured backend.
#[derive(Debug, Clone)]
pub struct OcrResponseStore {
    storage: BlobStorage,
}

impl OcrResponseStore {
    pub fn new(storage: BlobStorage) -> Self {
        Self { storage }
    }

    /// Compress and store `response` for a run. Returns the key.
    pub async fn store(&self, run_id: &str, response: &Value) -> Result<String, AppError> {
        let suffix = Uuid::new_v4().simple().to_string();
        let key = ocr_response_key(run_id, Utc::now(), &suffix[..8]);

        let json = serde_json::to_vec(response).map_err(|e| {
            AppError::wrap(ErrorKind::Storage, "failed to serialize OCR response", e)
                .with_retryable(false)
        })?;
        let compressed = compress(&json)
            .map_err(|e| AppError::wrap(ErrorKind::Storage, "failed to compress OCR response", e))?;

        self.storage
            .upload(&key, &compressed, RESPONSE_CONTENT_TYPE)
            .await?;

        info!(
            run_id,
            key = %key,
            raw = json.len(),
            compressed = compressed.len(),
            "Stored OCR response"
        );
        Ok(key)
    }

    /// Fetch, decompress and parse a stored response.
    pub async fn retrieve(&self, key: &str) -> Result<Value, AppError> {
        let blob = self.storage.download(key).await?;

        let mut json = Vec::new();
        GzDecoder::new(&blob.bytes[..])
            .read_to_end(&mut json)
            .map_err(|e| decode_error(key, "stored OCR response is not valid gzip").caused_by(e))?;

        let value = serde_json::from_slice(&json)
            .map_err(|e| decode_error(key, "stored OCR response is not valid JSON").caused_by(e))?;
        debug!(key, size = json.len(), "Retrieved OCR response");
        Ok(value)
    }

    pub async fn exists(&self, key: &str) -> Result<bool, AppError> {
        self.storage.exists(key).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool, AppError> {
        self.storage.delete(key).await
    }

    pub async fn url(&self, key: &str, ttl: Duration) -> Result<Option<String>, AppError> {
        self.storage.url(key, ttl).await
    }
}

fn compress(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalBlobStore;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> (OcrResponseStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = BlobStorage::Local(LocalBlobStore::new(dir.path()));
        (OcrResponseStore::new(storage), dir)
    }

    #[test]
    fn test_key_layout() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
            + chrono::Duration::milliseconds(42);
        assert_eq!(
            ocr_response_key("run-42", at, "0badcafe"),
            "ocr-runs/run-42/20240309_140507_042_0badcafe.json.gz"
        );
    }

    #[tokio::test]
    async fn test_round_trip_preserves_structure() {
        let (store, dir) = store();
        let response = json!({
            "pages": [
                {"page": 1, "text": "Invoice 2024-001", "confidence": 0.97},
                {"page": 2, "content": "Total: 1,250.00 EUR"}
            ],
            "model": {"name": "prebuilt-read", "version": "2024-02-29"},
            "tables": []
        });

        let key = store.store("run-1", &response).await.unwrap();
        assert!(key.starts_with("ocr-runs/run-1/"));
        assert!(key.ends_with(".json.gz"));

        // Bytes on disk are gzip, not plain JSON.
        let raw = std::fs::read(dir.path().join(&key)).unwrap();
        assert_eq!(&raw[..2], &[0x1f, 0x8b]);

        assert_eq!(store.retrieve(&key).await.unwrap(), response);
        assert!(store.exists(&key).await.unwrap());
        assert!(store.delete(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_back_to_back_stores_keep_both_responses() {
        let (store, _dir) = store();
        let first = store.store("run-7", &json!({"attempt": 1})).await.unwrap();
        let second = store.store("run-7", &json!({"attempt": 2})).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(store.retrieve(&first).await.unwrap()["attempt"], 1);
        assert_eq!(store.retrieve(&second).await.unwrap()["attempt"], 2);
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_terminal() {
        let (store, _dir) = store();
        store
            .storage
            .upload("ocr-runs/x/bad.json.gz", b"not gzip", RESPONSE_CONTENT_TYPE)
            .await
            .unwrap();

        let err = store.retrieve("ocr-runs/x/bad.json.gz").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(!err.is_retryable());
        assert_eq!(err.context()["stage"], "decode");
    }
}
