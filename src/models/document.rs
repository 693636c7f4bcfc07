use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ProcessingStatus;

/// One deduplicated attachment, identified by its content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    /// SHA-256 of the content; unique across documents.
    pub content_hash: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    /// Key in the blob store.
    pub storage_path: String,
    /// Page count declared at extraction time, if known.
    pub page_count: Option<i32>,
    // Canonical OCR result, written only by selection.
    pub extracted_text: Option<String>,
    pub ocr_engine: Option<String>,
    pub ocr_confidence: Option<f64>,
    pub pages_parsed: Option<i32>,
    pub word_count: Option<i32>,
    pub status: ProcessingStatus,
    pub processing_error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// A fresh, unprocessed document for stored content.
    pub fn new(
        content_hash: String,
        filename: String,
        content_type: String,
        size_bytes: i64,
        storage_path: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content_hash,
            filename,
            content_type,
            size_bytes,
            storage_path,
            page_count: None,
            extracted_text: None,
            ocr_engine: None,
            ocr_confidence: None,
            pages_parsed: None,
            word_count: None,
            status: ProcessingStatus::Pending,
            processing_error: None,
            processed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_canonical_result(&self) -> bool {
        self.ocr_engine.is_some()
    }
}
