use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ProcessingStatus;

/// Quality and cost figures reported for one engine attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Mean confidence in `[0, 100]`.
    pub confidence_mean: Option<f64>,
    pub pages_parsed: Option<i32>,
    pub word_count: Option<i32>,
    pub table_count: Option<i32>,
    pub latency_ms: Option<i64>,
    pub cost_cents: Option<i32>,
}

/// One attempt by one engine/config against one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrRun {
    pub id: String,
    pub document_id: String,
    pub engine: String,
    pub engine_version: Option<String>,
    pub config: serde_json::Value,
    pub status: ProcessingStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub metrics: RunMetrics,
    /// Key of the compressed raw engine response.
    pub raw_response_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl OcrRun {
    pub fn confidence(&self) -> f64 {
        self.metrics.confidence_mean.unwrap_or(0.0)
    }

    pub fn pages(&self) -> i32 {
        self.metrics.pages_parsed.unwrap_or(0)
    }

    pub fn words(&self) -> i32 {
        self.metrics.word_count.unwrap_or(0)
    }

    pub fn tables(&self) -> i32 {
        self.metrics.table_count.unwrap_or(0)
    }
}
