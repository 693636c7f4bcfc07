use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Text of one page as produced by one OCR run. Never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentPage {
    pub id: i32,
    pub document_id: String,
    pub ocr_run_id: String,
    pub page_number: i32,
    pub text_content: String,
    pub word_count: i32,
    pub confidence_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Page text reported by an engine, before it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    pub page_number: i32,
    pub text: String,
    pub confidence: Option<f64>,
}

impl PageText {
    pub fn new(page_number: i32, text: impl Into<String>) -> Self {
        Self {
            page_number,
            text: text.into(),
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn word_count(&self) -> i32 {
        count_words(&self.text)
    }
}

pub fn count_words(text: &str) -> i32 {
    i32::try_from(text.split_whitespace().count()).unwrap_or(i32::MAX)
}
