//! Diesel row types and their conversions to domain models.

use diesel::prelude::*;

use super::{parse_datetime, parse_datetime_opt};
use crate::models::{DeadLetter, Document, DocumentPage, OcrRun, ProcessingStatus, RunMetrics};
use crate::schema;

/// Document row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::documents)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DocumentRecord {
    pub id: String,
    pub content_hash: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub storage_path: String,
    pub page_count: Option<i32>,
    pub extracted_text: Option<String>,
    pub ocr_engine: Option<String>,
    pub ocr_confidence: Option<f64>,
    pub pages_parsed: Option<i32>,
    pub word_count: Option<i32>,
    pub processing_status: String,
    pub processing_error: Option<String>,
    pub processed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// New document for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::documents)]
pub struct NewDocument<'a> {
    pub id: &'a str,
    pub content_hash: &'a str,
    pub filename: &'a str,
    pub content_type: &'a str,
    pub size_bytes: i64,
    pub storage_path: &'a str,
    pub page_count: Option<i32>,
    pub extracted_text: Option<&'a str>,
    pub processing_status: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

impl From<DocumentRecord> for Document {
    fn from(r: DocumentRecord) -> Self {
        Document {
            id: r.id,
            content_hash: r.content_hash,
            filename: r.filename,
            content_type: r.content_type,
            size_bytes: r.size_bytes,
            storage_path: r.storage_path,
            page_count: r.page_count,
            extracted_text: r.extracted_text,
            ocr_engine: r.ocr_engine,
            ocr_confidence: r.ocr_confidence,
            pages_parsed: r.pages_parsed,
            word_count: r.word_count,
            status: ProcessingStatus::from_str(&r.processing_status)
                .unwrap_or(ProcessingStatus::Pending),
            processing_error: r.processing_error,
            processed_at: parse_datetime_opt(r.processed_at),
            created_at: parse_datetime(&r.created_at),
            updated_at: parse_datetime(&r.updated_at),
        }
    }
}

/// OCR run row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::ocr_runs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct OcrRunRecord {
    pub id: String,
    pub document_id: String,
    pub ocr_engine: String,
    pub engine_version: Option<String>,
    pub ocr_config: String,
    pub status: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub confidence_mean: Option<f64>,
    pub pages_parsed: Option<i32>,
    pub word_count: Option<i32>,
    pub table_count: Option<i32>,
    pub latency_ms: Option<i64>,
    pub cost_cents: Option<i32>,
    pub raw_response_path: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

/// New OCR run for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::ocr_runs)]
pub struct NewOcrRun<'a> {
    pub id: &'a str,
    pub document_id: &'a str,
    pub ocr_engine: &'a str,
    pub engine_version: Option<&'a str>,
    pub ocr_config: &'a str,
    pub status: &'a str,
    pub created_at: &'a str,
}

impl From<OcrRunRecord> for OcrRun {
    fn from(r: OcrRunRecord) -> Self {
        OcrRun {
            id: r.id,
            document_id: r.document_id,
            engine: r.ocr_engine,
            engine_version: r.engine_version,
            config: serde_json::from_str(&r.ocr_config)
                .unwrap_or_else(|_| serde_json::Value::Object(Default::default())),
            status: ProcessingStatus::from_str(&r.status).unwrap_or(ProcessingStatus::Pending),
            error_code: r.error_code,
            error_message: r.error_message,
            metrics: RunMetrics {
                confidence_mean: r.confidence_mean,
                pages_parsed: r.pages_parsed,
                word_count: r.word_count,
                table_count: r.table_count,
                latency_ms: r.latency_ms,
                cost_cents: r.cost_cents,
            },
            raw_response_path: r.raw_response_path,
            created_at: parse_datetime(&r.created_at),
            started_at: parse_datetime_opt(r.started_at),
            completed_at: parse_datetime_opt(r.completed_at),
        }
    }
}

/// Document page row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::document_pages)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DocumentPageRecord {
    pub id: i32,
    pub document_id: String,
    pub ocr_run_id: String,
    pub page_number: i32,
    pub text_content: String,
    pub word_count: i32,
    pub confidence_score: Option<f64>,
    pub created_at: String,
}

/// New document page for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::document_pages)]
pub struct NewDocumentPage<'a> {
    pub document_id: &'a str,
    pub ocr_run_id: &'a str,
    pub page_number: i32,
    pub text_content: &'a str,
    pub word_count: i32,
    pub confidence_score: Option<f64>,
    pub created_at: &'a str,
}

impl From<DocumentPageRecord> for DocumentPage {
    fn from(r: DocumentPageRecord) -> Self {
        DocumentPage {
            id: r.id,
            document_id: r.document_id,
            ocr_run_id: r.ocr_run_id,
            page_number: r.page_number,
            text_content: r.text_content,
            word_count: r.word_count,
            confidence_score: r.confidence_score,
            created_at: parse_datetime(&r.created_at),
        }
    }
}

/// Dead-letter row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::dead_letters)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DeadLetterRecord {
    pub id: i32,
    pub operation: String,
    pub correlation_id: String,
    pub payload: String,
    pub error: String,
    pub created_at: String,
}

/// New dead letter for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::dead_letters)]
pub struct NewDeadLetter<'a> {
    pub operation: &'a str,
    pub correlation_id: &'a str,
    pub payload: &'a str,
    pub error: &'a str,
    pub created_at: &'a str,
}

impl From<DeadLetterRecord> for DeadLetter {
    fn from(r: DeadLetterRecord) -> Self {
        let parse = |s: &str| {
            serde_json::from_str(s).unwrap_or_else(|_| serde_json::Value::String(s.to_string()))
        };
        DeadLetter {
            id: r.id,
            operation: r.operation,
            correlation_id: r.correlation_id,
            payload: parse(&r.payload),
            error: parse(&r.error),
            created_at: parse_datetime(&r.created_at),
        }
    }
}

/// Result of `SELECT last_insert_rowid()`.
#[derive(QueryableByName, Debug)]
pub struct LastInsertRowId {
    #[diesel(sql_type = diesel::sql_types::BigInt, column_name = "last_insert_rowid()")]
    pub id: i64,
}
