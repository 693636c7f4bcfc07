//! Database context: one entry point that hands out repositories.

use std::path::Path;

use diesel_async::SimpleAsyncConnection;

use super::dead_letters::DeadLetterRepository;
use super::documents::DocumentRepository;
use super::ocr_runs::OcrRunRepository;
use super::pages::PageRepository;
use super::pool::{DieselError, SqlitePool};
use crate::registry::OcrRunRegistry;

/// Owns the connection factory and hands out repositories.
///
/// Create one per process or command and clone it into each unit of work;
/// clones share nothing but the database URL.
///
/// # Example
/// ```ignore
/// let ctx = DbContext::from_url("sqlite:data/ocrvault.db");
/// ctx.init_schema().await?;
/// let doc = ctx.documents().get_by_hash(&hash).await?;
/// ```
#[derive(Debug, Clone)]
pub struct DbContext {
    pool: SqlitePool,
}

impl DbContext {
    pub fn from_url(database_url: &str) -> Self {
        Self {
            pool: SqlitePool::new(database_url),
        }
    }

    pub fn from_path(db_path: &Path) -> Self {
        Self {
            pool: SqlitePool::from_path(db_path),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn documents(&self) -> DocumentRepository {
        DocumentRepository::new(self.pool.clone())
    }

    pub fn ocr_runs(&self) -> OcrRunRepository {
        OcrRunRepository::new(self.pool.clone())
    }

    pub fn pages(&self) -> PageRepository {
        PageRepository::new(self.pool.clone())
    }

    pub fn dead_letters(&self) -> DeadLetterRepository {
        DeadLetterRepository::new(self.pool.clone())
    }

    /// Read-only query surface over OCR runs.
    pub fn registry(&self) -> OcrRunRegistry {
        OcrRunRegistry::new(self.pool.clone())
    }

    /// Create tables and indexes if they don't exist.
    pub async fn init_schema(&self) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute(
            r#"
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL UNIQUE,
                filename TEXT NOT NULL,
                content_type TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                storage_path TEXT NOT NULL,
                page_count INTEGER,
                extracted_text TEXT,
                ocr_engine TEXT,
                ocr_confidence REAL,
                pages_parsed INTEGER,
                word_count INTEGER,
                processing_status TEXT NOT NULL DEFAULT 'pending',
                processing_error TEXT,
                processed_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ocr_runs (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                ocr_engine TEXT NOT NULL,
                engine_version TEXT,
                ocr_config TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'pending',
                error_code TEXT,
                error_message TEXT,
                confidence_mean REAL,
                pages_parsed INTEGER,
                word_count INTEGER,
                table_count INTEGER,
                latency_ms INTEGER,
                cost_cents INTEGER,
                raw_response_path TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS document_pages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id TEXT NOT NULL,
                ocr_run_id TEXT NOT NULL,
                page_number INTEGER NOT NULL,
                text_content TEXT NOT NULL,
                word_count INTEGER NOT NULL DEFAULT 0,
                confidence_score REAL,
                created_at TEXT NOT NULL,
                UNIQUE(ocr_run_id, page_number),
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE,
                FOREIGN KEY (ocr_run_id) REFERENCES ocr_runs(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS dead_letters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                operation TEXT NOT NULL,
                correlation_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                error TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_ocr_runs_document ON ocr_runs(document_id, status);
            CREATE INDEX IF NOT EXISTS idx_ocr_runs_created ON ocr_runs(created_at);
            CREATE INDEX IF NOT EXISTS idx_ocr_runs_engine ON ocr_runs(ocr_engine, created_at);
            CREATE INDEX IF NOT EXISTS idx_document_pages_run ON document_pages(ocr_run_id, page_number);
            CREATE INDEX IF NOT EXISTS idx_dead_letters_created ON dead_letters(created_at);
            "#,
        )
        .await
    }
}
