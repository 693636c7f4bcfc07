//! Write side of OCR run records.
//!
//! Every status change is an UPDATE guarded by the states allowed to precede
//! it, so a run reaches `completed` or `failed` at most once even when two
//! workers race.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::format_timestamp;
use super::models::{NewDocumentPage, NewOcrRun, OcrRunRecord};
use super::pool::{DieselError, SqlitePool};
use crate::models::{OcrRun, PageText, ProcessingStatus, RunMetrics};
use crate::schema::{document_pages, ocr_runs};

/// Parameters for a new engine attempt.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub document_id: String,
    pub engine: String,
    pub engine_version: Option<String>,
    pub config: serde_json::Value,
}

impl NewRun {
    pub fn new(document_id: impl Into<String>, engine: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            engine: engine.into(),
            engine_version: None,
            config: serde_json::json!({}),
        }
    }
}

/// States from which `target` may be entered.
fn predecessors(target: ProcessingStatus) -> Vec<&'static str> {
    [
        ProcessingStatus::Pending,
        ProcessingStatus::Processing,
        ProcessingStatus::Completed,
        ProcessingStatus::Failed,
    ]
    .into_iter()
    .filter(|s| s.can_transition_to(target))
    .map(|s| s.as_str())
    .collect()
}

#[derive(Debug, Clone)]
pub struct OcrRunRepository {
    pool: SqlitePool,
}

impl OcrRunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a `pending` run.
    pub async fn create(&self, new: &NewRun) -> Result<OcrRun, DieselError> {
        let mut conn = self.pool.get().await?;

        let id = uuid::Uuid::new_v4().to_string();
        let created_at = format_timestamp(Utc::now());
        let config = new.config.to_string();
        diesel::insert_into(ocr_runs::table)
            .values(NewOcrRun {
                id: &id,
                document_id: &new.document_id,
                ocr_engine: &new.engine,
                engine_version: new.engine_version.as_deref(),
                ocr_config: &config,
                status: ProcessingStatus::Pending.as_str(),
                created_at: &created_at,
            })
            .execute(&mut conn)
            .await?;

        let record: OcrRunRecord = ocr_runs::table
            .find(&id)
            .select(OcrRunRecord::as_select())
            .first(&mut conn)
            .await?;
        Ok(record.into())
    }

    pub async fn get(&self, id: &str) -> Result<Option<OcrRun>, DieselError> {
        let mut conn = self.pool.get().await?;

        ocr_runs::table
            .find(id)
            .select(OcrRunRecord::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map(|r| r.map(OcrRun::from))
    }

    /// `pending -> processing`. Returns false if the guard rejected it.
    pub async fn mark_processing(&self, id: &str) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().await?;
        let now = format_timestamp(Utc::now());

        let rows = diesel::update(
            ocr_runs::table
                .filter(ocr_runs::id.eq(id))
                .filter(ocr_runs::status.eq_any(predecessors(ProcessingStatus::Processing))),
        )
        .set((
            ocr_runs::status.eq(ProcessingStatus::Processing.as_str()),
            ocr_runs::started_at.eq(Some(&now)),
        ))
        .execute(&mut conn)
        .await?;
        Ok(rows > 0)
    }

    /// Record metrics and pages and move the run to `completed`.
    ///
    /// Status, metrics and pages land in one transaction. Returns false
    /// (writing nothing) if the run is missing or already terminal.
    pub async fn complete(
        &self,
        id: &str,
        metrics: &RunMetrics,
        raw_response_path: Option<&str>,
        pages: &[PageText],
    ) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().await?;
        let now = format_timestamp(Utc::now());

        conn.transaction(|conn| {
            Box::pin(async move {
                let rows = diesel::update(
                    ocr_runs::table
                        .filter(ocr_runs::id.eq(id))
                        .filter(ocr_runs::status.eq_any(predecessors(ProcessingStatus::Completed))),
                )
                .set((
                    ocr_runs::status.eq(ProcessingStatus::Completed.as_str()),
                    ocr_runs::confidence_mean.eq(metrics.confidence_mean),
                    ocr_runs::pages_parsed.eq(metrics.pages_parsed),
                    ocr_runs::word_count.eq(metrics.word_count),
                    ocr_runs::table_count.eq(metrics.table_count),
                    ocr_runs::latency_ms.eq(metrics.latency_ms),
                    ocr_runs::cost_cents.eq(metrics.cost_cents),
                    ocr_runs::raw_response_path.eq(raw_response_path),
                    ocr_runs::completed_at.eq(Some(&now)),
                ))
                .execute(conn)
                .await?;

                if rows == 0 {
                    return Ok(false);
                }

                if !pages.is_empty() {
                    let document_id: String = ocr_runs::table
                        .find(id)
                        .select(ocr_runs::document_id)
                        .first(conn)
                        .await?;

                    // Batch inserts need DEFAULT support, which SQLite lacks.
                    for p in pages {
                        let new_page = NewDocumentPage {
                            document_id: &document_id,
                            ocr_run_id: id,
                            page_number: p.page_number,
                            text_content: &p.text,
                            word_count: p.word_count(),
                            confidence_score: p.confidence,
                            created_at: &now,
                        };
                        diesel::insert_into(document_pages::table)
                            .values(&new_page)
                            .execute(conn)
                            .await?;
                    }
                }

                Ok(true)
            })
        })
        .await
    }

    /// Move the run to `failed`. Returns false if it was missing or terminal.
    pub async fn fail(&self, id: &str, error_code: &str, message: &str) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().await?;
        let now = format_timestamp(Utc::now());

        let rows = diesel::update(
            ocr_runs::table
                .filter(ocr_runs::id.eq(id))
                .filter(ocr_runs::status.eq_any(predecessors(ProcessingStatus::Failed))),
        )
        .set((
            ocr_runs::status.eq(ProcessingStatus::Failed.as_str()),
            ocr_runs::error_code.eq(Some(error_code)),
            ocr_runs::error_message.eq(Some(message)),
            ocr_runs::completed_at.eq(Some(&now)),
        ))
        .execute(&mut conn)
        .await?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;
    use crate::repository::DbContext;
    use tempfile::TempDir;

    async fn setup_test_db() -> (DbContext, String, TempDir) {
        let dir = TempDir::new().unwrap();
        let ctx = DbContext::from_path(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        let doc = Document::new(
            "hash-1".to_string(),
            "a.pdf".to_string(),
            "application/pdf".to_string(),
            10,
            "documents/ha/sh/hash-1/a.pdf".to_string(),
        );
        ctx.documents().insert(&doc).await.unwrap();
        (ctx, doc.id, dir)
    }

    #[test]
    fn test_predecessors() {
        assert_eq!(predecessors(ProcessingStatus::Processing), vec!["pending"]);
        assert_eq!(
            predecessors(ProcessingStatus::Completed),
            vec!["processing"]
        );
        assert_eq!(
            predecessors(ProcessingStatus::Failed),
            vec!["pending", "processing"]
        );
        assert!(predecessors(ProcessingStatus::Pending).is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_is_terminal() {
        let (ctx, doc_id, _dir) = setup_test_db().await;
        let repo = ctx.ocr_runs();

        let run = repo.create(&NewRun::new(&doc_id, "tesseract")).await.unwrap();
        assert_eq!(run.status, ProcessingStatus::Pending);

        assert!(repo.mark_processing(&run.id).await.unwrap());
        assert!(!repo.mark_processing(&run.id).await.unwrap());

        let metrics = RunMetrics {
            confidence_mean: Some(88.0),
            pages_parsed: Some(2),
            word_count: Some(4),
            ..Default::default()
        };
        let pages = vec![PageText::new(1, "hello there"), PageText::new(2, "general kenobi")];
        assert!(repo.complete(&run.id, &metrics, None, &pages).await.unwrap());

        // No way out of a terminal state.
        assert!(!repo.complete(&run.id, &metrics, None, &pages).await.unwrap());
        assert!(!repo.fail(&run.id, "late", "too late").await.unwrap());

        let stored = repo.get(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Completed);
        assert_eq!(stored.metrics, metrics);
        assert!(stored.started_at.is_some());
        assert!(stored.completed_at.is_some());

        let stored_pages = ctx.pages().for_run(&run.id).await.unwrap();
        assert_eq!(stored_pages.len(), 2);
        assert_eq!(stored_pages[1].word_count, 2);
    }

    #[tokio::test]
    async fn test_complete_requires_processing() {
        let (ctx, doc_id, _dir) = setup_test_db().await;
        let repo = ctx.ocr_runs();

        let run = repo.create(&NewRun::new(&doc_id, "azure")).await.unwrap();
        let pages = vec![PageText::new(1, "skipped ahead")];
        assert!(!repo.complete(&run.id, &RunMetrics::default(), None, &pages).await.unwrap());

        let stored = repo.get(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Pending);
        assert!(stored.completed_at.is_none());
        assert_eq!(ctx.pages().count_for_run(&run.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fail_records_error() {
        let (ctx, doc_id, _dir) = setup_test_db().await;
        let repo = ctx.ocr_runs();

        let run = repo.create(&NewRun::new(&doc_id, "google")).await.unwrap();
        assert!(repo.fail(&run.id, "QuotaExceededError", "quota hit").await.unwrap());

        let stored = repo.get(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Failed);
        assert_eq!(stored.error_code.as_deref(), Some("QuotaExceededError"));
        assert!(!repo.mark_processing(&run.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_runs_cascade_with_document() {
        let (ctx, doc_id, _dir) = setup_test_db().await;
        let repo = ctx.ocr_runs();
        let run = repo.create(&NewRun::new(&doc_id, "mistral")).await.unwrap();
        repo.mark_processing(&run.id).await.unwrap();
        repo.complete(&run.id, &RunMetrics::default(), None, &[PageText::new(1, "x")])
            .await
            .unwrap();

        assert!(ctx.documents().delete(&doc_id).await.unwrap());
        assert!(repo.get(&run.id).await.unwrap().is_none());
        assert!(ctx.pages().for_run(&run.id).await.unwrap().is_empty());
    }
}
