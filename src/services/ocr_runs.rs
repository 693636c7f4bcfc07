//! OCR run lifecycle.
//!
//! [`OcrRunRecorder`] is the only writer of run records. It turns a rejected
//! status guard into an `InvalidState` error so callers never silently lose a
//! transition.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::correlation::CorrelationId;
use crate::error::{AppError, ErrorKind};
use crate::models::{OcrRun, PageText, ProcessingStatus, RunMetrics};
use crate::reporter::ErrorReporter;
use crate::repository::{DbContext, NewRun, OcrRunRepository};
use crate::storage::OcrResponseStore;

/// What an engine hands back for one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineOutput {
    pub pages: Vec<PageText>,
    /// Provider response, stored compressed for later text extraction.
    pub raw_response: Option<Value>,
    pub latency_ms: Option<i64>,
    pub cost_cents: Option<i32>,
    pub table_count: Option<i32>,
}

/// Derive run metrics from page results.
pub fn calculate_metrics(
    pages: &[PageText],
    latency_ms: Option<i64>,
    cost_cents: Option<i32>,
) -> RunMetrics {
    let confidences: Vec<f64> = pages
        .iter()
        .filter_map(|p| p.confidence)
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 100.0))
        .collect();
    let confidence_mean = if confidences.is_empty() {
        None
    } else {
        Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
    };

    let pages_parsed = pages.iter().filter(|p| !p.text.trim().is_empty()).count();
    let word_count: i64 = pages.iter().map(|p| i64::from(p.word_count().max(0))).sum();

    RunMetrics {
        confidence_mean,
        pages_parsed: Some(i32::try_from(pages_parsed).unwrap_or(i32::MAX)),
        word_count: Some(i32::try_from(word_count).unwrap_or(i32::MAX)),
        table_count: None,
        latency_ms: latency_ms.map(|l| l.max(0)),
        cost_cents: cost_cents.map(|c| c.max(0)),
    }
}

#[derive(Debug, Clone)]
pub struct OcrRunRecorder {
    runs: OcrRunRepository,
    responses: OcrResponseStore,
    reporter: ErrorReporter,
}

impl OcrRunRecorder {
    pub fn new(db: &DbContext, responses: OcrResponseStore, reporter: ErrorReporter) -> Self {
        Self {
            runs: db.ocr_runs(),
            responses,
            reporter,
        }
    }

    pub async fn create(&self, new: &NewRun, cid: &CorrelationId) -> Result<OcrRun, AppError> {
        let run = self.runs.create(new).await.map_err(|e| {
            AppError::database("create OCR run", e)
                .with_context("document_id", new.document_id.as_str())
                .with_correlation(cid)
        })?;
        debug!(correlation_id = %cid, run_id = %run.id, engine = %run.engine, "Created OCR run");
        Ok(run)
    }

    /// `pending -> processing`.
    pub async fn start(&self, run_id: &str, cid: &CorrelationId) -> Result<(), AppError> {
        let moved = self
            .runs
            .mark_processing(run_id)
            .await
            .map_err(|e| AppError::database("start OCR run", e).with_correlation(cid))?;
        if !moved {
            return Err(self.rejected(run_id, ProcessingStatus::Processing, cid).await);
        }
        Ok(())
    }

    /// Record a successful engine result.
    ///
    /// The raw response is stored first and best effort: if storage fails the
    /// failure is reported and the run completes without a response path.
    pub async fn complete(
        &self,
        run_id: &str,
        output: &EngineOutput,
        cid: &CorrelationId,
    ) -> Result<OcrRun, AppError> {
        let raw_response_path = match &output.raw_response {
            Some(response) => match self.responses.store(run_id, response).await {
                Ok(key) => Some(key),
                Err(e) => {
                    let err = e.with_context("run_id", run_id).with_correlation(cid);
                    self.reporter.report(&err, cid).await;
                    None
                }
            },
            None => None,
        };

        let mut metrics = calculate_metrics(&output.pages, output.latency_ms, output.cost_cents);
        metrics.table_count = output.table_count.map(|t| t.max(0));

        let completed = self
            .runs
            .complete(run_id, &metrics, raw_response_path.as_deref(), &output.pages)
            .await;

        match completed {
            Ok(true) => {}
            Ok(false) => {
                self.discard_response(raw_response_path.as_deref(), cid).await;
                return Err(self.rejected(run_id, ProcessingStatus::Completed, cid).await);
            }
            Err(e) => {
                self.discard_response(raw_response_path.as_deref(), cid).await;
                return Err(AppError::database("complete OCR run", e)
                    .with_context("run_id", run_id)
                    .with_correlation(cid));
            }
        }

        let run = self.load(run_id, cid).await?;
        info!(
            correlation_id = %cid,
            run_id,
            engine = %run.engine,
            pages = metrics.pages_parsed.unwrap_or(0),
            words = metrics.word_count.unwrap_or(0),
            confidence = metrics.confidence_mean.unwrap_or(0.0),
            "OCR run completed"
        );
        Ok(run)
    }

    pub async fn fail(
        &self,
        run_id: &str,
        error_code: &str,
        message: &str,
        cid: &CorrelationId,
    ) -> Result<(), AppError> {
        let failed = self
            .runs
            .fail(run_id, error_code, message)
            .await
            .map_err(|e| AppError::database("fail OCR run", e).with_correlation(cid))?;
        if !failed {
            return Err(self.rejected(run_id, ProcessingStatus::Failed, cid).await);
        }
        info!(correlation_id = %cid, run_id, error_code, "OCR run failed");
        Ok(())
    }

    /// Remove a stored response whose run was never completed.
    async fn discard_response(&self, key: Option<&str>, cid: &CorrelationId) {
        if let Some(key) = key {
            if let Err(e) = self.responses.delete(key).await {
                warn!(correlation_id = %cid, key = %key, "Failed to remove orphaned response: {}", e);
            }
        }
    }

    async fn load(&self, run_id: &str, cid: &CorrelationId) -> Result<OcrRun, AppError> {
        self.runs
            .get(run_id)
            .await
            .map_err(|e| AppError::database("load OCR run", e).with_correlation(cid))?
            .ok_or_else(|| AppError::not_found("ocr run", run_id).with_correlation(cid))
    }

    /// Explain why a guarded transition touched no rows.
    async fn rejected(&self, run_id: &str, target: ProcessingStatus, cid: &CorrelationId) -> AppError {
        match self.load(run_id, cid).await {
            Ok(run) => AppError::new(
                ErrorKind::InvalidState,
                format!(
                    "OCR run cannot move from {} to {}",
                    run.status.as_str(),
                    target.as_str()
                ),
            )
            .with_context("run_id", run_id)
            .with_context("current_status", run.status.as_str())
            .with_context("target_status", target.as_str())
            .with_correlation(cid),
            Err(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;
    use crate::reporter::MemorySink;
    use crate::storage::{BlobStorage, LocalBlobStore};
    use diesel_async::SimpleAsyncConnection;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        db: DbContext,
        recorder: OcrRunRecorder,
        sink: MemorySink,
        document_id: String,
        _dir: TempDir,
    }

    async fn fixture_with_store(store_root: Option<std::path::PathBuf>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = DbContext::from_path(&dir.path().join("test.db"));
        db.init_schema().await.unwrap();

        let doc = Document::new(
            "f00d".to_string(),
            "memo.pdf".to_string(),
            "application/pdf".to_string(),
            42,
            "documents/f0/0d/f00d/memo.pdf".to_string(),
        );
        db.documents().insert(&doc).await.unwrap();

        let root = store_root.unwrap_or_else(|| dir.path().join("blobs"));
        let responses = OcrResponseStore::new(BlobStorage::Local(LocalBlobStore::new(root)));
        let sink = MemorySink::new();
        let reporter = ErrorReporter::new().with_sink(Arc::new(sink.clone()));

        Fixture {
            recorder: OcrRunRecorder::new(&db, responses, reporter),
            db,
            sink,
            document_id: doc.id,
            _dir: dir,
        }
    }

    fn output() -> EngineOutput {
        EngineOutput {
            pages: vec![
                PageText::new(1, "Quarterly results are in").with_confidence(90.0),
                PageText::new(2, "Revenue grew").with_confidence(80.0),
            ],
            raw_response: Some(json!({"pages": [
                {"text": "Quarterly results are in"},
                {"text": "Revenue grew"}
            ]})),
            latency_ms: Some(1200),
            cost_cents: Some(3),
            table_count: Some(1),
        }
    }

    #[test]
    fn test_calculate_metrics() {
        let pages = vec![
            PageText::new(1, "one two three").with_confidence(120.0),
            PageText::new(2, "   "),
            PageText::new(3, "four").with_confidence(50.0),
        ];
        let metrics = calculate_metrics(&pages, Some(-5), Some(7));
        assert_eq!(metrics.confidence_mean, Some(75.0));
        assert_eq!(metrics.pages_parsed, Some(2));
        assert_eq!(metrics.word_count, Some(4));
        assert_eq!(metrics.latency_ms, Some(0));
        assert_eq!(metrics.cost_cents, Some(7));

        let empty = calculate_metrics(&[], None, None);
        assert_eq!(empty.confidence_mean, None);
        assert_eq!(empty.pages_parsed, Some(0));
        assert_eq!(empty.word_count, Some(0));
    }

    #[tokio::test]
    async fn test_complete_stores_response_and_pages() {
        let fx = fixture_with_store(None).await;
        let cid = CorrelationId::new();

        let run = fx
            .recorder
            .create(&NewRun::new(&fx.document_id, "azure"), &cid)
            .await
            .unwrap();
        fx.recorder.start(&run.id, &cid).await.unwrap();
        let done = fx.recorder.complete(&run.id, &output(), &cid).await.unwrap();

        assert_eq!(done.status, ProcessingStatus::Completed);
        assert_eq!(done.metrics.confidence_mean, Some(85.0));
        assert_eq!(done.metrics.word_count, Some(6));
        assert_eq!(done.metrics.table_count, Some(1));
        let key = done.raw_response_path.unwrap();
        assert!(key.starts_with(&format!("ocr-runs/{}/", run.id)));
        assert_eq!(fx.db.pages().count_for_run(&run.id).await.unwrap(), 2);
        assert!(fx.sink.is_empty());
    }

    #[tokio::test]
    async fn test_illegal_transitions_are_invalid_state() {
        let fx = fixture_with_store(None).await;
        let cid = CorrelationId::new();

        let run = fx
            .recorder
            .create(&NewRun::new(&fx.document_id, "tesseract"), &cid)
            .await
            .unwrap();
        fx.recorder.fail(&run.id, "EngineTimeoutError", "timed out", &cid).await.unwrap();

        let err = fx.recorder.start(&run.id, &cid).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(!err.is_retryable());
        assert_eq!(err.context()["current_status"], "failed");

        let err = fx.recorder.complete(&run.id, &output(), &cid).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        let err = fx.recorder.start("no-such-run", &cid).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_response_storage_failure_is_best_effort() {
        let blocker = TempDir::new().unwrap();
        let file_root = blocker.path().join("not-a-dir");
        std::fs::write(&file_root, b"x").unwrap();

        let fx = fixture_with_store(Some(file_root)).await;
        let cid = CorrelationId::new();
        let run = fx
            .recorder
            .create(&NewRun::new(&fx.document_id, "google"), &cid)
            .await
            .unwrap();
        fx.recorder.start(&run.id, &cid).await.unwrap();

        let done = fx.recorder.complete(&run.id, &output(), &cid).await.unwrap();
        assert_eq!(done.status, ProcessingStatus::Completed);
        assert!(done.raw_response_path.is_none());

        let reported = fx.sink.payloads();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].error.error_class, "StorageError");
        assert_eq!(reported[0].error.context["run_id"], run.id.as_str());
    }

    #[tokio::test]
    async fn test_database_failure_on_complete_removes_stored_response() {
        let fx = fixture_with_store(None).await;
        let cid = CorrelationId::new();
        let run = fx
            .recorder
            .create(&NewRun::new(&fx.document_id, "azure"), &cid)
            .await
            .unwrap();
        fx.recorder.start(&run.id, &cid).await.unwrap();

        let mut conn = fx.db.pool().get().await.unwrap();
        conn.batch_execute("DROP TABLE document_pages").await.unwrap();

        let err = fx.recorder.complete(&run.id, &output(), &cid).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Database);
        assert_eq!(err.context()["run_id"], run.id.as_str());

        let run_dir = fx._dir.path().join("blobs").join("ocr-runs").join(&run.id);
        let leftover = std::fs::read_dir(&run_dir)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftover, 0);

        let still = fx.db.ocr_runs().get(&run.id).await.unwrap().unwrap();
        assert_eq!(still.status, ProcessingStatus::Processing);
        assert!(still.raw_response_path.is_none());
    }
}
