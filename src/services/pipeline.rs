//! OCR pipeline units of work.
//!
//! Engines are opaque producers behind [`OcrEngine`]. One [`OcrAttempt`]
//! records one engine pass over one document as its own run; a retry is a
//! new run, so the registry keeps every attempt. [`SelectCanonical`] is
//! queued separately once the caller decides enough runs exist.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::ocr_runs::{EngineOutput, OcrRunRecorder};
use crate::correlation::CorrelationId;
use crate::error::{AppError, ErrorKind, ErrorSeverity};
use crate::models::{OcrRun, ProcessingStatus};
use crate::repository::{DbContext, NewRun};
use crate::selection::{SelectionCriteria, SelectionEngine, SelectionReport};
use crate::storage::{download_verified, BlobStorage};
use crate::work::UnitOfWork;

/// Upper bound on one `recognize` call.
pub const DEFAULT_ENGINE_TIMEOUT: Duration = Duration::from_secs(300);

/// An OCR provider.
#[async_trait]
pub trait OcrEngine: Send + Sync + fmt::Debug {
    /// Engine name recorded on runs.
    fn name(&self) -> &str;

    fn version(&self) -> Option<&str> {
        None
    }

    async fn recognize(&self, bytes: &[u8], content_type: &str) -> Result<EngineOutput, AppError>;
}

/// Run one engine over one stored document.
#[derive(Debug, Clone)]
pub struct OcrAttempt {
    db: DbContext,
    storage: BlobStorage,
    recorder: OcrRunRecorder,
    engine: Arc<dyn OcrEngine>,
    document_id: String,
    config: Value,
    timeout: Duration,
}

impl OcrAttempt {
    pub fn new(
        db: DbContext,
        storage: BlobStorage,
        recorder: OcrRunRecorder,
        engine: Arc<dyn OcrEngine>,
        document_id: impl Into<String>,
    ) -> Self {
        Self {
            db,
            storage,
            recorder,
            engine,
            document_id: document_id.into(),
            config: json!({}),
            timeout: DEFAULT_ENGINE_TIMEOUT,
        }
    }

    /// Engine settings recorded on the run.
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn recognize(&self, run: &OcrRun, cid: &CorrelationId) -> Result<EngineOutput, AppError> {
        let document = self
            .db
            .documents()
            .get(&self.document_id)
            .await
            .map_err(|e| AppError::database("load document", e))?
            .ok_or_else(|| AppError::not_found("document", &self.document_id))?;

        // A document whose source blob is gone can never be processed.
        let blob = download_verified(&self.storage, &document.storage_path, &document.content_hash)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::BlobNotFound => e
                    .with_severity(ErrorSeverity::Error)
                    .with_context("document_id", self.document_id.as_str()),
                _ => e,
            })?;

        let start = Instant::now();
        let mut output = tokio::time::timeout(
            self.timeout,
            self.engine.recognize(&blob.bytes, &document.content_type),
        )
        .await
        .map_err(|_| {
            AppError::new(
                ErrorKind::EngineTimeout,
                format!("{} did not answer within {:?}", self.engine.name(), self.timeout),
            )
            .with_context("timeout_ms", self.timeout.as_millis() as u64)
        })??;

        if output.latency_ms.is_none() {
            output.latency_ms = Some(start.elapsed().as_millis() as i64);
        }
        debug!(
            correlation_id = %cid,
            run_id = %run.id,
            engine = self.engine.name(),
            pages = output.pages.len(),
            "Engine returned"
        );
        Ok(output)
    }
}

#[async_trait]
impl UnitOfWork for OcrAttempt {
    type Output = OcrRun;

    fn name(&self) -> &str {
        "ocr_attempt"
    }

    fn payload(&self) -> Value {
        json!({
            "document_id": self.document_id,
            "engine": self.engine.name(),
            "engine_version": self.engine.version(),
            "config": self.config,
        })
    }

    async fn run(&self, cid: &CorrelationId) -> Result<OcrRun, AppError> {
        let new_run = NewRun {
            document_id: self.document_id.clone(),
            engine: self.engine.name().to_string(),
            engine_version: self.engine.version().map(str::to_string),
            config: self.config.clone(),
        };
        let run = self.recorder.create(&new_run, cid).await?;

        let attempt = async {
            self.recorder.start(&run.id, cid).await?;
            let output = self.recognize(&run, cid).await?;
            self.recorder.complete(&run.id, &output, cid).await
        };

        // Once a run exists, every failure ends it as failed.
        match attempt.await {
            Ok(run) => Ok(run),
            Err(err) => {
                let err = err
                    .with_context("run_id", run.id.as_str())
                    .with_context("engine", self.engine.name())
                    .with_correlation(cid);
                if let Err(e) = self
                    .recorder
                    .fail(&run.id, err.kind().as_str(), err.message(), cid)
                    .await
                {
                    warn!(correlation_id = %cid, run_id = %run.id, "Could not mark run failed: {}", e);
                }
                Err(err)
            }
        }
    }

    async fn on_abandon(&self, err: &AppError, cid: &CorrelationId) {
        let documents = self.db.documents();
        // Only a document nothing has succeeded on yet is marked failed.
        match documents.get(&self.document_id).await {
            Ok(Some(doc)) if !doc.has_canonical_result() => {
                let message = format!("{}: {}", self.engine.name(), err.user_facing().message);
                if let Err(e) = documents
                    .update_status(&self.document_id, ProcessingStatus::Failed, Some(&message))
                    .await
                {
                    warn!(correlation_id = %cid, document_id = %self.document_id, "Could not mark document failed: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(correlation_id = %cid, document_id = %self.document_id, "Could not load document: {}", e);
            }
        }
    }
}

/// Apply the best run to a document.
#[derive(Debug, Clone)]
pub struct SelectCanonical {
    engine: SelectionEngine,
    document_id: String,
    criteria: SelectionCriteria,
}

impl SelectCanonical {
    pub fn new(engine: SelectionEngine, document_id: impl Into<String>) -> Self {
        Self {
            engine,
            document_id: document_id.into(),
            criteria: SelectionCriteria::default(),
        }
    }

    pub fn with_criteria(mut self, criteria: SelectionCriteria) -> Self {
        self.criteria = criteria;
        self
    }
}

#[async_trait]
impl UnitOfWork for SelectCanonical {
    type Output = Option<SelectionReport>;

    fn name(&self) -> &str {
        "select_canonical"
    }

    fn payload(&self) -> Value {
        json!({
            "document_id": self.document_id,
            "criteria": self.criteria.as_str(),
        })
    }

    async fn run(&self, cid: &CorrelationId) -> Result<Option<SelectionReport>, AppError> {
        self.engine
            .select_canonical(&self.document_id, self.criteria, cid)
            .await
    }
}
