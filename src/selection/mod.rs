//! Canonical-result selection.
//!
//! [`SelectionEngine`] reads a document's completed runs through the
//! registry, applies the best-run policy and writes the winner back onto the
//! document. Selection is explicit and idempotent: nothing calls it when a
//! run completes, and running it twice over the same runs writes the same
//! result.

mod policy;
mod text;

pub use policy::{
    custom_score, select_best, select_with, tie_break, Selection, SelectionCriteria, Tier,
    DEFAULT_CONFIDENCE_THRESHOLD,
};
pub use text::{extract_text, join_pages};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::correlation::CorrelationId;
use crate::error::{AppError, ErrorKind};
use crate::models::{Document, OcrRun, ProcessingStatus, RunMetrics};
use crate::registry::{OcrRunRegistry, RunCounts};
use crate::repository::{CanonicalResult, DbContext};
use crate::storage::OcrResponseStore;

/// Where a winner's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    RawResponse,
    Pages,
    /// Neither source had text.
    Empty,
}

impl TextSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RawResponse => "raw_response",
            Self::Pages => "pages",
            Self::Empty => "empty",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionReport {
    pub document_id: String,
    pub run_id: String,
    pub engine: String,
    pub criteria: SelectionCriteria,
    pub tier: Option<Tier>,
    pub text_source: TextSource,
    pub text_length: usize,
    /// False for previews.
    pub applied: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub id: String,
    pub engine: String,
    pub status: ProcessingStatus,
    pub metrics: RunMetrics,
    pub stored_pages: usize,
    pub text_length: usize,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Best completed run per metric. `None` when no completed run reports it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BestByMetric {
    pub highest_confidence: Option<String>,
    pub most_words: Option<String>,
    pub most_pages: Option<String>,
    pub fastest: Option<String>,
    pub cheapest: Option<String>,
    pub most_recent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunComparison {
    pub runs: Vec<RunSummary>,
    pub best: BestByMetric,
    /// Requested ids with no matching run.
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BestRun {
    pub run_id: String,
    pub engine: String,
    pub tier: Option<Tier>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentStatus {
    pub document_id: String,
    pub filename: String,
    pub status: ProcessingStatus,
    pub page_count: Option<i32>,
    pub ocr_engine: Option<String>,
    pub ocr_confidence: Option<f64>,
    pub pages_parsed: Option<i32>,
    pub word_count: Option<i32>,
    pub processed_at: Option<DateTime<Utc>>,
    pub runs: RunCounts,
    pub engines: Vec<String>,
    /// Winner under the default policy, whether or not it has been applied.
    pub best: Option<BestRun>,
}

#[derive(Debug, Clone)]
pub struct SelectionEngine {
    db: DbContext,
    registry: OcrRunRegistry,
    responses: OcrResponseStore,
    threshold: f64,
}

impl SelectionEngine {
    pub fn new(db: DbContext, responses: OcrResponseStore, threshold: f64) -> Self {
        let registry = db.registry();
        Self {
            db,
            registry,
            responses,
            threshold,
        }
    }

    async fn load(&self, document_id: &str) -> Result<(Document, Vec<OcrRun>), AppError> {
        let document = self
            .db
            .documents()
            .get(document_id)
            .await?
            .ok_or_else(|| AppError::not_found("document", document_id))?;
        let runs = self.registry.completed_for_document(document_id).await?;
        Ok((document, runs))
    }

    /// Text for a run: the raw response if it yields any, else its pages.
    pub async fn run_text(
        &self,
        run: &OcrRun,
        cid: &CorrelationId,
    ) -> Result<(String, TextSource), AppError> {
        if let Some(key) = run.raw_response_path.as_deref() {
            match self.responses.retrieve(key).await {
                Ok(response) => {
                    let text = extract_text(&response);
                    if !text.is_empty() {
                        return Ok((text, TextSource::RawResponse));
                    }
                    debug!(correlation_id = %cid, run_id = %run.id, "Raw response had no text");
                }
                Err(e) => {
                    warn!(
                        correlation_id = %cid,
                        run_id = %run.id,
                        key,
                        "Raw response unavailable, using page text: {}",
                        e
                    );
                }
            }
        }

        let pages = self.registry.pages_for_run(&run.id).await?;
        let text = join_pages(&pages);
        if text.is_empty() {
            Ok((text, TextSource::Empty))
        } else {
            Ok((text, TextSource::Pages))
        }
    }

    async fn decide(
        &self,
        document_id: &str,
        criteria: SelectionCriteria,
        cid: &CorrelationId,
    ) -> Result<Option<(OcrRun, Option<Tier>, String, TextSource)>, AppError> {
        let (document, runs) = self.load(document_id).await?;

        let Some(selection) = select_with(
            criteria,
            &runs,
            document.page_count,
            self.threshold,
            Utc::now(),
        ) else {
            debug!(correlation_id = %cid, document_id, "No completed runs to select from");
            return Ok(None);
        };

        let winner = selection.run.clone();
        let tier = selection.tier;
        let (text, source) = self.run_text(&winner, cid).await?;
        Ok(Some((winner, tier, text, source)))
    }

    /// Pick the canonical run and write it onto the document.
    ///
    /// Returns `None`, leaving the document untouched, when it has no
    /// completed runs.
    pub async fn select_canonical(
        &self,
        document_id: &str,
        criteria: SelectionCriteria,
        cid: &CorrelationId,
    ) -> Result<Option<SelectionReport>, AppError> {
        let Some((winner, tier, text, text_source)) =
            self.decide(document_id, criteria, cid).await?
        else {
            return Ok(None);
        };

        let result = CanonicalResult {
            run_id: winner.id.clone(),
            engine: winner.engine.clone(),
            confidence: winner.metrics.confidence_mean,
            pages_parsed: winner.metrics.pages_parsed,
            word_count: winner.metrics.word_count,
            extracted_text: text,
        };
        let text_length = result.extracted_text.len();

        self.db
            .documents()
            .apply_canonical(document_id, &result)
            .await
            .map_err(|e| AppError::database("apply canonical result", e).with_correlation(cid))?
            .ok_or_else(|| {
                AppError::new(
                    ErrorKind::InvalidState,
                    "document or winning run changed during selection",
                )
                .with_context("document_id", document_id)
                .with_context("run_id", winner.id.as_str())
                .with_correlation(cid)
            })?;

        info!(
            correlation_id = %cid,
            document_id,
            run_id = %winner.id,
            engine = %winner.engine,
            tier = tier.map(|t| t.as_str()).unwrap_or(criteria.as_str()),
            "Applied canonical OCR result"
        );

        Ok(Some(SelectionReport {
            document_id: document_id.to_string(),
            run_id: winner.id,
            engine: winner.engine,
            criteria,
            tier,
            text_source,
            text_length,
            applied: true,
        }))
    }

    /// The decision `select_canonical` would make, without writing it.
    pub async fn preview(
        &self,
        document_id: &str,
        criteria: SelectionCriteria,
        cid: &CorrelationId,
    ) -> Result<Option<SelectionReport>, AppError> {
        Ok(self
            .decide(document_id, criteria, cid)
            .await?
            .map(|(winner, tier, text, text_source)| SelectionReport {
                document_id: document_id.to_string(),
                run_id: winner.id,
                engine: winner.engine,
                criteria,
                tier,
                text_source,
                text_length: text.len(),
                applied: false,
            }))
    }

    /// Side-by-side summary of runs, in the order given.
    pub async fn compare_runs(
        &self,
        run_ids: &[String],
        cid: &CorrelationId,
    ) -> Result<RunComparison, AppError> {
        let runs = self
            .registry
            .get_many(run_ids)
            .await
            .map_err(|e| AppError::database("load OCR runs", e).with_correlation(cid))?;
        let missing = run_ids
            .iter()
            .filter(|id| !runs.iter().any(|r| &r.id == *id))
            .cloned()
            .collect();

        let mut summaries = Vec::with_capacity(runs.len());
        for run in &runs {
            let pages = self.registry.pages_for_run(&run.id).await?;
            let (text, _) = self.run_text(run, cid).await?;
            summaries.push(RunSummary {
                id: run.id.clone(),
                engine: run.engine.clone(),
                status: run.status,
                metrics: run.metrics.clone(),
                stored_pages: pages.len(),
                text_length: text.len(),
                completed_at: run.completed_at,
            });
        }

        let completed: Vec<&OcrRun> = runs
            .iter()
            .filter(|r| r.status == ProcessingStatus::Completed)
            .collect();
        let best = BestByMetric {
            highest_confidence: best_by(&completed, |r| r.metrics.confidence_mean, true),
            most_words: best_by(&completed, |r| r.metrics.word_count, true),
            most_pages: best_by(&completed, |r| r.metrics.pages_parsed, true),
            fastest: best_by(&completed, |r| r.metrics.latency_ms, false),
            cheapest: best_by(&completed, |r| r.metrics.cost_cents, false),
            most_recent: best_by(&completed, |r| r.completed_at, true),
        };

        Ok(RunComparison {
            runs: summaries,
            best,
            missing,
        })
    }

    pub async fn document_status(&self, document_id: &str) -> Result<DocumentStatus, AppError> {
        let (document, runs) = self.load(document_id).await?;
        let counts = self.registry.status_counts(document_id).await?;
        let engines = self.registry.engines_for_document(document_id).await?;

        let best = select_best(&runs, document.page_count, self.threshold).map(|s| BestRun {
            run_id: s.run.id.clone(),
            engine: s.run.engine.clone(),
            tier: s.tier,
        });

        Ok(DocumentStatus {
            document_id: document.id,
            filename: document.filename,
            status: document.status,
            page_count: document.page_count,
            ocr_engine: document.ocr_engine,
            ocr_confidence: document.ocr_confidence,
            pages_parsed: document.pages_parsed,
            word_count: document.word_count,
            processed_at: document.processed_at,
            runs: counts,
            engines,
            best,
        })
    }
}

/// Id of the run with the highest (or lowest) reported value.
fn best_by<K, F>(runs: &[&OcrRun], key: F, highest: bool) -> Option<String>
where
    K: PartialOrd,
    F: Fn(&OcrRun) -> Option<K>,
{
    runs.iter()
        .filter_map(|r| key(*r).map(|k| (k, *r)))
        .min_by(|(ka, a), (kb, b)| {
            let by_value = if highest {
                kb.partial_cmp(ka)
            } else {
                ka.partial_cmp(kb)
            };
            by_value
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| tie_break(a, b))
        })
        .map(|(_, r)| r.id.clone())
}
