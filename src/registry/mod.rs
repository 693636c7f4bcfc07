//! Read-only query surface over OCR runs.
//!
//! Every read has a total order: the requested sort key (default
//! `created_at desc`) followed by the run id in the same direction.

mod query;
mod stats;

pub use query::{RunQuery, SortField, SortOrder, DEFAULT_LIMIT};
pub use stats::{EngineStats, PerformanceStats};

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::models::{DocumentPage, OcrRun, ProcessingStatus};
use crate::repository::models::OcrRunRecord;
use crate::repository::{format_timestamp, DieselError, PageRepository, SqlitePool};
use crate::schema::ocr_runs;

/// Default trailing window for `performance_stats`.
pub const DEFAULT_STATS_WINDOW_DAYS: i64 = 7;

macro_rules! apply_run_filter {
    ($query:expr, $q:expr) => {{
        let mut query = $query;
        let q: &RunQuery = $q;
        if let Some(id) = q.document_id.as_deref() {
            query = query.filter(ocr_runs::document_id.eq(id));
        }
        if let Some(engine) = q.engine.as_deref() {
            query = query.filter(ocr_runs::ocr_engine.eq(engine));
        }
        if let Some(status) = q.status {
            query = query.filter(ocr_runs::status.eq(status.as_str()));
        }
        if let Some(start) = q.created_after {
            query = query.filter(ocr_runs::created_at.ge(format_timestamp(start)));
        }
        if let Some(end) = q.created_before {
            query = query.filter(ocr_runs::created_at.le(format_timestamp(end)));
        }
        if let Some(min) = q.min_confidence {
            query = query.filter(ocr_runs::confidence_mean.ge(min));
        }
        if let Some(max) = q.max_confidence {
            query = query.filter(ocr_runs::confidence_mean.le(max));
        }
        if let Some(max) = q.max_latency_ms {
            query = query.filter(ocr_runs::latency_ms.le(max));
        }
        if let Some(min) = q.min_pages {
            query = query.filter(ocr_runs::pages_parsed.ge(min));
        }
        if let Some(max) = q.max_pages {
            query = query.filter(ocr_runs::pages_parsed.le(max));
        }
        query
    }};
}

macro_rules! order_runs {
    ($query:expr, $column:expr, $order:expr) => {
        match $order {
            SortOrder::Asc => $query.order(($column.asc(), ocr_runs::id.asc())),
            SortOrder::Desc => $query.order(($column.desc(), ocr_runs::id.desc())),
        }
    };
}

/// Run counts for one document, by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct RunCounts {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

#[derive(Debug, Clone)]
pub struct OcrRunRegistry {
    pool: SqlitePool,
}

impl OcrRunRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// One page of matching runs plus the unpaginated match count.
    pub async fn search(&self, query: &RunQuery) -> Result<(Vec<OcrRun>, i64), DieselError> {
        let mut conn = self.pool.get().await?;

        let total: i64 = apply_run_filter!(
            ocr_runs::table.select(count_star()).into_boxed(),
            query
        )
        .first(&mut conn)
        .await?;

        let runs = Self::load_page(&mut conn, query).await?;
        Ok((runs, total))
    }

    pub async fn list(&self, query: &RunQuery) -> Result<Vec<OcrRun>, DieselError> {
        let mut conn = self.pool.get().await?;
        Self::load_page(&mut conn, query).await
    }

    async fn load_page(
        conn: &mut crate::repository::SqliteConn,
        query: &RunQuery,
    ) -> Result<Vec<OcrRun>, DieselError> {
        let filtered = apply_run_filter!(
            ocr_runs::table.select(OcrRunRecord::as_select()).into_boxed(),
            query
        );
        let sorted = match query.sort {
            SortField::CreatedAt => order_runs!(filtered, ocr_runs::created_at, query.order),
            SortField::ConfidenceMean => {
                order_runs!(filtered, ocr_runs::confidence_mean, query.order)
            }
            SortField::LatencyMs => order_runs!(filtered, ocr_runs::latency_ms, query.order),
            SortField::PagesParsed => order_runs!(filtered, ocr_runs::pages_parsed, query.order),
            SortField::WordCount => order_runs!(filtered, ocr_runs::word_count, query.order),
            SortField::CostCents => order_runs!(filtered, ocr_runs::cost_cents, query.order),
        };

        let records: Vec<OcrRunRecord> = sorted
            .limit(query.limit)
            .offset(query.offset)
            .load(conn)
            .await?;
        Ok(records.into_iter().map(OcrRun::from).collect())
    }

    pub async fn runs_for_document(
        &self,
        document_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<OcrRun>, DieselError> {
        self.list(&RunQuery::new().document(document_id).paginate(limit, offset))
            .await
    }

    pub async fn runs_by_status(
        &self,
        status: ProcessingStatus,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<OcrRun>, DieselError> {
        self.list(&RunQuery::new().status(status).paginate(limit, offset))
            .await
    }

    /// Runs created within `[start, end]`.
    pub async fn runs_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<OcrRun>, DieselError> {
        self.list(
            &RunQuery::new()
                .created_between(start, end)
                .paginate(limit, offset),
        )
        .await
    }

    pub async fn runs_by_engine(
        &self,
        engine: &str,
        status: Option<ProcessingStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<OcrRun>, DieselError> {
        let mut query = RunQuery::new().engine(engine).paginate(limit, offset);
        query.status = status;
        self.list(&query).await
    }

    /// Most recently completed run of a document, optionally for one engine.
    pub async fn latest_successful(
        &self,
        document_id: &str,
        engine: Option<&str>,
    ) -> Result<Option<OcrRun>, DieselError> {
        let mut conn = self.pool.get().await?;

        let mut query = ocr_runs::table
            .select(OcrRunRecord::as_select())
            .filter(ocr_runs::document_id.eq(document_id))
            .filter(ocr_runs::status.eq(ProcessingStatus::Completed.as_str()))
            .into_boxed();
        if let Some(engine) = engine {
            query = query.filter(ocr_runs::ocr_engine.eq(engine));
        }

        query
            .order((ocr_runs::completed_at.desc(), ocr_runs::id.desc()))
            .first(&mut conn)
            .await
            .optional()
            .map(|r| r.map(OcrRun::from))
    }

    /// Every completed run of a document, oldest first. Unpaginated.
    pub async fn completed_for_document(&self, document_id: &str) -> Result<Vec<OcrRun>, DieselError> {
        let mut conn = self.pool.get().await?;

        let records: Vec<OcrRunRecord> = ocr_runs::table
            .select(OcrRunRecord::as_select())
            .filter(ocr_runs::document_id.eq(document_id))
            .filter(ocr_runs::status.eq(ProcessingStatus::Completed.as_str()))
            .order((ocr_runs::created_at.asc(), ocr_runs::id.asc()))
            .load(&mut conn)
            .await?;
        Ok(records.into_iter().map(OcrRun::from).collect())
    }

    pub async fn get(&self, run_id: &str) -> Result<Option<OcrRun>, DieselError> {
        let mut conn = self.pool.get().await?;

        ocr_runs::table
            .find(run_id)
            .select(OcrRunRecord::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map(|r| r.map(OcrRun::from))
    }

    /// Runs by id, in the order asked for. Unknown ids are skipped.
    pub async fn get_many(&self, run_ids: &[String]) -> Result<Vec<OcrRun>, DieselError> {
        let mut conn = self.pool.get().await?;

        let records: Vec<OcrRunRecord> = ocr_runs::table
            .select(OcrRunRecord::as_select())
            .filter(ocr_runs::id.eq_any(run_ids))
            .load(&mut conn)
            .await?;
        let mut by_id: BTreeMap<String, OcrRun> = records
            .into_iter()
            .map(|r| (r.id.clone(), OcrRun::from(r)))
            .collect();
        Ok(run_ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    pub async fn pages_for_run(&self, run_id: &str) -> Result<Vec<DocumentPage>, DieselError> {
        PageRepository::new(self.pool.clone()).for_run(run_id).await
    }

    pub async fn status_counts(&self, document_id: &str) -> Result<RunCounts, DieselError> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<(String, i64)> = ocr_runs::table
            .filter(ocr_runs::document_id.eq(document_id))
            .group_by(ocr_runs::status)
            .select((ocr_runs::status, count_star()))
            .load(&mut conn)
            .await?;

        let mut counts = RunCounts::default();
        for (status, n) in rows {
            counts.total += n;
            match ProcessingStatus::from_str(&status) {
                Some(ProcessingStatus::Pending) => counts.pending += n,
                Some(ProcessingStatus::Processing) => counts.processing += n,
                Some(ProcessingStatus::Completed) => counts.completed += n,
                Some(ProcessingStatus::Failed) => counts.failed += n,
                None => {}
            }
        }
        Ok(counts)
    }

    /// Distinct engines that have attempted a document, sorted.
    pub async fn engines_for_document(&self, document_id: &str) -> Result<Vec<String>, DieselError> {
        let mut conn = self.pool.get().await?;

        ocr_runs::table
            .filter(ocr_runs::document_id.eq(document_id))
            .select(ocr_runs::ocr_engine)
            .distinct()
            .order(ocr_runs::ocr_engine.asc())
            .load(&mut conn)
            .await
    }

    /// Stats over completed runs created in the trailing `window`.
    pub async fn performance_stats(
        &self,
        window: Duration,
        engine: Option<&str>,
    ) -> Result<PerformanceStats, DieselError> {
        self.performance_stats_since(Utc::now() - window, engine).await
    }

    pub async fn performance_stats_since(
        &self,
        since: DateTime<Utc>,
        engine: Option<&str>,
    ) -> Result<PerformanceStats, DieselError> {
        let mut conn = self.pool.get().await?;
        stats::load(&mut conn, since, engine).await
    }
}
