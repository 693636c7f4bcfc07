//! Aggregate engine performance over a trailing window.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use diesel::sql_types::{BigInt, Nullable, Text};
use diesel_async::RunQueryDsl;
use serde::Serialize;

use crate::repository::{format_timestamp, DieselError, SqliteConn};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStats {
    pub run_count: i64,
    pub avg_confidence: Option<f64>,
    pub avg_latency_ms: Option<f64>,
}

/// Averages skip missing values and are `None` when nothing contributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceStats {
    pub since: Option<DateTime<Utc>>,
    pub engine: Option<String>,
    pub total_runs: i64,
    pub avg_confidence: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub avg_pages: Option<f64>,
    pub avg_words: Option<f64>,
    pub total_pages: i64,
    pub total_words: i64,
    pub engine_breakdown: BTreeMap<String, EngineStats>,
}

#[derive(diesel::QueryableByName)]
struct TotalsRow {
    #[diesel(sql_type = BigInt)]
    total_runs: i64,
    #[diesel(sql_type = Nullable<diesel::sql_types::Double>)]
    avg_confidence: Option<f64>,
    #[diesel(sql_type = Nullable<diesel::sql_types::Double>)]
    avg_latency_ms: Option<f64>,
    #[diesel(sql_type = Nullable<diesel::sql_types::Double>)]
    avg_pages: Option<f64>,
    #[diesel(sql_type = Nullable<diesel::sql_types::Double>)]
    avg_words: Option<f64>,
    #[diesel(sql_type = BigInt)]
    total_pages: i64,
    #[diesel(sql_type = BigInt)]
    total_words: i64,
}

#[derive(diesel::QueryableByName)]
struct EngineRow {
    #[diesel(sql_type = Text)]
    ocr_engine: String,
    #[diesel(sql_type = BigInt)]
    run_count: i64,
    #[diesel(sql_type = Nullable<diesel::sql_types::Double>)]
    avg_confidence: Option<f64>,
    #[diesel(sql_type = Nullable<diesel::sql_types::Double>)]
    avg_latency_ms: Option<f64>,
}

const WINDOW_FILTER: &str =
    "status = 'completed' AND created_at >= ? AND (? IS NULL OR ocr_engine = ?)";

pub(super) async fn load(
    conn: &mut SqliteConn,
    since: DateTime<Utc>,
    engine: Option<&str>,
) -> Result<PerformanceStats, DieselError> {
    let since_str = format_timestamp(since);

    let totals: TotalsRow = diesel::sql_query(format!(
        "SELECT COUNT(*) AS total_runs, \
                AVG(confidence_mean) AS avg_confidence, \
                AVG(latency_ms) AS avg_latency_ms, \
                AVG(pages_parsed) AS avg_pages, \
                AVG(word_count) AS avg_words, \
                COALESCE(SUM(pages_parsed), 0) AS total_pages, \
                COALESCE(SUM(word_count), 0) AS total_words \
         FROM ocr_runs WHERE {}",
        WINDOW_FILTER
    ))
    .bind::<Text, _>(&since_str)
    .bind::<Nullable<Text>, _>(engine)
    .bind::<Nullable<Text>, _>(engine)
    .get_result(conn)
    .await?;

    let rows: Vec<EngineRow> = diesel::sql_query(format!(
        "SELECT ocr_engine, COUNT(*) AS run_count, \
                AVG(confidence_mean) AS avg_confidence, \
                AVG(latency_ms) AS avg_latency_ms \
         FROM ocr_runs WHERE {} \
         GROUP BY ocr_engine ORDER BY ocr_engine",
        WINDOW_FILTER
    ))
    .bind::<Text, _>(&since_str)
    .bind::<Nullable<Text>, _>(engine)
    .bind::<Nullable<Text>, _>(engine)
    .load(conn)
    .await?;

    let engine_breakdown = rows
        .into_iter()
        .map(|r| {
            (
                r.ocr_engine,
                EngineStats {
                    run_count: r.run_count,
                    avg_confidence: r.avg_confidence,
                    avg_latency_ms: r.avg_latency_ms,
                },
            )
        })
        .collect();

    Ok(PerformanceStats {
        since: Some(since),
        engine: engine.map(str::to_string),
        total_runs: totals.total_runs,
        avg_confidence: totals.avg_confidence,
        avg_latency_ms: totals.avg_latency_ms,
        avg_pages: totals.avg_pages,
        avg_words: totals.avg_words,
        total_pages: totals.total_pages,
        total_words: totals.total_words,
        engine_breakdown,
    })
}
