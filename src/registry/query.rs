//! Conjunctive filters over OCR runs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ProcessingStatus;

pub const DEFAULT_LIMIT: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    ConfidenceMean,
    LatencyMs,
    PagesParsed,
    WordCount,
    CostCents,
}

impl SortField {
    pub const ALL: [SortField; 6] = [
        Self::CreatedAt,
        Self::ConfidenceMean,
        Self::LatencyMs,
        Self::PagesParsed,
        Self::WordCount,
        Self::CostCents,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::ConfidenceMean => "confidence_mean",
            Self::LatencyMs => "latency_ms",
            Self::PagesParsed => "pages_parsed",
            Self::WordCount => "word_count",
            Self::CostCents => "cost_cents",
        }
    }
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|f| f.as_str()).collect();
                format!("unknown sort field '{}', expected one of: {}", s, names.join(", "))
            })
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(format!("unknown sort order '{}', expected asc or desc", other)),
        }
    }
}

/// Filters, sort and page for a registry read.
///
/// Unset filters match everything. Date bounds are inclusive.
///
/// ```ignore
/// let query = RunQuery::new()
///     .engine("azure")
///     .status(ProcessingStatus::Completed)
///     .min_confidence(80.0)
///     .sort_by(SortField::LatencyMs, SortOrder::Asc)
///     .paginate(20, 0);
/// let (runs, total) = registry.search(&query).await?;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RunQuery {
    pub document_id: Option<String>,
    pub engine: Option<String>,
    pub status: Option<ProcessingStatus>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub min_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
    pub max_latency_ms: Option<i64>,
    pub min_pages: Option<i32>,
    pub max_pages: Option<i32>,
    pub sort: SortField,
    pub order: SortOrder,
    pub limit: i64,
    pub offset: i64,
}

impl Default for RunQuery {
    fn default() -> Self {
        Self {
            document_id: None,
            engine: None,
            status: None,
            created_after: None,
            created_before: None,
            min_confidence: None,
            max_confidence: None,
            max_latency_ms: None,
            min_pages: None,
            max_pages: None,
            sort: SortField::default(),
            order: SortOrder::default(),
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl RunQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = Some(engine.into());
        self
    }

    pub fn status(mut self, status: ProcessingStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn created_between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.created_after = Some(start);
        self.created_before = Some(end);
        self
    }

    pub fn created_after(mut self, start: DateTime<Utc>) -> Self {
        self.created_after = Some(start);
        self
    }

    pub fn min_confidence(mut self, value: f64) -> Self {
        self.min_confidence = Some(value);
        self
    }

    pub fn max_confidence(mut self, value: f64) -> Self {
        self.max_confidence = Some(value);
        self
    }

    pub fn max_latency_ms(mut self, value: i64) -> Self {
        self.max_latency_ms = Some(value);
        self
    }

    pub fn min_pages(mut self, value: i32) -> Self {
        self.min_pages = Some(value);
        self
    }

    pub fn max_pages(mut self, value: i32) -> Self {
        self.max_pages = Some(value);
        self
    }

    pub fn sort_by(mut self, field: SortField, order: SortOrder) -> Self {
        self.sort = field;
        self.order = order;
        self
    }

    /// Negative values are clamped to zero.
    pub fn paginate(mut self, limit: i64, offset: i64) -> Self {
        self.limit = limit.max(0);
        self.offset = offset.max(0);
        self
    }
}
