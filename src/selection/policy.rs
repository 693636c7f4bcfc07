//! Best-run policy.
//!
//! Pure functions over a candidate set: no I/O, no clock unless one is
//! passed in. Every max/min scan breaks ties the same way (latency asc,
//! cost asc, run id asc; missing values last) so the winner never depends
//! on input order.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{OcrRun, ProcessingStatus};

pub use crate::config::DEFAULT_CONFIDENCE_THRESHOLD;

/// Which stage of the cascade produced the winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Confidence above threshold and every declared page parsed.
    HighConfidence,
    /// Unique run with the most pages parsed.
    MostPages,
    /// Most words among runs that found tables.
    TableWordCount,
    /// Most words, latency then cost breaking ties.
    WordCount,
    /// Nothing has words; fastest run wins.
    LowestLatency,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighConfidence => "high_confidence",
            Self::MostPages => "most_pages",
            Self::TableWordCount => "table_word_count",
            Self::WordCount => "word_count",
            Self::LowestLatency => "lowest_latency",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionCriteria {
    /// The tiered cascade.
    #[default]
    Policy,
    Confidence,
    Recency,
    WordCount,
    /// Weighted blend of confidence, words, recency and latency.
    Custom,
}

impl SelectionCriteria {
    pub const ALL: [SelectionCriteria; 5] = [
        Self::Policy,
        Self::Confidence,
        Self::Recency,
        Self::WordCount,
        Self::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Policy => "policy",
            Self::Confidence => "confidence",
            Self::Recency => "recency",
            Self::WordCount => "word_count",
            Self::Custom => "custom",
        }
    }
}

impl FromStr for SelectionCriteria {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|c| c.as_str() == s).ok_or_else(|| {
            let names: Vec<&str> = Self::ALL.iter().map(|c| c.as_str()).collect();
            format!(
                "unknown selection criteria '{}', expected one of: {}",
                s,
                names.join(", ")
            )
        })
    }
}

impl fmt::Display for SelectionCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A winning run and how it was chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection<'a> {
    pub run: &'a OcrRun,
    pub criteria: SelectionCriteria,
    /// Set for `SelectionCriteria::Policy` only.
    pub tier: Option<Tier>,
}

fn missing_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Shared tie-break: lower latency, then lower cost, then lower id.
pub fn tie_break(a: &OcrRun, b: &OcrRun) -> Ordering {
    missing_last(a.metrics.latency_ms, b.metrics.latency_ms)
        .then_with(|| missing_last(a.metrics.cost_cents, b.metrics.cost_cents))
        .then_with(|| a.id.cmp(&b.id))
}

/// Highest `key`, ties resolved by `tie_break`.
fn max_by_key<'a, K, F>(runs: &[&'a OcrRun], key: F) -> Option<&'a OcrRun>
where
    K: PartialOrd,
    F: Fn(&OcrRun) -> K,
{
    runs.iter().copied().min_by(|a, b| {
        key(*b)
            .partial_cmp(&key(*a))
            .unwrap_or(Ordering::Equal)
            .then_with(|| tie_break(*a, *b))
    })
}

/// Run the tiered cascade over `runs`.
///
/// Only `completed` runs are candidates. `page_count` is the document's
/// declared page count; when it is unknown the first tier cannot match.
pub fn select_best(
    runs: &[OcrRun],
    page_count: Option<i32>,
    threshold: f64,
) -> Option<Selection<'_>> {
    let all: Vec<&OcrRun> = runs
        .iter()
        .filter(|r| r.status == ProcessingStatus::Completed)
        .collect();
    if all.is_empty() {
        return None;
    }

    // Tier 1
    if let Some(declared) = page_count {
        let confident: Vec<&OcrRun> = all
            .iter()
            .copied()
            .filter(|r| r.confidence() > threshold && r.pages() == declared)
            .collect();
        if let Some(run) = max_by_key(&confident, |r| r.confidence()) {
            return Some(by_tier(run, Tier::HighConfidence));
        }
    }

    // Tier 2. A tie narrows the pool for the later tiers; no candidates
    // at all leaves the full set in play.
    let with_content: Vec<&OcrRun> = all
        .iter()
        .copied()
        .filter(|r| r.pages() > 0 && r.words() > 0)
        .collect();
    let most_pages: Vec<&OcrRun> = match with_content.iter().map(|r| r.pages()).max() {
        Some(max_pages) => with_content
            .into_iter()
            .filter(|r| r.pages() == max_pages)
            .collect(),
        None => Vec::new(),
    };
    if most_pages.len() == 1 {
        return Some(by_tier(most_pages[0], Tier::MostPages));
    }

    // Tier 3
    let tier3_pool: &[&OcrRun] = if most_pages.is_empty() { &all } else { &most_pages };
    let with_tables: Vec<&OcrRun> = tier3_pool
        .iter()
        .copied()
        .filter(|r| r.words() > 0 && r.tables() >= 1)
        .collect();
    if let Some(run) = max_by_key(&with_tables, |r| r.words()) {
        return Some(by_tier(run, Tier::TableWordCount));
    }

    // Tier 4
    let tier4_pool: Vec<&OcrRun> = if most_pages.is_empty() {
        all.iter().copied().filter(|r| r.words() > 0).collect()
    } else {
        most_pages
    };
    if let Some(run) = max_by_key(&tier4_pool, |r| r.words()) {
        return Some(by_tier(run, Tier::WordCount));
    }

    all.iter()
        .copied()
        .min_by(|a, b| tie_break(a, b))
        .map(|run| by_tier(run, Tier::LowestLatency))
}

fn by_tier(run: &OcrRun, tier: Tier) -> Selection<'_> {
    Selection {
        run,
        criteria: SelectionCriteria::Policy,
        tier: Some(tier),
    }
}

/// Weighted score used by `SelectionCriteria::Custom`, in `[0, 1]`.
pub fn custom_score(run: &OcrRun, now: DateTime<Utc>) -> f64 {
    let confidence = run.confidence().clamp(0.0, 100.0) / 100.0;
    let words = (f64::from(run.words().max(0)) / 50_000.0).min(1.0);

    let finished = run.completed_at.unwrap_or(run.created_at);
    let age_hours = ((now - finished).num_seconds() as f64 / 3600.0).max(0.0);
    let recency = 1.0 - (age_hours / 168.0).min(1.0);

    let fast = match run.metrics.latency_ms {
        Some(ms) if ms < 30_000 => 1.0,
        _ => 0.0,
    };

    0.4 * confidence + 0.3 * words + 0.2 * recency + 0.1 * fast
}

/// Pick a winner under any criteria. `now` feeds the custom score.
pub fn select_with(
    criteria: SelectionCriteria,
    runs: &[OcrRun],
    page_count: Option<i32>,
    threshold: f64,
    now: DateTime<Utc>,
) -> Option<Selection<'_>> {
    if criteria == SelectionCriteria::Policy {
        return select_best(runs, page_count, threshold);
    }

    let completed: Vec<&OcrRun> = runs
        .iter()
        .filter(|r| r.status == ProcessingStatus::Completed)
        .collect();

    let run = match criteria {
        SelectionCriteria::Confidence => max_by_key(&completed, |r| r.confidence()),
        SelectionCriteria::Recency => {
            max_by_key(&completed, |r| r.completed_at.unwrap_or(r.created_at))
        }
        SelectionCriteria::WordCount => max_by_key(&completed, |r| r.words()),
        SelectionCriteria::Custom => max_by_key(&completed, |r| custom_score(r, now)),
        SelectionCriteria::Policy => None,
    }?;

    Some(Selection {
        run,
        criteria,
        tier: None,
    })
}
