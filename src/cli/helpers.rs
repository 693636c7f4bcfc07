//! Shared helper functions for CLI commands.

use serde::Serialize;

use ocrvault::config::Settings;
use ocrvault::error::AppError;
use ocrvault::reporter::ErrorReporter;
use ocrvault::repository::DbContext;
use ocrvault::selection::SelectionEngine;
use ocrvault::storage::{BlobStorage, OcrResponseStore};

/// Database context for the configured database.
pub fn db_context(settings: &Settings) -> DbContext {
    DbContext::from_url(&settings.database_url())
}

/// Storage backend, failing fast on incomplete configuration.
pub fn storage(settings: &Settings) -> Result<BlobStorage, AppError> {
    BlobStorage::from_settings(settings)
}

pub fn selection_engine(settings: &Settings) -> Result<SelectionEngine, AppError> {
    Ok(SelectionEngine::new(
        db_context(settings),
        OcrResponseStore::new(storage(settings)?),
        settings.confidence_threshold,
    ))
}

pub fn reporter() -> ErrorReporter {
    ErrorReporter::with_log_sink()
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Render an optional value, `-` when absent.
pub fn opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

pub fn opt_f64(value: Option<f64>) -> String {
    value.map(|v| format!("{:.1}", v)).unwrap_or_else(|| "-".to_string())
}

/// Truncate to `max` chars with an ellipsis.
pub fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 5), "hello…");
        assert_eq!(truncate("ééééé", 2), "éé…");
    }

    #[test]
    fn test_opt_rendering() {
        assert_eq!(opt(Some(3)), "3");
        assert_eq!(opt::<i32>(None), "-");
        assert_eq!(opt_f64(Some(85.04)), "85.0");
    }
}
