//! Repository layer for database persistence.
//!
//! All database access uses Diesel ORM with compile-time query checking
//! against SQLite.

pub mod context;
pub mod dead_letters;
pub mod documents;
pub mod models;
pub mod ocr_runs;
pub mod pages;
pub mod pool;
pub mod util;

pub use context::DbContext;
pub use dead_letters::DeadLetterRepository;
pub use documents::{CanonicalResult, DocumentRepository};
pub use ocr_runs::{NewRun, OcrRunRepository};
pub use pages::PageRepository;
pub use pool::{DieselError, SqliteConn, SqlitePool};

use chrono::{DateTime, SecondsFormat, Utc};

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

/// Fixed-width UTC timestamp; lexical order matches chronological order.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamps_sort_lexically() {
        let a = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let b = a + chrono::Duration::microseconds(1);
        let c = a + chrono::Duration::days(400);
        let (sa, sb, sc) = (format_timestamp(a), format_timestamp(b), format_timestamp(c));
        assert_eq!(sa, "2024-01-01T00:00:00.000000Z");
        assert!(sa < sb && sb < sc);
        assert_eq!(parse_datetime(&sb), b);
    }

    #[test]
    fn test_bad_timestamp_defaults_to_epoch() {
        assert_eq!(parse_datetime("yesterday"), DateTime::UNIX_EPOCH);
        assert!(parse_datetime_opt(Some("nope".into())).is_none());
    }
}
