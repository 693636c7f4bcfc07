//! Error taxonomy.
//!
//! Every failure the pipeline can raise is an [`AppError`] tagged with a closed
//! [`ErrorKind`]. The kind fixes the category, the default severity, the
//! default retryability and the status shown to users. Foreign errors are
//! never returned raw: they are wrapped as the cause of an `AppError` so the
//! full causal chain survives into logs and dead-letter records.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::correlation::CorrelationId;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Upstream ingestion API statuses that are worth retrying.
const RETRYABLE_API_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    EmailIngestion,
    Storage,
    Ocr,
    System,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmailIngestion => "email_ingestion",
            Self::Storage => "storage",
            Self::Ocr => "ocr",
            Self::System => "system",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of concrete failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // Email ingestion
    IngestAuth,
    IngestApi,
    ResourceNotFound,
    MalformedPayload,
    // Storage
    Storage,
    BlobNotFound,
    StorageConnection,
    StorageTimeout,
    ChecksumMismatch,
    InvalidKey,
    // OCR
    Ocr,
    EngineUnavailable,
    EngineTimeout,
    QuotaExceeded,
    UnsupportedContent,
    LowImageQuality,
    // System
    Configuration,
    Database,
    Validation,
    NotFound,
    InvalidState,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IngestAuth => "IngestAuthError",
            Self::IngestApi => "IngestApiError",
            Self::ResourceNotFound => "ResourceNotFoundError",
            Self::MalformedPayload => "MalformedPayloadError",
            Self::Storage => "StorageError",
            Self::BlobNotFound => "BlobNotFoundError",
            Self::StorageConnection => "StorageConnectionError",
            Self::StorageTimeout => "StorageTimeoutError",
            Self::ChecksumMismatch => "ChecksumMismatchError",
            Self::InvalidKey => "InvalidKeyError",
            Self::Ocr => "OcrError",
            Self::EngineUnavailable => "EngineUnavailableError",
            Self::EngineTimeout => "EngineTimeoutError",
            Self::QuotaExceeded => "QuotaExceededError",
            Self::UnsupportedContent => "UnsupportedContentError",
            Self::LowImageQuality => "LowImageQualityError",
            Self::Configuration => "ConfigurationError",
            Self::Database => "DatabaseError",
            Self::Validation => "ValidationError",
            Self::NotFound => "NotFoundError",
            Self::InvalidState => "InvalidStateError",
            Self::Internal => "InternalError",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::IngestAuth | Self::IngestApi | Self::ResourceNotFound | Self::MalformedPayload => {
                ErrorCategory::EmailIngestion
            }
            Self::Storage
            | Self::BlobNotFound
            | Self::StorageConnection
            | Self::StorageTimeout
            | Self::ChecksumMismatch
            | Self::InvalidKey => ErrorCategory::Storage,
            Self::Ocr
            | Self::EngineUnavailable
            | Self::EngineTimeout
            | Self::QuotaExceeded
            | Self::UnsupportedContent
            | Self::LowImageQuality => ErrorCategory::Ocr,
            Self::Configuration
            | Self::Database
            | Self::Validation
            | Self::NotFound
            | Self::InvalidState
            | Self::Internal => ErrorCategory::System,
        }
    }

    pub fn default_severity(&self) -> ErrorSeverity {
        match self {
            Self::ResourceNotFound | Self::BlobNotFound | Self::Validation | Self::NotFound => {
                ErrorSeverity::Warning
            }
            Self::Configuration => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    pub fn default_retryable(&self) -> bool {
        matches!(
            self,
            Self::IngestAuth
                | Self::Storage
                | Self::StorageConnection
                | Self::StorageTimeout
                | Self::ChecksumMismatch
                | Self::EngineUnavailable
                | Self::EngineTimeout
                | Self::Database
        )
    }

    /// HTTP-equivalent status for the user-visible surface.
    pub fn user_status(&self) -> u16 {
        match self {
            Self::ResourceNotFound | Self::BlobNotFound | Self::NotFound => 404,
            Self::MalformedPayload | Self::Validation | Self::InvalidKey => 400,
            _ => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A foreign error kept as a cause, remembering its Rust type name.
#[derive(Debug)]
struct ForeignError {
    class: &'static str,
    inner: BoxError,
}

impl fmt::Display for ForeignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl std::error::Error for ForeignError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

#[derive(Debug, Error)]
#[error("[{category}] {message}", category = .kind.category())]
pub struct AppError {
    kind: ErrorKind,
    message: String,
    severity: ErrorSeverity,
    retryable: bool,
    retry_count: u32,
    context: BTreeMap<String, Value>,
    correlation_id: Option<CorrelationId>,
    timestamp: DateTime<Utc>,
    #[source]
    cause: Option<BoxError>,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            severity: kind.default_severity(),
            retryable: kind.default_retryable(),
            retry_count: 0,
            context: BTreeMap::new(),
            correlation_id: None,
            timestamp: Utc::now(),
            cause: None,
        }
    }

    /// Wrap a lower-level error as the cause of a new domain error.
    pub fn wrap<E>(kind: ErrorKind, message: impl Into<String>, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::new(kind, message).caused_by(err)
    }

    pub fn caused_by<E>(mut self, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let boxed: BoxError = Box::new(err);
        self.cause = Some(if boxed.is::<AppError>() {
            boxed
        } else {
            Box::new(ForeignError {
                class: std::any::type_name::<E>(),
                inner: boxed,
            })
        });
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_correlation(mut self, correlation_id: &CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id.clone());
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Stamp a correlation id unless one is already attached.
    pub fn ensure_correlation(&mut self, correlation_id: &CorrelationId) {
        if self.correlation_id.is_none() {
            self.correlation_id = Some(correlation_id.clone());
        }
    }

    // Constructors for failures that carry well-known context.

    pub fn ingest_api(message: impl Into<String>, status_code: Option<u16>) -> Self {
        let retryable = status_code.is_some_and(|s| RETRYABLE_API_STATUS.contains(&s));
        let err = Self::new(ErrorKind::IngestApi, message).with_retryable(retryable);
        match status_code {
            Some(status) => err.with_context("status_code", status),
            None => err,
        }
    }

    pub fn blob_not_found(key: &str) -> Self {
        Self::new(ErrorKind::BlobNotFound, format!("blob not found: {}", key))
            .with_context("key", key)
    }

    pub fn checksum_mismatch(key: &str, expected: &str, actual: &str) -> Self {
        Self::new(
            ErrorKind::ChecksumMismatch,
            format!("checksum mismatch for {}", key),
        )
        .with_context("key", key)
        .with_context("expected", expected)
        .with_context("actual", actual)
    }

    pub fn invalid_key(key: &str, reason: &str) -> Self {
        Self::new(ErrorKind::InvalidKey, format!("invalid storage key: {}", reason))
            .with_context("key", key)
    }

    pub fn configuration(key: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message).with_context("config_key", key)
    }

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message).with_context("field", field)
    }

    pub fn not_found(entity: &str, id: &str) -> Self {
        Self::new(ErrorKind::NotFound, format!("{} not found: {}", entity, id))
            .with_context("entity", entity)
            .with_context("id", id)
    }

    pub fn database(operation: &str, err: diesel::result::Error) -> Self {
        let kind = match err {
            diesel::result::Error::NotFound => ErrorKind::NotFound,
            _ => ErrorKind::Database,
        };
        Self::wrap(kind, format!("database operation failed: {}", operation), err)
            .with_context("operation", operation)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    pub fn severity(&self) -> ErrorSeverity {
        self.severity
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &BTreeMap<String, Value> {
        &self.context
    }

    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.correlation_id.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn link(&self) -> ChainLink {
        ChainLink {
            error_class: self.kind.as_str().to_string(),
            message: self.message.clone(),
            category: self.category().as_str().to_string(),
            severity: self.severity.as_str().to_string(),
            context: self.context.clone(),
            correlation_id: self.correlation_id.as_ref().map(|c| c.to_string()),
            retryable: self.retryable,
            retry_count: self.retry_count,
        }
    }

    /// Causes ordered from this error (outermost) down to the root.
    pub fn error_chain(&self) -> Vec<ChainLink> {
        let mut links = vec![self.link()];
        let mut next: Option<&(dyn std::error::Error + 'static)> = match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        };

        while let Some(err) = next {
            if let Some(app) = err.downcast_ref::<AppError>() {
                links.push(app.link());
            } else if let Some(foreign) = err.downcast_ref::<ForeignError>() {
                links.push(ChainLink::foreign(foreign.class, foreign.to_string()));
            } else {
                links.push(ChainLink::foreign("error", err.to_string()));
            }
            next = err.source();
        }

        links
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            error: self.link(),
            error_chain: self.error_chain(),
            timestamp: self.timestamp.to_rfc3339(),
        }
    }

    /// Status and generic message safe to show a caller.
    pub fn user_facing(&self) -> UserFacingError {
        let status = self.kind.user_status();
        let message = match status {
            404 => "The requested resource was not found.",
            400 => "The request was invalid.",
            _ => "An internal error occurred. Please try again later.",
        };
        UserFacingError { status, message }
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(err: diesel::result::Error) -> Self {
        AppError::database("query", err)
    }
}

/// One entry of an error chain; the payload shape minus chain and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainLink {
    pub error_class: String,
    pub message: String,
    pub category: String,
    pub severity: String,
    pub context: BTreeMap<String, Value>,
    pub correlation_id: Option<String>,
    pub retryable: bool,
    pub retry_count: u32,
}

impl ChainLink {
    fn foreign(class: &str, message: String) -> Self {
        Self {
            error_class: class.to_string(),
            message,
            category: "unknown".to_string(),
            severity: ErrorSeverity::Error.as_str().to_string(),
            context: BTreeMap::new(),
            correlation_id: None,
            retryable: false,
            retry_count: 0,
        }
    }
}

/// Structured error record consumed by logging and monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(flatten)]
    pub error: ChainLink,
    pub error_chain: Vec<ChainLink>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserFacingError {
    pub status: u16,
    pub message: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_KINDS: [ErrorKind; 22] = [
        ErrorKind::IngestAuth,
        ErrorKind::IngestApi,
        ErrorKind::ResourceNotFound,
        ErrorKind::MalformedPayload,
        ErrorKind::Storage,
        ErrorKind::BlobNotFound,
        ErrorKind::StorageConnection,
        ErrorKind::StorageTimeout,
        ErrorKind::ChecksumMismatch,
        ErrorKind::InvalidKey,
        ErrorKind::Ocr,
        ErrorKind::EngineUnavailable,
        ErrorKind::EngineTimeout,
        ErrorKind::QuotaExceeded,
        ErrorKind::UnsupportedContent,
        ErrorKind::LowImageQuality,
        ErrorKind::Configuration,
        ErrorKind::Database,
        ErrorKind::Validation,
        ErrorKind::NotFound,
        ErrorKind::InvalidState,
        ErrorKind::Internal,
    ];

    #[test]
    fn test_default_retryability() {
        let expected = [
            (ErrorKind::IngestAuth, true),
            (ErrorKind::ResourceNotFound, false),
            (ErrorKind::MalformedPayload, false),
            (ErrorKind::Storage, true),
            (ErrorKind::BlobNotFound, false),
            (ErrorKind::ChecksumMismatch, true),
            (ErrorKind::StorageConnection, true),
            (ErrorKind::StorageTimeout, true),
            (ErrorKind::EngineUnavailable, true),
            (ErrorKind::EngineTimeout, true),
            (ErrorKind::QuotaExceeded, false),
            (ErrorKind::UnsupportedContent, false),
            (ErrorKind::LowImageQuality, false),
            (ErrorKind::Configuration, false),
            (ErrorKind::Database, true),
        ];
        for (kind, retryable) in expected {
            let err = AppError::new(kind, "boom");
            assert_eq!(err.is_retryable(), retryable, "{}", kind);
        }
    }

    #[test]
    fn test_categories_are_closed() {
        for kind in ALL_KINDS {
            let category = kind.category();
            assert!(matches!(
                category,
                ErrorCategory::EmailIngestion
                    | ErrorCategory::Storage
                    | ErrorCategory::Ocr
                    | ErrorCategory::System
            ));
        }
        assert_eq!(ErrorKind::QuotaExceeded.category(), ErrorCategory::Ocr);
        assert_eq!(ErrorKind::IngestAuth.category(), ErrorCategory::EmailIngestion);
        assert_eq!(
            ErrorKind::Configuration.default_severity(),
            ErrorSeverity::Critical
        );
    }

    #[test]
    fn test_ingest_api_retry_depends_on_status() {
        assert!(AppError::ingest_api("rate limited", Some(429)).is_retryable());
        assert!(AppError::ingest_api("bad gateway", Some(502)).is_retryable());
        assert!(!AppError::ingest_api("forbidden", Some(403)).is_retryable());
        assert!(!AppError::ingest_api("unknown", None).is_retryable());
    }

    #[test]
    fn test_override_beats_default() {
        let err = AppError::new(ErrorKind::Database, "constraint").with_retryable(false);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_chain_depth_and_order() {
        let root = AppError::new(ErrorKind::StorageConnection, "A: socket reset");
        let middle = AppError::new(ErrorKind::Storage, "B: upload failed").caused_by(root);
        let outer = AppError::new(ErrorKind::Database, "C: ingest aborted").caused_by(middle);

        let chain = outer.error_chain();
        assert_eq!(chain.len(), 3);
        assert!(chain[0].message.starts_with("C"));
        assert!(chain[1].message.starts_with("B"));
        assert!(chain[2].message.starts_with("A"));
        assert_eq!(chain[2].error_class, "StorageConnectionError");
    }

    #[test]
    fn test_foreign_cause_is_wrapped() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = AppError::wrap(ErrorKind::Storage, "write failed", io);

        let chain = err.error_chain();
        assert_eq!(chain.len(), 2);
        assert!(chain[1].error_class.contains("io"));
        assert_eq!(chain[1].category, "unknown");
        assert_eq!(chain[1].message, "denied");
    }

    #[test]
    fn test_payload_shape() {
        let cid = CorrelationId::from_string("req-1");
        let err = AppError::blob_not_found("documents/ab/cd/x")
            .with_correlation(&cid)
            .with_retry_count(2);

        let json = serde_json::to_value(err.to_payload()).unwrap();
        for field in [
            "error_class",
            "message",
            "category",
            "severity",
            "context",
            "correlation_id",
            "retryable",
            "retry_count",
            "error_chain",
            "timestamp",
        ] {
            assert!(json.get(field).is_some(), "missing {}", field);
        }
        assert_eq!(json["category"], "storage");
        assert_eq!(json["severity"], "warning");
        assert_eq!(json["correlation_id"], "req-1");
        assert_eq!(json["retry_count"], 2);
        assert!(json["error_chain"][0].get("error_chain").is_none());
        assert!(json["error_chain"][0].get("timestamp").is_none());
    }

    #[test]
    fn test_user_facing_hides_detail() {
        let err = AppError::blob_not_found("secret/path");
        let facing = err.user_facing();
        assert_eq!(facing.status, 404);
        assert!(!facing.message.contains("secret"));

        assert_eq!(AppError::validation("priority", "bad").user_facing().status, 400);
        assert_eq!(AppError::new(ErrorKind::Database, "x").user_facing().status, 500);
    }

    #[test]
    fn test_diesel_not_found_maps_to_not_found() {
        let err: AppError = diesel::result::Error::NotFound.into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!err.is_retryable());

        let err: AppError = diesel::result::Error::RollbackTransaction.into();
        assert_eq!(err.kind(), ErrorKind::Database);
        assert!(err.is_retryable());
    }
}
