//! ocrvault: content-addressed attachment storage with multi-engine OCR
//! reconciliation.
//!
//! Attachments are stored once by content hash. Every OCR engine pass over a
//! document is recorded as its own run; a deterministic policy picks the
//! canonical run and writes its text back onto the document. Failures carry
//! a classified error, a correlation id and, when abandoned, a dead letter.

pub mod config;
pub mod correlation;
pub mod error;
pub mod models;
pub mod registry;
pub mod reporter;
pub mod repository;
pub mod reprocess;
pub mod schema;
pub mod selection;
pub mod services;
pub mod storage;
pub mod work;

pub use correlation::CorrelationId;
pub use error::{AppError, ErrorCategory, ErrorKind, ErrorSeverity};
