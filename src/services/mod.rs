//! Service layer for ocrvault pipeline stages.
//!
//! Each stage is an explicit struct built from its collaborators; the CLI
//! and the work units in [`pipeline`] are the callers.

pub mod ingest;
pub mod ocr_runs;
pub mod pipeline;

pub use ingest::{
    Attachment, AttachmentIngestor, AttachmentPayload, IngestAttachment, IngestOutcome, SkipReason,
};
pub use ocr_runs::{calculate_metrics, EngineOutput, OcrRunRecorder};
pub use pipeline::{OcrAttempt, OcrEngine, SelectCanonical};
