//! Attachment ingestion into the content-addressed store.
//!
//! One call handles one attachment: skip rules, content-type resolution,
//! deduplicated upload and the document row. Identical bytes always land on
//! the same key and the same document, however many callers race.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::correlation::CorrelationId;
use crate::error::{AppError, ErrorKind};
use crate::models::Document;
use crate::repository::DbContext;
use crate::storage::{compute_hash, document_key, BlobStorage, BlobStore, DEFAULT_CONTENT_TYPE};
use crate::work::UnitOfWork;

/// Extensions never worth storing: executables, scripts, archives, temp files.
const SKIP_EXTENSIONS: &[&str] = &[
    "tmp", "temp", "swp", "lock", "lnk", "exe", "bat", "cmd", "com", "pif", "scr", "vbs", "js",
    "jse", "jar", "wsf", "wsh", "msi", "dll", "zip", "rar", "7z", "tar", "gz", "tgz", "bz2",
];

/// Filenames left behind by desktop tooling.
const SKIP_NAMES: &[&str] = &["thumbs.db", ".ds_store", "desktop.ini"];

/// Office lock-file prefix.
const LOCK_FILE_PREFIX: &str = "~$";

const SKIP_CONTENT_TYPES: &[&str] = &[
    "text/html",
    "text/calendar",
    "application/x-msdownload",
    "application/x-executable",
];

/// Content types whose bytes double as extracted text.
const TEXT_CONTENT_TYPES: &[&str] = &["text/plain", "text/csv", "text/markdown"];

/// Cap on initial extracted text, in chars.
const MAX_INITIAL_TEXT_CHARS: usize = 1_000_000;

/// Raw attachment bytes with what the sender claimed about them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    /// Page count declared by the source, if any.
    pub page_count: Option<i32>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: None,
            bytes,
            page_count: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_page_count(mut self, page_count: i32) -> Self {
        self.page_count = Some(page_count);
        self
    }
}

/// An attachment as it arrives from a mail source: base64 body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentPayload {
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
    /// Standard or URL-safe base64, padded or not.
    pub data: String,
    #[serde(default)]
    pub page_count: Option<i32>,
}

impl AttachmentPayload {
    pub fn encode(attachment: &Attachment) -> Self {
        Self {
            filename: attachment.filename.clone(),
            content_type: attachment.content_type.clone(),
            data: base64::engine::general_purpose::STANDARD.encode(&attachment.bytes),
            page_count: attachment.page_count,
        }
    }

    /// Decode into an [`Attachment`]; undecodable data is `MalformedPayload`.
    pub fn decode(&self) -> Result<Attachment, AppError> {
        let data: String = self.data.chars().filter(|c| !c.is_whitespace()).collect();
        let trimmed = data.trim_end_matches('=');

        let bytes = base64::engine::general_purpose::STANDARD_NO_PAD
            .decode(trimmed)
            .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(trimmed))
            .map_err(|e| {
                AppError::wrap(
                    ErrorKind::MalformedPayload,
                    "attachment data is not valid base64",
                    e,
                )
                .with_context("filename", self.filename.as_str())
                .with_context("encoded_length", self.data.len())
            })?;

        Ok(Attachment {
            filename: self.filename.clone(),
            content_type: self.content_type.clone(),
            bytes,
            page_count: self.page_count,
        })
    }
}

/// Why an attachment was not stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SkipReason {
    Empty,
    Extension(String),
    Filename(String),
    ContentType(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty payload"),
            Self::Extension(ext) => write!(f, "skipped extension .{}", ext),
            Self::Filename(name) => write!(f, "skipped filename {}", name),
            Self::ContentType(ct) => write!(f, "skipped content type {}", ct),
        }
    }
}

#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Created(Document),
    /// Same content was already stored.
    Existing(Document),
    Skipped { filename: String, reason: SkipReason },
}

impl IngestOutcome {
    pub fn document(&self) -> Option<&Document> {
        match self {
            Self::Created(doc) | Self::Existing(doc) => Some(doc),
            Self::Skipped { .. } => None,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

fn extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// `type/subtype` without parameters, lowercased.
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Filename-based skip rules, checked before anything is read.
fn skip_by_name(filename: &str) -> Option<SkipReason> {
    let lower = filename.to_ascii_lowercase();
    let base = Path::new(&lower)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(&lower)
        .to_string();

    if SKIP_NAMES.contains(&base.as_str()) || base.starts_with(LOCK_FILE_PREFIX) {
        return Some(SkipReason::Filename(filename.to_string()));
    }

    match extension(&base) {
        Some(ext) if SKIP_EXTENSIONS.contains(&ext.as_str()) => Some(SkipReason::Extension(ext)),
        _ => None,
    }
}

/// The declared type unless it is absent or generic, then magic bytes, then
/// the filename, then `application/octet-stream`.
pub fn resolve_content_type(declared: Option<&str>, bytes: &[u8], filename: &str) -> String {
    if let Some(declared) = declared.map(essence) {
        if !declared.is_empty() && declared != DEFAULT_CONTENT_TYPE {
            return declared;
        }
    }

    if let Some(kind) = infer::get(bytes) {
        return kind.mime_type().to_string();
    }

    mime_guess::from_path(filename)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
}

/// Text stored on the document at ingest for plain-text attachments.
fn initial_text(content_type: &str, bytes: &[u8]) -> Option<String> {
    if !TEXT_CONTENT_TYPES.contains(&content_type) {
        return None;
    }

    let text = String::from_utf8_lossy(bytes);
    let text = match text.char_indices().nth(MAX_INITIAL_TEXT_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => &text,
    };
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Stores attachments and their document rows.
#[derive(Debug, Clone)]
pub struct AttachmentIngestor {
    db: DbContext,
    storage: BlobStorage,
}

impl AttachmentIngestor {
    pub fn new(db: DbContext, storage: BlobStorage) -> Self {
        Self { db, storage }
    }

    pub async fn ingest(
        &self,
        attachment: &Attachment,
        cid: &CorrelationId,
    ) -> Result<IngestOutcome, AppError> {
        let filename = attachment.filename.as_str();

        let skip = if attachment.bytes.is_empty() {
            Some(SkipReason::Empty)
        } else {
            skip_by_name(filename)
        };
        if let Some(reason) = skip {
            debug!(correlation_id = %cid, filename, %reason, "Skipping attachment");
            return Ok(IngestOutcome::Skipped {
                filename: filename.to_string(),
                reason,
            });
        }

        let content_type =
            resolve_content_type(attachment.content_type.as_deref(), &attachment.bytes, filename);
        if SKIP_CONTENT_TYPES.contains(&content_type.as_str()) {
            let reason = SkipReason::ContentType(content_type);
            debug!(correlation_id = %cid, filename, %reason, "Skipping attachment");
            return Ok(IngestOutcome::Skipped {
                filename: filename.to_string(),
                reason,
            });
        }

        let hash = compute_hash(&attachment.bytes);
        let documents = self.db.documents();

        if let Some(existing) = documents
            .get_by_hash(&hash)
            .await
            .map_err(|e| AppError::database("find document by hash", e).with_correlation(cid))?
        {
            debug!(correlation_id = %cid, document_id = %existing.id, hash = %hash, "Content already stored");
            return Ok(IngestOutcome::Existing(existing));
        }

        let key = document_key(&hash, filename);
        self.storage
            .upload(&key, &attachment.bytes, &content_type)
            .await
            .map_err(|e| e.with_context("filename", filename).with_correlation(cid))?;

        let mut document = Document::new(
            hash,
            filename.to_string(),
            content_type,
            attachment.bytes.len() as i64,
            key,
        );
        document.page_count = attachment.page_count;
        document.extracted_text = initial_text(&document.content_type, &attachment.bytes);

        let (document, created) = documents
            .get_or_create(document)
            .await
            .map_err(|e| AppError::database("insert document", e).with_correlation(cid))?;

        if created {
            info!(
                correlation_id = %cid,
                document_id = %document.id,
                filename,
                content_type = %document.content_type,
                size = document.size_bytes,
                "Stored attachment"
            );
            Ok(IngestOutcome::Created(document))
        } else {
            debug!(correlation_id = %cid, document_id = %document.id, "Concurrent ingest won, reusing document");
            Ok(IngestOutcome::Existing(document))
        }
    }
}

/// Ingest one encoded attachment as a unit of work.
#[derive(Debug, Clone)]
pub struct IngestAttachment {
    ingestor: AttachmentIngestor,
    payload: AttachmentPayload,
}

impl IngestAttachment {
    pub fn new(ingestor: AttachmentIngestor, payload: AttachmentPayload) -> Self {
        Self { ingestor, payload }
    }
}

#[async_trait]
impl UnitOfWork for IngestAttachment {
    type Output = IngestOutcome;

    fn name(&self) -> &str {
        "ingest_attachment"
    }

    fn payload(&self) -> Value {
        serde_json::to_value(&self.payload).unwrap_or(Value::Null)
    }

    async fn run(&self, cid: &CorrelationId) -> Result<IngestOutcome, AppError> {
        let attachment = self
            .payload
            .decode()
            .map_err(|e| e.with_correlation(cid))?;
        self.ingestor.ingest(&attachment, cid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalBlobStore;
    use tempfile::TempDir;

    const PDF_BYTES: &[u8] = b"%PDF-1.4\n1 0 obj << /Type /Catalog >> endobj\ntrailer\n%%EOF";

    async fn setup() -> (AttachmentIngestor, DbContext, BlobStorage, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = DbContext::from_path(&dir.path().join("test.db"));
        db.init_schema().await.unwrap();
        let storage = BlobStorage::Local(LocalBlobStore::new(dir.path().join("blobs")));
        let ingestor = AttachmentIngestor::new(db.clone(), storage.clone());
        (ingestor, db, storage, dir)
    }

    #[test]
    fn test_skip_by_name() {
        assert_eq!(
            skip_by_name("setup.EXE"),
            Some(SkipReason::Extension("exe".into()))
        );
        assert_eq!(
            skip_by_name("~$report.docx"),
            Some(SkipReason::Filename("~$report.docx".into()))
        );
        assert!(skip_by_name("Thumbs.db").is_some());
        assert!(skip_by_name("bundle.tar.gz").is_some());
        assert_eq!(skip_by_name("invoice.pdf"), None);
        assert_eq!(skip_by_name("no_extension"), None);
    }

    #[test]
    fn test_resolve_content_type() {
        assert_eq!(
            resolve_content_type(Some("Application/PDF; name=x.pdf"), b"", "x.bin"),
            "application/pdf"
        );
        // Generic declarations fall through to the bytes.
        assert_eq!(
            resolve_content_type(Some("application/octet-stream"), PDF_BYTES, "scan"),
            "application/pdf"
        );
        assert_eq!(resolve_content_type(None, b"a,b\n1,2\n", "table.csv"), "text/csv");
        assert_eq!(
            resolve_content_type(None, b"\x00\x01opaque", "blob"),
            DEFAULT_CONTENT_TYPE
        );
    }

    #[test]
    fn test_initial_text_only_for_text_types() {
        assert_eq!(
            initial_text("text/plain", b"  hello inbox \n"),
            Some("hello inbox".to_string())
        );
        assert_eq!(initial_text("application/pdf", PDF_BYTES), None);
        assert_eq!(initial_text("text/csv", b"   "), None);
    }

    #[test]
    fn test_payload_decoding() {
        let attachment = Attachment::new("a.txt", b"\xfb\xff binary-ish".to_vec());
        let payload = AttachmentPayload::encode(&attachment);
        assert_eq!(payload.decode().unwrap(), attachment);

        let url_safe = AttachmentPayload {
            data: base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&attachment.bytes),
            ..payload.clone()
        };
        assert_eq!(url_safe.decode().unwrap().bytes, attachment.bytes);

        let broken = AttachmentPayload {
            data: "not base64 at all!".into(),
            ..payload
        };
        let err = broken.decode().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedPayload);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_ingest_stores_and_dedups() {
        let (ingestor, db, storage, _dir) = setup().await;
        let cid = CorrelationId::new();

        let attachment = Attachment::new("scan.pdf", PDF_BYTES.to_vec()).with_page_count(3);
        let first = ingestor.ingest(&attachment, &cid).await.unwrap();
        assert!(first.is_created());
        let doc = first.document().unwrap().clone();
        assert_eq!(doc.content_type, "application/pdf");
        assert_eq!(doc.page_count, Some(3));
        assert_eq!(doc.storage_path, document_key(&doc.content_hash, "scan.pdf"));
        assert_eq!(storage.download(&doc.storage_path).await.unwrap().bytes, PDF_BYTES);

        let renamed = Attachment::new("copy of scan.pdf", PDF_BYTES.to_vec());
        match ingestor.ingest(&renamed, &cid).await.unwrap() {
            IngestOutcome::Existing(existing) => assert_eq!(existing.id, doc.id),
            other => panic!("expected existing document, got {:?}", other),
        }
        assert_eq!(db.documents().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ingest_skips() {
        let (ingestor, db, _storage, _dir) = setup().await;
        let cid = CorrelationId::new();

        let cases = [
            Attachment::new("empty.pdf", Vec::new()),
            Attachment::new("run.exe", b"MZ".to_vec()),
            Attachment::new("body", b"<html></html>".to_vec()).with_content_type("text/html"),
            Attachment::new("invite.ics", b"BEGIN:VCALENDAR".to_vec())
                .with_content_type("text/calendar; method=REQUEST"),
        ];
        for attachment in &cases {
            let outcome = ingestor.ingest(attachment, &cid).await.unwrap();
            assert!(
                matches!(outcome, IngestOutcome::Skipped { .. }),
                "{} should be skipped",
                attachment.filename
            );
        }
        assert_eq!(db.documents().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_text_attachment_gets_initial_text() {
        let (ingestor, _db, _storage, _dir) = setup().await;
        let attachment = Attachment::new("notes.txt", b"Meeting moved to Friday".to_vec());

        let outcome = ingestor.ingest(&attachment, &CorrelationId::new()).await.unwrap();
        let doc = outcome.document().unwrap();
        assert_eq!(doc.content_type, "text/plain");
        assert_eq!(doc.extracted_text.as_deref(), Some("Meeting moved to Friday"));
    }

    #[tokio::test]
    async fn test_unit_of_work_rejects_malformed_payload() {
        let (ingestor, _db, _storage, _dir) = setup().await;
        let unit = IngestAttachment::new(
            ingestor,
            AttachmentPayload {
                filename: "x.pdf".into(),
                content_type: None,
                data: "%%%".into(),
                page_count: None,
            },
        );
        let cid = CorrelationId::new();
        let err = unit.run(&cid).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedPayload);
        assert_eq!(err.correlation_id(), Some(&cid));
        assert_eq!(unit.payload()["filename"], "x.pdf");
    }
}
