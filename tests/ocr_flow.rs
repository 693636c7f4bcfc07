//! End-to-end flow over a temporary database and local blob store.
//!
//! Ingests attachments, records engine runs the way a worker would, then
//! checks that selection, comparison and status reporting agree with what
//! was recorded.

use ocrvault::correlation::CorrelationId;
use ocrvault::models::{PageText, ProcessingStatus};
use ocrvault::reporter::ErrorReporter;
use ocrvault::repository::{DbContext, NewRun};
use ocrvault::selection::{SelectionCriteria, SelectionEngine, TextSource, Tier};
use ocrvault::services::{
    Attachment, AttachmentIngestor, EngineOutput, IngestOutcome, OcrRunRecorder,
};
use ocrvault::storage::{BlobStorage, LocalBlobStore, OcrResponseStore};
use serde_json::json;
use tempfile::TempDir;

const PDF_BYTES: &[u8] = b"%PDF-1.4\n1 0 obj << /Type /Catalog >> endobj\ntrailer\n%%EOF";

struct Harness {
    db: DbContext,
    ingestor: AttachmentIngestor,
    recorder: OcrRunRecorder,
    selection: SelectionEngine,
    _dir: TempDir,
}

async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let db = DbContext::from_path(&dir.path().join("ocrvault.db"));
    db.init_schema().await.unwrap();

    let storage = BlobStorage::Local(LocalBlobStore::new(dir.path().join("blobs")));
    let responses = OcrResponseStore::new(storage.clone());

    Harness {
        ingestor: AttachmentIngestor::new(db.clone(), storage),
        recorder: OcrRunRecorder::new(&db, responses.clone(), ErrorReporter::new()),
        selection: SelectionEngine::new(db.clone(), responses, 70.0),
        db,
        _dir: dir,
    }
}

/// Ingest a two-page scan and return its document id.
async fn ingest_scan(h: &Harness, name: &str, bytes: &[u8]) -> String {
    let attachment = Attachment::new(name, bytes.to_vec()).with_page_count(2);
    let outcome = h
        .ingestor
        .ingest(&attachment, &CorrelationId::new())
        .await
        .unwrap();
    outcome.document().unwrap().id.clone()
}

/// Create, start and complete a run in one go.
async fn record_run(h: &Harness, document_id: &str, engine: &str, output: EngineOutput) -> String {
    let cid = CorrelationId::new();
    let run = h
        .recorder
        .create(&NewRun::new(document_id, engine), &cid)
        .await
        .unwrap();
    h.recorder.start(&run.id, &cid).await.unwrap();
    h.recorder.complete(&run.id, &output, &cid).await.unwrap();
    run.id
}

fn pages(texts: &[&str], confidence: f64) -> Vec<PageText> {
    texts
        .iter()
        .enumerate()
        .map(|(i, t)| PageText::new(i as i32 + 1, *t).with_confidence(confidence))
        .collect()
}

#[tokio::test]
async fn concurrent_ingest_of_same_bytes_creates_one_document() {
    let h = harness().await;
    let cid = CorrelationId::new();
    let first = Attachment::new("report.pdf", PDF_BYTES.to_vec());
    let second = Attachment::new("report-copy.pdf", PDF_BYTES.to_vec());

    let (cid_a, cid_b) = (cid.child(), cid.child());
    let (a, b) = tokio::join!(
        h.ingestor.ingest(&first, &cid_a),
        h.ingestor.ingest(&second, &cid_b)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.document().unwrap().id, b.document().unwrap().id);
    assert_eq!(
        [a.is_created(), b.is_created()].iter().filter(|c| **c).count(),
        1
    );
    assert_eq!(h.db.documents().count().await.unwrap(), 1);
    assert_eq!(a.document().unwrap().content_type, "application/pdf");
}

#[tokio::test]
async fn skipped_attachments_are_not_stored() {
    let h = harness().await;
    let outcome = h
        .ingestor
        .ingest(
            &Attachment::new("Thumbs.db", b"cache".to_vec()),
            &CorrelationId::new(),
        )
        .await
        .unwrap();

    assert!(matches!(outcome, IngestOutcome::Skipped { .. }));
    assert_eq!(h.db.documents().count().await.unwrap(), 0);
}

#[tokio::test]
async fn selection_prefers_confident_complete_run_and_its_raw_response() {
    let h = harness().await;
    let doc_id = ingest_scan(&h, "scan.pdf", PDF_BYTES).await;

    let weak = record_run(
        &h,
        &doc_id,
        "tesseract",
        EngineOutput {
            pages: pages(&["alpha beta", "gamma delta epsilon"], 55.0),
            latency_ms: Some(400),
            ..Default::default()
        },
    )
    .await;
    let strong = record_run(
        &h,
        &doc_id,
        "azure",
        EngineOutput {
            pages: pages(&["alpha beta", "gamma delta"], 96.0),
            raw_response: Some(json!({
                "pages": [{ "text": "Alpha beta" }, { "content": "Gamma delta" }]
            })),
            latency_ms: Some(1200),
            ..Default::default()
        },
    )
    .await;

    // Preview decides but writes nothing.
    let preview = h
        .selection
        .preview(&doc_id, SelectionCriteria::Policy, &CorrelationId::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(preview.run_id, strong);
    assert!(!preview.applied);
    let untouched = h.db.documents().get(&doc_id).await.unwrap().unwrap();
    assert!(untouched.ocr_engine.is_none());
    assert_eq!(untouched.status, ProcessingStatus::Pending);

    let report = h
        .selection
        .select_canonical(&doc_id, SelectionCriteria::Policy, &CorrelationId::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.run_id, strong);
    assert_eq!(report.tier, Some(Tier::HighConfidence));
    assert_eq!(report.text_source, TextSource::RawResponse);

    let doc = h.db.documents().get(&doc_id).await.unwrap().unwrap();
    assert_eq!(doc.ocr_engine.as_deref(), Some("azure"));
    assert_eq!(doc.extracted_text.as_deref(), Some("Alpha beta\n\nGamma delta"));
    assert_eq!(doc.word_count, Some(4));
    assert_eq!(doc.status, ProcessingStatus::Completed);
    assert!(doc.processed_at.is_some());

    // Selecting again over the same runs writes the same result.
    let again = h
        .selection
        .select_canonical(&doc_id, SelectionCriteria::Policy, &CorrelationId::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.run_id, strong);

    // Word count prefers the longer run.
    let by_words = h
        .selection
        .preview(&doc_id, SelectionCriteria::WordCount, &CorrelationId::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_words.run_id, weak);
    assert_eq!(by_words.text_source, TextSource::Pages);
}

#[tokio::test]
async fn failed_runs_are_never_selected() {
    let h = harness().await;
    let doc_id = ingest_scan(&h, "fax.pdf", PDF_BYTES).await;
    let cid = CorrelationId::new();

    let run = h
        .recorder
        .create(&NewRun::new(&doc_id, "google"), &cid)
        .await
        .unwrap();
    h.recorder.start(&run.id, &cid).await.unwrap();
    h.recorder
        .fail(&run.id, "QuotaExceededError", "quota exhausted", &cid)
        .await
        .unwrap();

    let report = h
        .selection
        .select_canonical(&doc_id, SelectionCriteria::Policy, &cid)
        .await
        .unwrap();
    assert!(report.is_none());

    let status = h.selection.document_status(&doc_id).await.unwrap();
    assert_eq!(status.runs.total, 1);
    assert_eq!(status.runs.failed, 1);
    assert!(status.best.is_none());
    assert_eq!(status.engines, vec!["google".to_string()]);
}

#[tokio::test]
async fn compare_reports_best_per_metric_and_missing_ids() {
    let h = harness().await;
    let doc_id = ingest_scan(&h, "letter.pdf", PDF_BYTES).await;

    let fast = record_run(
        &h,
        &doc_id,
        "tesseract",
        EngineOutput {
            pages: pages(&["one two"], 60.0),
            latency_ms: Some(100),
            cost_cents: Some(0),
            ..Default::default()
        },
    )
    .await;
    let thorough = record_run(
        &h,
        &doc_id,
        "azure",
        EngineOutput {
            pages: pages(&["one two three", "four five"], 92.0),
            latency_ms: Some(900),
            cost_cents: Some(2),
            ..Default::default()
        },
    )
    .await;

    let ids = vec![thorough.clone(), "no-such-run".to_string(), fast.clone()];
    let comparison = h.selection.compare_runs(&ids, &CorrelationId::new()).await.unwrap();

    assert_eq!(comparison.missing, vec!["no-such-run".to_string()]);
    assert_eq!(comparison.runs.len(), 2);
    assert_eq!(comparison.best.highest_confidence.as_deref(), Some(thorough.as_str()));
    assert_eq!(comparison.best.most_words.as_deref(), Some(thorough.as_str()));
    assert_eq!(comparison.best.most_pages.as_deref(), Some(thorough.as_str()));
    assert_eq!(comparison.best.fastest.as_deref(), Some(fast.as_str()));
    assert_eq!(comparison.best.cheapest.as_deref(), Some(fast.as_str()));

    let status = h.selection.document_status(&doc_id).await.unwrap();
    assert_eq!(status.runs.completed, 2);
    assert_eq!(status.best.map(|b| b.run_id), Some(thorough));
}
