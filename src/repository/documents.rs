//! Document repository.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use tracing::debug;

use super::format_timestamp;
use super::models::{DocumentRecord, NewDocument};
use super::pool::{DieselError, SqlitePool};
use super::util::is_unique_violation;
use crate::models::{Document, ProcessingStatus};
use crate::schema::{documents, ocr_runs};

/// Canonical fields copied from a selected run onto its document.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalResult {
    pub run_id: String,
    pub engine: String,
    pub confidence: Option<f64>,
    pub pages_parsed: Option<i32>,
    pub word_count: Option<i32>,
    pub extracted_text: String,
}

#[derive(Debug, Clone)]
pub struct DocumentRepository {
    pool: SqlitePool,
}

impl DocumentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: &str) -> Result<Option<Document>, DieselError> {
        let mut conn = self.pool.get().await?;

        documents::table
            .find(id)
            .select(DocumentRecord::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map(|r| r.map(Document::from))
    }

    pub async fn get_by_hash(&self, content_hash: &str) -> Result<Option<Document>, DieselError> {
        let mut conn = self.pool.get().await?;

        documents::table
            .filter(documents::content_hash.eq(content_hash))
            .select(DocumentRecord::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map(|r| r.map(Document::from))
    }

    /// Insert a new document. Fails with `UniqueViolation` if the hash exists.
    pub async fn insert(&self, doc: &Document) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        let created_at = format_timestamp(doc.created_at);
        let updated_at = format_timestamp(doc.updated_at);
        diesel::insert_into(documents::table)
            .values(NewDocument {
                id: &doc.id,
                content_hash: &doc.content_hash,
                filename: &doc.filename,
                content_type: &doc.content_type,
                size_bytes: doc.size_bytes,
                storage_path: &doc.storage_path,
                page_count: doc.page_count,
                extracted_text: doc.extracted_text.as_deref(),
                processing_status: doc.status.as_str(),
                created_at: &created_at,
                updated_at: &updated_at,
            })
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    /// Insert `doc` unless a document with the same hash exists.
    ///
    /// Returns the stored row and whether this call created it. A concurrent
    /// insert of the same content surfaces as a uniqueness violation, which
    /// resolves to the row that won.
    pub async fn get_or_create(&self, doc: Document) -> Result<(Document, bool), DieselError> {
        if let Some(existing) = self.get_by_hash(&doc.content_hash).await? {
            return Ok((existing, false));
        }

        match self.insert(&doc).await {
            Ok(()) => Ok((doc, true)),
            Err(e) if is_unique_violation(&e) => {
                debug!(hash = %doc.content_hash, "Lost insert race, reusing existing document");
                match self.get_by_hash(&doc.content_hash).await? {
                    Some(existing) => Ok((existing, false)),
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Newest first.
    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Document>, DieselError> {
        let mut conn = self.pool.get().await?;

        let records: Vec<DocumentRecord> = documents::table
            .select(DocumentRecord::as_select())
            .order((documents::created_at.desc(), documents::id.desc()))
            .limit(limit)
            .offset(offset)
            .load(&mut conn)
            .await?;
        Ok(records.into_iter().map(Document::from).collect())
    }

    pub async fn count(&self) -> Result<i64, DieselError> {
        let mut conn = self.pool.get().await?;
        documents::table.count().get_result(&mut conn).await
    }

    /// Set processing status, recording `error` for failures.
    pub async fn update_status(
        &self,
        id: &str,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().await?;
        let updated_at = format_timestamp(Utc::now());

        let rows = diesel::update(documents::table.find(id))
            .set((
                documents::processing_status.eq(status.as_str()),
                documents::processing_error.eq(error),
                documents::updated_at.eq(&updated_at),
            ))
            .execute(&mut conn)
            .await?;
        Ok(rows > 0)
    }

    /// Write a selected run's results onto the document in one transaction.
    ///
    /// Returns `None` without writing if the document is missing or the run
    /// is not a completed run of this document.
    pub async fn apply_canonical(
        &self,
        document_id: &str,
        result: &CanonicalResult,
    ) -> Result<Option<Document>, DieselError> {
        let mut conn = self.pool.get().await?;
        let now = format_timestamp(Utc::now());

        conn.transaction(|conn| {
            Box::pin(async move {
                let completed_run = ocr_runs::table
                    .filter(ocr_runs::id.eq(&result.run_id))
                    .filter(ocr_runs::document_id.eq(document_id))
                    .filter(ocr_runs::status.eq(ProcessingStatus::Completed.as_str()));

                let rows = diesel::update(
                    documents::table
                        .filter(documents::id.eq(document_id))
                        .filter(diesel::dsl::exists(completed_run)),
                )
                .set((
                    documents::extracted_text.eq(Some(result.extracted_text.as_str())),
                    documents::ocr_engine.eq(Some(result.engine.as_str())),
                    documents::ocr_confidence.eq(result.confidence),
                    documents::pages_parsed.eq(result.pages_parsed),
                    documents::word_count.eq(result.word_count),
                    documents::processing_status.eq(ProcessingStatus::Completed.as_str()),
                    documents::processing_error.eq(None::<String>),
                    documents::processed_at.eq(Some(&now)),
                    documents::updated_at.eq(&now),
                ))
                .execute(conn)
                .await?;

                if rows == 0 {
                    return Ok(None);
                }

                let record: DocumentRecord = documents::table
                    .find(document_id)
                    .select(DocumentRecord::as_select())
                    .first(conn)
                    .await?;
                Ok(Some(record.into()))
            })
        })
        .await
    }

    /// Delete a document; runs and pages go with it.
    pub async fn delete(&self, id: &str) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().await?;
        let rows = diesel::delete(documents::table.find(id))
            .execute(&mut conn)
            .await?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::DbContext;
    use tempfile::TempDir;

    async fn setup_test_db() -> (DbContext, TempDir) {
        let dir = TempDir::new().unwrap();
        let ctx = DbContext::from_path(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        (ctx, dir)
    }

    fn doc(hash: &str) -> Document {
        Document::new(
            hash.to_string(),
            "scan.pdf".to_string(),
            "application/pdf".to_string(),
            1024,
            format!("documents/{}/{}", hash, "scan.pdf"),
        )
    }

    #[tokio::test]
    async fn test_get_or_create_dedups() {
        let (ctx, _dir) = setup_test_db().await;
        let repo = ctx.documents();

        let (first, created) = repo.get_or_create(doc("aaaa")).await.unwrap();
        assert!(created);
        let (second, created) = repo.get_or_create(doc("aaaa")).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_unique_violation() {
        let (ctx, _dir) = setup_test_db().await;
        let repo = ctx.documents();

        repo.insert(&doc("bbbb")).await.unwrap();
        let err = repo.insert(&doc("bbbb")).await.unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_apply_canonical_requires_completed_run() {
        let (ctx, _dir) = setup_test_db().await;
        let repo = ctx.documents();
        let (document, _) = repo.get_or_create(doc("cccc")).await.unwrap();

        let result = CanonicalResult {
            run_id: "missing-run".to_string(),
            engine: "azure".to_string(),
            confidence: Some(90.0),
            pages_parsed: Some(1),
            word_count: Some(3),
            extracted_text: "hello world again".to_string(),
        };
        assert!(repo.apply_canonical(&document.id, &result).await.unwrap().is_none());

        let unchanged = repo.get(&document.id).await.unwrap().unwrap();
        assert!(unchanged.extracted_text.is_none());
        assert_eq!(unchanged.status, ProcessingStatus::Pending);
    }

    #[tokio::test]
    async fn test_update_status_records_error() {
        let (ctx, _dir) = setup_test_db().await;
        let repo = ctx.documents();
        let (document, _) = repo.get_or_create(doc("dddd")).await.unwrap();

        assert!(repo
            .update_status(&document.id, ProcessingStatus::Failed, Some("engine quota"))
            .await
            .unwrap());
        let failed = repo.get(&document.id).await.unwrap().unwrap();
        assert_eq!(failed.status, ProcessingStatus::Failed);
        assert_eq!(failed.processing_error.as_deref(), Some("engine quota"));
        assert!(!repo.update_status("nope", ProcessingStatus::Failed, None).await.unwrap());
    }
}
