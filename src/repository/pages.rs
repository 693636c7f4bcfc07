//! Per-page text produced by OCR runs.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::models::DocumentPageRecord;
use super::pool::{DieselError, SqlitePool};
use crate::models::DocumentPage;
use crate::schema::document_pages;

#[derive(Debug, Clone)]
pub struct PageRepository {
    pool: SqlitePool,
}

impl PageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Pages of one run in page order.
    pub async fn for_run(&self, ocr_run_id: &str) -> Result<Vec<DocumentPage>, DieselError> {
        let mut conn = self.pool.get().await?;

        let records: Vec<DocumentPageRecord> = document_pages::table
            .filter(document_pages::ocr_run_id.eq(ocr_run_id))
            .select(DocumentPageRecord::as_select())
            .order(document_pages::page_number.asc())
            .load(&mut conn)
            .await?;
        Ok(records.into_iter().map(DocumentPage::from).collect())
    }

    /// Pages of every run of a document, grouped by run then page.
    pub async fn for_document(&self, document_id: &str) -> Result<Vec<DocumentPage>, DieselError> {
        let mut conn = self.pool.get().await?;

        let records: Vec<DocumentPageRecord> = document_pages::table
            .filter(document_pages::document_id.eq(document_id))
            .select(DocumentPageRecord::as_select())
            .order((document_pages::ocr_run_id.asc(), document_pages::page_number.asc()))
            .load(&mut conn)
            .await?;
        Ok(records.into_iter().map(DocumentPage::from).collect())
    }

    pub async fn count_for_run(&self, ocr_run_id: &str) -> Result<i64, DieselError> {
        let mut conn = self.pool.get().await?;
        document_pages::table
            .filter(document_pages::ocr_run_id.eq(ocr_run_id))
            .count()
            .get_result(&mut conn)
            .await
    }
}
