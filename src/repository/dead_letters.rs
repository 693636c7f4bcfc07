//! Abandoned units of work, kept for manual inspection.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::format_timestamp;
use super::models::{DeadLetterRecord, LastInsertRowId, NewDeadLetter};
use super::pool::{DieselError, SqlitePool};
use crate::models::DeadLetter;
use crate::schema::dead_letters;

#[derive(Debug, Clone)]
pub struct DeadLetterRepository {
    pool: SqlitePool,
}

impl DeadLetterRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store an abandoned unit and return its id.
    pub async fn insert(
        &self,
        operation: &str,
        correlation_id: &str,
        payload: &serde_json::Value,
        error: &serde_json::Value,
    ) -> Result<i32, DieselError> {
        let mut conn = self.pool.get().await?;
        let created_at = format_timestamp(Utc::now());
        let payload = payload.to_string();
        let error = error.to_string();

        let row_id = conn
            .transaction(|conn| {
                Box::pin(async move {
                    diesel::insert_into(dead_letters::table)
                        .values(NewDeadLetter {
                            operation,
                            correlation_id,
                            payload: &payload,
                            error: &error,
                            created_at: &created_at,
                        })
                        .execute(conn)
                        .await?;

                    let row: LastInsertRowId =
                        diesel::sql_query("SELECT last_insert_rowid()")
                            .get_result(conn)
                            .await?;
                    Ok::<_, DieselError>(row.id)
                })
            })
            .await?;

        Ok(row_id as i32)
    }

    /// Newest first.
    pub async fn list(&self, limit: i64) -> Result<Vec<DeadLetter>, DieselError> {
        let mut conn = self.pool.get().await?;

        let records: Vec<DeadLetterRecord> = dead_letters::table
            .select(DeadLetterRecord::as_select())
            .order(dead_letters::id.desc())
            .limit(limit)
            .load(&mut conn)
            .await?;
        Ok(records.into_iter().map(DeadLetter::from).collect())
    }

    pub async fn get(&self, id: i32) -> Result<Option<DeadLetter>, DieselError> {
        let mut conn = self.pool.get().await?;

        dead_letters::table
            .find(id)
            .select(DeadLetterRecord::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map(|r| r.map(DeadLetter::from))
    }

    pub async fn count(&self) -> Result<i64, DieselError> {
        let mut conn = self.pool.get().await?;
        dead_letters::table.count().get_result(&mut conn).await
    }

    pub async fn delete(&self, id: i32) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().await?;
        let rows = diesel::delete(dead_letters::table.find(id))
            .execute(&mut conn)
            .await?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::repository::DbContext;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_insert_list_delete() {
        let dir = TempDir::new().unwrap();
        let ctx = DbContext::from_path(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        let repo = ctx.dead_letters();

        let first = repo
            .insert("ocr_attempt", "cid-1", &json!({"run": 1}), &json!({"error_type": "QuotaExceededError"}))
            .await
            .unwrap();
        let second = repo
            .insert("ingest_attachment", "cid-2", &json!({"file": "a.pdf"}), &json!({}))
            .await
            .unwrap();
        assert!(second > first);

        let listed = repo.list(10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].operation, "ingest_attachment");

        let stored = repo.get(first).await.unwrap().unwrap();
        assert_eq!(stored.correlation_id, "cid-1");
        assert_eq!(stored.error["error_type"], "QuotaExceededError");

        assert!(repo.delete(first).await.unwrap());
        assert!(!repo.delete(first).await.unwrap());
        assert_eq!(repo.count().await.unwrap(), 1);
    }
}
