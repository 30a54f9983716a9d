//! SQLite-backed [`StateStore`] implementation.
//!
//! One row per song in `ingestion_state`. Every transition is a single
//! statement, so it is committed (WAL) before the method returns. The
//! `pending` claim is a conditional upsert: the row is only written when no
//! other worker holds a fresh `pending` lease, and `rows_affected` tells the
//! caller whether it won.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use songscope_core::models::{IngestionRecord, IngestionStatus};
use songscope_core::state::{invalid_transition, StateStore};

pub struct SqliteStateStore {
    pool: SqlitePool,
    lease_secs: i64,
}

impl SqliteStateStore {
    pub fn new(pool: SqlitePool, lease_secs: i64) -> Self {
        Self { pool, lease_secs }
    }

    /// Build the error for an update that matched no `pending` row.
    async fn reject(&self, song_id: &str, to: IngestionStatus) -> anyhow::Error {
        match self.get(song_id).await {
            Ok(current) => invalid_transition(song_id, current.map(|r| r.status), to),
            Err(e) => e,
        }
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn row_to_record(row: &SqliteRow) -> Result<IngestionRecord> {
    let status: String = row.get("status");
    Ok(IngestionRecord {
        song_id: row.get("song_id"),
        content_hash: row.get("content_hash"),
        status: status.parse()?,
        updated_at: row.get("updated_at"),
        error: row.get("error"),
        chunk_count: row.get("chunk_count"),
    })
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get(&self, song_id: &str) -> Result<Option<IngestionRecord>> {
        let row = sqlx::query(
            "SELECT song_id, content_hash, status, updated_at, error, chunk_count \
             FROM ingestion_state WHERE song_id = ?",
        )
        .bind(song_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn mark_pending(&self, song_id: &str, content_hash: &str) -> Result<bool> {
        let now = now();
        // With a zero lease every existing row is claimable.
        let stale_before = if self.lease_secs > 0 {
            now - self.lease_secs
        } else {
            i64::MAX
        };

        let result = sqlx::query(
            r#"
            INSERT INTO ingestion_state (song_id, content_hash, status, updated_at, error, chunk_count)
            VALUES (?, ?, 'pending', ?, NULL, 0)
            ON CONFLICT(song_id) DO UPDATE SET
                content_hash = excluded.content_hash,
                status = 'pending',
                updated_at = excluded.updated_at,
                error = NULL
            WHERE ingestion_state.status != 'pending'
               OR ingestion_state.updated_at <= ?
            "#,
        )
        .bind(song_id)
        .bind(content_hash)
        .bind(now)
        .bind(stale_before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reserve_chunks(&self, song_id: &str, chunk_count: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE ingestion_state SET chunk_count = MAX(chunk_count, ?) \
             WHERE song_id = ? AND status = 'pending'",
        )
        .bind(chunk_count)
        .bind(song_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.reject(song_id, IngestionStatus::Pending).await);
        }
        Ok(())
    }

    async fn mark_ingested(
        &self,
        song_id: &str,
        content_hash: &str,
        chunk_count: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE ingestion_state
            SET content_hash = ?, status = 'ingested', updated_at = ?, error = NULL, chunk_count = ?
            WHERE song_id = ? AND status = 'pending'
            "#,
        )
        .bind(content_hash)
        .bind(now())
        .bind(chunk_count)
        .bind(song_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.reject(song_id, IngestionStatus::Ingested).await);
        }
        Ok(())
    }

    async fn mark_failed(&self, song_id: &str, error: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE ingestion_state
            SET status = 'failed', updated_at = ?, error = ?
            WHERE song_id = ? AND status = 'pending'
            "#,
        )
        .bind(now())
        .bind(error)
        .bind(song_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.reject(song_id, IngestionStatus::Failed).await);
        }
        Ok(())
    }

    async fn remove(&self, song_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM ingestion_state WHERE song_id = ?")
            .bind(song_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<IngestionRecord>> {
        let rows = sqlx::query(
            "SELECT song_id, content_hash, status, updated_at, error, chunk_count \
             FROM ingestion_state ORDER BY song_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use songscope_core::error::HarnessError;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store(lease_secs: i64) -> SqliteStateStore {
        // One connection so every query sees the same in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::apply(&pool).await.unwrap();
        SqliteStateStore::new(pool, lease_secs)
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let s = store(900).await;
        assert!(s.mark_pending("a", "h1").await.unwrap());
        s.reserve_chunks("a", 4).await.unwrap();
        s.reserve_chunks("a", 2).await.unwrap();
        assert_eq!(s.get("a").await.unwrap().unwrap().chunk_count, 4);

        s.mark_ingested("a", "h1", 4).await.unwrap();
        let rec = s.get("a").await.unwrap().unwrap();
        assert_eq!(rec.status, IngestionStatus::Ingested);
        assert_eq!(rec.content_hash, "h1");

        // ingested -> pending keeps the high-water mark
        assert!(s.mark_pending("a", "h2").await.unwrap());
        let rec = s.get("a").await.unwrap().unwrap();
        assert_eq!(rec.status, IngestionStatus::Pending);
        assert_eq!(rec.chunk_count, 4);

        s.mark_failed("a", "boom").await.unwrap();
        let rec = s.get("a").await.unwrap().unwrap();
        assert_eq!(rec.status, IngestionStatus::Failed);
        assert_eq!(rec.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_fresh_pending_blocks_second_claim() {
        let s = store(900).await;
        assert!(s.mark_pending("a", "h1").await.unwrap());
        assert!(!s.mark_pending("a", "h1").await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_lease_disables_lock() {
        let s = store(0).await;
        assert!(s.mark_pending("a", "h1").await.unwrap());
        assert!(s.mark_pending("a", "h1").await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_pending_reclaimed() {
        let s = store(60).await;
        sqlx::query(
            "INSERT INTO ingestion_state (song_id, content_hash, status, updated_at, chunk_count) \
             VALUES ('a', 'h0', 'pending', ?, 3)",
        )
        .bind(now() - 3600)
        .execute(&s.pool)
        .await
        .unwrap();

        assert!(s.mark_pending("a", "h1").await.unwrap());
        let rec = s.get("a").await.unwrap().unwrap();
        assert_eq!(rec.content_hash, "h1");
        assert_eq!(rec.chunk_count, 3);
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let s = store(900).await;
        let err = s.mark_ingested("nope", "h", 1).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HarnessError>(),
            Some(HarnessError::InvalidTransition { .. })
        ));

        s.mark_pending("a", "h").await.unwrap();
        s.mark_ingested("a", "h", 1).await.unwrap();
        let err = s.mark_failed("a", "late").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HarnessError>(),
            Some(HarnessError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_and_remove() {
        let s = store(900).await;
        s.mark_pending("b", "h").await.unwrap();
        s.mark_pending("a", "h").await.unwrap();
        let ids: Vec<String> = s.list().await.unwrap().into_iter().map(|r| r.song_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(s.remove("a").await.unwrap());
        assert!(!s.remove("a").await.unwrap());
    }
}
