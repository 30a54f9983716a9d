use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the schema on a fresh connection and close it again.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index if missing. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Per-song ingestion state
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_state (
            song_id TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL,
            status TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            error TEXT,
            chunk_count INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Chunk vectors for the sqlite index backend
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS points (
            point_id TEXT PRIMARY KEY,
            song_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_points_song_id ON points(song_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ingestion_state_status ON ingestion_state(status)")
        .execute(pool)
        .await?;

    Ok(())
}
