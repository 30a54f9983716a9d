//! Ingestion status overview.
//!
//! Summarises what the state store and the index hold: songs per status,
//! indexed point count, recent failures, and the database file size. Used by
//! `scope status` to confirm that ingestion runs are converging.

use anyhow::Result;
use sqlx::Row;

use songscope_core::models::IngestionStatus;

use crate::backends::Backends;
use crate::config::Config;

/// Failures listed at the bottom of the report.
const RECENT_FAILURES: i64 = 5;

/// Songs per ingestion status.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: i64,
    pub ingested: i64,
    pub failed: i64,
}

impl StatusCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.ingested + self.failed
    }
}

/// Count state-store rows grouped by status.
pub async fn status_counts(pool: &sqlx::SqlitePool) -> Result<StatusCounts> {
    let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM ingestion_state GROUP BY status")
        .fetch_all(pool)
        .await?;

    let mut counts = StatusCounts::default();
    for row in &rows {
        let status: String = row.get("status");
        let n: i64 = row.get("n");
        match status.parse::<IngestionStatus>() {
            Ok(IngestionStatus::Pending) => counts.pending += n,
            Ok(IngestionStatus::Ingested) => counts.ingested += n,
            Ok(IngestionStatus::Failed) => counts.failed += n,
            Err(e) => tracing::warn!(error = %e, "unexpected status in ingestion_state"),
        }
    }
    Ok(counts)
}

/// `scope status`: print counts from the state store and the index.
pub async fn run_status(config: &Config) -> Result<()> {
    let backends = Backends::open(config).await?;
    let counts = status_counts(&backends.pool).await?;
    let points = backends.index.count().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("songscope status");
    println!("================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Index:       {}", backends.index.name());
    println!();
    println!("  Songs:       {}", counts.total());
    println!("    ingested:  {}", counts.ingested);
    println!("    pending:   {}", counts.pending);
    println!("    failed:    {}", counts.failed);
    println!("  Points:      {}", points);

    let failures = sqlx::query(
        "SELECT song_id, updated_at, error FROM ingestion_state
         WHERE status = 'failed' ORDER BY updated_at DESC LIMIT ?",
    )
    .bind(RECENT_FAILURES)
    .fetch_all(&backends.pool)
    .await?;

    if !failures.is_empty() {
        println!();
        println!("  Recent failures:");
        for row in &failures {
            let song_id: String = row.get("song_id");
            let updated_at: i64 = row.get("updated_at");
            let error: Option<String> = row.get("error");
            println!(
                "    {}  {}  {}",
                format_ts_iso(updated_at),
                song_id.chars().take(12).collect::<String>(),
                error.unwrap_or_default()
            );
        }
    }

    println!();

    backends.pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
