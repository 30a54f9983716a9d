//! Ingestion state store abstraction.
//!
//! The [`StateStore`] is the single source of truth for "has this song
//! already been embedded and written to the index?". The vector index is
//! never consulted for that decision.
//!
//! Every method moves a song through the per-song state machine described
//! on [`IngestionStatus::can_transition`]. Implementations must reject
//! transitions the machine forbids with
//! [`HarnessError::InvalidTransition`](crate::error::HarnessError::InvalidTransition)
//! and must only return `Ok` once the update is durable.
//!
//! | Method | Transition |
//! |--------|------------|
//! | [`mark_pending`](StateStore::mark_pending) | absent / ingested / failed / stale pending → pending |
//! | [`reserve_chunks`](StateStore::reserve_chunks) | pending → pending (raises `chunk_count`) |
//! | [`mark_ingested`](StateStore::mark_ingested) | pending → ingested |
//! | [`mark_failed`](StateStore::mark_failed) | pending → failed |
//! | [`remove`](StateStore::remove) | any → absent |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::HarnessError;
use crate::models::{IngestionRecord, IngestionStatus, Song};

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetch the record for a song, if any.
    async fn get(&self, song_id: &str) -> Result<Option<IngestionRecord>>;

    /// Claim a song for ingestion under `content_hash`.
    ///
    /// Returns `false` without changing anything when another worker holds
    /// a `pending` record younger than the store's lease. A `pending`
    /// record older than the lease is treated as abandoned and reclaimed.
    async fn mark_pending(&self, song_id: &str, content_hash: &str) -> Result<bool>;

    /// Raise the recorded chunk high-water mark to at least `chunk_count`.
    /// Called before upserting so a crash mid-upsert still leaves enough
    /// information to clean up every point that may have been written.
    async fn reserve_chunks(&self, song_id: &str, chunk_count: i64) -> Result<()>;

    /// Commit a successful ingestion.
    async fn mark_ingested(&self, song_id: &str, content_hash: &str, chunk_count: i64)
        -> Result<()>;

    /// Record a failed ingestion attempt.
    async fn mark_failed(&self, song_id: &str, error: &str) -> Result<()>;

    /// Drop a song's record. Returns whether one existed.
    async fn remove(&self, song_id: &str) -> Result<bool>;

    /// All records, ordered by `song_id`.
    async fn list(&self) -> Result<Vec<IngestionRecord>>;
}

/// Whether `song` must be (re)ingested given its stored record.
///
/// True when there is no record, the content hash changed, or the last
/// attempt did not finish as `ingested` (a `failed` attempt, or a
/// `pending` left behind by a crash).
pub fn needs_ingestion(song: &Song, record: Option<&IngestionRecord>) -> bool {
    match record {
        None => true,
        Some(rec) => !rec.is_current(&song.content_hash),
    }
}

/// Build the error for a forbidden transition.
pub fn invalid_transition(
    song_id: &str,
    from: Option<IngestionStatus>,
    to: IngestionStatus,
) -> anyhow::Error {
    HarnessError::InvalidTransition {
        song_id: song_id.to_string(),
        from: from
            .map(|s| s.to_string())
            .unwrap_or_else(|| "absent".to_string()),
        to,
    }
    .into()
}

/// Whether a `pending` record written at `updated_at` is still held by its
/// writer at time `now`. A lease of zero disables locking.
pub fn lease_held(updated_at: i64, now: i64, lease_secs: i64) -> bool {
    lease_secs > 0 && updated_at > now - lease_secs
}
