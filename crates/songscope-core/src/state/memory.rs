//! In-memory [`StateStore`] for tests and embedded use.
//!
//! Keeps records in a `HashMap` behind a `std::sync::RwLock`. Every
//! transition happens under the write lock, so the `pending` claim is
//! atomic across tasks in one process. Nothing survives a restart.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{IngestionRecord, IngestionStatus};

use super::{invalid_transition, lease_held, StateStore};

pub struct InMemoryStateStore {
    records: RwLock<HashMap<String, IngestionRecord>>,
    lease_secs: i64,
}

impl InMemoryStateStore {
    pub fn new(lease_secs: i64) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            lease_secs,
        }
    }

    /// Insert a record verbatim, bypassing the state machine. Used to
    /// simulate state left behind by another process.
    pub fn seed(&self, record: IngestionRecord) -> Result<()> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.insert(record.song_id.clone(), record);
        Ok(())
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new(900)
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("state store lock poisoned")
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, song_id: &str) -> Result<Option<IngestionRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(song_id).cloned())
    }

    async fn mark_pending(&self, song_id: &str, content_hash: &str) -> Result<bool> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        let now = now();
        match records.get_mut(song_id) {
            None => {
                records.insert(
                    song_id.to_string(),
                    IngestionRecord {
                        song_id: song_id.to_string(),
                        content_hash: content_hash.to_string(),
                        status: IngestionStatus::Pending,
                        updated_at: now,
                        error: None,
                        chunk_count: 0,
                    },
                );
                Ok(true)
            }
            Some(rec) => {
                if rec.status == IngestionStatus::Pending
                    && lease_held(rec.updated_at, now, self.lease_secs)
                {
                    return Ok(false);
                }
                rec.content_hash = content_hash.to_string();
                rec.status = IngestionStatus::Pending;
                rec.updated_at = now;
                rec.error = None;
                Ok(true)
            }
        }
    }

    async fn reserve_chunks(&self, song_id: &str, chunk_count: i64) -> Result<()> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        match records.get_mut(song_id) {
            Some(rec) if rec.status == IngestionStatus::Pending => {
                rec.chunk_count = rec.chunk_count.max(chunk_count);
                Ok(())
            }
            other => Err(invalid_transition(
                song_id,
                other.map(|r| r.status),
                IngestionStatus::Pending,
            )),
        }
    }

    async fn mark_ingested(
        &self,
        song_id: &str,
        content_hash: &str,
        chunk_count: i64,
    ) -> Result<()> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        match records.get_mut(song_id) {
            Some(rec) if rec.status == IngestionStatus::Pending => {
                rec.content_hash = content_hash.to_string();
                rec.status = IngestionStatus::Ingested;
                rec.updated_at = now();
                rec.error = None;
                rec.chunk_count = chunk_count;
                Ok(())
            }
            other => Err(invalid_transition(
                song_id,
                other.map(|r| r.status),
                IngestionStatus::Ingested,
            )),
        }
    }

    async fn mark_failed(&self, song_id: &str, error: &str) -> Result<()> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        match records.get_mut(song_id) {
            Some(rec) if rec.status == IngestionStatus::Pending => {
                rec.status = IngestionStatus::Failed;
                rec.updated_at = now();
                rec.error = Some(error.to_string());
                Ok(())
            }
            other => Err(invalid_transition(
                song_id,
                other.map(|r| r.status),
                IngestionStatus::Failed,
            )),
        }
    }

    async fn remove(&self, song_id: &str) -> Result<bool> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        Ok(records.remove(song_id).is_some())
    }

    async fn list(&self) -> Result<Vec<IngestionRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        let mut all: Vec<IngestionRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| a.song_id.cmp(&b.song_id));
        Ok(all)
    }
}
