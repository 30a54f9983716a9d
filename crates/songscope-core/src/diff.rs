//! Dataset differ: which songs need (re)ingestion.
//!
//! Compares the canonical song list against the state store. The result is
//! sorted by `song_id` so two runs over the same inputs plan the same work.
//! Records for songs absent from the dataset are left alone.

use std::collections::{HashMap, HashSet};

use anyhow::Result;

use crate::models::{IngestionRecord, Song};
use crate::state::{needs_ingestion, StateStore};

/// Outcome of a diff pass.
#[derive(Debug, Default)]
pub struct DiffReport {
    /// Songs to ingest, ordered by `song_id`.
    pub to_ingest: Vec<Song>,
    /// Songs whose stored record is current.
    pub up_to_date: usize,
    /// IDs that appeared more than once in the input. Only the first
    /// occurrence of each is considered.
    pub duplicates: Vec<String>,
}

/// Plan against an already-loaded snapshot of state records.
pub fn plan(songs: Vec<Song>, records: &HashMap<String, IngestionRecord>) -> DiffReport {
    let mut seen: HashSet<String> = HashSet::new();
    let mut report = DiffReport::default();

    for song in songs {
        if !seen.insert(song.song_id.clone()) {
            report.duplicates.push(song.song_id);
            continue;
        }
        if needs_ingestion(&song, records.get(&song.song_id)) {
            report.to_ingest.push(song);
        } else {
            report.up_to_date += 1;
        }
    }

    report.to_ingest.sort_by(|a, b| a.song_id.cmp(&b.song_id));
    report
}

/// Diff the dataset against the live state store.
pub async fn diff_dataset(songs: Vec<Song>, state: &dyn StateStore) -> Result<DiffReport> {
    let records: HashMap<String, IngestionRecord> = state
        .list()
        .await?
        .into_iter()
        .map(|r| (r.song_id.clone(), r))
        .collect();
    Ok(plan(songs, &records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IngestionStatus;
    use crate::state::memory::InMemoryStateStore;

    fn song(id: &str, hash: &str) -> Song {
        Song {
            song_id: id.into(),
            source_url: format!("https://example.com/{}", id),
            title: None,
            singer: None,
            movie: None,
            year: None,
            mood: None,
            energy: None,
            decade: None,
            themes: vec![],
            lyrics: "words".into(),
            content_hash: hash.into(),
        }
    }

    fn record(id: &str, hash: &str, status: IngestionStatus) -> IngestionRecord {
        IngestionRecord {
            song_id: id.into(),
            content_hash: hash.into(),
            status,
            updated_at: 0,
            error: None,
            chunk_count: 1,
        }
    }

    #[test]
    fn test_plan_sorted_and_filtered() {
        let mut records = HashMap::new();
        records.insert("b".to_string(), record("b", "h", IngestionStatus::Ingested));
        records.insert("c".to_string(), record("c", "old", IngestionStatus::Ingested));
        records.insert("d".to_string(), record("d", "h", IngestionStatus::Failed));

        let report = plan(
            vec![song("d", "h"), song("c", "h"), song("b", "h"), song("a", "h")],
            &records,
        );
        let ids: Vec<&str> = report.to_ingest.iter().map(|s| s.song_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "d"]);
        assert_eq!(report.up_to_date, 1);
        assert!(report.duplicates.is_empty());
    }

    #[test]
    fn test_duplicates_first_wins() {
        let report = plan(vec![song("a", "first"), song("a", "second")], &HashMap::new());
        assert_eq!(report.to_ingest.len(), 1);
        assert_eq!(report.to_ingest[0].content_hash, "first");
        assert_eq!(report.duplicates, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_diff_against_store() {
        let store = InMemoryStateStore::default();
        store.seed(record("x", "h", IngestionStatus::Ingested)).unwrap();
        store.seed(record("gone", "h", IngestionStatus::Ingested)).unwrap();

        let report = diff_dataset(vec![song("x", "h"), song("y", "h")], &store)
            .await
            .unwrap();
        assert_eq!(report.to_ingest.len(), 1);
        assert_eq!(report.to_ingest[0].song_id, "y");
        // Records not in the dataset stay put.
        assert!(store.get("gone").await.unwrap().is_some());
    }
}
