//! Core data models shared by ingestion and retrieval.
//!
//! [`Song`] and [`IngestionRecord`] persist across runs. [`Chunk`] becomes a
//! point in the vector index. [`SearchHit`] and [`PlaylistItem`] only live
//! for the duration of one request.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical song record, one per `song_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub song_id: String,
    pub source_url: String,
    pub title: Option<String>,
    pub singer: Option<String>,
    pub movie: Option<String>,
    pub year: Option<String>,
    pub mood: Option<String>,
    pub energy: Option<String>,
    pub decade: Option<String>,
    #[serde(default)]
    pub themes: Vec<String>,
    /// Cleaned lyrics in the preferred language variant.
    pub lyrics: String,
    /// Fingerprint over every field that reaches the index.
    pub content_hash: String,
}

/// Ingestion status of a song in the state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionStatus {
    Pending,
    Ingested,
    Failed,
}

impl IngestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionStatus::Pending => "pending",
            IngestionStatus::Ingested => "ingested",
            IngestionStatus::Failed => "failed",
        }
    }

    /// Whether the per-song state machine allows moving from `from`
    /// (`None` = no record yet) to `to`.
    ///
    /// ```text
    /// absent ──▶ pending ──▶ ingested
    ///              │  ▲ ╲        │
    ///              │  │  ╲──▶ failed
    ///              ▼  │          │
    ///           pending ◀────────┘   (lease reclaim / retry / re-ingest)
    /// ```
    pub fn can_transition(from: Option<IngestionStatus>, to: IngestionStatus) -> bool {
        use IngestionStatus::*;
        matches!(
            (from, to),
            (None, Pending)
                | (Some(Pending), Pending)
                | (Some(Pending), Ingested)
                | (Some(Pending), Failed)
                | (Some(Ingested), Pending)
                | (Some(Failed), Pending)
        )
    }
}

impl fmt::Display for IngestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IngestionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(IngestionStatus::Pending),
            "ingested" => Ok(IngestionStatus::Ingested),
            "failed" => Ok(IngestionStatus::Failed),
            other => anyhow::bail!("unknown ingestion status: '{}'", other),
        }
    }
}

/// Per-song row in the state store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionRecord {
    pub song_id: String,
    pub content_hash: String,
    pub status: IngestionStatus,
    /// Unix seconds of the last transition.
    pub updated_at: i64,
    pub error: Option<String>,
    /// Highest number of chunks that may have been written to the index
    /// for this song. Orphan cleanup deletes indices below this mark.
    pub chunk_count: i64,
}

impl IngestionRecord {
    /// A song is up to date iff its hash matches and it was fully ingested.
    pub fn is_current(&self, content_hash: &str) -> bool {
        self.status == IngestionStatus::Ingested && self.content_hash == content_hash
    }
}

/// Metadata copied onto every chunk point so queries can filter without a
/// join back to the song table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub song_id: String,
    pub chunk_index: i64,
    pub title: Option<String>,
    pub singer: Option<String>,
    pub movie: Option<String>,
    pub year: Option<String>,
    pub mood: Option<String>,
    pub energy: Option<String>,
    pub decade: Option<String>,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub chunk_text: String,
}

impl ChunkMetadata {
    pub fn for_song(song: &Song, chunk_index: i64, chunk_text: &str) -> Self {
        Self {
            song_id: song.song_id.clone(),
            chunk_index,
            title: song.title.clone(),
            singer: song.singer.clone(),
            movie: song.movie.clone(),
            year: song.year.clone(),
            mood: song.mood.clone(),
            energy: song.energy.clone(),
            decade: song.decade.clone(),
            themes: song.themes.clone(),
            chunk_text: chunk_text.to_string(),
        }
    }

    /// Value of a filterable field, by name.
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "song_id" => Some(self.song_id.as_str()),
            "title" => self.title.as_deref(),
            "singer" => self.singer.as_deref(),
            "movie" => self.movie.as_deref(),
            "year" => self.year.as_deref(),
            "mood" => self.mood.as_deref(),
            "energy" => self.energy.as_deref(),
            "decade" => self.decade.as_deref(),
            _ => None,
        }
    }
}

/// One span of a song's lyrics, keyed by its deterministic point ID.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub point_id: String,
    pub song_id: String,
    pub chunk_index: i64,
    pub text: String,
}

/// A point to write into the vector index.
#[derive(Debug, Clone)]
pub struct Point {
    pub point_id: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// A chunk-level similarity hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub point_id: String,
    pub song_id: String,
    pub score: f64,
    pub metadata: ChunkMetadata,
}

/// A song-level result: the best-scoring chunk stands for the song.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistItem {
    pub song_id: String,
    pub score: f64,
    pub title: Option<String>,
    pub singer: Option<String>,
    pub movie: Option<String>,
    pub year: Option<String>,
    pub mood: Option<String>,
    pub energy: Option<String>,
    pub decade: Option<String>,
    pub themes: Vec<String>,
    /// First characters of the winning chunk.
    pub best_chunk: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_str() {
        for s in [
            IngestionStatus::Pending,
            IngestionStatus::Ingested,
            IngestionStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<IngestionStatus>().unwrap(), s);
        }
        assert!("done".parse::<IngestionStatus>().is_err());
    }

    #[test]
    fn test_transitions() {
        use IngestionStatus::*;
        assert!(IngestionStatus::can_transition(None, Pending));
        assert!(!IngestionStatus::can_transition(None, Ingested));
        assert!(!IngestionStatus::can_transition(None, Failed));
        assert!(IngestionStatus::can_transition(Some(Pending), Ingested));
        assert!(IngestionStatus::can_transition(Some(Pending), Failed));
        assert!(IngestionStatus::can_transition(Some(Failed), Pending));
        assert!(IngestionStatus::can_transition(Some(Ingested), Pending));
        assert!(!IngestionStatus::can_transition(Some(Ingested), Failed));
        assert!(!IngestionStatus::can_transition(Some(Failed), Ingested));
    }

    #[test]
    fn test_is_current() {
        let rec = IngestionRecord {
            song_id: "s".into(),
            content_hash: "h1".into(),
            status: IngestionStatus::Ingested,
            updated_at: 0,
            error: None,
            chunk_count: 2,
        };
        assert!(rec.is_current("h1"));
        assert!(!rec.is_current("h2"));
        let pending = IngestionRecord {
            status: IngestionStatus::Pending,
            ..rec
        };
        assert!(!pending.is_current("h1"));
    }

    #[test]
    fn test_metadata_field_lookup() {
        let meta = ChunkMetadata {
            song_id: "abc".into(),
            mood: Some("romantic".into()),
            ..Default::default()
        };
        assert_eq!(meta.field("song_id"), Some("abc"));
        assert_eq!(meta.field("mood"), Some("romantic"));
        assert_eq!(meta.field("decade"), None);
        assert_eq!(meta.field("chunk_text"), None);
    }
}
