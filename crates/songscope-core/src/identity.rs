//! Deterministic identifiers.
//!
//! Every ID here is a pure function of its inputs so two processes (or two
//! runs a year apart) agree on it. Changing any of these functions
//! invalidates every stored ID and requires a full re-ingestion.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Song;

/// Namespace for chunk point IDs. Never change.
const POINT_NAMESPACE: Uuid = Uuid::from_u128(0x5d1f_62a4_8c3b_4e0f_9a27_3c6e_1b84_d093);

/// Song ID: SHA-256 (lowercase hex) of the trimmed source URL.
pub fn song_id(source_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_url.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Point ID for chunk `chunk_index` of `song_id`: UUIDv5 over
/// `"{song_id}:{chunk_index}"`.
pub fn point_id(song_id: &str, chunk_index: i64) -> String {
    let name = format!("{}:{}", song_id, chunk_index);
    Uuid::new_v5(&POINT_NAMESPACE, name.as_bytes()).to_string()
}

/// Fingerprint over every field that affects the embedding or the stored
/// chunk metadata. Each field is length-prefixed so adjacent values cannot
/// run together.
pub fn content_hash(song: &Song) -> String {
    let mut hasher = Sha256::new();
    let mut field = |value: &str| {
        hasher.update((value.len() as u64).to_le_bytes());
        hasher.update(value.as_bytes());
    };
    field(&song.lyrics);
    field(song.title.as_deref().unwrap_or(""));
    field(song.singer.as_deref().unwrap_or(""));
    field(song.movie.as_deref().unwrap_or(""));
    field(song.year.as_deref().unwrap_or(""));
    field(song.mood.as_deref().unwrap_or(""));
    field(song.energy.as_deref().unwrap_or(""));
    field(song.decade.as_deref().unwrap_or(""));
    field(&song.themes.join("\u{1f}"));
    format!("{:x}", hasher.finalize())
}
