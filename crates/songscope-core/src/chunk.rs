//! Overlapping window chunker for lyrics.
//!
//! Lyrics arrive as one cleaned line of text (see [`clean_lyrics`]), so
//! there are no paragraph boundaries to split on. Instead the text is cut
//! into windows of `chunk_chars` characters that overlap by
//! `overlap_chars`, so a verse that straddles a boundary still appears
//! whole in one of the two neighbouring chunks.
//!
//! # Algorithm
//!
//! 1. Empty or whitespace-only text yields no chunks.
//! 2. A window covers `[start, start + chunk_chars)` in characters.
//! 3. If the window does not reach the end of the text, its end is pulled
//!    back to the last whitespace that still lies past the overlap point.
//! 4. The next window starts `overlap_chars` before the previous end,
//!    moved forward to the next word start when one exists in that span.
//! 5. Chunk text is trimmed and indexed contiguously from 0.
//!
//! Identical text and configuration always produce identical chunks, which
//! is what makes point IDs reusable across re-ingestions.
//!
//! # Example
//!
//! ```rust
//! use songscope_core::chunk::{chunk_lyrics, ChunkerConfig};
//!
//! let config = ChunkerConfig { chunk_chars: 1200, overlap_chars: 200 };
//! let chunks = chunk_lyrics("kannalane enadhu kannai", &config)?;
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].0, 0);
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::Result;
use serde::Deserialize;

use crate::error::HarnessError;
use crate::identity::point_id;
use crate::models::Chunk;

/// Window size and overlap, in characters.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub chunk_chars: usize,
    #[serde(default)]
    pub overlap_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_chars: 1200,
            overlap_chars: 200,
        }
    }
}

impl ChunkerConfig {
    /// Reject configurations that would loop forever or break determinism.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_chars == 0 {
            return Err(
                HarnessError::Configuration("chunking.chunk_chars must be > 0".into()).into(),
            );
        }
        if self.overlap_chars >= self.chunk_chars {
            return Err(HarnessError::Configuration(format!(
                "chunking.overlap_chars ({}) must be smaller than chunking.chunk_chars ({})",
                self.overlap_chars, self.chunk_chars
            ))
            .into());
        }
        Ok(())
    }
}

/// Split lyrics into `(chunk_index, chunk_text)` pairs.
///
/// An invalid config (zero size or overlap ≥ size) is a
/// [`HarnessError::Configuration`]; empty lyrics yield no chunks.
pub fn chunk_lyrics(text: &str, config: &ChunkerConfig) -> Result<Vec<(i64, String)>> {
    config.validate()?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let size = config.chunk_chars;
    let overlap = config.overlap_chars;
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();

    let mut chunks: Vec<(i64, String)> = Vec::new();
    let mut start = 0usize;

    while start < n {
        let mut end = (start + size).min(n);

        if end < n {
            // Must end strictly past the overlap point to make progress.
            let floor = start + overlap + 1;
            if let Some(ws) = (floor..end).rev().find(|&i| chars[i].is_whitespace()) {
                end = ws;
            }
        }

        let piece: String = chars[start..end].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            chunks.push((chunks.len() as i64, trimmed.to_string()));
        }

        if end >= n {
            break;
        }

        let back = end - overlap;
        start = (back..end)
            .find(|&i| chars[i].is_whitespace())
            .map(|ws| ws + 1)
            .unwrap_or(back);
    }

    Ok(chunks)
}

/// Chunk a song's lyrics and attach deterministic point IDs.
pub fn chunk_song(song_id: &str, lyrics: &str, config: &ChunkerConfig) -> Result<Vec<Chunk>> {
    Ok(chunk_lyrics(lyrics, config)?
        .into_iter()
        .map(|(index, text)| Chunk {
            point_id: point_id(song_id, index),
            song_id: song_id.to_string(),
            chunk_index: index,
            text,
        })
        .collect())
}

/// Normalize raw lyrics for embedding.
///
/// Replaces punctuation with spaces (word characters and the Tamil Unicode
/// block, including its combining vowel signs, are kept) and collapses runs
/// of whitespace to a single space.
pub fn clean_lyrics(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c.is_whitespace() || is_tamil(c) {
                c
            } else {
                ' '
            }
        })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_tamil(c: char) -> bool {
    ('\u{0B80}'..='\u{0BFF}').contains(&c)
}
