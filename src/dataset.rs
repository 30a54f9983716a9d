//! Canonical dataset loading.
//!
//! The crawler appends one JSON object per line to a feed file. A song may
//! appear many times as it is re-crawled and re-enriched, so
//! [`dedupe_latest`] first collapses the feed to the last record per song.
//! [`load_songs`] then turns each row into a [`Song`] ready for the differ.
//!
//! # Row format
//!
//! ```json
//! {"song_url": "https://…", "song_title": "…", "singer": "…",
//!  "movie_title": "…", "movie_year": 1999, "primary_mood": "romantic",
//!  "energy": "low", "theme_tags": ["love", "rain"], "decade": "1990s",
//!  "tamil_lyrics": "…", "english_lyrics": "…", "lyrics_translit": "…"}
//! ```
//!
//! Scalar fields may be strings or numbers; `theme_tags` may be a list or a
//! comma-separated string. Lyrics are taken from the first non-empty of
//! `tamil_lyrics`, `lyrics_ta`, `english_lyrics`, `lyrics_translit`, then
//! cleaned with [`clean_lyrics`].
//!
//! Rows without a usable identity are data-integrity errors: they are
//! logged and skipped, never fatal.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use songscope_core::chunk::clean_lyrics;
use songscope_core::error::HarnessError;
use songscope_core::identity::{content_hash, song_id};
use songscope_core::models::Song;

/// Lyric fields in order of preference.
const LYRIC_FIELDS: [&str; 4] = [
    "tamil_lyrics",
    "lyrics_ta",
    "english_lyrics",
    "lyrics_translit",
];

/// Result of loading a dataset file.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub songs: Vec<Song>,
    /// Lines that were blank-free but unusable (bad JSON or no identity).
    pub skipped: usize,
}

/// Counts from a [`dedupe_latest`] run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DedupeReport {
    pub total_lines: usize,
    pub bad_lines: usize,
    pub missing_id: usize,
    pub unique: usize,
}

fn text_field(row: &Map<String, Value>, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn themes_field(row: &Map<String, Value>) -> Vec<String> {
    let mut themes: Vec<String> = match row.get("theme_tags") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        _ => Vec::new(),
    };
    themes.dedup();
    themes
}

/// Stable identity of a row: the hash of `song_url` when present,
/// otherwise the row's own `song_id`.
pub fn row_song_id(row: &Map<String, Value>) -> Option<String> {
    match text_field(row, "song_url") {
        Some(url) => Some(song_id(&url)),
        None => text_field(row, "song_id"),
    }
}

/// Preferred lyric variant, uncleaned.
pub fn pick_lyrics(row: &Map<String, Value>) -> String {
    LYRIC_FIELDS
        .iter()
        .find_map(|k| text_field(row, k))
        .unwrap_or_default()
}

/// Build a [`Song`] from one parsed row.
pub fn song_from_row(row: &Map<String, Value>) -> Result<Song> {
    let id = row_song_id(row).ok_or_else(|| {
        anyhow::Error::from(HarnessError::DataIntegrity(
            "record has neither song_url nor song_id".into(),
        ))
    })?;

    let mut song = Song {
        song_id: id,
        source_url: text_field(row, "song_url").unwrap_or_default(),
        title: text_field(row, "song_title"),
        singer: text_field(row, "singer"),
        movie: text_field(row, "movie_title"),
        year: text_field(row, "movie_year"),
        mood: text_field(row, "primary_mood").map(|m| m.to_lowercase()),
        energy: text_field(row, "energy").map(|e| e.to_lowercase()),
        decade: text_field(row, "decade"),
        themes: themes_field(row),
        lyrics: clean_lyrics(&pick_lyrics(row)),
        content_hash: String::new(),
    };
    song.content_hash = content_hash(&song);
    Ok(song)
}

fn decode_line(raw: Vec<u8>) -> Result<String> {
    String::from_utf8(raw)
        .map_err(|e| HarnessError::DataIntegrity(format!("invalid UTF-8: {}", e)).into())
}

fn parse_line(line: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(HarnessError::DataIntegrity("line is not a JSON object".into()).into()),
        Err(e) => Err(HarnessError::DataIntegrity(format!("invalid JSON: {}", e)).into()),
    }
}

/// Load every usable song from a JSONL file, in file order.
pub fn load_songs(path: &Path) -> Result<LoadReport> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open dataset: {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut report = LoadReport::default();

    for (lineno, raw) in reader.split(b'\n').enumerate() {
        let raw = raw.with_context(|| format!("Failed to read {}", path.display()))?;
        let line = match decode_line(raw) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(line = lineno + 1, error = %e, "skipping dataset record");
                report.skipped += 1;
                continue;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line).and_then(|row| song_from_row(&row)) {
            Ok(song) => report.songs.push(song),
            Err(e) => {
                tracing::warn!(line = lineno + 1, error = %e, "skipping dataset record");
                report.skipped += 1;
            }
        }
    }

    Ok(report)
}

/// Collapse an append-only feed to the last record per song.
///
/// Records keep their original fields; `song_id` is filled in (or
/// replaced) with the row's stable identity. Output order follows each
/// song's first appearance in the input.
pub fn dedupe_latest(input: &Path, output: &Path) -> Result<DedupeReport> {
    let file = std::fs::File::open(input)
        .with_context(|| format!("Failed to open feed: {}", input.display()))?;
    let reader = BufReader::new(file);

    let mut report = DedupeReport::default();
    let mut order: Vec<String> = Vec::new();
    let mut latest: HashMap<String, Map<String, Value>> = HashMap::new();

    for raw in reader.split(b'\n') {
        let raw = raw.with_context(|| format!("Failed to read {}", input.display()))?;
        report.total_lines += 1;
        let Ok(line) = decode_line(raw) else {
            report.bad_lines += 1;
            continue;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut row = match parse_line(line) {
            Ok(row) => row,
            Err(_) => {
                report.bad_lines += 1;
                continue;
            }
        };
        let Some(id) = row_song_id(&row) else {
            report.missing_id += 1;
            continue;
        };
        row.insert("song_id".to_string(), Value::String(id.clone()));
        if !latest.contains_key(&id) {
            order.push(id.clone());
        }
        latest.insert(id, row);
    }

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let out = std::fs::File::create(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let mut writer = BufWriter::new(out);
    for id in &order {
        if let Some(row) = latest.get(id) {
            serde_json::to_writer(&mut writer, row)?;
            writer.write_all(b"\n")?;
        }
    }
    writer.flush()?;

    report.unique = order.len();
    Ok(report)
}

/// `scope dedupe`: run [`dedupe_latest`] and print the counts.
pub fn run_dedupe(input: &Path, output: &Path) -> Result<()> {
    let report = dedupe_latest(input, output)?;
    println!("dedupe {} -> {}", input.display(), output.display());
    println!("  lines read:   {}", report.total_lines);
    println!("  bad lines:    {}", report.bad_lines);
    println!("  missing id:   {}", report.missing_id);
    println!("  unique songs: {}", report.unique);
    println!("ok");
    Ok(())
}
