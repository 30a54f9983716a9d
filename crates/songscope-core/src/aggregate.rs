//! Collapse chunk hits into a song ranking.
//!
//! Each song is represented by its best chunk ("best chunk wins"). The
//! output has exactly one [`PlaylistItem`] per distinct `song_id`, sorted
//! by descending score with `song_id` ascending as the tie-break, and is
//! truncated to `k`.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::models::{PlaylistItem, SearchHit};

/// Length, in characters, of the chunk preview on each item.
pub const SNIPPET_CHARS: usize = 240;

/// Group hits by song, keep each song's best hit, rank, and truncate.
pub fn aggregate(hits: &[SearchHit], k: usize) -> Vec<PlaylistItem> {
    let mut best: HashMap<&str, &SearchHit> = HashMap::new();

    for hit in hits {
        match best.get(hit.song_id.as_str()) {
            Some(current) if !beats(hit, current) => {}
            _ => {
                best.insert(hit.song_id.as_str(), hit);
            }
        }
    }

    let mut winners: Vec<&SearchHit> = best.into_values().collect();
    winners.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.song_id.cmp(&b.song_id))
    });
    winners.truncate(k);

    winners.into_iter().map(to_item).collect()
}

/// Whether `candidate` should replace `current` as its song's best hit.
/// Equal scores resolve to the lower `point_id` so input order never
/// changes the snippet.
fn beats(candidate: &SearchHit, current: &SearchHit) -> bool {
    match candidate.score.partial_cmp(&current.score) {
        Some(Ordering::Greater) => true,
        Some(Ordering::Equal) => candidate.point_id < current.point_id,
        _ => false,
    }
}

fn to_item(hit: &SearchHit) -> PlaylistItem {
    let m = &hit.metadata;
    PlaylistItem {
        song_id: hit.song_id.clone(),
        score: hit.score,
        title: m.title.clone(),
        singer: m.singer.clone(),
        movie: m.movie.clone(),
        year: m.year.clone(),
        mood: m.mood.clone(),
        energy: m.energy.clone(),
        decade: m.decade.clone(),
        themes: m.themes.clone(),
        best_chunk: m.chunk_text.chars().take(SNIPPET_CHARS).collect(),
    }
}
