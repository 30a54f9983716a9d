//! Retrieval engine: chunk-level similarity search.
//!
//! Operates entirely through the [`VectorIndex`] trait. The caller embeds
//! free-text queries; seed-song queries reuse the seed's stored chunk
//! vectors and never re-embed.
//!
//! Results are always ordered by descending score with `point_id` as the
//! tie-break, whatever order the backend returned them in, and always
//! satisfy the requested filter.

use std::collections::HashMap;

use anyhow::Result;
use serde::Deserialize;

use crate::embedding::mean_vector;
use crate::error::HarnessError;
use crate::index::{rank_hits, MetadataFilter, VectorIndex};
use crate::models::{Point, SearchHit};

/// How a seed song's chunks become queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SeedStrategy {
    /// One query per seed chunk; hits are merged (best score per point).
    #[default]
    PerChunk,
    /// One query with the mean of the seed's chunk vectors.
    Centroid,
}

/// Number of chunk hits to request so that `k` distinct songs survive
/// aggregation: `max(k × multiplier, min_candidates)`.
pub fn candidate_count(k: usize, multiplier: usize, min_candidates: usize) -> usize {
    k.saturating_mul(multiplier).max(min_candidates)
}

/// Similarity search by query vector.
pub async fn search(
    index: &dyn VectorIndex,
    query_vector: &[f32],
    filter: &MetadataFilter,
    top_n: usize,
) -> Result<Vec<SearchHit>> {
    if top_n == 0 {
        return Ok(Vec::new());
    }
    let mut hits = index.query(query_vector, filter, top_n).await?;
    hits.retain(|h| filter.matches(&h.metadata));
    rank_hits(&mut hits);
    hits.truncate(top_n);
    Ok(hits)
}

/// Load a seed song's stored points. No points is a
/// [`HarnessError::NotFound`].
pub async fn load_seed(index: &dyn VectorIndex, seed_song_id: &str) -> Result<Vec<Point>> {
    let seed_points = index.points_for_song(seed_song_id).await?;
    if seed_points.is_empty() {
        return Err(HarnessError::not_found(format!(
            "seed song '{}' has no indexed chunks",
            seed_song_id
        )));
    }
    Ok(seed_points)
}

/// Similarity search anchored on a stored song.
///
/// Hits belonging to the seed song are excluded. A seed with no stored
/// points is a [`HarnessError::NotFound`], not an empty result.
pub async fn search_by_seed(
    index: &dyn VectorIndex,
    seed_song_id: &str,
    filter: &MetadataFilter,
    top_n: usize,
    strategy: SeedStrategy,
) -> Result<Vec<SearchHit>> {
    let seed_points = load_seed(index, seed_song_id).await?;
    search_from_seed_points(index, seed_song_id, &seed_points, filter, top_n, strategy).await
}

/// [`search_by_seed`] over seed points the caller already loaded with
/// [`load_seed`].
pub async fn search_from_seed_points(
    index: &dyn VectorIndex,
    seed_song_id: &str,
    seed_points: &[Point],
    filter: &MetadataFilter,
    top_n: usize,
    strategy: SeedStrategy,
) -> Result<Vec<SearchHit>> {
    if seed_points.is_empty() {
        return Err(HarnessError::not_found(format!(
            "seed song '{}' has no indexed chunks",
            seed_song_id
        )));
    }
    if top_n == 0 {
        return Ok(Vec::new());
    }

    let vectors: Vec<Vec<f32>> = seed_points.iter().map(|p| p.vector.clone()).collect();
    let queries = match strategy {
        SeedStrategy::PerChunk => vectors,
        SeedStrategy::Centroid => vec![mean_vector(&vectors).ok_or_else(|| {
            anyhow::anyhow!("seed song '{}' has inconsistent vectors", seed_song_id)
        })?],
    };

    // The seed's own chunks can occupy up to one slot each; ask for enough
    // that excluding them still leaves `top_n`.
    let per_query = top_n + queries.len();
    let mut best: HashMap<String, SearchHit> = HashMap::new();

    for q in &queries {
        for hit in index.query(q, filter, per_query).await? {
            if hit.song_id == seed_song_id || !filter.matches(&hit.metadata) {
                continue;
            }
            match best.get(&hit.point_id) {
                Some(existing) if existing.score >= hit.score => {}
                _ => {
                    best.insert(hit.point_id.clone(), hit);
                }
            }
        }
    }

    let mut hits: Vec<SearchHit> = best.into_values().collect();
    rank_hits(&mut hits);
    hits.truncate(top_n);
    Ok(hits)
}
