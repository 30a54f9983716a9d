//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the contract the ingestion pipeline and the
//! retrieval engine rely on: points keyed by deterministic IDs, upsert
//! that overwrites in place, explicit deletion, and similarity queries with
//! equality metadata filters.
//!
//! Implementations must be `Send + Sync`; the pipeline shares one index
//! handle across concurrent workers.

pub mod memory;

use std::cmp::Ordering;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ChunkMetadata, Point, SearchHit};

/// Conjunction of `field == value` constraints on chunk metadata.
///
/// An empty filter matches every point.
///
/// ```rust
/// use songscope_core::index::MetadataFilter;
///
/// let f = MetadataFilter::new().eq("mood", "romantic").eq("decade", "1990s");
/// assert_eq!(f.conditions().len(), 2);
/// assert!(MetadataFilter::new().is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataFilter {
    conditions: Vec<(String, String)>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality constraint.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    /// Filter on mood if one is given; blank moods are ignored. Stored moods
    /// are lowercase, so the value is lowercased too.
    pub fn mood(mood: Option<&str>) -> Self {
        match mood.map(str::trim) {
            Some(m) if !m.is_empty() => Self::new().eq("mood", m.to_lowercase()),
            _ => Self::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> &[(String, String)] {
        &self.conditions
    }

    /// True if every constraint holds for `meta`. A constraint on a field
    /// the point does not carry never holds.
    pub fn matches(&self, meta: &ChunkMetadata) -> bool {
        self.conditions
            .iter()
            .all(|(field, value)| meta.field(field) == Some(value.as_str()))
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Backend name for logs and status output.
    fn name(&self) -> &str;

    /// Create the collection/table if needed for vectors of `dims`.
    async fn ensure_ready(&self, dims: usize) -> Result<()>;

    /// Insert or overwrite points by `point_id`.
    async fn upsert(&self, points: &[Point]) -> Result<()>;

    /// Delete points by ID. Unknown IDs are ignored.
    async fn delete(&self, point_ids: &[String]) -> Result<()>;

    /// Nearest points to `vector` that satisfy `filter`, best first.
    async fn query(
        &self,
        vector: &[f32],
        filter: &MetadataFilter,
        top_n: usize,
    ) -> Result<Vec<SearchHit>>;

    /// All stored points of one song, ordered by chunk index.
    async fn points_for_song(&self, song_id: &str) -> Result<Vec<Point>>;

    /// Total number of stored points.
    async fn count(&self) -> Result<usize>;
}

/// Order hits by descending score, breaking ties by ascending `point_id`.
pub fn rank_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.point_id.cmp(&b.point_id))
    });
}
