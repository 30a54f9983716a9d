//! In-memory [`VectorIndex`] for testing.
//!
//! Points live in a `HashMap` behind `std::sync::RwLock`. Queries are
//! brute-force cosine similarity over every stored vector. Write counters
//! let tests assert how much work a pipeline run actually did.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Point, SearchHit};

use super::{rank_hits, MetadataFilter, VectorIndex};

pub struct InMemoryIndex {
    points: RwLock<HashMap<String, Point>>,
    upserted: AtomicUsize,
    deleted: AtomicUsize,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            points: RwLock::new(HashMap::new()),
            upserted: AtomicUsize::new(0),
            deleted: AtomicUsize::new(0),
        }
    }

    /// Points written by `upsert` since creation.
    pub fn upserted(&self) -> usize {
        self.upserted.load(Ordering::SeqCst)
    }

    /// Point IDs passed to `delete` since creation.
    pub fn deleted(&self) -> usize {
        self.deleted.load(Ordering::SeqCst)
    }

    /// IDs of every stored point belonging to `song_id`, sorted.
    pub fn point_ids_for_song(&self, song_id: &str) -> Vec<String> {
        let points = match self.points.read() {
            Ok(p) => p,
            Err(_) => return Vec::new(),
        };
        let mut ids: Vec<String> = points
            .values()
            .filter(|p| p.metadata.song_id == song_id)
            .map(|p| p.point_id.clone())
            .collect();
        ids.sort();
        ids
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("vector index lock poisoned")
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ensure_ready(&self, _dims: usize) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, points: &[Point]) -> Result<()> {
        let mut stored = self.points.write().map_err(|_| poisoned())?;
        for p in points {
            stored.insert(p.point_id.clone(), p.clone());
        }
        self.upserted.fetch_add(points.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, point_ids: &[String]) -> Result<()> {
        let mut stored = self.points.write().map_err(|_| poisoned())?;
        for id in point_ids {
            stored.remove(id);
        }
        self.deleted.fetch_add(point_ids.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        filter: &MetadataFilter,
        top_n: usize,
    ) -> Result<Vec<SearchHit>> {
        let stored = self.points.read().map_err(|_| poisoned())?;
        let mut hits: Vec<SearchHit> = stored
            .values()
            .filter(|p| filter.matches(&p.metadata))
            .map(|p| SearchHit {
                point_id: p.point_id.clone(),
                song_id: p.metadata.song_id.clone(),
                score: cosine_similarity(vector, &p.vector) as f64,
                metadata: p.metadata.clone(),
            })
            .collect();
        rank_hits(&mut hits);
        hits.truncate(top_n);
        Ok(hits)
    }

    async fn points_for_song(&self, song_id: &str) -> Result<Vec<Point>> {
        let stored = self.points.read().map_err(|_| poisoned())?;
        let mut points: Vec<Point> = stored
            .values()
            .filter(|p| p.metadata.song_id == song_id)
            .cloned()
            .collect();
        points.sort_by_key(|p| p.metadata.chunk_index);
        Ok(points)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.points.read().map_err(|_| poisoned())?.len())
    }
}
