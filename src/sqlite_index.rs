//! SQLite-backed [`VectorIndex`] implementation.
//!
//! Vectors are stored as little-endian f32 BLOBs in the `points` table next
//! to the chunk metadata (as JSON). Queries are brute-force cosine
//! similarity over every row matching the filter, which is plenty for a
//! lyrics corpus of tens of thousands of chunks.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use songscope_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use songscope_core::index::{rank_hits, MetadataFilter, VectorIndex};
use songscope_core::models::{ChunkMetadata, Point, SearchHit};

pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_point(row: &SqliteRow) -> Result<Point> {
    let point_id: String = row.get("point_id");
    let blob: Vec<u8> = row.get("embedding");
    let metadata_json: String = row.get("metadata_json");
    let metadata: ChunkMetadata = serde_json::from_str(&metadata_json)
        .with_context(|| format!("Corrupt metadata for point {}", point_id))?;
    Ok(Point {
        point_id,
        vector: blob_to_vec(&blob),
        metadata,
    })
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn ensure_ready(&self, _dims: usize) -> Result<()> {
        crate::migrate::apply(&self.pool).await
    }

    async fn upsert(&self, points: &[Point]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for p in points {
            let metadata_json = serde_json::to_string(&p.metadata)?;
            sqlx::query(
                r#"
                INSERT INTO points (point_id, song_id, chunk_index, embedding, metadata_json)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(point_id) DO UPDATE SET
                    song_id = excluded.song_id,
                    chunk_index = excluded.chunk_index,
                    embedding = excluded.embedding,
                    metadata_json = excluded.metadata_json
                "#,
            )
            .bind(&p.point_id)
            .bind(&p.metadata.song_id)
            .bind(p.metadata.chunk_index)
            .bind(vec_to_blob(&p.vector))
            .bind(&metadata_json)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, point_ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in point_ids {
            sqlx::query("DELETE FROM points WHERE point_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        filter: &MetadataFilter,
        top_n: usize,
    ) -> Result<Vec<SearchHit>> {
        if top_n == 0 {
            return Ok(Vec::new());
        }

        // song_id is a real column; narrow with it before decoding blobs.
        let song_filter = filter
            .conditions()
            .iter()
            .find(|(field, _)| field == "song_id")
            .map(|(_, value)| value.clone());

        let rows = match &song_filter {
            Some(song_id) => {
                sqlx::query(
                    "SELECT point_id, embedding, metadata_json FROM points WHERE song_id = ?",
                )
                .bind(song_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT point_id, embedding, metadata_json FROM points")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut hits = Vec::new();
        for row in &rows {
            let point = row_to_point(row)?;
            if !filter.matches(&point.metadata) {
                continue;
            }
            hits.push(SearchHit {
                score: cosine_similarity(vector, &point.vector) as f64,
                song_id: point.metadata.song_id.clone(),
                point_id: point.point_id,
                metadata: point.metadata,
            });
        }

        rank_hits(&mut hits);
        hits.truncate(top_n);
        Ok(hits)
    }

    async fn points_for_song(&self, song_id: &str) -> Result<Vec<Point>> {
        let rows = sqlx::query(
            "SELECT point_id, embedding, metadata_json FROM points \
             WHERE song_id = ? ORDER BY chunk_index",
        )
        .bind(song_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_point).collect()
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM points")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use songscope_core::identity::point_id;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn index() -> SqliteVectorIndex {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let index = SqliteVectorIndex::new(pool);
        index.ensure_ready(2).await.unwrap();
        index
    }

    fn point(song: &str, idx: i64, mood: &str, vector: Vec<f32>) -> Point {
        Point {
            point_id: point_id(song, idx),
            vector,
            metadata: ChunkMetadata {
                song_id: song.into(),
                chunk_index: idx,
                mood: Some(mood.into()),
                chunk_text: format!("{} chunk {}", song, idx),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let idx = index().await;
        idx.upsert(&[point("a", 0, "sad", vec![1.0, 0.0])]).await.unwrap();
        idx.upsert(&[point("a", 0, "happy", vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(idx.count().await.unwrap(), 1);
        let pts = idx.points_for_song("a").await.unwrap();
        assert_eq!(pts[0].metadata.mood.as_deref(), Some("happy"));
        assert_eq!(pts[0].vector, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_query_filters_and_ranks() {
        let idx = index().await;
        idx.upsert(&[
            point("a", 0, "romantic", vec![1.0, 0.0]),
            point("b", 0, "sad", vec![1.0, 0.05]),
            point("c", 0, "romantic", vec![0.6, 0.4]),
        ])
        .await
        .unwrap();

        let hits = idx
            .query(&[1.0, 0.0], &MetadataFilter::mood(Some("romantic")), 10)
            .await
            .unwrap();
        let songs: Vec<&str> = hits.iter().map(|h| h.song_id.as_str()).collect();
        assert_eq!(songs, vec!["a", "c"]);

        let only_c = idx
            .query(&[1.0, 0.0], &MetadataFilter::new().eq("song_id", "c"), 10)
            .await
            .unwrap();
        assert_eq!(only_c.len(), 1);
        assert_eq!(only_c[0].metadata.chunk_text, "c chunk 0");
    }

    #[tokio::test]
    async fn test_delete_and_order() {
        let idx = index().await;
        idx.upsert(&[
            point("a", 2, "x", vec![1.0, 0.0]),
            point("a", 0, "x", vec![1.0, 0.0]),
            point("a", 1, "x", vec![1.0, 0.0]),
        ])
        .await
        .unwrap();
        idx.delete(&[point_id("a", 2)]).await.unwrap();
        let order: Vec<i64> = idx
            .points_for_song("a")
            .await
            .unwrap()
            .iter()
            .map(|p| p.metadata.chunk_index)
            .collect();
        assert_eq!(order, vec![0, 1]);
    }
}
