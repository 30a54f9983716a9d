//! Qdrant-backed [`VectorIndex`] over the Qdrant REST API.
//!
//! Each chunk is one Qdrant point: the UUID point ID, the embedding, and the
//! [`ChunkMetadata`] as payload. The collection uses cosine distance and
//! keyword payload indexes on `song_id`, `mood`, and `decade` so filtered
//! searches and per-song scrolls stay cheap.
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | ensure_ready | `GET /collections/{c}`, `PUT /collections/{c}`, `PUT /collections/{c}/index` |
//! | upsert | `PUT /collections/{c}/points?wait=true` |
//! | delete | `POST /collections/{c}/points/delete?wait=true` |
//! | query | `POST /collections/{c}/points/search` |
//! | points_for_song | `POST /collections/{c}/points/scroll` |
//! | count | `POST /collections/{c}/points/count` |
//!
//! Non-success responses are wrapped as
//! [`HarnessError::Transient`](songscope_core::error::HarnessError) so the
//! ingestion pipeline marks the song `failed` and retries it next pass.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use songscope_core::error::HarnessError;
use songscope_core::index::{rank_hits, MetadataFilter, VectorIndex};
use songscope_core::models::{ChunkMetadata, Point, SearchHit};

use crate::config::IndexConfig;

/// Payload fields that get a keyword index.
const KEYWORD_FIELDS: [&str; 3] = ["song_id", "mood", "decade"];

/// Page size for scroll requests.
const SCROLL_PAGE: usize = 256;

pub struct QdrantIndex {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
}

impl QdrantIndex {
    pub fn new(config: &IndexConfig, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, path)
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let req = self.client.request(method, url);
        match &self.api_key {
            Some(key) => req.header("api-key", key),
            None => req,
        }
    }

    /// Send a request and return the `result` field of the response.
    async fn call(&self, method: reqwest::Method, path: &str, body: Option<Value>) -> Result<Value> {
        let mut req = self.request(method, self.url(path));
        if let Some(body) = body {
            req = req.json(&body);
        }

        let response = req
            .send()
            .await
            .map_err(|e| HarnessError::transient(format!("Qdrant connection error: {}", e)))?;
        let status = response.status();

        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(HarnessError::transient(format!(
                "Qdrant API error {} on {}: {}",
                status, path, body_text
            )));
        }

        let json: Value = response.json().await?;
        Ok(json.get("result").cloned().unwrap_or(Value::Null))
    }
}

/// Vector size of an existing collection, from a `GET /collections/{name}`
/// result. `None` for named-vector collections.
pub fn collection_dims(result: &Value) -> Option<usize> {
    result
        .pointer("/config/params/vectors/size")
        .and_then(Value::as_u64)
        .map(|n| n as usize)
}

/// Reject an existing collection whose vector size differs from the
/// configured embedding dimensions.
pub fn check_collection_dims(collection: &str, result: &Value, dims: usize) -> Result<()> {
    match collection_dims(result) {
        Some(size) if size != dims => Err(HarnessError::Configuration(format!(
            "Qdrant collection '{}' stores {}-dimensional vectors but the embedding model produces {}; \
             use a new collection or re-create this one",
            collection, size, dims
        ))
        .into()),
        Some(_) => Ok(()),
        None => {
            tracing::warn!(%collection, "could not read vector size of existing collection");
            Ok(())
        }
    }
}

/// Translate a [`MetadataFilter`] into a Qdrant `filter` object.
pub fn build_filter(filter: &MetadataFilter) -> Option<Value> {
    if filter.is_empty() {
        return None;
    }
    let must: Vec<Value> = filter
        .conditions()
        .iter()
        .map(|(field, value)| json!({ "key": field, "match": { "value": value } }))
        .collect();
    Some(json!({ "must": must }))
}

fn point_id_of(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => bail!("Invalid Qdrant point id: {}", other),
    }
}

fn parse_vector(value: &Value) -> Vec<f32> {
    value
        .as_array()
        .map(|arr| arr.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
        .unwrap_or_default()
}

/// Parse the `result` array of a search response.
pub fn parse_search_result(result: &Value) -> Result<Vec<SearchHit>> {
    let items = result
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("Invalid Qdrant search response: result is not an array"))?;

    let mut hits = Vec::with_capacity(items.len());
    for item in items {
        let point_id = point_id_of(item.get("id").unwrap_or(&Value::Null))?;
        let score = item.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0);
        let metadata: ChunkMetadata =
            serde_json::from_value(item.get("payload").cloned().unwrap_or(Value::Null))?;
        hits.push(SearchHit {
            point_id,
            song_id: metadata.song_id.clone(),
            score,
            metadata,
        });
    }
    Ok(hits)
}

/// Parse the `result.points` array of a scroll response, plus the next
/// page offset if any.
pub fn parse_scroll_result(result: &Value) -> Result<(Vec<Point>, Option<Value>)> {
    let items = result
        .get("points")
        .and_then(|p| p.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Qdrant scroll response: missing points"))?;

    let mut points = Vec::with_capacity(items.len());
    for item in items {
        points.push(Point {
            point_id: point_id_of(item.get("id").unwrap_or(&Value::Null))?,
            vector: parse_vector(item.get("vector").unwrap_or(&Value::Null)),
            metadata: serde_json::from_value(item.get("payload").cloned().unwrap_or(Value::Null))?,
        });
    }

    let next = result
        .get("next_page_offset")
        .filter(|v| !v.is_null())
        .cloned();
    Ok((points, next))
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    fn name(&self) -> &str {
        "qdrant"
    }

    async fn ensure_ready(&self, dims: usize) -> Result<()> {
        let response = self
            .request(reqwest::Method::GET, self.url(""))
            .send()
            .await
            .map_err(|e| HarnessError::transient(format!("Qdrant connection error: {}", e)))?;

        if response.status().is_success() {
            let info: Value = response.json().await?;
            let result = info.get("result").cloned().unwrap_or(Value::Null);
            check_collection_dims(&self.collection, &result, dims)?;
        } else {
            tracing::info!(collection = %self.collection, dims, "creating Qdrant collection");
            self.call(
                reqwest::Method::PUT,
                "",
                Some(json!({ "vectors": { "size": dims, "distance": "Cosine" } })),
            )
            .await?;

            for field in KEYWORD_FIELDS {
                self.call(
                    reqwest::Method::PUT,
                    "/index?wait=true",
                    Some(json!({ "field_name": field, "field_schema": "keyword" })),
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn upsert(&self, points: &[Point]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body: Vec<Value> = points
            .iter()
            .map(|p| {
                Ok(json!({
                    "id": p.point_id,
                    "vector": p.vector,
                    "payload": serde_json::to_value(&p.metadata)?,
                }))
            })
            .collect::<Result<_>>()?;

        self.call(
            reqwest::Method::PUT,
            "/points?wait=true",
            Some(json!({ "points": body })),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, point_ids: &[String]) -> Result<()> {
        if point_ids.is_empty() {
            return Ok(());
        }
        self.call(
            reqwest::Method::POST,
            "/points/delete?wait=true",
            Some(json!({ "points": point_ids })),
        )
        .await?;
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
        let mut body = json!({
            "vector": vector,
            "limit": top_n,
            "with_payload": true,
        });
        if let Some(f) = build_filter(filter) {
            body["filter"] = f;
        }

        let result = self
            .call(reqwest::Method::POST, "/points/search", Some(body))
            .await?;
        let mut hits = parse_search_result(&result)?;
        rank_hits(&mut hits);
        Ok(hits)
    }

    async fn points_for_song(&self, song_id: &str) -> Result<Vec<Point>> {
        let filter = build_filter(&MetadataFilter::new().eq("song_id", song_id));
        let mut points = Vec::new();
        let mut offset: Option<Value> = None;

        loop {
            let mut body = json!({
                "filter": filter,
                "limit": SCROLL_PAGE,
                "with_payload": true,
                "with_vector": true,
            });
            if let Some(o) = &offset {
                body["offset"] = o.clone();
            }

            let result = self
                .call(reqwest::Method::POST, "/points/scroll", Some(body))
                .await?;
            let (page, next) = parse_scroll_result(&result)?;
            points.extend(page);

            match next {
                Some(n) => offset = Some(n),
                None => break,
            }
        }

        points.sort_by_key(|p| p.metadata.chunk_index);
        Ok(points)
    }

    async fn count(&self) -> Result<usize> {
        let result = self
            .call(
                reqwest::Method::POST,
                "/points/count",
                Some(json!({ "exact": true })),
            )
            .await?;
        Ok(result.get("count").and_then(|c| c.as_u64()).unwrap_or(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_dims_mismatch_is_configuration_error() {
        let result = json!({
            "status": "green",
            "config": { "params": { "vectors": { "size": 384, "distance": "Cosine" } } }
        });
        assert_eq!(collection_dims(&result), Some(384));
        assert!(check_collection_dims("songs", &result, 384).is_ok());

        let err = check_collection_dims("songs", &result, 768).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HarnessError>(),
            Some(HarnessError::Configuration(_))
        ));
        assert!(err.to_string().contains("384"));

        assert_eq!(collection_dims(&json!({ "config": {} })), None);
        assert!(check_collection_dims("songs", &json!({}), 768).is_ok());
    }

    #[test]
    fn test_build_filter() {
        assert!(build_filter(&MetadataFilter::new()).is_none());
        let f = build_filter(&MetadataFilter::new().eq("mood", "sad").eq("decade", "1980s"))
            .unwrap();
        assert_eq!(
            f,
            json!({ "must": [
                { "key": "mood", "match": { "value": "sad" } },
                { "key": "decade", "match": { "value": "1980s" } },
            ]})
        );
    }

    #[test]
    fn test_parse_search_result() {
        let result = json!([
            {
                "id": "8f6e0a3c-7d5b-5a1e-9c3d-2b1a0f9e8d7c",
                "score": 0.82,
                "payload": { "song_id": "abc", "chunk_index": 1, "mood": "romantic", "chunk_text": "hello" }
            },
            { "id": 7, "score": 0.5, "payload": { "song_id": "def", "chunk_index": 0 } }
        ]);
        let hits = parse_search_result(&result).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].song_id, "abc");
        assert_eq!(hits[0].metadata.mood.as_deref(), Some("romantic"));
        assert_eq!(hits[1].point_id, "7");
        assert!(hits[1].metadata.themes.is_empty());
    }

    #[test]
    fn test_parse_search_result_rejects_non_array() {
        assert!(parse_search_result(&json!({ "oops": true })).is_err());
    }

    #[test]
    fn test_parse_scroll_result() {
        let result = json!({
            "points": [
                { "id": "p1", "vector": [0.5, 0.25], "payload": { "song_id": "s", "chunk_index": 0 } }
            ],
            "next_page_offset": "p2"
        });
        let (points, next) = parse_scroll_result(&result).unwrap();
        assert_eq!(points[0].vector, vec![0.5, 0.25]);
        assert_eq!(next, Some(json!("p2")));

        let last = json!({ "points": [], "next_page_offset": null });
        let (_, next) = parse_scroll_result(&last).unwrap();
        assert!(next.is_none());
    }
}
