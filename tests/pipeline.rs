//! End-to-end tests for ingestion and retrieval over in-process backends.
//!
//! Uses the in-memory state store and index from `songscope-core`, plus the
//! SQLite backends on an in-memory database, with deterministic embedders.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use songscope::config::parse_config;
use songscope::ingest::{IngestOptions, IngestSummary, Pipeline, SongOutcome};
use songscope::migrate;
use songscope::search::Searcher;
use songscope::sqlite_index::SqliteVectorIndex;
use songscope::sqlite_state::SqliteStateStore;
use songscope_core::chunk::{chunk_lyrics, ChunkerConfig};
use songscope_core::embedding::Embedder;
use songscope_core::error::{is_not_found, HarnessError};
use songscope_core::identity::{content_hash, point_id, song_id};
use songscope_core::index::memory::InMemoryIndex;
use songscope_core::index::VectorIndex;
use songscope_core::models::{IngestionRecord, IngestionStatus, Song};
use songscope_core::state::memory::InMemoryStateStore;
use songscope_core::state::StateStore;

// ============ Fixtures ============

/// Letter histogram over `a..=h`; identical text gives identical vectors.
struct LetterEmbedder {
    calls: AtomicUsize,
}

impl LetterEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Embedder for LetterEmbedder {
    fn model_name(&self) -> &str {
        "letters"
    }

    fn dims(&self) -> usize {
        8
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.01f32; 8];
                for c in t.chars() {
                    if ('a'..='h').contains(&c) {
                        v[(c as u8 - b'a') as usize] += 1.0;
                    }
                }
                v
            })
            .collect())
    }
}

/// Never answers within any reasonable timeout.
struct SlowEmbedder;

#[async_trait]
impl Embedder for SlowEmbedder {
    fn model_name(&self) -> &str {
        "slow"
    }

    fn dims(&self) -> usize {
        8
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(vec![vec![1.0; 8]; texts.len()])
    }
}

/// Always fails with a transient error.
struct BrokenEmbedder;

#[async_trait]
impl Embedder for BrokenEmbedder {
    fn model_name(&self) -> &str {
        "broken"
    }

    fn dims(&self) -> usize {
        8
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(HarnessError::transient("provider unavailable"))
    }
}

fn small_chunks() -> ChunkerConfig {
    ChunkerConfig {
        chunk_chars: 20,
        overlap_chars: 0,
    }
}

fn options() -> IngestOptions {
    IngestOptions {
        chunking: small_chunks(),
        batch_size: 2,
        workers: 3,
        call_timeout: Duration::from_secs(5),
        limit: None,
        dry_run: false,
    }
}

/// Lyrics made of 19-char words, one chunk per word.
fn lyrics(letters: &[char]) -> String {
    letters
        .iter()
        .map(|c| c.to_string().repeat(19))
        .collect::<Vec<_>>()
        .join(" ")
}

fn song(url: &str, mood: &str, text: &str) -> Song {
    let mut s = Song {
        song_id: song_id(url),
        source_url: url.to_string(),
        title: Some(url.trim_start_matches("https://songs.test/").to_string()),
        singer: None,
        movie: None,
        year: None,
        mood: Some(mood.to_string()),
        energy: None,
        decade: Some("1990s".to_string()),
        themes: vec![],
        lyrics: text.to_string(),
        content_hash: String::new(),
    };
    s.content_hash = content_hash(&s);
    s
}

fn catalog() -> Vec<Song> {
    vec![
        song("https://songs.test/rain", "sad", &lyrics(&['a', 'b', 'c', 'd'])),
        song("https://songs.test/drizzle", "sad", &lyrics(&['a', 'b'])),
        song("https://songs.test/storm", "energetic", &lyrics(&['a', 'e'])),
        song("https://songs.test/moon", "romantic", &lyrics(&['g', 'h'])),
    ]
}

struct Harness {
    state: Arc<InMemoryStateStore>,
    index: Arc<InMemoryIndex>,
    pipeline: Pipeline,
}

fn harness_with(embedder: Arc<dyn Embedder>, options: IngestOptions) -> Harness {
    let state = Arc::new(InMemoryStateStore::default());
    let index = Arc::new(InMemoryIndex::new());
    let pipeline = Pipeline::new(state.clone(), index.clone(), embedder, options);
    Harness {
        state,
        index,
        pipeline,
    }
}

fn harness() -> Harness {
    harness_with(Arc::new(LetterEmbedder::new()), options())
}

// ============ Ingestion ============

#[test]
fn test_chunk_fixture_shape() {
    assert_eq!(chunk_lyrics(&lyrics(&['a', 'b', 'c', 'd']), &small_chunks()).unwrap().len(), 4);
    assert_eq!(chunk_lyrics(&lyrics(&['a', 'b']), &small_chunks()).unwrap().len(), 2);
}

#[tokio::test]
async fn test_first_run_ingests_everything() {
    let h = harness();
    let summary = h.pipeline.run(catalog()).await.unwrap();

    assert_eq!(summary.scanned, 4);
    assert_eq!(summary.ingested, 4);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.points_upserted, 10);
    assert_eq!(h.index.count().await.unwrap(), 10);

    let rain = song_id("https://songs.test/rain");
    let rec = h.state.get(&rain).await.unwrap().unwrap();
    assert_eq!(rec.status, IngestionStatus::Ingested);
    assert_eq!(rec.chunk_count, 4);
    assert_eq!(
        h.index.point_ids_for_song(&rain).len(),
        4,
        "one point per chunk"
    );
}

#[tokio::test]
async fn test_rerun_is_a_no_op() {
    let h = harness();
    h.pipeline.run(catalog()).await.unwrap();
    let writes_after_first = h.index.upserted();
    let records_before = h.state.list().await.unwrap();

    let summary = h.pipeline.run(catalog()).await.unwrap();
    assert_eq!(
        summary,
        IngestSummary {
            scanned: 4,
            skipped: 4,
            ..Default::default()
        }
    );
    assert_eq!(h.index.upserted(), writes_after_first);
    assert_eq!(h.index.deleted(), 0);
    assert_eq!(
        h.state.list().await.unwrap(),
        records_before,
        "state records must not be rewritten"
    );
}

#[tokio::test]
async fn test_changed_song_is_reingested() {
    let h = harness();
    h.pipeline.run(catalog()).await.unwrap();

    let mut songs = catalog();
    songs[3].mood = Some("melancholic".to_string());
    songs[3].content_hash = content_hash(&songs[3]);

    let summary = h.pipeline.run(songs).await.unwrap();
    assert_eq!(summary.ingested, 1);
    assert_eq!(summary.skipped, 3);
    assert_eq!(summary.points_upserted, 2);

    let moon = song_id("https://songs.test/moon");
    let points = h.index.points_for_song(&moon).await.unwrap();
    assert!(points
        .iter()
        .all(|p| p.metadata.mood.as_deref() == Some("melancholic")));
}

#[tokio::test]
async fn test_shrinking_song_deletes_trailing_points() {
    let h = harness();
    h.pipeline.run(catalog()).await.unwrap();

    let rain = song_id("https://songs.test/rain");
    let mut songs = catalog();
    songs[0].lyrics = lyrics(&['a', 'b']);
    songs[0].content_hash = content_hash(&songs[0]);

    let summary = h.pipeline.run(songs).await.unwrap();
    assert_eq!(summary.ingested, 1);
    assert_eq!(summary.points_deleted, 2);
    let mut expected = vec![point_id(&rain, 0), point_id(&rain, 1)];
    expected.sort();
    assert_eq!(h.index.point_ids_for_song(&rain), expected);
    assert_eq!(h.state.get(&rain).await.unwrap().unwrap().chunk_count, 2);
}

#[tokio::test]
async fn test_stale_pending_is_recovered() {
    let h = harness();
    let rain = song_id("https://songs.test/rain");

    // A crashed run left a six-chunk high-water mark and an expired claim.
    h.state
        .seed(IngestionRecord {
            song_id: rain.clone(),
            content_hash: "older".into(),
            status: IngestionStatus::Pending,
            updated_at: 0,
            error: None,
            chunk_count: 6,
        })
        .unwrap();

    let summary = h.pipeline.run(catalog()).await.unwrap();
    assert_eq!(summary.ingested, 4);
    assert_eq!(summary.points_deleted, 2);

    let rec = h.state.get(&rain).await.unwrap().unwrap();
    assert_eq!(rec.status, IngestionStatus::Ingested);
    assert_eq!(rec.chunk_count, 4);
}

#[tokio::test]
async fn test_fresh_pending_claim_is_reported_locked() {
    let h = harness();
    let rain = song_id("https://songs.test/rain");
    h.state
        .seed(IngestionRecord {
            song_id: rain.clone(),
            content_hash: "other-worker".into(),
            status: IngestionStatus::Pending,
            updated_at: chrono::Utc::now().timestamp(),
            error: None,
            chunk_count: 0,
        })
        .unwrap();

    let summary = h.pipeline.run(catalog()).await.unwrap();
    assert_eq!(summary.ingested, 3);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.locked, 1);
    assert!(h.index.point_ids_for_song(&rain).is_empty());

    let outcome = h.pipeline.ingest_song(&catalog()[0]).await.unwrap();
    assert_eq!(outcome, SongOutcome::Locked);
}

#[tokio::test]
async fn test_embedding_timeout_marks_failed() {
    let mut opts = options();
    opts.call_timeout = Duration::from_millis(50);
    let h = harness_with(Arc::new(SlowEmbedder), opts);

    let songs = vec![catalog().remove(1)];
    let drizzle = songs[0].song_id.clone();
    let summary = h.pipeline.run(songs).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.ingested, 0);
    let rec = h.state.get(&drizzle).await.unwrap().unwrap();
    assert_eq!(rec.status, IngestionStatus::Failed);
    assert!(rec.error.unwrap_or_default().contains("timed out"));
    assert_eq!(h.index.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_failed_song_is_retried_on_next_run() {
    let state = Arc::new(InMemoryStateStore::default());
    let index = Arc::new(InMemoryIndex::new());

    let broken = Pipeline::new(state.clone(), index.clone(), Arc::new(BrokenEmbedder), options());
    let first = broken.run(catalog()).await.unwrap();
    assert_eq!(first.failed, 4);

    let working = Pipeline::new(
        state.clone(),
        index.clone(),
        Arc::new(LetterEmbedder::new()),
        options(),
    );
    let second = working.run(catalog()).await.unwrap();
    assert_eq!(second.ingested, 4);
    assert!(state
        .list()
        .await
        .unwrap()
        .iter()
        .all(|r| r.status == IngestionStatus::Ingested && r.error.is_none()));
}

#[tokio::test]
async fn test_duplicates_and_limit() {
    let h = harness();
    let mut songs = catalog();
    songs.push(songs[0].clone());

    let mut opts = options();
    opts.limit = Some(2);
    let limited = Pipeline::new(
        h.state.clone(),
        h.index.clone(),
        Arc::new(LetterEmbedder::new()),
        opts,
    );
    let summary = limited.run(songs).await.unwrap();
    assert_eq!(summary.scanned, 5);
    assert_eq!(summary.ingested, 2);
    assert_eq!(summary.skipped, 1);
}

#[tokio::test]
async fn test_dry_run_touches_nothing() {
    let embedder = Arc::new(LetterEmbedder::new());
    let mut opts = options();
    opts.dry_run = true;
    let h = harness_with(embedder.clone(), opts);

    let summary = h.pipeline.run(catalog()).await.unwrap();
    assert_eq!(summary.planned, 4);
    assert_eq!(summary.planned_chunks, 10);
    assert_eq!(summary.ingested, 0);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    assert!(h.state.list().await.unwrap().is_empty());
    assert_eq!(h.index.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_empty_lyrics_ingest_zero_points() {
    let h = harness();
    let silent = song("https://songs.test/instrumental", "calm", "");
    let summary = h.pipeline.run(vec![silent.clone()]).await.unwrap();
    assert_eq!(summary.ingested, 1);
    assert_eq!(summary.points_upserted, 0);
    let rec = h.state.get(&silent.song_id).await.unwrap().unwrap();
    assert_eq!(rec.status, IngestionStatus::Ingested);
    assert_eq!(rec.chunk_count, 0);
}

#[tokio::test]
async fn test_purge_removes_points_and_state() {
    let h = harness();
    h.pipeline.run(catalog()).await.unwrap();

    let rain = song_id("https://songs.test/rain");
    let deleted = h.pipeline.purge(&rain).await.unwrap();
    assert_eq!(deleted, 4);
    assert!(h.index.point_ids_for_song(&rain).is_empty());
    assert!(h.state.get(&rain).await.unwrap().is_none());

    let err = h.pipeline.purge(&rain).await.unwrap_err();
    assert!(is_not_found(&err));

    // Purged songs come back on the next run.
    let summary = h.pipeline.run(catalog()).await.unwrap();
    assert_eq!(summary.ingested, 1);
}

// ============ SQLite backends ============

#[tokio::test]
async fn test_sqlite_backends_are_idempotent() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    migrate::apply(&pool).await.unwrap();

    let state = Arc::new(SqliteStateStore::new(pool.clone(), 900));
    let index = Arc::new(SqliteVectorIndex::new(pool.clone()));
    let pipeline = Pipeline::new(
        state.clone(),
        index.clone(),
        Arc::new(LetterEmbedder::new()),
        options(),
    );

    let first = pipeline.run(catalog()).await.unwrap();
    assert_eq!(first.ingested, 4);
    assert_eq!(index.count().await.unwrap(), 10);
    let records_before = state.list().await.unwrap();
    assert_eq!(records_before.len(), 4);

    let second = pipeline.run(catalog()).await.unwrap();
    assert_eq!(second.ingested, 0);
    assert_eq!(second.points_upserted, 0);
    assert_eq!(second.skipped, 4);
    assert_eq!(state.list().await.unwrap(), records_before);
}

// ============ Retrieval ============

async fn searcher_over_catalog() -> Searcher {
    let h = harness();
    h.pipeline.run(catalog()).await.unwrap();
    let config = parse_config("[db]\npath = \"./unused.sqlite\"\n").unwrap();
    Searcher::new(h.index.clone(), Arc::new(LetterEmbedder::new()), config.retrieval)
}

#[tokio::test]
async fn test_search_returns_one_item_per_song() {
    let searcher = searcher_over_catalog().await;
    let items = searcher.search_songs("aaaa", None, Some(10)).await.unwrap();

    let mut ids: Vec<&str> = items.iter().map(|i| i.song_id.as_str()).collect();
    let total = ids.len();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), total);
    assert_eq!(total, 4);
    assert!(items.windows(2).all(|w| w[0].score >= w[1].score));
    assert!((items[0].score - 1.0).abs() < 1e-3);
}

#[tokio::test]
async fn test_search_mood_filter_and_k() {
    let searcher = searcher_over_catalog().await;
    let items = searcher.search_songs("gggg", Some("Sad"), Some(1)).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].mood.as_deref(), Some("sad"));

    let err = searcher.search_songs("aaaa", None, Some(0)).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<HarnessError>(),
        Some(HarnessError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_seed_playlist_excludes_seed() {
    let searcher = searcher_over_catalog().await;
    let rain = song_id("https://songs.test/rain");

    let items = searcher.playlist_from_seed(&rain, None, Some(10)).await.unwrap();
    assert!(!items.iter().any(|i| i.song_id == rain));
    // Same-mood filtering keeps only the other sad song.
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].song_id, song_id("https://songs.test/drizzle"));

    let any_mood = searcher
        .playlist_from_seed(&rain, Some("energetic"), Some(10))
        .await
        .unwrap();
    assert_eq!(any_mood.len(), 1);
    assert_eq!(any_mood[0].song_id, song_id("https://songs.test/storm"));
}

#[tokio::test]
async fn test_unknown_seed_is_not_found() {
    let searcher = searcher_over_catalog().await;
    let err = searcher
        .playlist_from_seed("no-such-song", None, None)
        .await
        .unwrap_err();
    assert!(is_not_found(&err));
}
