//! Ingestion pipeline orchestration.
//!
//! Drives the incremental sync flow: dataset → differ → chunking →
//! embedding → index upsert → orphan cleanup → state commit.
//!
//! # Per-song protocol
//!
//! 1. `mark_pending` claims the song; if another worker holds a fresh
//!    claim the song is reported as locked and left alone.
//! 2. Lyrics are chunked and embedded in batches of `embedding.batch_size`.
//! 3. `reserve_chunks` records the new chunk count as a high-water mark,
//!    then every chunk is upserted under its deterministic point ID.
//! 4. Point IDs for indices `new_count .. previous high-water` are deleted.
//! 5. `mark_ingested` commits. Any failure in 2 to 4 records `mark_failed`.
//!
//! Because the upsert always precedes the commit, a crash anywhere leaves
//! the song `pending` or `failed`, and the next run re-ingests it.
//! Re-running on an unchanged dataset performs no index writes at all.
//!
//! Songs are processed concurrently (up to `ingest.workers`) and are
//! independent: one song's failure never aborts the batch.

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use songscope_core::chunk::{chunk_lyrics, chunk_song, ChunkerConfig};
use songscope_core::diff::diff_dataset;
use songscope_core::embedding::Embedder;
use songscope_core::error::HarnessError;
use songscope_core::identity::point_id;
use songscope_core::index::VectorIndex;
use songscope_core::models::{ChunkMetadata, Point, Song};
use songscope_core::state::StateStore;

use crate::backends::Backends;
use crate::config::Config;
use crate::dataset;
use crate::embedding::create_provider;

/// Knobs for one pipeline run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub chunking: ChunkerConfig,
    pub batch_size: usize,
    pub workers: usize,
    pub call_timeout: Duration,
    /// Ingest at most this many songs (after diffing).
    pub limit: Option<usize>,
    /// Plan only; touch neither state nor index.
    pub dry_run: bool,
}

impl IngestOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunking: config.chunking.clone(),
            batch_size: config.embedding.batch_size,
            workers: config.ingest.workers,
            call_timeout: Duration::from_secs(config.ingest.call_timeout_secs),
            limit: None,
            dry_run: false,
        }
    }
}

/// Batch report for one run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// Songs in the input.
    pub scanned: usize,
    pub ingested: usize,
    pub failed: usize,
    /// Up to date or duplicate.
    pub skipped: usize,
    /// Claimed by another worker whose pending lease has not expired.
    pub locked: usize,
    pub points_upserted: usize,
    pub points_deleted: usize,
    /// Dry run only: songs that would be ingested and their chunk total.
    pub planned: usize,
    pub planned_chunks: usize,
}

/// What happened to one song.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SongOutcome {
    Ingested { upserted: usize, deleted: usize },
    /// Another worker holds the pending lease.
    Locked,
    Failed(String),
}

/// The ingestion pipeline over injected storage and embedding backends.
#[derive(Clone)]
pub struct Pipeline {
    state: Arc<dyn StateStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    options: IngestOptions,
}

impl Pipeline {
    pub fn new(
        state: Arc<dyn StateStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        options: IngestOptions,
    ) -> Self {
        Self {
            state,
            index,
            embedder,
            options,
        }
    }

    /// Diff `songs` against the state store and ingest whatever changed.
    pub async fn run(&self, songs: Vec<Song>) -> Result<IngestSummary> {
        self.options.chunking.validate()?;
        let mut summary = IngestSummary {
            scanned: songs.len(),
            ..Default::default()
        };

        let report = diff_dataset(songs, self.state.as_ref()).await?;
        for id in &report.duplicates {
            tracing::warn!(song_id = %id, "duplicate song_id in dataset; keeping first occurrence");
        }
        summary.skipped = report.up_to_date + report.duplicates.len();

        let mut to_ingest = report.to_ingest;
        if let Some(limit) = self.options.limit {
            to_ingest.truncate(limit);
        }

        tracing::info!(
            scanned = summary.scanned,
            to_ingest = to_ingest.len(),
            up_to_date = report.up_to_date,
            "diff complete"
        );

        if self.options.dry_run {
            summary.planned = to_ingest.len();
            for song in &to_ingest {
                summary.planned_chunks += chunk_lyrics(&song.lyrics, &self.options.chunking)?.len();
            }
            return Ok(summary);
        }

        if to_ingest.is_empty() {
            return Ok(summary);
        }

        self.timed("index setup", self.index.ensure_ready(self.embedder.dims()))
            .await?;

        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let mut tasks = JoinSet::new();

        for song in to_ingest {
            let pipeline = self.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await?;
                let outcome = pipeline.ingest_song(&song).await;
                Ok::<_, anyhow::Error>((song.song_id, outcome?))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((_, SongOutcome::Ingested { upserted, deleted }))) => {
                    summary.ingested += 1;
                    summary.points_upserted += upserted;
                    summary.points_deleted += deleted;
                }
                Ok(Ok((song_id, SongOutcome::Locked))) => {
                    tracing::warn!(%song_id, "song is pending under another worker's lease");
                    summary.locked += 1;
                }
                Ok(Ok((_, SongOutcome::Failed(_)))) => summary.failed += 1,
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "state store error during ingestion");
                    summary.failed += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, "ingestion task panicked");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            ingested = summary.ingested,
            failed = summary.failed,
            skipped = summary.skipped,
            locked = summary.locked,
            points_upserted = summary.points_upserted,
            points_deleted = summary.points_deleted,
            "ingestion complete"
        );
        Ok(summary)
    }

    /// Run the per-song protocol for one song.
    ///
    /// Embedding and index failures are recorded on the song and returned
    /// as [`SongOutcome::Failed`]; only state store errors surface as `Err`.
    pub async fn ingest_song(&self, song: &Song) -> Result<SongOutcome> {
        if !self
            .state
            .mark_pending(&song.song_id, &song.content_hash)
            .await?
        {
            tracing::debug!(song_id = %song.song_id, "pending lease held elsewhere; skipping");
            return Ok(SongOutcome::Locked);
        }

        match self.write_points(song).await {
            Ok((chunk_count, upserted, deleted)) => {
                self.state
                    .mark_ingested(&song.song_id, &song.content_hash, chunk_count)
                    .await?;
                tracing::debug!(song_id = %song.song_id, chunk_count, deleted, "ingested");
                Ok(SongOutcome::Ingested { upserted, deleted })
            }
            Err(e) => {
                let message = format!("{:#}", e);
                tracing::warn!(song_id = %song.song_id, error = %message, "ingestion failed");
                self.state.mark_failed(&song.song_id, &message).await?;
                Ok(SongOutcome::Failed(message))
            }
        }
    }

    /// Steps 2 to 4: chunk, embed, upsert, and delete trailing points.
    /// Returns `(chunk_count, upserted, deleted)`.
    async fn write_points(&self, song: &Song) -> Result<(i64, usize, usize)> {
        let previous = self
            .state
            .get(&song.song_id)
            .await?
            .map(|r| r.chunk_count)
            .unwrap_or(0);

        let chunks = chunk_song(&song.song_id, &song.lyrics, &self.options.chunking)?;
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.options.batch_size.max(1)) {
            let embedded = self.timed("embedding", self.embedder.embed(batch)).await?;
            if embedded.len() != batch.len() {
                return Err(HarnessError::transient(format!(
                    "embedder returned {} vectors for {} chunks",
                    embedded.len(),
                    batch.len()
                )));
            }
            vectors.extend(embedded);
        }

        let points: Vec<Point> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| Point {
                metadata: ChunkMetadata::for_song(song, chunk.chunk_index, &chunk.text),
                point_id: chunk.point_id,
                vector,
            })
            .collect();
        let count = points.len() as i64;

        self.state.reserve_chunks(&song.song_id, count).await?;
        if !points.is_empty() {
            self.timed("index upsert", self.index.upsert(&points)).await?;
        }

        let stale: Vec<String> = (count..previous)
            .map(|i| point_id(&song.song_id, i))
            .collect();
        if !stale.is_empty() {
            self.timed("index delete", self.index.delete(&stale)).await?;
        }

        Ok((count, points.len(), stale.len()))
    }

    /// Remove a song's points and its state record.
    ///
    /// Deletes every point ID below the recorded high-water mark plus any
    /// point the index still reports for the song. Returns the number of
    /// point IDs deleted; an unknown song is [`HarnessError::NotFound`].
    pub async fn purge(&self, song_id: &str) -> Result<usize> {
        let record = self.state.get(song_id).await?;
        let mut ids: BTreeSet<String> = BTreeSet::new();

        if let Some(rec) = &record {
            ids.extend((0..rec.chunk_count).map(|i| point_id(song_id, i)));
        }
        let live = self
            .timed("index scan", self.index.points_for_song(song_id))
            .await?;
        ids.extend(live.into_iter().map(|p| p.point_id));

        if record.is_none() && ids.is_empty() {
            return Err(HarnessError::not_found(format!(
                "song '{}' is neither tracked nor indexed",
                song_id
            )));
        }

        let ids: Vec<String> = ids.into_iter().collect();
        if !ids.is_empty() {
            self.timed("index delete", self.index.delete(&ids)).await?;
        }
        self.state.remove(song_id).await?;
        tracing::info!(song_id, points = ids.len(), "purged");
        Ok(ids.len())
    }

    /// Bound a backend call by `call_timeout`; expiry is a transient error.
    async fn timed<T>(&self, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.options.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(HarnessError::transient(format!(
                "{} timed out after {}s",
                what,
                self.options.call_timeout.as_secs_f64()
            ))),
        }
    }
}

/// `scope ingest`: load the dataset and run the pipeline.
pub async fn run_ingest(
    config: &Config,
    limit: Option<usize>,
    dry_run: bool,
    workers: Option<usize>,
) -> Result<()> {
    if !dry_run && !config.embedding.is_enabled() {
        return Err(HarnessError::Configuration(
            "embeddings are disabled; set [embedding].provider to ingest (or use --dry-run)"
                .into(),
        )
        .into());
    }

    let loaded = dataset::load_songs(&config.dataset.path)?;
    let backends = Backends::open(config).await?;
    let embedder = create_provider(&config.embedding)?;

    let mut options = IngestOptions::from_config(config);
    options.limit = limit;
    options.dry_run = dry_run;
    if let Some(w) = workers {
        options.workers = w.max(1);
    }

    let pipeline = Pipeline::new(backends.state.clone(), backends.index.clone(), embedder, options);
    let summary = pipeline.run(loaded.songs).await?;

    if dry_run {
        println!("ingest {} (dry-run)", config.dataset.path.display());
        println!("  songs scanned: {}", summary.scanned);
        println!("  records skipped: {}", loaded.skipped);
        println!("  up to date: {}", summary.skipped);
        println!("  would ingest: {}", summary.planned);
        println!("  estimated chunks: {}", summary.planned_chunks);
        backends.pool.close().await;
        return Ok(());
    }

    println!("ingest {}", config.dataset.path.display());
    println!("  songs scanned: {}", summary.scanned);
    println!("  records skipped: {}", loaded.skipped);
    println!("  ingested: {}", summary.ingested);
    println!("  failed: {}", summary.failed);
    println!("  skipped: {}", summary.skipped);
    println!("  locked: {}", summary.locked);
    println!("  points upserted: {}", summary.points_upserted);
    println!("  points deleted: {}", summary.points_deleted);
    println!("ok");

    backends.pool.close().await;
    Ok(())
}

/// `scope purge <song_id>`.
pub async fn run_purge(config: &Config, song_id: &str) -> Result<()> {
    let backends = Backends::open(config).await?;
    // Purging never embeds; the disabled provider keeps OpenAI keys optional.
    let pipeline = Pipeline::new(
        backends.state.clone(),
        backends.index.clone(),
        Arc::new(crate::embedding::DisabledProvider),
        IngestOptions::from_config(config),
    );
    let deleted = pipeline.purge(song_id).await?;

    println!("purge {}", song_id);
    println!("  points deleted: {}", deleted);
    println!("ok");

    backends.pool.close().await;
    Ok(())
}
