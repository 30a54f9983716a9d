//! Song search and playlist generation.
//!
//! Request-facing operations that glue the retrieval engine and the
//! aggregator together:
//!
//! | Operation | Query vector | Filter |
//! |-----------|--------------|--------|
//! | [`Searcher::search_songs`] | embedded query | optional mood |
//! | [`Searcher::playlist_from_query`] | embedded query | optional mood |
//! | [`Searcher::playlist_from_seed`] | seed's stored chunk vectors | seed's mood (if `seed_same_mood`) |
//!
//! Each asks the index for `max(k × candidate_multiplier, min_candidates)`
//! chunk hits so that enough distinct songs survive aggregation, then
//! collapses them to at most `k` songs.
//!
//! Invalid input (blank query, `k` outside `1..=max_k`) is
//! [`HarnessError::InvalidInput`]; an unknown seed is
//! [`HarnessError::NotFound`]. No matches is an empty list, not an error.

use anyhow::Result;
use std::sync::Arc;

use songscope_core::aggregate::aggregate;
use songscope_core::embedding::{embed_one, Embedder};
use songscope_core::error::HarnessError;
use songscope_core::index::{MetadataFilter, VectorIndex};
use songscope_core::models::PlaylistItem;
use songscope_core::retrieve::{self, candidate_count};

use crate::backends::Backends;
use crate::config::{Config, RetrievalConfig};
use crate::embedding::create_provider;

/// Search and playlist operations over one index and embedder.
#[derive(Clone)]
pub struct Searcher {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    retrieval: RetrievalConfig,
}

impl Searcher {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            retrieval,
        }
    }

    /// Resolve the requested `k`, applying the default and the bounds.
    pub fn resolve_k(&self, k: Option<usize>) -> Result<usize> {
        let k = k.unwrap_or(self.retrieval.default_k);
        if k == 0 || k > self.retrieval.max_k {
            return Err(HarnessError::invalid_input(format!(
                "k must be between 1 and {}",
                self.retrieval.max_k
            )));
        }
        Ok(k)
    }

    fn candidates(&self, k: usize) -> usize {
        candidate_count(
            k,
            self.retrieval.candidate_multiplier,
            self.retrieval.min_candidates,
        )
    }

    /// Songs whose lyrics best match a free-text query.
    pub async fn search_songs(
        &self,
        query: &str,
        mood: Option<&str>,
        k: Option<usize>,
    ) -> Result<Vec<PlaylistItem>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(HarnessError::invalid_input("query must not be empty"));
        }
        let k = self.resolve_k(k)?;

        let vector = embed_one(self.embedder.as_ref(), query).await?;
        let filter = MetadataFilter::mood(mood);
        let hits =
            retrieve::search(self.index.as_ref(), &vector, &filter, self.candidates(k)).await?;

        tracing::debug!(query, hits = hits.len(), k, "search");
        Ok(aggregate(&hits, k))
    }

    /// A playlist seeded by a free-text description.
    pub async fn playlist_from_query(
        &self,
        query: &str,
        mood: Option<&str>,
        k: Option<usize>,
    ) -> Result<Vec<PlaylistItem>> {
        self.search_songs(query, mood, k).await
    }

    /// A playlist of songs similar to a stored seed song.
    ///
    /// The seed is never part of its own playlist. An explicit `mood`
    /// overrides the seed's own mood filter.
    pub async fn playlist_from_seed(
        &self,
        seed_song_id: &str,
        mood: Option<&str>,
        k: Option<usize>,
    ) -> Result<Vec<PlaylistItem>> {
        let k = self.resolve_k(k)?;

        let seed_points = retrieve::load_seed(self.index.as_ref(), seed_song_id).await?;

        let filter = match mood {
            Some(m) if !m.trim().is_empty() => MetadataFilter::mood(Some(m)),
            _ if self.retrieval.seed_same_mood => MetadataFilter::mood(
                seed_points.first().and_then(|p| p.metadata.mood.as_deref()),
            ),
            _ => MetadataFilter::new(),
        };

        let hits = retrieve::search_from_seed_points(
            self.index.as_ref(),
            seed_song_id,
            &seed_points,
            &filter,
            self.candidates(k),
            self.retrieval.seed_strategy,
        )
        .await?;

        tracing::debug!(seed = seed_song_id, hits = hits.len(), k, "seed playlist");
        Ok(aggregate(&hits, k))
    }
}

fn print_items(items: &[PlaylistItem]) {
    if items.is_empty() {
        println!("No results.");
        return;
    }
    for (i, item) in items.iter().enumerate() {
        let title = item.title.as_deref().unwrap_or("(untitled)");
        println!(
            "{}. [{:.4}] {} / {}",
            i + 1,
            item.score,
            title,
            item.movie.as_deref().unwrap_or("-")
        );
        if let Some(singer) = &item.singer {
            println!("    singer: {}", singer);
        }
        println!(
            "    mood: {}  decade: {}",
            item.mood.as_deref().unwrap_or("-"),
            item.decade.as_deref().unwrap_or("-")
        );
        println!("    excerpt: \"{}\"", item.best_chunk.trim());
        println!("    id: {}", item.song_id);
        println!();
    }
}

async fn open_searcher(config: &Config) -> Result<(Backends, Searcher)> {
    let backends = Backends::open(config).await?;
    let embedder = create_provider(&config.embedding)?;
    let searcher = Searcher::new(
        backends.index.clone(),
        embedder,
        config.retrieval.clone(),
    );
    Ok((backends, searcher))
}

/// `scope search "<query>"`.
pub async fn run_search(
    config: &Config,
    query: &str,
    mood: Option<String>,
    k: Option<usize>,
) -> Result<()> {
    let (backends, searcher) = open_searcher(config).await?;
    let items = searcher.search_songs(query, mood.as_deref(), k).await?;
    print_items(&items);
    backends.pool.close().await;
    Ok(())
}

/// `scope playlist --seed <id> | --query "<text>"`.
pub async fn run_playlist(
    config: &Config,
    seed: Option<String>,
    query: Option<String>,
    mood: Option<String>,
    k: Option<usize>,
) -> Result<()> {
    let (backends, searcher) = open_searcher(config).await?;
    let items = match (seed, query) {
        (Some(seed), None) => {
            searcher
                .playlist_from_seed(&seed, mood.as_deref(), k)
                .await?
        }
        (None, Some(query)) => {
            searcher
                .playlist_from_query(&query, mood.as_deref(), k)
                .await?
        }
        _ => anyhow::bail!("Specify exactly one of --seed or --query"),
    };
    print_items(&items);
    backends.pool.close().await;
    Ok(())
}
