//! Configuration parsing and validation.
//!
//! songscope is configured via a TOML file (default: `config/songscope.toml`).
//! The file is loaded once at startup by [`load_config`], validated, and then
//! passed by reference to every command and to the HTTP server.
//!
//! Every section except `[db]` is optional and falls back to defaults:
//!
//! ```toml
//! [db]
//! path = "./data/songscope.sqlite"
//!
//! [dataset]
//! path = "./data/songs_latest.jsonl"
//!
//! [chunking]
//! chunk_chars = 1200
//! overlap_chars = 200
//!
//! [embedding]
//! provider = "ollama"          # disabled | openai | ollama | local
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [index]
//! backend = "sqlite"           # sqlite | qdrant
//!
//! [ingest]
//! workers = 4
//!
//! [retrieval]
//! default_k = 20
//! seed_strategy = "per_chunk"  # per_chunk | centroid
//!
//! [server]
//! bind = "127.0.0.1:7341"
//! ```
//!
//! Validation failures are returned as
//! [`HarnessError::Configuration`](songscope_core::error::HarnessError) so
//! the binary aborts before touching any state.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use songscope_core::chunk::ChunkerConfig;
use songscope_core::error::HarnessError;
use songscope_core::retrieve::SeedStrategy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub chunking: ChunkerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    #[serde(default = "default_dataset_path")]
    pub path: PathBuf,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: default_dataset_path(),
        }
    }
}

fn default_dataset_path() -> PathBuf {
    PathBuf::from("./data/songs_latest.jsonl")
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Sent as the `api-key` header when set.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_qdrant_url(),
            collection: default_collection(),
            api_key: None,
        }
    }
}

fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection() -> String {
    "songs_lyrics_v2".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_pending_lease_secs")]
    pub pending_lease_secs: i64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            call_timeout_secs: default_call_timeout_secs(),
            pending_lease_secs: default_pending_lease_secs(),
        }
    }
}

fn default_workers() -> usize {
    4
}
fn default_call_timeout_secs() -> u64 {
    60
}
fn default_pending_lease_secs() -> i64 {
    900
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_max_k")]
    pub max_k: usize,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default = "default_min_candidates")]
    pub min_candidates: usize,
    #[serde(default)]
    pub seed_strategy: SeedStrategy,
    #[serde(default = "default_seed_same_mood")]
    pub seed_same_mood: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            max_k: default_max_k(),
            candidate_multiplier: default_candidate_multiplier(),
            min_candidates: default_min_candidates(),
            seed_strategy: SeedStrategy::default(),
            seed_same_mood: default_seed_same_mood(),
        }
    }
}

fn default_k() -> usize {
    20
}
fn default_max_k() -> usize {
    50
}
fn default_candidate_multiplier() -> usize {
    8
}
fn default_min_candidates() -> usize {
    50
}
fn default_seed_same_mood() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

fn invalid(message: impl Into<String>) -> anyhow::Error {
    HarnessError::Configuration(message.into()).into()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    config.chunking.validate()?;

    if config.embedding.batch_size == 0 {
        return Err(invalid("embedding.batch_size must be > 0"));
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            return Err(invalid(format!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            )));
        }
        if config.embedding.model.is_none() && config.embedding.provider != "local" {
            return Err(invalid(format!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            )));
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => {
            return Err(invalid(format!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
                other
            )))
        }
    }

    match config.index.backend.as_str() {
        "sqlite" | "qdrant" => {}
        other => {
            return Err(invalid(format!(
                "Unknown index backend: '{}'. Must be sqlite or qdrant.",
                other
            )))
        }
    }

    if config.ingest.workers == 0 {
        return Err(invalid("ingest.workers must be >= 1"));
    }
    if config.ingest.call_timeout_secs == 0 {
        return Err(invalid("ingest.call_timeout_secs must be > 0"));
    }
    if config.ingest.pending_lease_secs < 0 {
        return Err(invalid("ingest.pending_lease_secs must be >= 0"));
    }

    let r = &config.retrieval;
    if r.max_k == 0 {
        return Err(invalid("retrieval.max_k must be >= 1"));
    }
    if r.default_k == 0 || r.default_k > r.max_k {
        return Err(invalid(format!(
            "retrieval.default_k must be in 1..={}",
            r.max_k
        )));
    }
    if r.candidate_multiplier == 0 {
        return Err(invalid("retrieval.candidate_multiplier must be >= 1"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use songscope_core::error::HarnessError;

    const MINIMAL: &str = r#"
        [db]
        path = "./data/test.sqlite"
    "#;

    fn is_config_error(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<HarnessError>(),
            Some(HarnessError::Configuration(_))
        )
    }

    #[test]
    fn test_minimal_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.chunking.chunk_chars, 1200);
        assert_eq!(cfg.chunking.overlap_chars, 200);
        assert_eq!(cfg.embedding.provider, "disabled");
        assert_eq!(cfg.index.backend, "sqlite");
        assert_eq!(cfg.index.collection, "songs_lyrics_v2");
        assert_eq!(cfg.ingest.workers, 4);
        assert_eq!(cfg.ingest.pending_lease_secs, 900);
        assert_eq!(cfg.retrieval.default_k, 20);
        assert_eq!(cfg.retrieval.max_k, 50);
        assert_eq!(cfg.retrieval.seed_strategy, SeedStrategy::PerChunk);
        assert!(cfg.retrieval.seed_same_mood);
        assert_eq!(cfg.server.bind, "127.0.0.1:7341");
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let toml = format!("{}\n[chunking]\nchunk_chars = 0\n", MINIMAL);
        let err = parse_config(&toml).unwrap_err();
        assert!(is_config_error(&err));
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_size() {
        let toml = format!(
            "{}\n[chunking]\nchunk_chars = 100\noverlap_chars = 100\n",
            MINIMAL
        );
        let err = parse_config(&toml).unwrap_err();
        assert!(is_config_error(&err));
    }

    #[test]
    fn test_enabled_provider_needs_dims() {
        let toml = format!(
            "{}\n[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\n",
            MINIMAL
        );
        assert!(is_config_error(&parse_config(&toml).unwrap_err()));
    }

    #[test]
    fn test_unknown_backend() {
        let toml = format!("{}\n[index]\nbackend = \"faiss\"\n", MINIMAL);
        assert!(is_config_error(&parse_config(&toml).unwrap_err()));
    }

    #[test]
    fn test_centroid_strategy_parses() {
        let toml = format!(
            "{}\n[retrieval]\nseed_strategy = \"centroid\"\nseed_same_mood = false\n",
            MINIMAL
        );
        let cfg = parse_config(&toml).unwrap();
        assert_eq!(cfg.retrieval.seed_strategy, SeedStrategy::Centroid);
        assert!(!cfg.retrieval.seed_same_mood);
    }

    #[test]
    fn test_default_k_bounded_by_max_k() {
        let toml = format!("{}\n[retrieval]\ndefault_k = 60\n", MINIMAL);
        assert!(is_config_error(&parse_config(&toml).unwrap_err()));
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let cfg = parse_config(include_str!("../config/songscope.toml")).unwrap();
        assert_eq!(cfg.embedding.provider, "ollama");
        assert_eq!(cfg.embedding.dims, Some(768));
        assert_eq!(cfg.index.backend, "sqlite");
    }
}
