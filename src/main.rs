//! # songscope CLI (`scope`)
//!
//! The `scope` binary drives the lyrics pipeline end to end: collapsing the
//! crawler feed, incremental ingestion into the vector index, status and
//! purge, and search / playlist queries from the terminal or over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! scope --config ./config/songscope.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scope init` | Create the SQLite database and schema |
//! | `scope dedupe <in> <out>` | Keep the latest record per song in a JSONL feed |
//! | `scope ingest` | Diff the dataset against state and ingest changes |
//! | `scope status` | Songs per status, point count, recent failures |
//! | `scope purge <song_id>` | Remove a song's points and state |
//! | `scope search "<query>"` | Songs matching a text query |
//! | `scope playlist --seed <id>` | Songs similar to a stored song |
//! | `scope playlist --query "<text>"` | Playlist from a text description |
//! | `scope serve` | Start the HTTP server |
//!
//! Logs go to stderr and are controlled by `RUST_LOG`
//! (default `songscope=info,tower_http=info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use songscope::{config, dataset, ingest, migrate, search, server, stats};

#[derive(Parser)]
#[command(
    name = "scope",
    about = "songscope: incremental lyrics ingestion and song retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/songscope.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Collapse an append-only JSONL feed to the latest record per song.
    ///
    /// Does not read the config file.
    Dedupe {
        /// Input feed (one JSON object per line).
        input: PathBuf,
        /// Output file, rewritten from scratch.
        output: PathBuf,
    },

    /// Ingest new and changed songs from the configured dataset.
    ///
    /// Songs whose content hash matches their last successful ingestion
    /// are skipped. Re-running after a crash resumes where it left off.
    Ingest {
        /// Ingest at most this many changed songs.
        #[arg(long)]
        limit: Option<usize>,

        /// Show what would be ingested without touching state or index.
        #[arg(long)]
        dry_run: bool,

        /// Override `[ingest].workers`.
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Show ingestion status and index size.
    Status,

    /// Delete a song's points from the index and forget its state.
    Purge {
        /// Song ID (hex digest of the source URL).
        song_id: String,
    },

    /// Search songs by lyric similarity.
    Search {
        /// Free-text query.
        query: String,

        /// Only return songs with this mood.
        #[arg(long)]
        mood: Option<String>,

        /// Number of songs to return.
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Build a playlist from a seed song or a text description.
    Playlist {
        /// Seed song ID.
        #[arg(long, conflicts_with = "query", required_unless_present = "query")]
        seed: Option<String>,

        /// Text description of the playlist.
        #[arg(long)]
        query: Option<String>,

        /// Only return songs with this mood.
        #[arg(long)]
        mood: Option<String>,

        /// Number of songs to return.
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "songscope=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Dedupe { input, output } = &cli.command {
        dataset::run_dedupe(input, output)?;
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Dedupe { .. } => {}
        Commands::Ingest {
            limit,
            dry_run,
            workers,
        } => {
            ingest::run_ingest(&cfg, limit, dry_run, workers).await?;
        }
        Commands::Status => {
            stats::run_status(&cfg).await?;
        }
        Commands::Purge { song_id } => {
            ingest::run_purge(&cfg, &song_id).await?;
        }
        Commands::Search { query, mood, k } => {
            search::run_search(&cfg, &query, mood, k).await?;
        }
        Commands::Playlist {
            seed,
            query,
            mood,
            k,
        } => {
            search::run_playlist(&cfg, seed, query, mood, k).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }
    Ok(())
}
