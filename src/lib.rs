//! # songscope
//!
//! Incremental lyrics ingestion and song retrieval.
//!
//! A crawler produces a JSONL feed of songs with lyrics and enrichment
//! (mood, energy, themes). songscope keeps a vector index in step with that
//! feed and answers "songs like this" queries over it.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────┐   ┌────────────────┐   ┌──────────────┐
//! │  dataset   │──▶│   diff   │──▶│ ingest pipeline │──▶│ vector index │
//! │  (JSONL)   │   │ vs state │   │ chunk + embed   │   │ sqlite/qdrant│
//! └────────────┘   └──────────┘   └───────┬────────┘   └──────┬───────┘
//!                                         ▼                   │
//!                                  ┌────────────┐             │
//!                                  │ state store│             │
//!                                  │  (sqlite)  │             ▼
//!                                  └────────────┘   ┌──────────────────┐
//!                                                   │ search/playlists │
//!                                                   │  CLI  +  HTTP    │
//!                                                   └──────────────────┘
//! ```
//!
//! Pure logic (identity, chunking, diffing, retrieval, ranking) lives in
//! `songscope-core`. This crate adds configuration, storage and embedding
//! backends, the pipeline runner, and the CLI and HTTP surfaces.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`dataset`] | JSONL loading and latest-record dedupe |
//! | [`db`] | SQLite connection pool |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_state`] | Ingestion state store |
//! | [`sqlite_index`] | Brute-force vector index in SQLite |
//! | [`qdrant`] | Qdrant vector index over REST |
//! | [`backends`] | Wiring of state store and index |
//! | [`embedding`] | Embedding providers |
//! | [`ingest`] | Ingestion pipeline and purge |
//! | [`search`] | Search and playlist operations |
//! | [`server`] | HTTP server |
//! | [`stats`] | Status report |

pub mod backends;
pub mod config;
pub mod dataset;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod migrate;
pub mod qdrant;
pub mod search;
pub mod server;
pub mod sqlite_index;
pub mod sqlite_state;
pub mod stats;
