//! # songscope core
//!
//! Runtime-agnostic logic for songscope: song and chunk identity, lyric
//! chunking, the per-song ingestion state machine, the vector index
//! abstraction, retrieval, and song-level ranking.
//!
//! This crate has no tokio, sqlx, or HTTP dependencies. Storage and
//! embedding backends live in the `songscope` app crate and plug in
//! through the [`state::StateStore`], [`index::VectorIndex`], and
//! [`embedding::Embedder`] traits.

pub mod aggregate;
pub mod chunk;
pub mod diff;
pub mod embedding;
pub mod error;
pub mod identity;
pub mod index;
pub mod models;
pub mod retrieve;
pub mod state;
