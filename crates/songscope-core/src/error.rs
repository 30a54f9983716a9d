//! Error taxonomy shared by ingestion and retrieval.
//!
//! Functions across the workspace return [`anyhow::Result`]. When a caller
//! needs to distinguish failure classes (the HTTP layer mapping a missing
//! seed to 404, the pipeline deciding whether to mark a song `failed`), the
//! error is built from a [`HarnessError`] variant and recovered with
//! [`anyhow::Error::downcast_ref`].

use thiserror::Error;

use crate::models::IngestionStatus;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// Embedding or vector index call failed or timed out. The song is
    /// recorded as `failed` and retried on the next differ pass.
    #[error("transient ingestion failure: {0}")]
    Transient(String),

    /// Malformed input record. The song is skipped and logged.
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    /// A requested song (e.g. a playlist seed) is not in the index.
    #[error("not found: {0}")]
    NotFound(String),

    /// A request parameter is out of range or missing (e.g. empty query).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration; fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A state store update that the ingestion state machine forbids.
    #[error("invalid state transition for {song_id}: {from} -> {to}")]
    InvalidTransition {
        song_id: String,
        from: String,
        to: IngestionStatus,
    },
}

impl HarnessError {
    pub fn not_found(what: impl Into<String>) -> anyhow::Error {
        HarnessError::NotFound(what.into()).into()
    }

    pub fn transient(what: impl Into<String>) -> anyhow::Error {
        HarnessError::Transient(what.into()).into()
    }

    pub fn invalid_input(what: impl Into<String>) -> anyhow::Error {
        HarnessError::InvalidInput(what.into()).into()
    }
}

/// True if `err` carries a [`HarnessError::NotFound`].
pub fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<HarnessError>(),
        Some(HarnessError::NotFound(_))
    )
}
