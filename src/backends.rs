//! Construction of the shared storage handles.
//!
//! Commands and the HTTP server never reach for globals: they open a
//! [`Backends`] once from the [`Config`] and pass the trait objects down.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

use songscope_core::index::VectorIndex;
use songscope_core::state::StateStore;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::qdrant::QdrantIndex;
use crate::sqlite_index::SqliteVectorIndex;
use crate::sqlite_state::SqliteStateStore;

/// State store and vector index for one process.
#[derive(Clone)]
pub struct Backends {
    pub pool: SqlitePool,
    pub state: Arc<dyn StateStore>,
    pub index: Arc<dyn VectorIndex>,
}

impl Backends {
    /// Connect to the database, ensure the schema, and build the configured
    /// index backend.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;

        let state: Arc<dyn StateStore> = Arc::new(SqliteStateStore::new(
            pool.clone(),
            config.ingest.pending_lease_secs,
        ));
        let index = create_index(config, pool.clone())?;

        Ok(Self { pool, state, index })
    }
}

/// Create the configured [`VectorIndex`].
///
/// | Config Value | Index |
/// |-------------|-------|
/// | `"sqlite"` | [`SqliteVectorIndex`] in the main database |
/// | `"qdrant"` | [`QdrantIndex`] at `index.url` |
pub fn create_index(config: &Config, pool: SqlitePool) -> Result<Arc<dyn VectorIndex>> {
    match config.index.backend.as_str() {
        "sqlite" => Ok(Arc::new(SqliteVectorIndex::new(pool))),
        "qdrant" => Ok(Arc::new(QdrantIndex::new(
            &config.index,
            config.ingest.call_timeout_secs,
        )?)),
        other => anyhow::bail!("Unknown index backend: {}", other),
    }
}
