//! Request-facing HTTP server.
//!
//! A thin JSON layer over [`Searcher`]. Every handler parses its query
//! string, calls one search operation, and wraps the songs in
//! `{ "items": [...] }`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Health check (returns version) |
//! | `GET` | `/search?q=&mood=&k=` | Songs matching a text query |
//! | `GET` | `/playlist/query?q=&mood=&k=` | Playlist from a text description |
//! | `GET` | `/playlist/seed/{song_id}?k=&mood=` | Playlist of songs similar to a seed |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//! An empty result set is a `200` with `items: []`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use songscope_core::error::HarnessError;
use songscope_core::models::PlaylistItem;

use crate::backends::Backends;
use crate::config::Config;
use crate::embedding::create_provider;
use crate::search::Searcher;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub searcher: Arc<Searcher>,
}

/// Build the router with every endpoint, CORS, and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/search", get(handle_search))
        .route("/playlist/query", get(handle_playlist_query))
        .route("/playlist/seed/{song_id}", get(handle_playlist_seed))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let backends = Backends::open(config).await?;
    let embedder = create_provider(&config.embedding)?;
    let searcher = Searcher::new(
        backends.index.clone(),
        embedder,
        config.retrieval.clone(),
    );

    let app = create_router(AppState {
        searcher: Arc::new(searcher),
    });

    let bind_addr = config.server.bind.clone();
    tracing::info!(bind = %bind_addr, index = backends.index.name(), "server listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    backends.pool.close().await;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

/// Map an operation error to a status code by its [`HarnessError`] kind.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<HarnessError>() {
            Some(HarnessError::InvalidInput(_)) => bad_request(err.to_string()),
            Some(HarnessError::NotFound(_)) => AppError {
                status: StatusCode::NOT_FOUND,
                code: "not_found",
                message: err.to_string(),
            },
            _ => {
                tracing::error!(error = %format!("{:#}", err), "request failed");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal",
                    message: err.to_string(),
                }
            }
        }
    }
}

// ============ Request / response bodies ============

/// Query string shared by the search endpoints.
///
/// `k` arrives as text so a malformed value still gets the JSON error body.
#[derive(Debug, Default, Deserialize)]
struct SearchParams {
    q: Option<String>,
    mood: Option<String>,
    k: Option<String>,
}

impl SearchParams {
    fn k(&self) -> Result<Option<usize>, AppError> {
        match self.k.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => raw
                .parse::<usize>()
                .map(Some)
                .map_err(|_| bad_request(format!("k must be a positive integer, got '{}'", raw))),
        }
    }

    fn mood(&self) -> Option<&str> {
        self.mood.as_deref().filter(|m| !m.trim().is_empty())
    }
}

#[derive(Serialize)]
struct ItemsResponse {
    items: Vec<PlaylistItem>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

// ============ Handlers ============

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<ItemsResponse>, AppError> {
    let k = params.k()?;
    let items = state
        .searcher
        .search_songs(params.q.as_deref().unwrap_or(""), params.mood(), k)
        .await?;
    Ok(Json(ItemsResponse { items }))
}

async fn handle_playlist_query(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<ItemsResponse>, AppError> {
    let k = params.k()?;
    let items = state
        .searcher
        .playlist_from_query(params.q.as_deref().unwrap_or(""), params.mood(), k)
        .await?;
    Ok(Json(ItemsResponse { items }))
}

async fn handle_playlist_seed(
    State(state): State<AppState>,
    Path(song_id): Path<String>,
    Query(params): Query<SearchParams>,
) -> Result<Json<ItemsResponse>, AppError> {
    let k = params.k()?;
    let items = state
        .searcher
        .playlist_from_seed(&song_id, params.mood(), k)
        .await?;
    Ok(Json(ItemsResponse { items }))
}
