//! HTTP surface of the tunehash service.
//!
//! Builds the router and runs it; handlers live in [`crate::routes`].

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::AppConfig;
use crate::fingerprint::FingerprintConfig;
use crate::persistance::{FingerprintStore, SqliteStore};
use crate::routes;

/// Largest accepted upload body.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn FingerprintStore>,
    pub fingerprint: Arc<FingerprintConfig>,
}

impl AppState {
    pub fn new(store: Arc<dyn FingerprintStore>, fingerprint: FingerprintConfig) -> Self {
        Self { store, fingerprint: Arc::new(fingerprint) }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::root))
        .route("/health", get(|| async { "healthy" }))
        .route("/fingerprint", post(routes::fingerprint))
        .route("/songs", get(routes::list_songs))
        .route("/songs/upload", post(routes::upload_song))
        .route("/songs/{id}", get(routes::get_song).delete(routes::delete_song))
        .route("/songs/{id}/fingerprints", get(routes::song_fingerprints))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Connect the store, bind and serve until the process is stopped.
pub async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let store = SqliteStore::connect(&config.database_url).await?;
    let state = AppState::new(Arc::new(store), config.fingerprint);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router(state)).await?;
    Ok(())
}
