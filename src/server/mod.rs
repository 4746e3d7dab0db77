//! HTTP server for the extraction pipeline and the data-browse surface.
//!
//! Thin axum handlers over the library: extraction routes drive the
//! pipeline orchestrators, browse routes are paginated reads over the
//! catalog store. All state is shared through [`AppState`] — trait objects
//! for the external collaborators plus the immutable pipeline config; no
//! globals, no per-request construction.

mod handlers;
mod routes;

pub use routes::create_router;

use crate::blob::{BlobStore, FsBlobStore};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::llm::{EnvLlmGateway, LlmGateway};
use crate::store::{
    pool_from_env, CatalogStore, MemoryCatalog, MemorySessionStore, PgCatalog, PgSessionStore,
    SessionStore,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<dyn SessionStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub llm: Arc<dyn LlmGateway>,
    pub config: Arc<PipelineConfig>,
}

impl AppState {
    /// Fully in-memory state for demos and tests — no database required.
    pub fn in_memory(config: PipelineConfig, blobs: Arc<dyn BlobStore>) -> Self {
        let model = config.model.clone();
        Self {
            sessions: Arc::new(MemorySessionStore::new()),
            catalog: Arc::new(MemoryCatalog::new()),
            blobs,
            llm: Arc::new(EnvLlmGateway::new(model)),
            config: Arc::new(config),
        }
    }
}

/// Wire the production backends from the environment and serve.
///
/// The Postgres pool is lazy and the LLM gateway resolves its key per call,
/// so nothing here validates credentials — a route that needs a missing
/// credential fails with a descriptive 500 when it is hit. `DATABASE_URL`
/// itself must be present, since there is no useful server without it.
pub async fn serve_from_env(
    config: PipelineConfig,
    host: &str,
    port: u16,
) -> Result<(), PipelineError> {
    let pool = pool_from_env()?;
    let sessions = Arc::new(PgSessionStore::new(pool.clone()));

    // Best-effort schema bootstrap; an unreachable database is reported but
    // does not prevent startup, matching the call-time failure contract.
    if let Err(e) = sessions.init_schema().await {
        warn!("session schema bootstrap skipped: {e}");
    }

    let model = config.model.clone();
    let state = AppState {
        sessions: sessions.clone(),
        catalog: Arc::new(PgCatalog::new(pool)),
        blobs: Arc::new(FsBlobStore::from_env()),
        llm: Arc::new(EnvLlmGateway::new(model)),
        config: Arc::new(config),
    };
    serve(state, host, port).await
}

/// Start the web server on already-wired state.
pub async fn serve(state: AppState, host: &str, port: u16) -> Result<(), PipelineError> {
    let app = create_router(state);
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| PipelineError::InvalidConfig(format!("bad listen address: {e}")))?;
    info!("listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| PipelineError::Internal(format!("bind {addr}: {e}")))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| PipelineError::Internal(format!("server error: {e}")))
}
