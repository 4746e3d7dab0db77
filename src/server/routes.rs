//! Router configuration for the web server.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Extraction pipeline
        .route("/api/extraction/upload", post(handlers::upload_paper))
        .route("/api/extraction/:session_id", get(handlers::get_session))
        .route(
            "/api/extraction/:session_id/analyze",
            post(handlers::analyze_session),
        )
        .route(
            "/api/extraction/:session_id/extract",
            post(handlers::extract_table),
        )
        .route(
            "/api/extraction/:session_id/tables",
            get(handlers::session_tables),
        )
        // Assay QC browse surface
        .route("/api/configs", get(handlers::list_configs))
        .route("/api/tables/:name", get(handlers::browse_table))
        // Datasets and FAIR scoring
        .route("/api/datasets", get(handlers::list_datasets))
        .route("/api/datasets/:dataset_id", get(handlers::get_dataset))
        .route(
            "/api/datasets/:dataset_id/fair/analyze",
            post(handlers::fair_analyze),
        )
        // Liveness
        .route("/health", get(handlers::health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
