//! Extraction pipeline routes: upload, status, analyze, extract.

use super::ApiError;
use crate::blob::source_pdf_key;
use crate::pipeline::analysis::TableInfo;
use crate::server::AppState;
use crate::session::{ExtractedTableRecord, ExtractionSession};
use crate::{analyze, extract};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub filename: Option<String>,
}

/// `POST /api/extraction/upload?filename=` — raw PDF body.
///
/// Validates the PDF magic bytes, stores the blob, and creates the session
/// in state `uploaded`.
pub async fn upload_paper(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<(StatusCode, Json<ExtractionSession>), ApiError> {
    if body.len() < 4 || &body[..4] != b"%PDF" {
        return Err(ApiError::bad_request(
            "request body is not a PDF (missing %PDF magic bytes)",
        ));
    }

    let filename = params
        .filename
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| "upload.pdf".to_string());

    let mut session = ExtractionSession::new(String::new(), filename);
    session.pdf_path = source_pdf_key(&session.session_id);

    state.blobs.put(&session.pdf_path, &body).await?;
    state.sessions.create(&session).await?;

    info!(
        "session {}: uploaded '{}' ({} bytes)",
        session.session_id,
        session.pdf_filename,
        body.len()
    );
    Ok((StatusCode::CREATED, Json(session)))
}

/// `GET /api/extraction/:session_id` — session status for client polling.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ExtractionSession>, ApiError> {
    Ok(Json(state.sessions.get(&session_id).await?))
}

/// `POST /api/extraction/:session_id/analyze`.
pub async fn analyze_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<analyze::AnalysisOutput>, ApiError> {
    let output = analyze::run_analysis(
        state.sessions.as_ref(),
        state.blobs.as_ref(),
        state.llm.as_ref(),
        &state.config,
        &session_id,
    )
    .await?;
    Ok(Json(output))
}

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub table: TableInfo,
}

/// `POST /api/extraction/:session_id/extract` — body `{"table": {...}}`.
pub async fn extract_table(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<ExtractRequest>,
) -> Result<Json<extract::ExtractionOutput>, ApiError> {
    let output = extract::run_extraction(
        state.sessions.as_ref(),
        state.blobs.as_ref(),
        state.llm.as_ref(),
        &state.config,
        &session_id,
        &request.table,
    )
    .await?;
    Ok(Json(output))
}

/// `GET /api/extraction/:session_id/tables` — extracted-table records.
pub async fn session_tables(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<ExtractedTableRecord>>, ApiError> {
    // 404 for unknown sessions rather than an empty list.
    state.sessions.get(&session_id).await?;
    Ok(Json(state.sessions.tables_for_session(&session_id).await?))
}
