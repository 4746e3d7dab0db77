//! Dataset browse and FAIR-scoring routes.

use super::ApiError;
use crate::domain::{DataFile, Dataset, FairScoreBreakdown};
use crate::fair;
use crate::server::AppState;
use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

/// `GET /api/datasets`.
pub async fn list_datasets(
    State(state): State<AppState>,
) -> Result<Json<Vec<Dataset>>, ApiError> {
    Ok(Json(state.catalog.list_datasets().await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetDetail {
    pub dataset: Dataset,
    pub files: Vec<DataFile>,
    pub fair_score: Option<FairScoreBreakdown>,
}

/// `GET /api/datasets/:dataset_id`.
pub async fn get_dataset(
    State(state): State<AppState>,
    Path(dataset_id): Path<String>,
) -> Result<Json<DatasetDetail>, ApiError> {
    let dataset = state.catalog.get_dataset(&dataset_id).await?;
    let files = state.catalog.data_files(&dataset_id).await?;
    let fair_score = state.catalog.get_fair_score(&dataset_id).await?;
    Ok(Json(DatasetDetail {
        dataset,
        files,
        fair_score,
    }))
}

/// `POST /api/datasets/:dataset_id/fair/analyze`.
///
/// Returns the fixed-shape score object; any failure is a 500 with the
/// reason in the body (there is no partial-success signalling).
pub async fn fair_analyze(
    State(state): State<AppState>,
    Path(dataset_id): Path<String>,
) -> Result<Json<FairScoreBreakdown>, ApiError> {
    let breakdown = fair::run_fair_analysis(
        state.catalog.as_ref(),
        state.blobs.as_ref(),
        state.llm.as_ref(),
        &state.config,
        &dataset_id,
    )
    .await?;
    Ok(Json(breakdown))
}
