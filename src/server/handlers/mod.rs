//! Request handlers and the API error envelope.

mod configs;
mod datasets;
mod extraction;
mod tables;

pub use configs::list_configs;
pub use datasets::{fair_analyze, get_dataset, list_datasets};
pub use extraction::{analyze_session, extract_table, get_session, session_tables, upload_paper};
pub use tables::browse_table;

use crate::error::{PipelineError, StoreError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Error envelope every route returns on failure: a status code plus
/// `{"error": "<human-readable reason>"}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let status = match &e {
            StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::Conflict { .. } => StatusCode::CONFLICT,
            StoreError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        let status = match &e {
            PipelineError::InvalidState { .. } | PipelineError::NotAPdf { .. } => {
                StatusCode::BAD_REQUEST
            }
            PipelineError::TableNotFound { .. } => StatusCode::NOT_FOUND,
            PipelineError::Store(store) => return Self::from_store_ref(store, &e),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl ApiError {
    fn from_store_ref(store: &StoreError, outer: &PipelineError) -> Self {
        let status = match store {
            StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::Conflict { .. } => StatusCode::CONFLICT,
            StoreError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: outer.to_string(),
        }
    }
}

/// Validate `limit`/`offset` query values, applying the defaults.
///
/// `limit` must sit in 1–100 (default 50); `offset` must be non-negative
/// (default 0). Violations are a 400, before any query runs.
pub(super) fn validate_pagination(
    limit: Option<i64>,
    offset: Option<i64>,
) -> Result<(i64, i64), ApiError> {
    let limit = limit.unwrap_or(50);
    if !(1..=100).contains(&limit) {
        return Err(ApiError::bad_request(format!(
            "limit must be between 1 and 100, got {limit}"
        )));
    }
    let offset = offset.unwrap_or(0);
    if offset < 0 {
        return Err(ApiError::bad_request(format!(
            "offset must be non-negative, got {offset}"
        )));
    }
    Ok((limit, offset))
}

/// Liveness probe.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults() {
        assert_eq!(validate_pagination(None, None).unwrap(), (50, 0));
    }

    #[test]
    fn pagination_bounds() {
        assert!(validate_pagination(Some(0), None).is_err());
        assert!(validate_pagination(Some(101), None).is_err());
        assert!(validate_pagination(Some(1), None).is_ok());
        assert!(validate_pagination(Some(100), None).is_ok());
        assert!(validate_pagination(None, Some(-1)).is_err());
    }

    #[test]
    fn store_not_found_maps_to_404() {
        let api: ApiError = StoreError::NotFound {
            entity: "session",
            id: "x".into(),
        }
        .into();
        assert_eq!(api.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn conflict_maps_to_409() {
        let api: ApiError = StoreError::Conflict {
            session_id: "x".into(),
            expected_version: 1,
        }
        .into();
        assert_eq!(api.status, StatusCode::CONFLICT);
    }

    #[test]
    fn invalid_state_maps_to_400() {
        let api: ApiError = PipelineError::InvalidState {
            session_id: "x".into(),
            actual: crate::session::SessionState::Uploaded,
            expected: "'analyzed'",
        }
        .into();
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn pipeline_wrapped_store_errors_keep_their_status() {
        let api: ApiError = PipelineError::Store(StoreError::NotFound {
            entity: "session",
            id: "x".into(),
        })
        .into();
        assert_eq!(api.status, StatusCode::NOT_FOUND);

        let api: ApiError = PipelineError::ExtractionExhausted {
            attempts: 3,
            last_error: "boom".into(),
        }
        .into();
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
