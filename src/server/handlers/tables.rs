//! `/api/tables/:name` — generic paginated passthrough over the allow-list.

use super::{validate_pagination, ApiError};
use crate::domain::{table_spec, Page, SortOrder};
use crate::server::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct TableParams {
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// `GET /api/tables/:name`.
///
/// `name` must be in the static allow-list and `sort_by` in that table's
/// column whitelist; anything else is a 400 before any query runs.
pub async fn browse_table(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<TableParams>,
) -> Result<Json<Page<serde_json::Value>>, ApiError> {
    let spec = table_spec(&name).ok_or_else(|| {
        ApiError::bad_request(format!("unknown table '{name}'"))
    })?;

    let (limit, offset) = validate_pagination(params.limit, params.offset)?;

    let sort_by = params
        .sort_by
        .unwrap_or_else(|| spec.default_sort.to_string());
    if !spec.allows_column(&sort_by) {
        return Err(ApiError::bad_request(format!(
            "sort_by must be one of {:?}, got '{sort_by}'",
            spec.columns
        )));
    }

    let sort_order = match params.sort_order.as_deref() {
        None => SortOrder::Asc,
        Some(raw) => SortOrder::parse(raw).ok_or_else(|| {
            ApiError::bad_request(format!("sort_order must be 'asc' or 'desc', got '{raw}'"))
        })?,
    };

    let (data, total) = state
        .catalog
        .table_rows(spec, &sort_by, sort_order, limit, offset)
        .await?;

    let filters = serde_json::json!({
        "table": spec.name,
        "sortBy": sort_by,
        "sortOrder": sort_order,
    });
    Ok(Json(Page::new(data, total, limit, offset, filters)))
}
