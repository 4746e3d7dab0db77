//! `/api/configs` — filterable, paginated assay QC configurations.

use super::{validate_pagination, ApiError};
use crate::domain::{
    AssayConfig, ConfigQuery, CvBucket, Page, SortOrder, CONFIG_SORT_COLUMNS,
};
use crate::server::AppState;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct ConfigParams {
    /// Single id or comma-separated list, e.g. `manufacturer_id=1,4,7`.
    pub manufacturer_id: Option<String>,
    pub marker_id: Option<String>,
    pub assay_id: Option<String>,
    pub quality_rating: Option<String>,
    pub cv_bucket: Option<String>,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Parse a single id or a comma-separated id list.
fn parse_id_list(raw: Option<&str>, param: &str) -> Result<Vec<i64>, ApiError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>().map_err(|_| {
                ApiError::bad_request(format!("{param} must be a comma-separated list of ids, got '{s}'"))
            })
        })
        .collect()
}

/// `GET /api/configs`.
pub async fn list_configs(
    State(state): State<AppState>,
    Query(params): Query<ConfigParams>,
) -> Result<Json<Page<AssayConfig>>, ApiError> {
    let (limit, offset) = validate_pagination(params.limit, params.offset)?;

    let sort_by = params
        .sort_by
        .unwrap_or_else(|| "manufacturer".to_string());
    if !CONFIG_SORT_COLUMNS.contains(&sort_by.as_str()) {
        return Err(ApiError::bad_request(format!(
            "sort_by must be one of {CONFIG_SORT_COLUMNS:?}, got '{sort_by}'"
        )));
    }

    let sort_order = match params.sort_order.as_deref() {
        None => SortOrder::Asc,
        Some(raw) => SortOrder::parse(raw).ok_or_else(|| {
            ApiError::bad_request(format!("sort_order must be 'asc' or 'desc', got '{raw}'"))
        })?,
    };

    let cv_bucket = params
        .cv_bucket
        .as_deref()
        .map(|raw| {
            CvBucket::parse(raw).ok_or_else(|| {
                ApiError::bad_request(format!(
                    "cv_bucket must be one of under_5, 5_to_10, 10_to_15, over_15; got '{raw}'"
                ))
            })
        })
        .transpose()?;

    let query = ConfigQuery {
        manufacturer_ids: parse_id_list(params.manufacturer_id.as_deref(), "manufacturer_id")?,
        marker_ids: parse_id_list(params.marker_id.as_deref(), "marker_id")?,
        assay_ids: parse_id_list(params.assay_id.as_deref(), "assay_id")?,
        quality_rating: params.quality_rating.clone(),
        cv_bucket,
        search: params.search.clone(),
        sort_by,
        sort_order,
        limit,
        offset,
    };

    let (data, total) = state.catalog.list_configs(&query).await?;

    let filters = serde_json::json!({
        "manufacturerIds": query.manufacturer_ids,
        "markerIds": query.marker_ids,
        "assayIds": query.assay_ids,
        "qualityRating": query.quality_rating,
        "cvBucket": query.cv_bucket,
        "search": query.search,
        "sortBy": query.sort_by,
        "sortOrder": query.sort_order,
    });
    Ok(Json(Page::new(data, total, limit, offset, filters)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_list_accepts_single_and_multi() {
        assert_eq!(parse_id_list(Some("7"), "x").unwrap(), vec![7]);
        assert_eq!(parse_id_list(Some("1,4, 7"), "x").unwrap(), vec![1, 4, 7]);
        assert!(parse_id_list(None, "x").unwrap().is_empty());
    }

    #[test]
    fn id_list_rejects_junk() {
        let err = parse_id_list(Some("1,abc"), "marker_id").unwrap_err();
        assert!(err.message.contains("marker_id"));
    }
}
