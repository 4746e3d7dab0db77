//! Typed rows and query shapes for the browse surface.
//!
//! Every query result that crosses a layer boundary is an explicit named
//! struct, validated where it enters. The one deliberate exception is the
//! generic table browser, whose rows are JSON objects — but their keys are
//! drawn from the static column whitelist below, never from the database or
//! the caller, so the shape is still closed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Assay QC configurations ──────────────────────────────────────────────

/// One diagnostic-assay test configuration with its aggregated QC metrics.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AssayConfig {
    pub id: i64,
    pub manufacturer_id: i64,
    pub manufacturer: String,
    pub marker_id: i64,
    pub marker: String,
    pub assay_id: i64,
    pub assay: String,
    /// Coefficient of variation, percent. None when too few samples.
    pub cv_pct: Option<f64>,
    /// "excellent" | "good" | "acceptable" | "poor".
    pub quality_rating: Option<String>,
    pub sample_count: i64,
    pub updated_at: DateTime<Utc>,
}

/// CV-threshold buckets offered as a filter. The boundaries are the
/// conventional precision tiers for quantitative diagnostic assays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CvBucket {
    /// CV < 5%
    Under5,
    /// 5% ≤ CV < 10%
    From5To10,
    /// 10% ≤ CV < 15%
    From10To15,
    /// CV ≥ 15%
    Over15,
}

impl CvBucket {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "under_5" | "lt5" => Some(CvBucket::Under5),
            "5_to_10" => Some(CvBucket::From5To10),
            "10_to_15" => Some(CvBucket::From10To15),
            "over_15" | "gt15" => Some(CvBucket::Over15),
            _ => None,
        }
    }

    /// Half-open bounds `[lo, hi)` in percent; `hi` is None for the top bucket.
    pub fn bounds(self) -> (f64, Option<f64>) {
        match self {
            CvBucket::Under5 => (0.0, Some(5.0)),
            CvBucket::From5To10 => (5.0, Some(10.0)),
            CvBucket::From10To15 => (10.0, Some(15.0)),
            CvBucket::Over15 => (15.0, None),
        }
    }

    pub fn contains(self, cv: f64) -> bool {
        let (lo, hi) = self.bounds();
        cv >= lo && hi.map(|h| cv < h).unwrap_or(true)
    }
}

/// Sort direction, validated at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "asc" => Some(SortOrder::Asc),
            "desc" => Some(SortOrder::Desc),
            _ => None,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Columns `/api/configs` accepts in `sort_by`.
pub const CONFIG_SORT_COLUMNS: &[&str] = &[
    "manufacturer",
    "marker",
    "assay",
    "cv_pct",
    "quality_rating",
    "sample_count",
    "updated_at",
];

/// A fully validated `/api/configs` query.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigQuery {
    pub manufacturer_ids: Vec<i64>,
    pub marker_ids: Vec<i64>,
    pub assay_ids: Vec<i64>,
    pub quality_rating: Option<String>,
    pub cv_bucket: Option<CvBucket>,
    pub search: Option<String>,
    pub sort_by: String,
    pub sort_order: SortOrder,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ConfigQuery {
    fn default() -> Self {
        Self {
            manufacturer_ids: Vec::new(),
            marker_ids: Vec::new(),
            assay_ids: Vec::new(),
            quality_rating: None,
            cv_bucket: None,
            search: None,
            sort_by: "manufacturer".to_string(),
            sort_order: SortOrder::Asc,
            limit: 50,
            offset: 0,
        }
    }
}

/// Paginated response envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T, F = serde_json::Value> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    /// The filters that were actually applied, echoed back to the client.
    pub filters: F,
}

impl<T, F> Page<T, F> {
    pub fn new(data: Vec<T>, total: i64, limit: i64, offset: i64, filters: F) -> Self {
        let page = offset / limit + 1;
        let total_pages = (total + limit - 1) / limit;
        Self {
            data,
            total,
            page,
            page_size: limit,
            total_pages,
            filters,
        }
    }
}

// ── Datasets & FAIR scoring ──────────────────────────────────────────────

/// A published thermochronology dataset.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub doi: Option<String>,
    /// e.g. "fission-track", "(u-th)/he".
    pub data_type: String,
    pub created_at: DateTime<Utc>,
}

/// One CSV file imported into a dataset.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DataFile {
    pub id: String,
    pub dataset_id: String,
    pub filename: String,
    /// Blob key, `{dataset_id}/csv/{filename}`.
    pub csv_path: String,
    pub row_count: Option<i32>,
    pub column_count: Option<i32>,
    pub uploaded_at: DateTime<Utc>,
}

/// FAIR-compliance subscores for one dataset, 0–100 each.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FairScoreBreakdown {
    pub dataset_id: String,
    pub findable: f64,
    pub accessible: f64,
    pub interoperable: f64,
    pub reusable: f64,
    pub overall: f64,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub scored_at: DateTime<Utc>,
}

// ── Generic table browser allow-list ─────────────────────────────────────

/// One browsable table: its name and the closed set of columns the API may
/// select and sort by.
///
/// This is immutable configuration, constructed once and passed through the
/// application state — there is no mutable registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    pub default_sort: &'static str,
}

impl TableSpec {
    pub fn allows_column(&self, column: &str) -> bool {
        self.columns.contains(&column)
    }
}

/// Every table the generic `/api/tables/:name` endpoint may touch.
///
/// Anything not listed here — including real tables like
/// `extraction_sessions` — is a 400, not a lookup.
pub const TABLE_ALLOW_LIST: &[TableSpec] = &[
    TableSpec {
        name: "manufacturers",
        columns: &["id", "name", "country"],
        default_sort: "name",
    },
    TableSpec {
        name: "markers",
        columns: &["id", "name", "pathogen_group"],
        default_sort: "name",
    },
    TableSpec {
        name: "assays",
        columns: &["id", "name", "manufacturer_id", "marker_id"],
        default_sort: "name",
    },
    TableSpec {
        name: "samples",
        columns: &[
            "id",
            "sample_code",
            "dataset_id",
            "latitude",
            "longitude",
            "elevation_m",
            "lithology",
        ],
        default_sort: "sample_code",
    },
    TableSpec {
        name: "datasets",
        columns: &["id", "name", "data_type", "doi", "created_at"],
        default_sort: "created_at",
    },
    TableSpec {
        name: "ft_analyses",
        columns: &[
            "id",
            "sample_id",
            "age_ma",
            "age_error_ma",
            "track_density",
            "n_grains",
        ],
        default_sort: "sample_id",
    },
    TableSpec {
        name: "he_analyses",
        columns: &[
            "id",
            "sample_id",
            "age_ma",
            "age_error_ma",
            "u_ppm",
            "th_ppm",
            "eu_ppm",
        ],
        default_sort: "sample_id",
    },
];

/// Look up a table in the allow-list.
pub fn table_spec(name: &str) -> Option<&'static TableSpec> {
    TABLE_ALLOW_LIST.iter().find(|t| t.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cv_buckets_partition_the_axis() {
        assert!(CvBucket::Under5.contains(4.9));
        assert!(!CvBucket::Under5.contains(5.0));
        assert!(CvBucket::From5To10.contains(5.0));
        assert!(CvBucket::From10To15.contains(12.0));
        assert!(CvBucket::Over15.contains(15.0));
        assert!(CvBucket::Over15.contains(99.0));
    }

    #[test]
    fn cv_bucket_parse_accepts_aliases() {
        assert_eq!(CvBucket::parse("under_5"), Some(CvBucket::Under5));
        assert_eq!(CvBucket::parse("lt5"), Some(CvBucket::Under5));
        assert_eq!(CvBucket::parse("5_to_10"), Some(CvBucket::From5To10));
        assert_eq!(CvBucket::parse("nope"), None);
    }

    #[test]
    fn page_math() {
        let p: Page<i32> = Page::new(vec![1, 2, 3], 101, 50, 50, serde_json::json!({}));
        assert_eq!(p.page, 2);
        assert_eq!(p.total_pages, 3);
        assert_eq!(p.page_size, 50);
    }

    #[test]
    fn allow_list_lookup() {
        assert!(table_spec("samples").is_some());
        assert!(table_spec("extraction_sessions").is_none());
        assert!(table_spec("samples; DROP TABLE samples").is_none());
    }

    #[test]
    fn allow_list_columns_are_closed() {
        let spec = table_spec("markers").unwrap();
        assert!(spec.allows_column("name"));
        assert!(!spec.allows_column("password"));
    }

    #[test]
    fn default_sort_is_always_allowed() {
        for spec in TABLE_ALLOW_LIST {
            assert!(
                spec.allows_column(spec.default_sort),
                "{} default sort not in columns",
                spec.name
            );
        }
    }
}
