//! In-memory store implementations.
//!
//! Back the integration tests and the CLI's local one-shot mode. They hold
//! the same contracts as the Postgres implementations — including the
//! version compare-and-swap — so the orchestrators cannot tell them apart.

use super::{CatalogStore, SessionStore};
use crate::domain::{
    AssayConfig, ConfigQuery, DataFile, Dataset, FairScoreBreakdown, SortOrder, TableSpec,
};
use crate::error::StoreError;
use crate::session::{
    ExtractedTableRecord, ExtractionSession, FailedStage, PaperMetadata, SessionState,
};
use async_trait::async_trait;
use chrono::Utc;
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Session store backed by a `HashMap` behind an async lock.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, ExtractionSession>>,
    tables: RwLock<HashMap<String, Vec<ExtractedTableRecord>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: &ExtractionSession) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.session_id) {
            return Err(StoreError::Backend(format!(
                "duplicate session id '{}'",
                session.session_id
            )));
        }
        sessions.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<ExtractionSession, StoreError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "session",
                id: session_id.to_string(),
            })
    }

    async fn update_state(
        &self,
        session_id: &str,
        new_state: SessionState,
        expected_version: i64,
    ) -> Result<i64, StoreError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(session_id).ok_or_else(|| StoreError::NotFound {
            entity: "session",
            id: session_id.to_string(),
        })?;
        if session.version != expected_version {
            return Err(StoreError::Conflict {
                session_id: session_id.to_string(),
                expected_version,
            });
        }
        session.state = new_state;
        session.version += 1;
        session.updated_at = Utc::now();
        Ok(session.version)
    }

    async fn mark_failed(
        &self,
        session_id: &str,
        reason: &str,
        stage: FailedStage,
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(session_id).ok_or_else(|| StoreError::NotFound {
            entity: "session",
            id: session_id.to_string(),
        })?;
        session.state = SessionState::Failed;
        session.failure_reason = Some(reason.to_string());
        session.failed_stage = Some(stage);
        session.version += 1;
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn update_paper_metadata(
        &self,
        session_id: &str,
        metadata: &PaperMetadata,
        tables_found: i32,
        data_types: &[String],
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(session_id).ok_or_else(|| StoreError::NotFound {
            entity: "session",
            id: session_id.to_string(),
        })?;
        session.paper = metadata.clone();
        session.tables_found = tables_found;
        session.data_types = data_types.to_vec();
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn record_table(&self, record: &ExtractedTableRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let entries = tables.entry(record.session_id.clone()).or_default();
        match entries
            .iter_mut()
            .find(|t| t.table_number == record.table_number)
        {
            Some(existing) => *existing = record.clone(),
            None => entries.push(record.clone()),
        }
        Ok(())
    }

    async fn tables_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<ExtractedTableRecord>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Catalog store backed by vectors behind an async lock, with seeding
/// helpers for tests and demos.
#[derive(Default)]
pub struct MemoryCatalog {
    configs: RwLock<Vec<AssayConfig>>,
    datasets: RwLock<Vec<Dataset>>,
    data_files: RwLock<Vec<DataFile>>,
    fair_scores: RwLock<HashMap<String, FairScoreBreakdown>>,
    tables: RwLock<HashMap<String, Vec<serde_json::Value>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_configs(&self, configs: Vec<AssayConfig>) {
        self.configs.write().await.extend(configs);
    }

    pub async fn seed_dataset(&self, dataset: Dataset) {
        self.datasets.write().await.push(dataset);
    }

    pub async fn seed_data_file(&self, file: DataFile) {
        self.data_files.write().await.push(file);
    }

    pub async fn seed_table(&self, name: &str, rows: Vec<serde_json::Value>) {
        self.tables.write().await.insert(name.to_string(), rows);
    }
}

/// Order two JSON scalars for in-memory sorting; non-comparable pairs tie.
fn json_cmp(a: &serde_json::Value, b: &serde_json::Value) -> Ordering {
    use serde_json::Value::*;
    match (a, b) {
        (Number(x), Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (String(x), String(y)) => x.cmp(y),
        (Bool(x), Bool(y)) => x.cmp(y),
        (Null, Null) => Ordering::Equal,
        (Null, _) => Ordering::Less,
        (_, Null) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn config_sort_key(c: &AssayConfig, column: &str) -> serde_json::Value {
    match column {
        "manufacturer" => c.manufacturer.clone().into(),
        "marker" => c.marker.clone().into(),
        "assay" => c.assay.clone().into(),
        "cv_pct" => c
            .cv_pct
            .map(serde_json::Value::from)
            .unwrap_or(serde_json::Value::Null),
        "quality_rating" => c
            .quality_rating
            .clone()
            .map(serde_json::Value::from)
            .unwrap_or(serde_json::Value::Null),
        "sample_count" => c.sample_count.into(),
        _ => c.updated_at.to_rfc3339().into(),
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn list_configs(
        &self,
        query: &ConfigQuery,
    ) -> Result<(Vec<AssayConfig>, i64), StoreError> {
        let configs = self.configs.read().await;
        let mut matched: Vec<AssayConfig> = configs
            .iter()
            .filter(|c| {
                (query.manufacturer_ids.is_empty()
                    || query.manufacturer_ids.contains(&c.manufacturer_id))
                    && (query.marker_ids.is_empty() || query.marker_ids.contains(&c.marker_id))
                    && (query.assay_ids.is_empty() || query.assay_ids.contains(&c.assay_id))
                    && query
                        .quality_rating
                        .as_deref()
                        .map(|q| c.quality_rating.as_deref() == Some(q))
                        .unwrap_or(true)
                    && query
                        .cv_bucket
                        .map(|b| c.cv_pct.map(|cv| b.contains(cv)).unwrap_or(false))
                        .unwrap_or(true)
                    && query
                        .search
                        .as_deref()
                        .map(|s| {
                            let needle = s.to_lowercase();
                            c.manufacturer.to_lowercase().contains(&needle)
                                || c.marker.to_lowercase().contains(&needle)
                                || c.assay.to_lowercase().contains(&needle)
                        })
                        .unwrap_or(true)
            })
            .cloned()
            .collect();

        matched.sort_by(|a, b| {
            let ord = json_cmp(
                &config_sort_key(a, &query.sort_by),
                &config_sort_key(b, &query.sort_by),
            );
            match query.sort_order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });

        let total = matched.len() as i64;
        let page: Vec<AssayConfig> = matched
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn table_rows(
        &self,
        spec: &TableSpec,
        sort_by: &str,
        sort_order: SortOrder,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<serde_json::Value>, i64), StoreError> {
        let tables = self.tables.read().await;
        let rows = tables.get(spec.name).cloned().unwrap_or_default();

        // Project to the whitelisted columns only.
        let mut projected: Vec<serde_json::Value> = rows
            .into_iter()
            .map(|row| {
                let mut out = serde_json::Map::new();
                for col in spec.columns {
                    out.insert(
                        (*col).to_string(),
                        row.get(*col).cloned().unwrap_or(serde_json::Value::Null),
                    );
                }
                serde_json::Value::Object(out)
            })
            .collect();

        projected.sort_by(|a, b| {
            let ord = json_cmp(
                a.get(sort_by).unwrap_or(&serde_json::Value::Null),
                b.get(sort_by).unwrap_or(&serde_json::Value::Null),
            );
            match sort_order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });

        let total = projected.len() as i64;
        let page: Vec<serde_json::Value> = projected
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn list_datasets(&self) -> Result<Vec<Dataset>, StoreError> {
        Ok(self.datasets.read().await.clone())
    }

    async fn get_dataset(&self, dataset_id: &str) -> Result<Dataset, StoreError> {
        self.datasets
            .read()
            .await
            .iter()
            .find(|d| d.id == dataset_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "dataset",
                id: dataset_id.to_string(),
            })
    }

    async fn data_files(&self, dataset_id: &str) -> Result<Vec<DataFile>, StoreError> {
        Ok(self
            .data_files
            .read()
            .await
            .iter()
            .filter(|f| f.dataset_id == dataset_id)
            .cloned()
            .collect())
    }

    async fn upsert_fair_score(&self, score: &FairScoreBreakdown) -> Result<(), StoreError> {
        self.fair_scores
            .write()
            .await
            .insert(score.dataset_id.clone(), score.clone());
        Ok(())
    }

    async fn get_fair_score(
        &self,
        dataset_id: &str,
    ) -> Result<Option<FairScoreBreakdown>, StoreError> {
        Ok(self.fair_scores.read().await.get(dataset_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CvBucket;

    fn session() -> ExtractionSession {
        ExtractionSession::new("s/source.pdf", "paper.pdf")
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = MemorySessionStore::new();
        let s = session();
        store.create(&s).await.unwrap();
        let got = store.get(&s.session_id).await.unwrap();
        assert_eq!(got.state, SessionState::Uploaded);
        assert_eq!(got.pdf_filename, "paper.pdf");
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let store = MemorySessionStore::new();
        let err = store.get("nope").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn update_state_bumps_version() {
        let store = MemorySessionStore::new();
        let s = session();
        store.create(&s).await.unwrap();
        let v2 = store
            .update_state(&s.session_id, SessionState::Analyzing, 1)
            .await
            .unwrap();
        assert_eq!(v2, 2);
        assert_eq!(
            store.get(&s.session_id).await.unwrap().state,
            SessionState::Analyzing
        );
    }

    #[tokio::test]
    async fn stale_version_conflicts_without_mutation() {
        let store = MemorySessionStore::new();
        let s = session();
        store.create(&s).await.unwrap();
        store
            .update_state(&s.session_id, SessionState::Analyzing, 1)
            .await
            .unwrap();

        let err = store
            .update_state(&s.session_id, SessionState::Analyzed, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(
            store.get(&s.session_id).await.unwrap().state,
            SessionState::Analyzing
        );
    }

    #[tokio::test]
    async fn record_table_upserts_by_number() {
        let store = MemorySessionStore::new();
        let s = session();
        store.create(&s).await.unwrap();

        let mut rec = ExtractedTableRecord {
            session_id: s.session_id.clone(),
            table_number: "1".into(),
            caption: "first".into(),
            page_number: 3,
            csv_path: format!("{}/tables/table-1.csv", s.session_id),
            row_count: 5,
            column_count: 3,
            completeness_pct: 0.9,
            extracted_at: Utc::now(),
        };
        store.record_table(&rec).await.unwrap();
        rec.row_count = 6;
        store.record_table(&rec).await.unwrap();

        let tables = store.tables_for_session(&s.session_id).await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].row_count, 6);
    }

    fn config(id: i64, manufacturer: &str, cv: Option<f64>, rating: &str) -> AssayConfig {
        AssayConfig {
            id,
            manufacturer_id: id,
            manufacturer: manufacturer.to_string(),
            marker_id: 10 + id,
            marker: format!("marker-{id}"),
            assay_id: 100 + id,
            assay: format!("assay-{id}"),
            cv_pct: cv,
            quality_rating: Some(rating.to_string()),
            sample_count: 40,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn config_filters_compose() {
        let cat = MemoryCatalog::new();
        cat.seed_configs(vec![
            config(1, "Abbott", Some(3.0), "excellent"),
            config(2, "Roche", Some(8.0), "good"),
            config(3, "Hologic", Some(22.0), "poor"),
        ])
        .await;

        let q = ConfigQuery {
            cv_bucket: Some(CvBucket::From5To10),
            ..Default::default()
        };
        let (rows, total) = cat.list_configs(&q).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].manufacturer, "Roche");

        let q = ConfigQuery {
            search: Some("abbot".into()),
            ..Default::default()
        };
        let (rows, _) = cat.list_configs(&q).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].manufacturer, "Abbott");
    }

    #[tokio::test]
    async fn table_rows_project_and_sort() {
        let cat = MemoryCatalog::new();
        cat.seed_table(
            "markers",
            vec![
                serde_json::json!({"id": 2, "name": "HCV", "pathogen_group": "virus", "secret": true}),
                serde_json::json!({"id": 1, "name": "HBV", "pathogen_group": "virus"}),
            ],
        )
        .await;

        let spec = crate::domain::table_spec("markers").unwrap();
        let (rows, total) = cat
            .table_rows(spec, "name", SortOrder::Asc, 50, 0)
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows[0]["name"], "HBV");
        // Non-whitelisted keys never cross the boundary.
        assert!(rows[0].get("secret").is_none());
        assert!(rows[1].get("secret").is_none());
    }
}
