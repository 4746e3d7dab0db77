//! Relational-store traits and implementations.
//!
//! The database is an external collaborator: the pipeline talks to it only
//! through [`SessionStore`] and [`CatalogStore`]. Production runs use the
//! Postgres implementations; tests and the CLI's local mode use the
//! in-memory ones. No implementation retries — callers decide whether a
//! failure is worth a higher-level retry (for this pipeline: it is not).
//!
//! State-machine *edges* are the orchestrators' responsibility; the store
//! enforces only the optimistic-concurrency contract: `update_state` is a
//! compare-and-swap on `(session_id, version)` and a stale writer gets
//! [`StoreError::Conflict`] without mutating anything.

mod memory;
mod postgres;

pub use memory::{MemoryCatalog, MemorySessionStore};
pub use postgres::{pool_from_env, PgCatalog, PgSessionStore, DATABASE_URL_VAR};

use crate::domain::{
    AssayConfig, ConfigQuery, DataFile, Dataset, FairScoreBreakdown, SortOrder, TableSpec,
};
use crate::error::StoreError;
use crate::session::{
    ExtractedTableRecord, ExtractionSession, FailedStage, PaperMetadata, SessionState,
};
use async_trait::async_trait;

/// Persistence for extraction sessions and their table artifacts.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a freshly created session (state `uploaded`, version 1).
    async fn create(&self, session: &ExtractionSession) -> Result<(), StoreError>;

    /// Fetch a session by id. [`StoreError::NotFound`] when absent.
    async fn get(&self, session_id: &str) -> Result<ExtractionSession, StoreError>;

    /// Compare-and-swap the session state.
    ///
    /// Succeeds only when the stored version equals `expected_version`;
    /// returns the new version. A mismatch is [`StoreError::Conflict`].
    async fn update_state(
        &self,
        session_id: &str,
        new_state: SessionState,
        expected_version: i64,
    ) -> Result<i64, StoreError>;

    /// Durably mark the session failed with a human-readable reason.
    async fn mark_failed(
        &self,
        session_id: &str,
        reason: &str,
        stage: FailedStage,
    ) -> Result<(), StoreError>;

    /// Record the analysis result on the session row.
    ///
    /// Does not bump the version: only state writes participate in the
    /// compare-and-swap chain.
    async fn update_paper_metadata(
        &self,
        session_id: &str,
        metadata: &PaperMetadata,
        tables_found: i32,
        data_types: &[String],
    ) -> Result<(), StoreError>;

    /// Upsert one extracted-table record (keyed on session id + table number).
    async fn record_table(&self, record: &ExtractedTableRecord) -> Result<(), StoreError>;

    /// All extracted-table records for a session, in table order.
    async fn tables_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<ExtractedTableRecord>, StoreError>;
}

/// Read/write access to the browse-surface catalog rows.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Filtered, sorted, paginated assay configurations plus the unpaged total.
    async fn list_configs(&self, query: &ConfigQuery) -> Result<(Vec<AssayConfig>, i64), StoreError>;

    /// Generic paginated rows for one allow-listed table.
    ///
    /// `sort_by` must already be validated against `spec.columns`; the
    /// implementation builds its select list from `spec`, never from input.
    async fn table_rows(
        &self,
        spec: &TableSpec,
        sort_by: &str,
        sort_order: SortOrder,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<serde_json::Value>, i64), StoreError>;

    async fn list_datasets(&self) -> Result<Vec<Dataset>, StoreError>;

    async fn get_dataset(&self, dataset_id: &str) -> Result<Dataset, StoreError>;

    async fn data_files(&self, dataset_id: &str) -> Result<Vec<DataFile>, StoreError>;

    /// Upsert the FAIR score row for a dataset (one row per dataset).
    async fn upsert_fair_score(&self, score: &FairScoreBreakdown) -> Result<(), StoreError>;

    async fn get_fair_score(
        &self,
        dataset_id: &str,
    ) -> Result<Option<FairScoreBreakdown>, StoreError>;
}
