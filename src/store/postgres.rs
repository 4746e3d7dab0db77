//! Postgres store implementations over `sqlx`.
//!
//! Connections are lazy: building a store never touches the network, so a
//! missing or wrong `DATABASE_URL` surfaces as a descriptive error on the
//! first query — the route that needed it — rather than at startup.
//!
//! Every write is its own implicit transaction; no transaction spans more
//! than one pipeline step. Identifiers interpolated into SQL (`table_rows`'
//! select list and sort column) come exclusively from the static
//! [`TableSpec`] allow-list, never from request input.

use super::{CatalogStore, SessionStore};
use crate::domain::{
    AssayConfig, ConfigQuery, DataFile, Dataset, FairScoreBreakdown, SortOrder, TableSpec,
};
use crate::error::StoreError;
use crate::session::{
    ExtractedTableRecord, ExtractionSession, FailedStage, PaperMetadata, SessionState,
};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{QueryBuilder, Row};
use std::str::FromStr;

/// Env var holding the Postgres connection string.
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";

/// Build a lazy pool from `DATABASE_URL`.
pub fn pool_from_env() -> Result<PgPool, StoreError> {
    let url = std::env::var(DATABASE_URL_VAR)
        .map_err(|_| StoreError::Backend(format!("{DATABASE_URL_VAR} is not set")))?;
    PgPoolOptions::new()
        .max_connections(10)
        .connect_lazy(&url)
        .map_err(|e| StoreError::Backend(e.to_string()))
}

/// Session store over Postgres.
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the session tables if they do not exist yet.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS extraction_sessions (
                session_id     TEXT PRIMARY KEY,
                pdf_path       TEXT NOT NULL,
                pdf_filename   TEXT NOT NULL,
                state          TEXT NOT NULL,
                paper_title    TEXT,
                paper_authors  TEXT[] NOT NULL DEFAULT '{}',
                paper_doi      TEXT,
                paper_year     INTEGER,
                tables_found   INTEGER NOT NULL DEFAULT 0,
                data_types     TEXT[] NOT NULL DEFAULT '{}',
                failure_reason TEXT,
                failed_stage   TEXT,
                version        BIGINT NOT NULL DEFAULT 1,
                created_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at     TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS extracted_tables (
                session_id       TEXT NOT NULL REFERENCES extraction_sessions(session_id),
                table_number     TEXT NOT NULL,
                caption          TEXT NOT NULL DEFAULT '',
                page_number      INTEGER NOT NULL,
                csv_path         TEXT NOT NULL,
                row_count        INTEGER NOT NULL,
                column_count     INTEGER NOT NULL,
                completeness_pct DOUBLE PRECISION NOT NULL,
                extracted_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (session_id, table_number)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn session_from_row(row: &PgRow) -> Result<ExtractionSession, StoreError> {
    let state_raw: String = row.try_get("state").map_err(StoreError::from)?;
    let state = SessionState::from_str(&state_raw).map_err(StoreError::Backend)?;
    let failed_stage: Option<String> = row.try_get("failed_stage").map_err(StoreError::from)?;
    let failed_stage = failed_stage
        .map(|s| FailedStage::from_str(&s).map_err(StoreError::Backend))
        .transpose()?;

    Ok(ExtractionSession {
        session_id: row.try_get("session_id").map_err(StoreError::from)?,
        pdf_path: row.try_get("pdf_path").map_err(StoreError::from)?,
        pdf_filename: row.try_get("pdf_filename").map_err(StoreError::from)?,
        state,
        paper: PaperMetadata {
            title: row.try_get("paper_title").map_err(StoreError::from)?,
            authors: row.try_get("paper_authors").map_err(StoreError::from)?,
            doi: row.try_get("paper_doi").map_err(StoreError::from)?,
            year: row.try_get("paper_year").map_err(StoreError::from)?,
        },
        tables_found: row.try_get("tables_found").map_err(StoreError::from)?,
        data_types: row.try_get("data_types").map_err(StoreError::from)?,
        failure_reason: row.try_get("failure_reason").map_err(StoreError::from)?,
        failed_stage,
        version: row.try_get("version").map_err(StoreError::from)?,
        created_at: row.try_get("created_at").map_err(StoreError::from)?,
        updated_at: row.try_get("updated_at").map_err(StoreError::from)?,
    })
}

fn table_record_from_row(row: &PgRow) -> Result<ExtractedTableRecord, StoreError> {
    Ok(ExtractedTableRecord {
        session_id: row.try_get("session_id").map_err(StoreError::from)?,
        table_number: row.try_get("table_number").map_err(StoreError::from)?,
        caption: row.try_get("caption").map_err(StoreError::from)?,
        page_number: row.try_get("page_number").map_err(StoreError::from)?,
        csv_path: row.try_get("csv_path").map_err(StoreError::from)?,
        row_count: row.try_get("row_count").map_err(StoreError::from)?,
        column_count: row.try_get("column_count").map_err(StoreError::from)?,
        completeness_pct: row.try_get("completeness_pct").map_err(StoreError::from)?,
        extracted_at: row.try_get("extracted_at").map_err(StoreError::from)?,
    })
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, session: &ExtractionSession) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO extraction_sessions
                (session_id, pdf_path, pdf_filename, state, tables_found,
                 data_types, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.pdf_path)
        .bind(&session.pdf_filename)
        .bind(session.state.as_str())
        .bind(session.tables_found)
        .bind(&session.data_types)
        .bind(session.version)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<ExtractionSession, StoreError> {
        let row = sqlx::query("SELECT * FROM extraction_sessions WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "session",
                id: session_id.to_string(),
            })?;
        session_from_row(&row)
    }

    async fn update_state(
        &self,
        session_id: &str,
        new_state: SessionState,
        expected_version: i64,
    ) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE extraction_sessions
               SET state = $1, version = version + 1, updated_at = now()
             WHERE session_id = $2 AND version = $3
            RETURNING version
            "#,
        )
        .bind(new_state.as_str())
        .bind(session_id)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.try_get("version").map_err(StoreError::from)?),
            None => {
                // Zero rows means either the session is gone or the version
                // moved; disambiguate so callers see the right condition.
                let exists =
                    sqlx::query("SELECT 1 FROM extraction_sessions WHERE session_id = $1")
                        .bind(session_id)
                        .fetch_optional(&self.pool)
                        .await?
                        .is_some();
                if exists {
                    Err(StoreError::Conflict {
                        session_id: session_id.to_string(),
                        expected_version,
                    })
                } else {
                    Err(StoreError::NotFound {
                        entity: "session",
                        id: session_id.to_string(),
                    })
                }
            }
        }
    }

    async fn mark_failed(
        &self,
        session_id: &str,
        reason: &str,
        stage: FailedStage,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE extraction_sessions
               SET state = 'failed', failure_reason = $1, failed_stage = $2,
                   version = version + 1, updated_at = now()
             WHERE session_id = $3
            "#,
        )
        .bind(reason)
        .bind(stage.as_str())
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "session",
                id: session_id.to_string(),
            });
        }
        Ok(())
    }

    async fn update_paper_metadata(
        &self,
        session_id: &str,
        metadata: &PaperMetadata,
        tables_found: i32,
        data_types: &[String],
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE extraction_sessions
               SET paper_title = $1, paper_authors = $2, paper_doi = $3,
                   paper_year = $4, tables_found = $5, data_types = $6,
                   updated_at = now()
             WHERE session_id = $7
            "#,
        )
        .bind(&metadata.title)
        .bind(&metadata.authors)
        .bind(&metadata.doi)
        .bind(metadata.year)
        .bind(tables_found)
        .bind(data_types.to_vec())
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "session",
                id: session_id.to_string(),
            });
        }
        Ok(())
    }

    async fn record_table(&self, record: &ExtractedTableRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO extracted_tables
                (session_id, table_number, caption, page_number, csv_path,
                 row_count, column_count, completeness_pct, extracted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (session_id, table_number) DO UPDATE SET
                caption = EXCLUDED.caption,
                page_number = EXCLUDED.page_number,
                csv_path = EXCLUDED.csv_path,
                row_count = EXCLUDED.row_count,
                column_count = EXCLUDED.column_count,
                completeness_pct = EXCLUDED.completeness_pct,
                extracted_at = EXCLUDED.extracted_at
            "#,
        )
        .bind(&record.session_id)
        .bind(&record.table_number)
        .bind(&record.caption)
        .bind(record.page_number)
        .bind(&record.csv_path)
        .bind(record.row_count)
        .bind(record.column_count)
        .bind(record.completeness_pct)
        .bind(record.extracted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn tables_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<ExtractedTableRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM extracted_tables WHERE session_id = $1 ORDER BY table_number",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(table_record_from_row).collect()
    }
}

/// Catalog store over Postgres.
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn push_config_filters<'a>(
        builder: &mut QueryBuilder<'a, sqlx::Postgres>,
        query: &'a ConfigQuery,
    ) {
        builder.push(" WHERE TRUE");
        if !query.manufacturer_ids.is_empty() {
            builder
                .push(" AND manufacturer_id = ANY(")
                .push_bind(&query.manufacturer_ids)
                .push(")");
        }
        if !query.marker_ids.is_empty() {
            builder
                .push(" AND marker_id = ANY(")
                .push_bind(&query.marker_ids)
                .push(")");
        }
        if !query.assay_ids.is_empty() {
            builder
                .push(" AND assay_id = ANY(")
                .push_bind(&query.assay_ids)
                .push(")");
        }
        if let Some(ref rating) = query.quality_rating {
            builder.push(" AND quality_rating = ").push_bind(rating);
        }
        if let Some(bucket) = query.cv_bucket {
            let (lo, hi) = bucket.bounds();
            builder.push(" AND cv_pct >= ").push_bind(lo);
            if let Some(hi) = hi {
                builder.push(" AND cv_pct < ").push_bind(hi);
            }
        }
        if let Some(ref search) = query.search {
            let pattern = format!("%{search}%");
            builder
                .push(" AND (manufacturer ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR marker ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR assay ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
    }
}

#[async_trait]
impl CatalogStore for PgCatalog {
    async fn list_configs(
        &self,
        query: &ConfigQuery,
    ) -> Result<(Vec<AssayConfig>, i64), StoreError> {
        let mut count_builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("SELECT COUNT(*) AS n FROM assay_configs");
        Self::push_config_filters(&mut count_builder, query);
        let total: i64 = count_builder
            .build()
            .fetch_one(&self.pool)
            .await?
            .try_get("n")
            .map_err(StoreError::from)?;

        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "SELECT id, manufacturer_id, manufacturer, marker_id, marker, \
             assay_id, assay, cv_pct, quality_rating, sample_count, updated_at \
             FROM assay_configs",
        );
        Self::push_config_filters(&mut builder, query);
        // sort_by is validated against CONFIG_SORT_COLUMNS before it gets
        // here, so interpolating the identifier is safe.
        builder.push(format!(
            " ORDER BY {} {} NULLS LAST",
            query.sort_by,
            query.sort_order.as_sql()
        ));
        builder
            .push(" LIMIT ")
            .push_bind(query.limit)
            .push(" OFFSET ")
            .push_bind(query.offset);

        let rows = builder
            .build_query_as::<AssayConfig>()
            .fetch_all(&self.pool)
            .await?;
        Ok((rows, total))
    }

    async fn table_rows(
        &self,
        spec: &TableSpec,
        sort_by: &str,
        sort_order: SortOrder,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<serde_json::Value>, i64), StoreError> {
        let total: i64 = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {}", spec.name))
            .fetch_one(&self.pool)
            .await?
            .try_get("n")
            .map_err(StoreError::from)?;

        // Select list, table name, and sort column all come from the static
        // allow-list; only limit/offset are bound from the request.
        let sql = format!(
            "SELECT row_to_json(t) AS row FROM \
             (SELECT {cols} FROM {table} ORDER BY {sort} {dir} LIMIT $1 OFFSET $2) t",
            cols = spec.columns.join(", "),
            table = spec.name,
            sort = sort_by,
            dir = sort_order.as_sql(),
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let values = rows
            .iter()
            .map(|row| row.try_get::<serde_json::Value, _>("row").map_err(StoreError::from))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((values, total))
    }

    async fn list_datasets(&self) -> Result<Vec<Dataset>, StoreError> {
        let rows = sqlx::query_as::<_, Dataset>(
            "SELECT id, name, description, doi, data_type, created_at \
             FROM datasets ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_dataset(&self, dataset_id: &str) -> Result<Dataset, StoreError> {
        sqlx::query_as::<_, Dataset>(
            "SELECT id, name, description, doi, data_type, created_at \
             FROM datasets WHERE id = $1",
        )
        .bind(dataset_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            entity: "dataset",
            id: dataset_id.to_string(),
        })
    }

    async fn data_files(&self, dataset_id: &str) -> Result<Vec<DataFile>, StoreError> {
        let rows = sqlx::query_as::<_, DataFile>(
            "SELECT id, dataset_id, filename, csv_path, row_count, column_count, uploaded_at \
             FROM data_files WHERE dataset_id = $1 ORDER BY filename",
        )
        .bind(dataset_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn upsert_fair_score(&self, score: &FairScoreBreakdown) -> Result<(), StoreError> {
        let recommendations = serde_json::to_value(&score.recommendations)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO fair_score_breakdown
                (dataset_id, findable, accessible, interoperable, reusable,
                 overall, recommendations, scored_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (dataset_id) DO UPDATE SET
                findable = EXCLUDED.findable,
                accessible = EXCLUDED.accessible,
                interoperable = EXCLUDED.interoperable,
                reusable = EXCLUDED.reusable,
                overall = EXCLUDED.overall,
                recommendations = EXCLUDED.recommendations,
                scored_at = EXCLUDED.scored_at
            "#,
        )
        .bind(&score.dataset_id)
        .bind(score.findable)
        .bind(score.accessible)
        .bind(score.interoperable)
        .bind(score.reusable)
        .bind(score.overall)
        .bind(recommendations)
        .bind(score.scored_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_fair_score(
        &self,
        dataset_id: &str,
    ) -> Result<Option<FairScoreBreakdown>, StoreError> {
        let row = sqlx::query(
            "SELECT dataset_id, findable, accessible, interoperable, reusable, \
             overall, recommendations, scored_at \
             FROM fair_score_breakdown WHERE dataset_id = $1",
        )
        .bind(dataset_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let recommendations: serde_json::Value =
                row.try_get("recommendations").map_err(StoreError::from)?;
            Ok(FairScoreBreakdown {
                dataset_id: row.try_get("dataset_id").map_err(StoreError::from)?,
                findable: row.try_get("findable").map_err(StoreError::from)?,
                accessible: row.try_get("accessible").map_err(StoreError::from)?,
                interoperable: row.try_get("interoperable").map_err(StoreError::from)?,
                reusable: row.try_get("reusable").map_err(StoreError::from)?,
                overall: row.try_get("overall").map_err(StoreError::from)?,
                recommendations: serde_json::from_value(recommendations).unwrap_or_default(),
                scored_at: row.try_get("scored_at").map_err(StoreError::from)?,
            })
        })
        .transpose()
    }
}
