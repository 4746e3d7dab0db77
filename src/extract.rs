//! Per-table extraction orchestration.
//!
//! One call extracts one table: build a page window around the table's
//! location, run the LLM-extract-then-validate operation under the retry
//! controller, and on success persist the canonical CSV blob plus an
//! [`ExtractedTableRecord`]. Tables are processed one per request, strictly
//! sequentially — there is no fan-out even for many-table papers.
//!
//! Nothing durable changes while the retry loop runs; the session moves to
//! `extracted` (or `failed`, stage `extract`) only after the controller
//! returns.

use crate::blob::{self, BlobStore};
use crate::config::PipelineConfig;
use crate::error::{ExtractFailure, PipelineError};
use crate::pipeline::analysis::TableInfo;
use crate::pipeline::llm::{CompletionOptions, LlmGateway};
use crate::pipeline::retry::{self, AttemptRecord};
use crate::pipeline::{pdf, validate};
use crate::prompts;
use crate::session::{ExtractedTableRecord, FailedStage, SessionState};
use crate::store::SessionStore;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

/// Shape statistics of the extracted table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionStats {
    pub total_rows: usize,
    pub total_columns: usize,
    pub completeness_pct: f64,
}

/// Result of a successful table extraction.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionOutput {
    pub session_id: String,
    pub table_number: String,
    pub csv_path: String,
    pub state: SessionState,
    pub stats: ExtractionStats,
    pub total_attempts: u32,
    pub attempts: Vec<AttemptRecord>,
}

/// Extract one table for a session.
///
/// # Preconditions
/// The session must be in `analyzed`, `extracting`, or `extracted`;
/// anything else fails with [`PipelineError::InvalidState`] and mutates
/// nothing.
pub async fn run_extraction(
    store: &dyn SessionStore,
    blobs: &dyn BlobStore,
    gateway: &dyn LlmGateway,
    config: &PipelineConfig,
    session_id: &str,
    table: &TableInfo,
) -> Result<ExtractionOutput, PipelineError> {
    // ── Step 1: Guard ────────────────────────────────────────────────────
    let session = store.get(session_id).await?;
    if !session.state.allows_extract() {
        return Err(PipelineError::InvalidState {
            session_id: session_id.to_string(),
            actual: session.state,
            expected: "'analyzed', 'extracting' or 'extracted'",
        });
    }

    // ── Step 2: Enter extracting ─────────────────────────────────────────
    let version = store
        .update_state(session_id, SessionState::Extracting, session.version)
        .await?;
    info!(
        "session {session_id}: extracting table {} (page {})",
        table.table_number, table.page_number
    );

    // ── Step 3: Run the fallible stages; any error fails the session ─────
    match extract_stages(store, blobs, gateway, config, session_id, &session.pdf_path, &session.pdf_filename, table, version).await {
        Ok(output) => Ok(output),
        Err(e) => {
            let reason = e.to_string();
            if let Err(mark_err) = store
                .mark_failed(session_id, &reason, FailedStage::Extract)
                .await
            {
                warn!("session {session_id}: could not record failure: {mark_err}");
            }
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn extract_stages(
    store: &dyn SessionStore,
    blobs: &dyn BlobStore,
    gateway: &dyn LlmGateway,
    config: &PipelineConfig,
    session_id: &str,
    pdf_path: &str,
    pdf_filename: &str,
    table: &TableInfo,
    version: i64,
) -> Result<ExtractionOutput, PipelineError> {
    // ── Page window ──────────────────────────────────────────────────────
    let bytes = blobs.get(pdf_path).await?;
    let paper = pdf::extract_text(&bytes, pdf_filename)?;
    let window = paper.window(table.page_number, config.page_window);

    // ── Extract-and-validate under the retry controller ──────────────────
    let opts = CompletionOptions {
        max_tokens: config.extraction_max_tokens,
        temperature: config.temperature,
    };
    let outcome = retry::run_with_retry(&config.retry, |ctx| {
        let user_prompt = prompts::extraction_user_prompt(table, &window, &ctx);
        async move {
            let raw = gateway
                .complete(prompts::EXTRACTION_SYSTEM_PROMPT, &user_prompt, &opts)
                .await
                .map_err(|e| ExtractFailure::Llm {
                    detail: e.to_string(),
                })?;
            let parsed = validate::parse_table(&raw)?;
            validate::validate_table(
                &parsed,
                table.estimated_columns as usize,
                &config.validation,
            )?;
            Ok(parsed)
        }
    })
    .await;

    let total_attempts = outcome.total_attempts();
    let parsed = match outcome.result {
        Ok(parsed) => parsed,
        Err(last) => {
            return Err(PipelineError::ExtractionExhausted {
                attempts: total_attempts,
                last_error: last.to_string(),
            });
        }
    };

    // ── Persist the artifact ─────────────────────────────────────────────
    let csv_path = blob::table_csv_key(session_id, &table.table_number);
    blobs.put(&csv_path, &parsed.to_csv_bytes()).await?;

    let record = ExtractedTableRecord {
        session_id: session_id.to_string(),
        table_number: table.table_number.clone(),
        caption: table.caption.clone(),
        page_number: table.page_number as i32,
        csv_path: csv_path.clone(),
        row_count: parsed.row_count() as i32,
        column_count: parsed.column_count() as i32,
        completeness_pct: parsed.completeness(),
        extracted_at: Utc::now(),
    };
    store.record_table(&record).await?;
    store
        .update_state(session_id, SessionState::Extracted, version)
        .await?;

    info!(
        "session {session_id}: table {} extracted ({} rows × {} cols, {} attempt(s))",
        table.table_number,
        record.row_count,
        record.column_count,
        total_attempts
    );

    Ok(ExtractionOutput {
        session_id: session_id.to_string(),
        table_number: table.table_number.clone(),
        csv_path,
        state: SessionState::Extracted,
        stats: ExtractionStats {
            total_rows: record.row_count as usize,
            total_columns: record.column_count as usize,
            completeness_pct: record.completeness_pct,
        },
        total_attempts,
        attempts: outcome.attempts,
    })
}
