//! Paper-analysis orchestration.
//!
//! One call takes a session from `uploaded` to `analyzed`: read the stored
//! PDF, extract its text layer, ask the model to catalogue metadata and
//! tables, and record the result on the session row. There is no retry on
//! this path — an LLM or parse failure marks the session `failed` with
//! stage `analyze` immediately.

use crate::blob::BlobStore;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::analysis::{self, FigureInfo, TableInfo};
use crate::pipeline::llm::{CompletionOptions, LlmGateway};
use crate::pipeline::pdf;
use crate::prompts;
use crate::session::{FailedStage, PaperMetadata, SessionState};
use crate::store::SessionStore;
use serde::Serialize;
use tracing::{info, warn};

/// Result of a successful analysis, returned to the client so it can drive
/// per-table extraction with the estimates recorded here.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutput {
    pub session_id: String,
    pub state: SessionState,
    pub metadata: PaperMetadata,
    pub tables_found: usize,
    pub data_types: Vec<String>,
    pub tables: Vec<TableInfo>,
    pub figures: Vec<FigureInfo>,
    pub page_count: usize,
}

/// Analyse the paper behind a session.
///
/// # Preconditions
/// The session must be in state `uploaded`; anything else fails with
/// [`PipelineError::InvalidState`] and mutates nothing.
pub async fn run_analysis(
    store: &dyn SessionStore,
    blobs: &dyn BlobStore,
    gateway: &dyn LlmGateway,
    config: &PipelineConfig,
    session_id: &str,
) -> Result<AnalysisOutput, PipelineError> {
    // ── Step 1: Guard ────────────────────────────────────────────────────
    let session = store.get(session_id).await?;
    if session.state != SessionState::Uploaded {
        return Err(PipelineError::InvalidState {
            session_id: session_id.to_string(),
            actual: session.state,
            expected: "'uploaded'",
        });
    }

    // ── Step 2: Enter analyzing ──────────────────────────────────────────
    let version = store
        .update_state(session_id, SessionState::Analyzing, session.version)
        .await?;
    info!("session {session_id}: analyzing '{}'", session.pdf_filename);

    // ── Step 3: Run the fallible stages; any error fails the session ─────
    match analyze_stages(store, blobs, gateway, config, session_id, &session.pdf_path, &session.pdf_filename, version).await {
        Ok(output) => Ok(output),
        Err(e) => {
            let reason = e.to_string();
            if let Err(mark_err) = store
                .mark_failed(session_id, &reason, FailedStage::Analyze)
                .await
            {
                warn!("session {session_id}: could not record failure: {mark_err}");
            }
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn analyze_stages(
    store: &dyn SessionStore,
    blobs: &dyn BlobStore,
    gateway: &dyn LlmGateway,
    config: &PipelineConfig,
    session_id: &str,
    pdf_path: &str,
    pdf_filename: &str,
    version: i64,
) -> Result<AnalysisOutput, PipelineError> {
    // ── PDF text ─────────────────────────────────────────────────────────
    let bytes = blobs.get(pdf_path).await?;
    let paper = pdf::extract_text(&bytes, pdf_filename)?;
    let page_count = paper.page_count();

    // ── Analysis call ────────────────────────────────────────────────────
    let opts = CompletionOptions {
        max_tokens: config.analysis_max_tokens,
        temperature: config.temperature,
    };
    let user_prompt = prompts::analysis_user_prompt(&paper.head(config.max_paper_chars));
    let raw = gateway
        .complete(prompts::ANALYSIS_SYSTEM_PROMPT, &user_prompt, &opts)
        .await?;
    let parsed = analysis::parse_analysis(&raw)?;

    info!(
        "session {session_id}: analysis found {} tables, {} figures",
        parsed.tables.len(),
        parsed.figures.len()
    );

    // ── Commit ───────────────────────────────────────────────────────────
    store
        .update_paper_metadata(
            session_id,
            &parsed.metadata,
            parsed.tables.len() as i32,
            &parsed.data_types,
        )
        .await?;
    store
        .update_state(session_id, SessionState::Analyzed, version)
        .await?;

    Ok(AnalysisOutput {
        session_id: session_id.to_string(),
        state: SessionState::Analyzed,
        metadata: parsed.metadata,
        tables_found: parsed.tables.len(),
        data_types: parsed.data_types,
        tables: parsed.tables,
        figures: parsed.figures,
        page_count,
    })
}
