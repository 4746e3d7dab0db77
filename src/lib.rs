//! # paper2data
//!
//! Extract tabular data from research-paper PDFs with LLM guidance.
//!
//! ## Why this crate?
//!
//! Scientific data lives in paper tables — assay QC metrics, fission-track
//! counts, (U-Th)/He ages — formatted for human readers, not machines.
//! Hand-transcribing them is slow and error-prone; naive PDF table
//! detectors choke on merged headers and multi-page continuations. This
//! crate drives a language model through a supervised pipeline instead:
//! the model proposes, deterministic validators dispose, and a bounded
//! retry loop feeds validation failures back as targeted prompt
//! corrections.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF upload
//!  │
//!  ├─ 1. Session   row created in state `uploaded` (Postgres is the only
//!  │               source of truth — no in-memory session cache)
//!  ├─ 2. Text      lopdf text layer, page-delimited (`--- Page N ---`)
//!  ├─ 3. Analysis  one LLM call → paper metadata + table list with
//!  │               estimated shapes (JSON, fence-stripped)
//!  └─ 4. Extract   per table, sequentially:
//!          LLM call → CSV parse → column-count / empty-column /
//!          completeness checks → on failure, classified retry with
//!          adjusted prompt (≤ 3 attempts, capped backoff) → canonical
//!          CSV blob + extracted-table record
//! ```
//!
//! A FAIR-compliance scorer reuses the same gateway to rate imported
//! datasets against the community reporting standard, and an axum server
//! exposes the pipeline plus a thin browse surface over the catalog rows.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use paper2data::{server, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // DATABASE_URL, PAPER2DATA_LLM_API_KEY, PAPER2DATA_BLOB_ROOT
//!     let config = PipelineConfig::default();
//!     server::serve_from_env(config, "127.0.0.1", 8642).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `paper2data` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! paper2data = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod blob;
pub mod config;
pub mod domain;
pub mod error;
pub mod extract;
pub mod fair;
pub mod pipeline;
pub mod prompts;
pub mod server;
pub mod session;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{run_analysis, AnalysisOutput};
pub use config::{PipelineConfig, PipelineConfigBuilder, RetryConfig, ValidationConfig};
pub use error::{ExtractFailure, FailureKind, PipelineError, StoreError};
pub use extract::{run_extraction, ExtractionOutput, ExtractionStats};
pub use fair::run_fair_analysis;
pub use pipeline::analysis::{PaperAnalysis, TableInfo};
pub use pipeline::llm::{CompletionOptions, HttpLlmGateway, LlmGateway};
pub use pipeline::retry::{run_with_retry, AttemptRecord, RetryOutcome};
pub use session::{ExtractedTableRecord, ExtractionSession, FailedStage, SessionState};
