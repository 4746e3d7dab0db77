//! Error types for the paper2data library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`] — **Fatal** for the operation in flight: the session
//!   cannot proceed (unreadable PDF, analysis-path LLM failure, wrong
//!   session state, storage failure, retry budget exhausted). Returned as
//!   `Err(PipelineError)` from the top-level `run_analysis` / `run_extraction`
//!   entry points and mapped to an HTTP status by the server layer.
//!
//! * [`ExtractFailure`] — **Non-fatal**: a single extraction attempt failed
//!   (malformed CSV, column-count mismatch, empty column, low completeness)
//!   but the retry controller may try again with an adjusted prompt. Stored
//!   inside [`crate::pipeline::retry::AttemptRecord`] so callers can inspect
//!   the full attempt history rather than only the last error.
//!
//! The separation lets the retry controller stay a pure loop over
//! `Result<T, ExtractFailure>` while everything unrecoverable short-circuits
//! through `PipelineError`.

use crate::session::SessionState;
use thiserror::Error;

/// All fatal errors returned by the paper2data pipeline.
///
/// Per-attempt failures use [`ExtractFailure`] and are recorded in the retry
/// history rather than propagated here (until the budget is exhausted).
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input / PDF errors ────────────────────────────────────────────────
    /// The uploaded bytes are not a PDF at all.
    #[error("Uploaded file is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { magic: [u8; 4] },

    /// The PDF could not be parsed by the text extractor.
    #[error("Failed to parse PDF '{filename}': {detail}")]
    PdfParse { filename: String, detail: String },

    /// The PDF parsed but contains no extractable text layer.
    ///
    /// Scanned image-only documents land here; there is no OCR fallback.
    #[error(
        "PDF '{filename}' has no extractable text layer ({pages} pages, all empty).\n\
         Scanned documents are not supported — upload a PDF with a text layer."
    )]
    NoTextLayer { filename: String, pages: usize },

    // ── Session state errors ──────────────────────────────────────────────
    /// The caller invoked an operation on a session in the wrong state.
    #[error(
        "Session '{session_id}' is in state '{actual}', but this operation requires {expected}"
    )]
    InvalidState {
        session_id: String,
        actual: SessionState,
        expected: &'static str,
    },

    /// The extraction request names a table the analysis step never found.
    #[error("Session '{session_id}' has no table numbered '{table_number}'")]
    TableNotFound {
        session_id: String,
        table_number: String,
    },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The LLM call failed on the analysis path (network, auth, HTTP error).
    ///
    /// Extraction-path LLM failures go through the retry controller instead.
    #[error("LLM request failed: {detail}")]
    Llm { detail: String },

    /// The analysis call returned text that is not valid JSON even after
    /// stripping markdown code fences.
    #[error("LLM analysis response is not valid JSON: {detail}\nResponse began: {snippet:?}")]
    LlmResponseParse { detail: String, snippet: String },

    // ── Retry exhaustion ──────────────────────────────────────────────────
    /// Every extraction attempt failed; the session was marked failed.
    #[error("Table extraction failed after {attempts} attempts.\nLast error: {last_error}")]
    ExtractionExhausted { attempts: u32, last_error: String },

    // ── External collaborators ────────────────────────────────────────────
    /// The relational store failed or the row is missing.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A blob read or write failed.
    #[error("Blob store operation failed for key '{key}': {source}")]
    Blob {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// A required credential or connection string is absent.
    ///
    /// Raised at call time by the production store/gateway implementations;
    /// nothing is validated at process startup.
    #[error("Environment variable {var} is not set.\n{hint}")]
    MissingEnv { var: &'static str, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors at the relational-store seam.
///
/// Kept separate from [`PipelineError`] so store implementations do not
/// depend on pipeline concerns; the server maps `NotFound` to 404 and
/// `Conflict` to 409.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No row exists for the given id.
    #[error("Not found: {entity} '{id}'")]
    NotFound { entity: &'static str, id: String },

    /// Optimistic-concurrency check failed: another writer got there first.
    #[error(
        "Concurrent update on session '{session_id}': expected version {expected_version}, row has moved on"
    )]
    Conflict {
        session_id: String,
        expected_version: i64,
    },

    /// The underlying database is unreachable or rejected the query.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound {
                entity: "row",
                id: String::new(),
            },
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// A non-fatal failure of one extraction attempt.
///
/// Produced by the CSV validator or the extraction LLM call and consumed by
/// the retry controller, which classifies it via [`ExtractFailure::kind`] to
/// pick the prompt adjustment for the next attempt.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ExtractFailure {
    /// The LLM's response could not be parsed as CSV (bad quoting,
    /// inconsistent escaping).
    #[error("CSV parse error: {detail}")]
    CsvParse { detail: String },

    /// Parsed column count does not match the analysis estimate.
    #[error("Column count mismatch: expected {expected} columns, found {found}")]
    ColumnCountMismatch { expected: usize, found: usize },

    /// A column is empty in every row — almost always a misaligned extract,
    /// not genuinely sparse data.
    #[error("Column '{column}' is empty in all {rows} rows")]
    EmptyColumn { column: String, rows: usize },

    /// Overall filled-cell ratio fell below the configured floor.
    #[error("Table completeness {:.0}% is below the {:.0}% floor", .ratio * 100.0, .floor * 100.0)]
    Completeness { ratio: f64, floor: f64 },

    /// The extraction LLM call itself failed (network, HTTP error).
    #[error("LLM extraction call failed: {detail}")]
    Llm { detail: String },
}

/// Coarse classification of an [`ExtractFailure`], used to select the
/// prompt adjustment for the next retry attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ColumnCount,
    EmptyColumn,
    Completeness,
    Parse,
    Unknown,
}

impl ExtractFailure {
    /// Classify this failure for retry steering.
    pub fn kind(&self) -> FailureKind {
        match self {
            ExtractFailure::CsvParse { .. } => FailureKind::Parse,
            ExtractFailure::ColumnCountMismatch { .. } => FailureKind::ColumnCount,
            ExtractFailure::EmptyColumn { .. } => FailureKind::EmptyColumn,
            ExtractFailure::Completeness { .. } => FailureKind::Completeness,
            ExtractFailure::Llm { .. } => FailureKind::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_display_names_both_states() {
        let e = PipelineError::InvalidState {
            session_id: "abc".into(),
            actual: SessionState::Uploaded,
            expected: "'analyzed', 'extracting' or 'extracted'",
        };
        let msg = e.to_string();
        assert!(msg.contains("uploaded"), "got: {msg}");
        assert!(msg.contains("analyzed"), "got: {msg}");
    }

    #[test]
    fn column_mismatch_display_carries_counts() {
        let e = ExtractFailure::ColumnCountMismatch {
            expected: 5,
            found: 7,
        };
        let msg = e.to_string();
        assert!(msg.contains('5') && msg.contains('7'), "got: {msg}");
    }

    #[test]
    fn completeness_display_is_percent() {
        let e = ExtractFailure::Completeness {
            ratio: 0.12,
            floor: 0.30,
        };
        let msg = e.to_string();
        assert!(msg.contains("12%"), "got: {msg}");
        assert!(msg.contains("30%"), "got: {msg}");
    }

    #[test]
    fn classification_covers_all_variants() {
        assert_eq!(
            ExtractFailure::CsvParse { detail: "x".into() }.kind(),
            FailureKind::Parse
        );
        assert_eq!(
            ExtractFailure::ColumnCountMismatch {
                expected: 1,
                found: 2
            }
            .kind(),
            FailureKind::ColumnCount
        );
        assert_eq!(
            ExtractFailure::EmptyColumn {
                column: "c".into(),
                rows: 3
            }
            .kind(),
            FailureKind::EmptyColumn
        );
        assert_eq!(
            ExtractFailure::Completeness {
                ratio: 0.1,
                floor: 0.3
            }
            .kind(),
            FailureKind::Completeness
        );
        assert_eq!(
            ExtractFailure::Llm { detail: "x".into() }.kind(),
            FailureKind::Unknown
        );
    }

    #[test]
    fn exhausted_display_carries_attempt_count() {
        let e = PipelineError::ExtractionExhausted {
            attempts: 3,
            last_error: "boom".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("3 attempts"), "got: {msg}");
        assert!(msg.contains("boom"), "got: {msg}");
    }
}
