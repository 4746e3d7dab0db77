//! Extraction-session model and state machine.
//!
//! One [`ExtractionSession`] row tracks one paper's journey from upload to
//! extracted CSVs. The database is the sole source of truth — there is no
//! in-memory session cache, and every mutation goes through the
//! [`crate::store::SessionStore`] trait.
//!
//! ## State machine
//!
//! ```text
//! uploaded → analyzing → analyzed → extracting → extracted
//!                │                      │            │
//!                └──→ failed ←──────────┘            └──→ extracting (next table)
//! ```
//!
//! `extracted` transitions back to `extracting` when the client requests the
//! next table of the same paper, so the session state is a coarse pipeline
//! indicator; the authoritative per-table record is the
//! [`ExtractedTableRecord`] collection. A session never re-enters
//! `uploaded`, and `failed` is terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an extraction session. Exhaustive and exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// PDF stored, nothing run yet. The only initial state.
    Uploaded,
    /// Analysis call in flight.
    Analyzing,
    /// Analysis committed: paper metadata and table list recorded.
    Analyzed,
    /// A table extraction is in flight.
    Extracting,
    /// At least one table extracted; more extractions may follow.
    Extracted,
    /// Unrecoverable error; see `failure_reason` / `failed_stage`. Terminal.
    Failed,
}

impl SessionState {
    /// Whether the machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Uploaded, Analyzing)
                | (Analyzing, Analyzed)
                | (Analyzing, Failed)
                | (Analyzed, Extracting)
                | (Extracting, Extracted)
                | (Extracting, Failed)
                | (Extracted, Extracting)
        )
    }

    /// States from which the `extract` operation may be invoked.
    pub fn allows_extract(self) -> bool {
        matches!(
            self,
            SessionState::Analyzed | SessionState::Extracting | SessionState::Extracted
        )
    }

    /// Canonical lowercase name, as stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Uploaded => "uploaded",
            SessionState::Analyzing => "analyzing",
            SessionState::Analyzed => "analyzed",
            SessionState::Extracting => "extracting",
            SessionState::Extracted => "extracted",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(SessionState::Uploaded),
            "analyzing" => Ok(SessionState::Analyzing),
            "analyzed" => Ok(SessionState::Analyzed),
            "extracting" => Ok(SessionState::Extracting),
            "extracted" => Ok(SessionState::Extracted),
            "failed" => Ok(SessionState::Failed),
            other => Err(format!("unknown session state '{other}'")),
        }
    }
}

/// Which pipeline stage a failed session died in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedStage {
    Analyze,
    Extract,
}

impl FailedStage {
    pub fn as_str(self) -> &'static str {
        match self {
            FailedStage::Analyze => "analyze",
            FailedStage::Extract => "extract",
        }
    }
}

impl fmt::Display for FailedStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FailedStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analyze" => Ok(FailedStage::Analyze),
            "extract" => Ok(FailedStage::Extract),
            other => Err(format!("unknown failed stage '{other}'")),
        }
    }
}

/// Bibliographic metadata returned by the analysis step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaperMetadata {
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub doi: Option<String>,
    pub year: Option<i32>,
}

/// One in-flight paper-to-data conversion.
///
/// Created on upload, mutated by the analyze and extract steps, terminal on
/// `extracted` (success, possibly after several tables) or `failed`. Never
/// deleted automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionSession {
    /// Opaque id (UUID v4 as a string). Primary key.
    pub session_id: String,
    /// Blob key of the uploaded PDF, `{session_id}/source.pdf`.
    pub pdf_path: String,
    /// Original upload filename, for display only.
    pub pdf_filename: String,
    pub state: SessionState,
    #[serde(default)]
    pub paper: PaperMetadata,
    /// Number of tables the analysis step identified.
    pub tables_found: i32,
    /// Data types the analysis step detected (e.g. "fission-track").
    #[serde(default)]
    pub data_types: Vec<String>,
    pub failure_reason: Option<String>,
    pub failed_stage: Option<FailedStage>,
    /// Optimistic-concurrency version; bumped by every state write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExtractionSession {
    /// A fresh session in the `uploaded` state.
    pub fn new(pdf_path: impl Into<String>, pdf_filename: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            pdf_path: pdf_path.into(),
            pdf_filename: pdf_filename.into(),
            state: SessionState::Uploaded,
            paper: PaperMetadata::default(),
            tables_found: 0,
            data_types: Vec::new(),
            failure_reason: None,
            failed_stage: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One CSV artifact derived from one table in the source paper.
///
/// Immutable once written; re-extracting the same table overwrites the same
/// blob key and upserts this record rather than creating a second one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedTableRecord {
    pub session_id: String,
    /// Table label from the paper — usually an integer, sometimes
    /// alphanumeric ("S1" for supplementary tables).
    pub table_number: String,
    pub caption: String,
    pub page_number: i32,
    /// Blob key, `{session_id}/tables/table-{n}.csv`.
    pub csv_path: String,
    pub row_count: i32,
    pub column_count: i32,
    /// Fraction of non-empty cells, 0.0–1.0.
    pub completeness_pct: f64,
    pub extracted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const ALL: [SessionState; 6] = [
        SessionState::Uploaded,
        SessionState::Analyzing,
        SessionState::Analyzed,
        SessionState::Extracting,
        SessionState::Extracted,
        SessionState::Failed,
    ];

    #[test]
    fn happy_path_edges_allowed() {
        assert!(SessionState::Uploaded.can_transition_to(SessionState::Analyzing));
        assert!(SessionState::Analyzing.can_transition_to(SessionState::Analyzed));
        assert!(SessionState::Analyzed.can_transition_to(SessionState::Extracting));
        assert!(SessionState::Extracting.can_transition_to(SessionState::Extracted));
        // Multi-table loop edge
        assert!(SessionState::Extracted.can_transition_to(SessionState::Extracting));
    }

    #[test]
    fn failure_edges_allowed_only_from_active_stages() {
        assert!(SessionState::Analyzing.can_transition_to(SessionState::Failed));
        assert!(SessionState::Extracting.can_transition_to(SessionState::Failed));
        assert!(!SessionState::Uploaded.can_transition_to(SessionState::Failed));
        assert!(!SessionState::Analyzed.can_transition_to(SessionState::Failed));
    }

    #[test]
    fn uploaded_is_never_reentered() {
        for s in ALL {
            assert!(
                !s.can_transition_to(SessionState::Uploaded),
                "{s} must not re-enter uploaded"
            );
        }
    }

    #[test]
    fn failed_is_terminal() {
        for s in ALL {
            assert!(
                !SessionState::Failed.can_transition_to(s),
                "failed must not transition to {s}"
            );
        }
    }

    #[test]
    fn extract_guard_states() {
        assert!(SessionState::Analyzed.allows_extract());
        assert!(SessionState::Extracting.allows_extract());
        assert!(SessionState::Extracted.allows_extract());
        assert!(!SessionState::Uploaded.allows_extract());
        assert!(!SessionState::Analyzing.allows_extract());
        assert!(!SessionState::Failed.allows_extract());
    }

    #[test]
    fn state_round_trips_through_str() {
        for s in ALL {
            assert_eq!(SessionState::from_str(s.as_str()).unwrap(), s);
        }
        assert!(SessionState::from_str("bogus").is_err());
    }

    #[test]
    fn new_session_starts_uploaded_at_version_one() {
        let s = ExtractionSession::new("abc/source.pdf", "paper.pdf");
        assert_eq!(s.state, SessionState::Uploaded);
        assert_eq!(s.version, 1);
        assert_eq!(s.tables_found, 0);
        assert!(s.failure_reason.is_none());
    }
}
