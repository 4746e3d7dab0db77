//! Analysis-response parsing: the LLM's structured view of a paper.
//!
//! The analysis call asks the model for JSON describing the paper's
//! metadata, its tables (with estimated shapes), and its figures. Models
//! routinely wrap JSON in markdown code fences despite being told not to,
//! so the raw response is de-fenced before parsing. A response that still
//! fails to parse is fatal for the session — the analysis path has no
//! retry loop.

use crate::error::PipelineError;
use crate::session::PaperMetadata;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

/// One table the analysis step found, with the shape estimate the
/// extraction validator later checks against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Label as printed in the paper — "3", or "S1" for supplementary.
    #[serde(deserialize_with = "label_or_number")]
    pub table_number: String,
    #[serde(default)]
    pub caption: String,
    pub page_number: u32,
    #[serde(default)]
    pub estimated_rows: u32,
    pub estimated_columns: u32,
}

/// A figure the analysis step detected. Recorded for completeness; the
/// extraction path only handles tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FigureInfo {
    #[serde(deserialize_with = "label_or_number")]
    pub figure_number: String,
    #[serde(default)]
    pub caption: String,
    pub page_number: u32,
}

/// The full parsed analysis response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaperAnalysis {
    #[serde(default)]
    pub metadata: PaperMetadata,
    #[serde(default)]
    pub tables: Vec<TableInfo>,
    #[serde(default)]
    pub figures: Vec<FigureInfo>,
    /// Detected dataset kinds, e.g. "fission-track", "(U-Th)/He", "qc-metrics".
    #[serde(default)]
    pub data_types: Vec<String>,
}

/// Accept `"S1"`, `"3"` or `3` for table/figure labels — models use all
/// three interchangeably.
fn label_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Label {
        Text(String),
        Number(i64),
    }
    Ok(match Label::deserialize(deserializer)? {
        Label::Text(s) => s,
        Label::Number(n) => n.to_string(),
    })
}

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*\n(.*?)\n?```\s*$").unwrap());

/// Strip a single outer markdown code fence, if present.
///
/// Shared by the analysis (JSON) and extraction (CSV) paths; models fence
/// both formats.
pub fn strip_code_fences(raw: &str) -> &str {
    match RE_OUTER_FENCES.captures(raw.trim()) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(raw),
        None => raw.trim(),
    }
}

/// Parse the analysis call's raw response into a [`PaperAnalysis`].
pub fn parse_analysis(raw: &str) -> Result<PaperAnalysis, PipelineError> {
    let cleaned = strip_code_fences(raw);
    serde_json::from_str(cleaned).map_err(|e| PipelineError::LlmResponseParse {
        detail: e.to_string(),
        snippet: cleaned.chars().take(80).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"{
        "metadata": {"title": "Thermal history of the Otway Basin", "authors": ["A. Writer"], "doi": "10.1000/xyz", "year": 2019},
        "tables": [
            {"table_number": 1, "caption": "AFT ages", "page_number": 4, "estimated_rows": 12, "estimated_columns": 8},
            {"table_number": "S1", "caption": "He data", "page_number": 11, "estimated_rows": 30, "estimated_columns": 6}
        ],
        "figures": [{"figure_number": 2, "caption": "Track length histogram", "page_number": 5}],
        "data_types": ["fission-track", "(U-Th)/He"]
    }"#;

    #[test]
    fn parses_plain_json() {
        let a = parse_analysis(RESPONSE).unwrap();
        assert_eq!(a.tables.len(), 2);
        assert_eq!(a.tables[0].table_number, "1");
        assert_eq!(a.tables[1].table_number, "S1");
        assert_eq!(a.tables[0].estimated_columns, 8);
        assert_eq!(a.metadata.year, Some(2019));
        assert_eq!(a.data_types.len(), 2);
    }

    #[test]
    fn parses_fenced_json() {
        let fenced = format!("```json\n{RESPONSE}\n```");
        let a = parse_analysis(&fenced).unwrap();
        assert_eq!(a.tables.len(), 2);
    }

    #[test]
    fn missing_optional_sections_default() {
        let a = parse_analysis(r#"{"tables": []}"#).unwrap();
        assert!(a.tables.is_empty());
        assert!(a.figures.is_empty());
        assert!(a.metadata.title.is_none());
    }

    #[test]
    fn rejects_prose_response() {
        let err = parse_analysis("I could not find any tables, sorry!").unwrap_err();
        match err {
            PipelineError::LlmResponseParse { snippet, .. } => {
                assert!(snippet.starts_with("I could not"));
            }
            other => panic!("expected LlmResponseParse, got {other:?}"),
        }
    }

    #[test]
    fn strip_fences_leaves_bare_text_alone() {
        assert_eq!(strip_code_fences("  a,b,c\n1,2,3  "), "a,b,c\n1,2,3");
    }

    #[test]
    fn strip_fences_removes_csv_fence() {
        assert_eq!(strip_code_fences("```csv\na,b\n1,2\n```"), "a,b\n1,2");
    }
}
