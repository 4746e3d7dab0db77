//! Prompt templates for the analysis and extraction calls.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing the default behaviour (e.g.
//!    tightening the CSV rules or adding a retry hint) requires editing
//!    exactly one place.
//!
//! 2. **Testability** — unit tests can inspect the assembled prompts
//!    directly without a live model, so a regression in the adjustment
//!    wiring is caught as a string assertion, not a flaky e2e run.

use crate::error::FailureKind;
use crate::pipeline::analysis::TableInfo;
use crate::pipeline::retry::AttemptContext;

/// System prompt for the paper-analysis call.
///
/// The response must be machine-parseable JSON; the structure mirrors
/// [`crate::pipeline::analysis::PaperAnalysis`].
pub const ANALYSIS_SYSTEM_PROMPT: &str = r#"You are an expert at reading scientific papers and cataloguing their data content. You will receive the text of a research paper with explicit page markers ("--- Page N ---").

Respond with a single JSON object and nothing else:

{
  "metadata": {"title": string|null, "authors": [string], "doi": string|null, "year": integer|null},
  "tables": [{"table_number": string, "caption": string, "page_number": integer, "estimated_rows": integer, "estimated_columns": integer}],
  "figures": [{"figure_number": string, "caption": string, "page_number": integer}],
  "data_types": [string]
}

Rules:

1. TABLES
   - List every data table, including supplementary tables (use their printed labels, e.g. "S1")
   - page_number is the page whose marker precedes the table's caption
   - estimated_columns counts the leaf columns a flattened header would have
   - estimated_rows counts data rows only, not header rows

2. DATA TYPES
   - Name the kinds of measurements the tables carry, in short lowercase
     labels (e.g. "fission-track", "(u-th)/he", "assay-qc")

3. OUTPUT FORMAT
   - Output ONLY the JSON object
   - Do NOT wrap it in ```json fences
   - Use null for unknown metadata fields, never invent a DOI"#;

/// System prompt for the per-table extraction call.
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are an expert at transcribing data tables from scientific papers. You will receive the text of the pages around one table, plus that table's caption and expected shape.

Follow these rules precisely:

1. SCOPE
   - Transcribe ONLY the requested table, not neighbouring tables or figure captions
   - If the table continues on the next page, include the continuation rows

2. STRUCTURE
   - Output valid RFC-4180 CSV: first row is the header, one row per data row
   - Flatten multi-row headers into one row, joining levels with a space
   - Every row must have the same number of fields as the header
   - Quote any cell containing a comma, quote, or newline

3. CELLS
   - Preserve values exactly as printed, including units embedded in headers
   - Use an empty field for cells that are blank or marked "-", "n.d.", "—"
   - Never invent, interpolate, or round values

4. OUTPUT FORMAT
   - Output ONLY the CSV text
   - Do NOT wrap it in ```csv fences
   - Do NOT add commentary before or after the data"#;

/// User prompt for the analysis call.
pub fn analysis_user_prompt(paper_text: &str) -> String {
    format!(
        "Catalogue the metadata, tables, figures, and data types of the following paper.\n\n{paper_text}"
    )
}

/// User prompt for one table's extraction, including any retry guidance.
///
/// On attempt 1 `ctx` is empty and the prompt is just the table request.
/// On retries the accumulated adjustment guidance and a restatement of the
/// previous error are appended, so the model knows what to fix.
pub fn extraction_user_prompt(table: &TableInfo, page_window: &str, ctx: &AttemptContext) -> String {
    let mut prompt = format!(
        "Extract Table {number} as CSV.\n\
         Caption: {caption}\n\
         Page: {page}\n\
         Expected shape: approximately {rows} data rows × {cols} columns.\n\n\
         Page text:\n\n{window}",
        number = table.table_number,
        caption = table.caption,
        page = table.page_number,
        rows = table.estimated_rows,
        cols = table.estimated_columns,
        window = page_window,
    );

    if !ctx.adjustments.is_empty() {
        prompt.push_str("\n\nIMPORTANT — a previous attempt was rejected. Apply these corrections:\n");
        for kind in &ctx.adjustments {
            prompt.push_str("- ");
            prompt.push_str(adjustment_guidance(*kind));
            prompt.push('\n');
        }
    }
    if let Some(ref err) = ctx.last_error {
        prompt.push_str(&format!("\nThe previous attempt failed with: {err}\n"));
    }

    prompt
}

/// Error-specific guidance appended to a retry prompt.
///
/// Intentionally shallow: one fixed sentence per failure kind, selected by
/// the retry controller's classification.
pub fn adjustment_guidance(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::ColumnCount => {
            "Pay close attention to column boundaries: flatten multi-row headers into exactly one header field per printed column, and keep every row at that same width."
        }
        FailureKind::EmptyColumn => {
            "One column came back completely empty, which means values shifted between columns. Re-check the alignment of every row against the header before emitting it."
        }
        FailureKind::Completeness => {
            "Most cells came back empty. Make sure you transcribe the table's data region in full, including rows that continue on the following page."
        }
        FailureKind::Parse => {
            "The previous response was not valid CSV. Quote every cell containing a comma or quote character, close all quotes, and output nothing except the CSV rows."
        }
        FailureKind::Unknown => {
            "Re-read the table carefully and output only well-formed CSV for it."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TableInfo {
        TableInfo {
            table_number: "2".into(),
            caption: "Apatite fission-track data".into(),
            page_number: 6,
            estimated_rows: 14,
            estimated_columns: 9,
        }
    }

    #[test]
    fn first_attempt_prompt_has_no_retry_section() {
        let p = extraction_user_prompt(&table(), "--- Page 6 ---\n...", &AttemptContext::default());
        assert!(p.contains("Extract Table 2"));
        assert!(p.contains("9 columns"));
        assert!(!p.contains("IMPORTANT"));
        assert!(!p.contains("previous attempt"));
    }

    #[test]
    fn retry_prompt_appends_guidance_and_error() {
        let ctx = AttemptContext {
            attempt: 2,
            adjustments: vec![FailureKind::ColumnCount],
            last_error: Some("Column count mismatch: expected 9 columns, found 7".into()),
        };
        let p = extraction_user_prompt(&table(), "window", &ctx);
        assert!(p.contains("column boundaries"));
        assert!(p.contains("expected 9 columns, found 7"));
    }

    #[test]
    fn every_kind_has_distinct_guidance() {
        let kinds = [
            FailureKind::ColumnCount,
            FailureKind::EmptyColumn,
            FailureKind::Completeness,
            FailureKind::Parse,
            FailureKind::Unknown,
        ];
        for (i, a) in kinds.iter().enumerate() {
            for b in &kinds[i + 1..] {
                assert_ne!(adjustment_guidance(*a), adjustment_guidance(*b));
            }
        }
    }

    #[test]
    fn analysis_prompts_request_bare_output() {
        assert!(ANALYSIS_SYSTEM_PROMPT.contains("Do NOT wrap"));
        assert!(EXTRACTION_SYSTEM_PROMPT.contains("Do NOT wrap"));
        assert!(analysis_user_prompt("BODY").contains("BODY"));
    }
}
