//! CSV parsing and validation of LLM-extracted tables.
//!
//! ## Why validate at all?
//!
//! The extraction call returns whatever the model *believes* the table says.
//! The three checks here catch the common failure shapes cheaply, without a
//! second model call:
//!
//! - a **column-count mismatch** against the analysis estimate means the
//!   model merged or split columns (typically a multi-row header);
//! - a **fully empty column** means the delimiter landed inside a cell and
//!   everything after it shifted — misalignment, not sparse data;
//! - **low completeness** means the wrong table, or a multi-page table cut
//!   off at the page boundary.
//!
//! Each check is a pure function over the parsed rows; their failure values
//! feed the retry controller's prompt adjustments.

use crate::config::ValidationConfig;
use crate::error::ExtractFailure;
use crate::pipeline::analysis::strip_code_fences;

/// A parsed table: one header row plus zero or more data rows, all padded
/// to a uniform width.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ParsedTable {
    pub fn column_count(&self) -> usize {
        self.headers.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Fraction of non-empty data cells, 0.0–1.0.
    pub fn completeness(&self) -> f64 {
        let total: usize = self.rows.iter().map(Vec::len).sum();
        if total == 0 {
            return 0.0;
        }
        let filled = self
            .rows
            .iter()
            .flatten()
            .filter(|c| !c.trim().is_empty())
            .count();
        filled as f64 / total as f64
    }

    /// Canonical CSV re-serialisation (RFC-4180 quoting, `\n` endings).
    ///
    /// The stored artifact is always this form, never the model's raw text,
    /// so byte-identical model responses produce byte-identical blobs.
    pub fn to_csv_bytes(&self) -> Vec<u8> {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        // Writer errors on in-memory Vec<u8> can only come from I/O, which
        // a Vec cannot produce.
        let _ = writer.write_record(&self.headers);
        for row in &self.rows {
            let _ = writer.write_record(row);
        }
        writer.into_inner().unwrap_or_default()
    }
}

/// Parse the LLM's raw text response as CSV.
///
/// Strips an outer code fence first (models fence CSV as readily as JSON).
/// Rows are padded to the widest record so the downstream checks see a
/// rectangle; the padding counts as empty cells, which is exactly the
/// signal the completeness and empty-column checks want.
pub fn parse_table(raw: &str) -> Result<ParsedTable, ExtractFailure> {
    let cleaned = strip_code_fences(raw);

    // Valid RFC-4180 text always carries an even number of double quotes
    // (each quoted field contributes two, escaped quotes are doubled). An
    // odd count means an unterminated quote, which the reader below would
    // otherwise silently swallow to end-of-input.
    if cleaned.matches('"').count() % 2 == 1 {
        return Err(ExtractFailure::CsvParse {
            detail: "unbalanced double quotes in response".to_string(),
        });
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(cleaned.as_bytes());

    let mut records: Vec<Vec<String>> = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| ExtractFailure::CsvParse {
            detail: e.to_string(),
        })?;
        let cells: Vec<String> = record.iter().map(|c| c.trim().to_string()).collect();
        // Skip rows that are entirely empty — trailing blank lines, mostly.
        if cells.iter().all(|c| c.is_empty()) {
            continue;
        }
        records.push(cells);
    }

    if records.is_empty() {
        return Err(ExtractFailure::CsvParse {
            detail: "response contains no CSV rows".to_string(),
        });
    }

    let width = records.iter().map(Vec::len).max().unwrap_or(0);
    for record in &mut records {
        record.resize(width, String::new());
    }

    let mut iter = records.into_iter();
    let headers = iter.next().unwrap_or_default();
    Ok(ParsedTable {
        headers,
        rows: iter.collect(),
    })
}

/// Apply the three validation rules, in the order the retry prompts
/// reference them.
pub fn validate_table(
    table: &ParsedTable,
    expected_columns: usize,
    cfg: &ValidationConfig,
) -> Result<(), ExtractFailure> {
    let found = table.column_count();
    if expected_columns > 0 && found.abs_diff(expected_columns) > cfg.column_tolerance {
        return Err(ExtractFailure::ColumnCountMismatch {
            expected: expected_columns,
            found,
        });
    }

    if table.rows.is_empty() {
        return Err(ExtractFailure::Completeness {
            ratio: 0.0,
            floor: cfg.completeness_floor,
        });
    }

    for (idx, header) in table.headers.iter().enumerate() {
        let all_empty = table
            .rows
            .iter()
            .all(|row| row.get(idx).map(|c| c.trim().is_empty()).unwrap_or(true));
        if all_empty {
            let column = if header.trim().is_empty() {
                format!("#{}", idx + 1)
            } else {
                header.clone()
            };
            return Err(ExtractFailure::EmptyColumn {
                column,
                rows: table.rows.len(),
            });
        }
    }

    let ratio = table.completeness();
    if ratio < cfg.completeness_floor {
        return Err(ExtractFailure::Completeness {
            ratio,
            floor: cfg.completeness_floor,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ValidationConfig {
        ValidationConfig::default()
    }

    #[test]
    fn parses_simple_table() {
        let t = parse_table("sample,age_ma,error\nOB-1,54.2,3.1\nOB-2,61.8,2.9\n").unwrap();
        assert_eq!(t.headers, vec!["sample", "age_ma", "error"]);
        assert_eq!(t.row_count(), 2);
        assert_eq!(t.column_count(), 3);
    }

    #[test]
    fn parses_fenced_csv() {
        let t = parse_table("```csv\na,b\n1,2\n```").unwrap();
        assert_eq!(t.headers, vec!["a", "b"]);
        assert_eq!(t.rows, vec![vec!["1", "2"]]);
    }

    #[test]
    fn quoted_commas_stay_in_one_cell() {
        let t = parse_table("marker,assay\n\"HIV-1, group M\",Alinity m\n").unwrap();
        assert_eq!(t.rows[0][0], "HIV-1, group M");
        assert_eq!(t.column_count(), 2);
    }

    #[test]
    fn unterminated_quote_is_a_parse_error() {
        let err = parse_table("a,b\n\"open,2\nmore,4\n").unwrap_err();
        assert!(matches!(err, ExtractFailure::CsvParse { .. }), "{err:?}");
    }

    #[test]
    fn empty_response_is_a_parse_error() {
        let err = parse_table("\n\n").unwrap_err();
        assert!(matches!(err, ExtractFailure::CsvParse { .. }));
    }

    #[test]
    fn ragged_rows_are_padded_to_widest() {
        let t = parse_table("a,b,c\n1,2\n4,5,6\n").unwrap();
        assert_eq!(t.rows[0], vec!["1", "2", ""]);
    }

    #[test]
    fn column_count_within_tolerance_passes() {
        let t = parse_table("a,b,c\n1,2,3\n").unwrap();
        // Estimate 4, found 3, tolerance 1 → ok
        assert!(validate_table(&t, 4, &cfg()).is_ok());
    }

    #[test]
    fn column_count_outside_tolerance_fails() {
        let t = parse_table("a,b,c\n1,2,3\n").unwrap();
        let err = validate_table(&t, 6, &cfg()).unwrap_err();
        match err {
            ExtractFailure::ColumnCountMismatch { expected, found } => {
                assert_eq!(expected, 6);
                assert_eq!(found, 3);
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn fully_empty_column_is_rejected() {
        let t = parse_table("a,b,c\n1,,3\n4,,6\n").unwrap();
        let err = validate_table(&t, 3, &cfg()).unwrap_err();
        match err {
            ExtractFailure::EmptyColumn { column, rows } => {
                assert_eq!(column, "b");
                assert_eq!(rows, 2);
            }
            other => panic!("expected empty column, got {other:?}"),
        }
    }

    #[test]
    fn sparse_but_present_column_passes() {
        let t = parse_table("a,b,c\n1,,3\n4,5,6\n").unwrap();
        assert!(validate_table(&t, 3, &cfg()).is_ok());
    }

    #[test]
    fn low_completeness_is_rejected() {
        // Every column has one value so the empty-column check passes, but
        // only 3 of 12 data cells are filled (25%, below the 30% floor).
        let t = ParsedTable {
            headers: vec!["a".into(), "b".into(), "c".into()],
            rows: vec![
                vec!["1".into(), "".into(), "".into()],
                vec!["".into(), "2".into(), "".into()],
                vec!["".into(), "".into(), "3".into()],
                vec!["".into(), "".into(), "".into()],
            ],
        };
        let err = validate_table(&t, 3, &cfg()).unwrap_err();
        assert!(matches!(err, ExtractFailure::Completeness { .. }), "{err:?}");
    }

    #[test]
    fn header_only_table_fails_completeness() {
        let t = parse_table("a,b,c\n").unwrap();
        let err = validate_table(&t, 3, &cfg()).unwrap_err();
        assert!(matches!(err, ExtractFailure::Completeness { ratio, .. } if ratio == 0.0));
    }

    #[test]
    fn canonical_bytes_are_stable() {
        let t = parse_table("a,b\n1,2\n").unwrap();
        let once = t.to_csv_bytes();
        let twice = parse_table(std::str::from_utf8(&once).unwrap())
            .unwrap()
            .to_csv_bytes();
        assert_eq!(once, twice);
    }

    #[test]
    fn zero_estimate_skips_column_check() {
        // Analysis sometimes cannot estimate a column count; 0 disables
        // the check rather than failing every extraction.
        let t = parse_table("a,b\n1,2\n").unwrap();
        assert!(validate_table(&t, 0, &cfg()).is_ok());
    }
}
