//! FAIR-compliance scoring for imported datasets.
//!
//! Scores one dataset against the community reporting standard: download
//! its CSV files from blob storage, sample their heads, and ask the model
//! to rate the dataset on the four FAIR axes with concrete recommendations.
//! The result is upserted as the dataset's single `fair_score_breakdown`
//! row — re-scoring replaces it.
//!
//! Like the analysis path, this makes exactly one LLM call and does not
//! retry; any failure surfaces to the caller with no partial-success state.

use crate::blob::BlobStore;
use crate::config::PipelineConfig;
use crate::domain::FairScoreBreakdown;
use crate::error::PipelineError;
use crate::pipeline::analysis::strip_code_fences;
use crate::pipeline::llm::{CompletionOptions, LlmGateway};
use crate::store::CatalogStore;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

/// At most this many files are sampled into the prompt; datasets with more
/// are scored on a prefix. Logged when the cap bites.
const MAX_SAMPLED_FILES: usize = 5;
/// Lines sampled from the head of each CSV.
const SAMPLE_LINES: usize = 12;

/// Condensed reporting-standard reference included in every scoring prompt.
///
/// Summarises the fields the community data-reporting guidelines expect for
/// low-temperature thermochronology publications; the model scores the
/// sampled CSVs against it.
const REPORTING_STANDARD: &str = r#"Reporting standard (condensed):

FINDABLE — the dataset carries a resolvable DOI, a descriptive title, and
named samples with unique identifiers.

ACCESSIBLE — data files are plain CSV with a header row; column meanings are
recoverable from the headers alone; no proprietary formats.

INTEROPERABLE — geographic coordinates in decimal degrees (WGS84), elevations
in metres, ages in Ma with stated 1-sigma or 2-sigma uncertainty; fission-track
data report track densities, counted grains, and the age equation or zeta
calibration; (U-Th)/He data report U, Th (and Sm where measured) in ppm,
grain mass or equivalent-sphere radius, and the applied alpha-ejection
correction.

REUSABLE — methods metadata (laboratory, analytical protocol, standards used)
accompany the measurements, and per-sample rows are self-contained."#;

pub const FAIR_SYSTEM_PROMPT: &str = r#"You are an expert data curator assessing a geoscience dataset for FAIR compliance (Findable, Accessible, Interoperable, Reusable).

You will receive a reporting standard, the dataset's catalogue metadata, and the head of each of its data files.

Respond with a single JSON object and nothing else:

{"findable": number, "accessible": number, "interoperable": number, "reusable": number, "recommendations": [string]}

Rules:
1. Each score is 0-100, judged only against the provided standard and evidence
2. recommendations lists concrete, actionable gaps, most important first, at most five
3. Do NOT wrap the JSON in ```json fences"#;

#[derive(Debug, Deserialize)]
struct FairScoreResponse {
    findable: f64,
    accessible: f64,
    interoperable: f64,
    reusable: f64,
    #[serde(default)]
    recommendations: Vec<String>,
}

/// Score one dataset and upsert its breakdown row.
pub async fn run_fair_analysis(
    catalog: &dyn CatalogStore,
    blobs: &dyn BlobStore,
    gateway: &dyn LlmGateway,
    config: &PipelineConfig,
    dataset_id: &str,
) -> Result<FairScoreBreakdown, PipelineError> {
    let dataset = catalog.get_dataset(dataset_id).await?;
    let files = catalog.data_files(dataset_id).await?;

    // ── Sample the data files ────────────────────────────────────────────
    let mut samples = String::new();
    if files.len() > MAX_SAMPLED_FILES {
        info!(
            "dataset {dataset_id}: sampling {MAX_SAMPLED_FILES} of {} files",
            files.len()
        );
    }
    for file in files.iter().take(MAX_SAMPLED_FILES) {
        let bytes = blobs.get(&file.csv_path).await?;
        let head = sample_head(&bytes, SAMPLE_LINES);
        samples.push_str(&format!("### {}\n{}\n\n", file.filename, head));
    }
    if samples.is_empty() {
        samples.push_str("(the dataset has no data files)\n");
    }

    // ── Scoring call ─────────────────────────────────────────────────────
    let user_prompt = format!(
        "{REPORTING_STANDARD}\n\n\
         ## Dataset\n\
         Name: {name}\n\
         DOI: {doi}\n\
         Data type: {data_type}\n\
         Description: {description}\n\n\
         ## Data file heads\n\n{samples}",
        name = dataset.name,
        doi = dataset.doi.as_deref().unwrap_or("(none)"),
        data_type = dataset.data_type,
        description = dataset.description.as_deref().unwrap_or("(none)"),
    );
    let opts = CompletionOptions {
        max_tokens: config.analysis_max_tokens,
        temperature: config.temperature,
    };
    let raw = gateway
        .complete(FAIR_SYSTEM_PROMPT, &user_prompt, &opts)
        .await?;

    let cleaned = strip_code_fences(&raw);
    let parsed: FairScoreResponse =
        serde_json::from_str(cleaned).map_err(|e| PipelineError::LlmResponseParse {
            detail: e.to_string(),
            snippet: cleaned.chars().take(80).collect(),
        })?;

    let breakdown = breakdown_from_response(dataset_id, parsed);
    catalog.upsert_fair_score(&breakdown).await?;

    info!(
        "dataset {dataset_id}: FAIR overall {:.0} (F{:.0}/A{:.0}/I{:.0}/R{:.0})",
        breakdown.overall,
        breakdown.findable,
        breakdown.accessible,
        breakdown.interoperable,
        breakdown.reusable
    );
    Ok(breakdown)
}

fn breakdown_from_response(dataset_id: &str, r: FairScoreResponse) -> FairScoreBreakdown {
    let findable = r.findable.clamp(0.0, 100.0);
    let accessible = r.accessible.clamp(0.0, 100.0);
    let interoperable = r.interoperable.clamp(0.0, 100.0);
    let reusable = r.reusable.clamp(0.0, 100.0);
    FairScoreBreakdown {
        dataset_id: dataset_id.to_string(),
        findable,
        accessible,
        interoperable,
        reusable,
        overall: (findable + accessible + interoperable + reusable) / 4.0,
        recommendations: r.recommendations,
        scored_at: Utc::now(),
    }
}

/// First `max_lines` lines of a CSV, lossily decoded.
fn sample_head(bytes: &[u8], max_lines: usize) -> String {
    String::from_utf8_lossy(bytes)
        .lines()
        .take(max_lines)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_head_truncates() {
        let csv = (0..100).map(|i| format!("row{i}")).collect::<Vec<_>>().join("\n");
        let head = sample_head(csv.as_bytes(), 3);
        assert_eq!(head, "row0\nrow1\nrow2");
    }

    #[test]
    fn overall_is_the_mean_of_clamped_scores() {
        let b = breakdown_from_response(
            "d1",
            FairScoreResponse {
                findable: 80.0,
                accessible: 120.0, // clamped to 100
                interoperable: 60.0,
                reusable: -5.0, // clamped to 0
                recommendations: vec!["add a DOI".into()],
            },
        );
        assert!((b.accessible - 100.0).abs() < f64::EPSILON);
        assert!((b.reusable - 0.0).abs() < f64::EPSILON);
        assert!((b.overall - 60.0).abs() < f64::EPSILON);
        assert_eq!(b.recommendations.len(), 1);
    }

    #[test]
    fn fair_response_parses_without_recommendations() {
        let r: FairScoreResponse = serde_json::from_str(
            r#"{"findable": 50, "accessible": 50, "interoperable": 50, "reusable": 50}"#,
        )
        .unwrap();
        assert!(r.recommendations.is_empty());
    }
}
