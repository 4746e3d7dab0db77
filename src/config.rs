//! Configuration types for the extraction pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share configs across handlers, serialise them for logging, and
//! diff two runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A dozen-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded-retry parameters for the table-extraction loop.
///
/// Delays grow geometrically and are capped: with the defaults the wait
/// sequence is 1s → 2s → 4s-capped-to-5s, so a fully exhausted run blocks
/// the request for at most ~8s of backoff on top of the LLM calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts (first try included). Default: 3.
    pub max_retries: u32,
    /// Delay before the second attempt, in milliseconds. Default: 1000.
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds. Default: 5000.
    pub max_delay_ms: u64,
    /// Growth factor applied per attempt. Default: 2.0.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff delay to wait *before* the given attempt (2-based: the first
    /// attempt never waits).
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2) as i32;
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exp);
        Duration::from_millis(raw.min(self.max_delay_ms as f64) as u64)
    }

    /// Retry budget with no sleeping, for tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }
}

/// Validation thresholds applied to every extracted table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Allowed absolute difference between the analysis step's estimated
    /// column count and the parsed column count. Default: 1.
    ///
    /// Merged header rows are the usual cause of an off-by-one estimate;
    /// a wider gap signals the wrong table was extracted.
    pub column_tolerance: usize,
    /// Minimum fraction of non-empty cells across the table. Default: 0.30.
    ///
    /// Real sparse tables (many "n.d." dashes) still sit well above this;
    /// a table below the floor is almost always a truncated multi-page
    /// extract or the wrong region of the paper.
    pub completeness_floor: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            column_tolerance: 1,
            completeness_floor: 0.30,
        }
    }
}

/// Configuration for the paper-to-data pipeline.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use paper2data::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .model("gpt-4o-mini")
///     .temperature(0.0)
///     .max_retries(2)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// LLM model identifier. If None, the gateway's default is used.
    pub model: Option<String>,

    /// Sampling temperature for all LLM completions. Default: 0.1.
    ///
    /// Transcription work wants the model faithful to the page, not
    /// creative; values near zero measurably reduce invented cells.
    pub temperature: f32,

    /// Maximum tokens for the analysis completion. Default: 4096.
    pub analysis_max_tokens: u32,

    /// Maximum tokens for a single table extraction. Default: 8192.
    ///
    /// Dense supplementary tables can exceed 4k output tokens; truncation
    /// mid-table surfaces as a completeness failure and wastes a retry.
    pub extraction_max_tokens: u32,

    /// Maximum characters of paper text sent to the analysis call.
    /// Default: 48_000. The head of the paper carries the metadata and the
    /// table captions; tails beyond this mostly add cost.
    pub max_paper_chars: usize,

    /// Pages of context either side of a table's page included in the
    /// extraction prompt. Default: 1.
    ///
    /// Multi-page tables need the following page; 1 covers the common case
    /// without ballooning the prompt for 50-page papers.
    pub page_window: u32,

    /// Retry policy for the extraction path.
    pub retry: RetryConfig,

    /// Validation thresholds for extracted tables.
    pub validation: ValidationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.1,
            analysis_max_tokens: 4_096,
            extraction_max_tokens: 8_192,
            max_paper_chars: 48_000,
            page_window: 1,
            retry: RetryConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn analysis_max_tokens(mut self, n: u32) -> Self {
        self.config.analysis_max_tokens = n;
        self
    }

    pub fn extraction_max_tokens(mut self, n: u32) -> Self {
        self.config.extraction_max_tokens = n;
        self
    }

    pub fn max_paper_chars(mut self, n: usize) -> Self {
        self.config.max_paper_chars = n.max(1_000);
        self
    }

    pub fn page_window(mut self, pages: u32) -> Self {
        self.config.page_window = pages;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.retry.max_retries = n;
        self
    }

    pub fn initial_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry.initial_delay_ms = ms;
        self
    }

    pub fn max_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry.max_delay_ms = ms;
        self
    }

    pub fn backoff_multiplier(mut self, m: f64) -> Self {
        self.config.retry.backoff_multiplier = m.max(1.0);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn column_tolerance(mut self, n: usize) -> Self {
        self.config.validation.column_tolerance = n;
        self
    }

    pub fn completeness_floor(mut self, f: f64) -> Self {
        self.config.validation.completeness_floor = f.clamp(0.0, 1.0);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.retry.max_retries == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_retries must be ≥ 1 (the first attempt counts)".into(),
            ));
        }
        if c.retry.max_delay_ms < c.retry.initial_delay_ms {
            return Err(PipelineError::InvalidConfig(format!(
                "max_delay_ms ({}) must be ≥ initial_delay_ms ({})",
                c.retry.max_delay_ms, c.retry.initial_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&c.validation.completeness_floor) {
            return Err(PipelineError::InvalidConfig(format!(
                "completeness_floor must be within 0.0–1.0, got {}",
                c.validation.completeness_floor
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = PipelineConfig::default();
        assert_eq!(c.retry.max_retries, 3);
        assert_eq!(c.retry.initial_delay_ms, 1_000);
        assert_eq!(c.retry.max_delay_ms, 5_000);
        assert_eq!(c.validation.column_tolerance, 1);
        assert!((c.validation.completeness_floor - 0.30).abs() < f64::EPSILON);
    }

    #[test]
    fn backoff_sequence_doubles_then_caps() {
        let r = RetryConfig::default();
        assert_eq!(r.delay_before_attempt(1), Duration::ZERO);
        assert_eq!(r.delay_before_attempt(2), Duration::from_millis(1_000));
        assert_eq!(r.delay_before_attempt(3), Duration::from_millis(2_000));
        assert_eq!(r.delay_before_attempt(4), Duration::from_millis(4_000));
        // 8s raw, capped to 5s
        assert_eq!(r.delay_before_attempt(5), Duration::from_millis(5_000));
    }

    #[test]
    fn builder_clamps_temperature() {
        let c = PipelineConfig::builder().temperature(9.0).build().unwrap();
        assert!((c.temperature - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn builder_rejects_zero_retries() {
        assert!(PipelineConfig::builder().max_retries(0).build().is_err());
    }

    #[test]
    fn builder_rejects_inverted_delays() {
        let res = PipelineConfig::builder()
            .initial_delay_ms(10_000)
            .max_delay_ms(100)
            .build();
        assert!(res.is_err());
    }
}
