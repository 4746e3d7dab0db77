//! Bounded retry with classification-driven prompt adjustment.
//!
//! LLM table extraction is nondeterministic: the same prompt can misread a
//! merged header once and transcribe it perfectly the next time. A small,
//! bounded number of retries with *error-specific* prompt hints recovers
//! most transient misreads without unbounded cost.
//!
//! The controller is a pure function over (operation, config): it owns no
//! state beyond the loop, performs no I/O of its own, and returns the full
//! attempt history either way, so callers (and tests) can inspect exactly
//! what happened. Persistent effects — session transitions, blob writes —
//! belong to the caller and happen only after the controller returns.
//!
//! ## Backoff
//!
//! Exponential with a cap: 1s → 2s → 4s, each bounded by `max_delay_ms`
//! (default 5s). Waiting happens *before* each retry attempt, never after
//! the last, so an exhausted run costs `Σ min(initial·mult^i, max)` of
//! sleep on top of the operation time itself.

use crate::config::RetryConfig;
use crate::error::{ExtractFailure, FailureKind};
use std::future::Future;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, warn};

/// What the operation gets to know about the loop's progress.
///
/// `adjustments` accumulates the classification of every failure so far,
/// first-failure first and deduplicated; the operation maps them to prompt
/// guidance. `last_error` is the previous attempt's message, restated in
/// the augmented prompt so the model sees what went wrong.
#[derive(Debug, Clone, Default)]
pub struct AttemptContext {
    /// 1-based attempt number.
    pub attempt: u32,
    pub adjustments: Vec<FailureKind>,
    pub last_error: Option<String>,
}

/// One try within the loop. Ephemeral — aggregated into [`RetryOutcome`],
/// logged, then discarded; never persisted.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub kind: Option<FailureKind>,
}

/// The controller's verdict plus the full attempt history.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ExtractFailure>,
    pub attempts: Vec<AttemptRecord>,
}

impl<T> RetryOutcome<T> {
    pub fn total_attempts(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run `operation` up to `config.max_retries` times.
///
/// The operation receives an [`AttemptContext`]; on failure the error is
/// classified, its kind appended to the adjustment set, and the loop waits
/// the current backoff delay before trying again. On success the result is
/// returned immediately together with the history so far.
pub async fn run_with_retry<T, Op, Fut>(config: &RetryConfig, mut operation: Op) -> RetryOutcome<T>
where
    Op: FnMut(AttemptContext) -> Fut,
    Fut: Future<Output = Result<T, ExtractFailure>>,
{
    let mut attempts: Vec<AttemptRecord> = Vec::new();
    let mut adjustments: Vec<FailureKind> = Vec::new();
    let mut last_error: Option<ExtractFailure> = None;

    for attempt in 1..=config.max_retries {
        let delay = config.delay_before_attempt(attempt);
        if !delay.is_zero() {
            warn!(
                "retry {}/{} after {}ms",
                attempt,
                config.max_retries,
                delay.as_millis()
            );
            sleep(delay).await;
        }

        let ctx = AttemptContext {
            attempt,
            adjustments: adjustments.clone(),
            last_error: last_error.as_ref().map(|e| e.to_string()),
        };

        let start = Instant::now();
        let outcome = operation(ctx).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(value) => {
                debug!("attempt {attempt} succeeded in {duration_ms}ms");
                attempts.push(AttemptRecord {
                    attempt,
                    duration_ms,
                    success: true,
                    error: None,
                    kind: None,
                });
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                };
            }
            Err(failure) => {
                let kind = failure.kind();
                warn!("attempt {attempt} failed ({kind:?}): {failure}");
                attempts.push(AttemptRecord {
                    attempt,
                    duration_ms,
                    success: false,
                    error: Some(failure.to_string()),
                    kind: Some(kind),
                });
                if !adjustments.contains(&kind) {
                    adjustments.push(kind);
                }
                last_error = Some(failure);
            }
        }
    }

    // Budget exhausted. `max_retries` is validated ≥ 1, so a last error
    // always exists here.
    let failure = last_error.unwrap_or(ExtractFailure::Llm {
        detail: "retry budget was zero".to_string(),
    });
    RetryOutcome {
        result: Err(failure),
        attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    fn fast(max_retries: u32) -> RetryConfig {
        RetryConfig::immediate(max_retries)
    }

    #[tokio::test]
    async fn first_try_success_makes_one_attempt() {
        let outcome = run_with_retry(&fast(3), |_ctx| async { Ok::<_, ExtractFailure>(42) }).await;
        assert!(outcome.succeeded());
        assert_eq!(outcome.total_attempts(), 1);
        assert!(outcome.attempts[0].success);
    }

    #[tokio::test]
    async fn failure_then_success_carries_adjustment() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen_ctx = Arc::new(Mutex::new(Vec::<AttemptContext>::new()));

        let outcome = {
            let calls = Arc::clone(&calls);
            let seen = Arc::clone(&seen_ctx);
            run_with_retry(&fast(3), move |ctx| {
                let calls = Arc::clone(&calls);
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push(ctx);
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ExtractFailure::EmptyColumn {
                            column: "b".into(),
                            rows: 5,
                        })
                    } else {
                        Ok("csv".to_string())
                    }
                }
            })
            .await
        };

        assert!(outcome.succeeded());
        assert_eq!(outcome.total_attempts(), 2);

        let seen = seen_ctx.lock().unwrap();
        assert!(seen[0].adjustments.is_empty());
        assert!(seen[0].last_error.is_none());
        assert_eq!(seen[1].adjustments, vec![FailureKind::EmptyColumn]);
        assert!(seen[1].last_error.as_deref().unwrap().contains("'b'"));
    }

    #[tokio::test]
    async fn budget_bounds_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let outcome: RetryOutcome<()> = {
            let calls = Arc::clone(&calls);
            run_with_retry(&fast(3), move |_ctx| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ExtractFailure::CsvParse {
                        detail: "never valid".into(),
                    })
                }
            })
            .await
        };

        assert!(!outcome.succeeded());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.total_attempts(), 3);
        assert!(outcome.attempts.iter().all(|a| !a.success));
    }

    #[tokio::test]
    async fn repeated_kind_is_not_duplicated() {
        let seen_ctx = Arc::new(Mutex::new(Vec::<AttemptContext>::new()));
        let _: RetryOutcome<()> = {
            let seen = Arc::clone(&seen_ctx);
            run_with_retry(&fast(3), move |ctx| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push(ctx);
                    Err(ExtractFailure::ColumnCountMismatch {
                        expected: 4,
                        found: 6,
                    })
                }
            })
            .await
        };

        let seen = seen_ctx.lock().unwrap();
        assert_eq!(seen[2].adjustments, vec![FailureKind::ColumnCount]);
    }

    #[tokio::test]
    async fn mixed_failures_accumulate_in_order() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen_ctx = Arc::new(Mutex::new(Vec::<AttemptContext>::new()));
        let _: RetryOutcome<()> = {
            let calls = Arc::clone(&calls);
            let seen = Arc::clone(&seen_ctx);
            run_with_retry(&fast(3), move |ctx| {
                let calls = Arc::clone(&calls);
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push(ctx);
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ExtractFailure::CsvParse { detail: "x".into() })
                    } else {
                        Err(ExtractFailure::Completeness {
                            ratio: 0.1,
                            floor: 0.3,
                        })
                    }
                }
            })
            .await
        };

        let seen = seen_ctx.lock().unwrap();
        assert_eq!(
            seen[2].adjustments,
            vec![FailureKind::Parse, FailureKind::Completeness]
        );
    }
}
