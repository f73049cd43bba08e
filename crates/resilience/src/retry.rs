/// Retry policy with exponential backoff and jitter, plus the
/// retryable/permanent error classification the router's retry middleware
/// dispatches on.
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Add random jitter to backoff (+/-30%).
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("max retries ({0}) exceeded")]
    MaxRetriesExceeded(u32),
    #[error("operation failed: {0}")]
    OperationFailed(E),
}

/// Execute a future with retry logic, retrying on every `Err`. Callers who
/// need to stop retrying on a permanent error should inspect the error in
/// `f` and return early via [`ErrorCategory`] classification before this
/// helper ever sees it.
pub async fn with_retry<F, Fut, T, E>(config: RetryConfig, mut f: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut attempt = 0;
    let mut backoff = config.initial_backoff;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempt += 1;
                if attempt > config.max_retries {
                    warn!("max retries ({}) reached: {}", config.max_retries, e);
                    return Err(RetryError::MaxRetriesExceeded(config.max_retries));
                }

                let delay = calculate_backoff(backoff, config.jitter);
                warn!(attempt, max = config.max_retries, ?delay, "retrying after error: {}", e);
                tokio::time::sleep(delay).await;

                backoff = Duration::from_millis(
                    ((backoff.as_millis() as f64 * config.backoff_multiplier)
                        .min(config.max_backoff.as_millis() as f64)) as u64,
                );
            }
        }
    }
}

pub fn calculate_backoff(base: Duration, jitter: bool) -> Duration {
    if jitter {
        let mut rng = rand::rng();
        let jitter_factor = 1.0 + rng.gen_range(-0.3..0.3);
        Duration::from_millis((base.as_millis() as f64 * jitter_factor).max(0.0) as u64)
    } else {
        base
    }
}

/// Error categories the DLQ and retry middleware classify on. `unknown` is
/// the default for errors a handler doesn't explicitly tag; treated as
/// retryable up to the attempt cap, then DLQ, matching the taxonomy's
/// fallback rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Unknown,
    Transient,
    Validation,
    Permanent,
}

/// Wraps an underlying cause that should be retried (network/timeout-class
/// failures).
#[derive(Debug, thiserror::Error)]
#[error("retryable: {source}")]
pub struct RetryableError {
    #[source]
    pub source: anyhow::Error,
    pub category: ErrorCategory,
}

impl RetryableError {
    pub fn new(source: impl Into<anyhow::Error>) -> Self {
        Self { source: source.into(), category: ErrorCategory::Transient }
    }

    pub fn with_category(source: impl Into<anyhow::Error>, category: ErrorCategory) -> Self {
        Self { source: source.into(), category }
    }
}

/// Wraps an underlying cause that must never be retried (malformed
/// payload, unknown event type, validation failure).
#[derive(Debug, thiserror::Error)]
#[error("permanent: {source}")]
pub struct PermanentError {
    #[source]
    pub source: anyhow::Error,
    pub category: ErrorCategory,
}

impl PermanentError {
    pub fn new(source: impl Into<anyhow::Error>) -> Self {
        Self { source: source.into(), category: ErrorCategory::Permanent }
    }

    pub fn validation(source: impl Into<anyhow::Error>) -> Self {
        Self { source: source.into(), category: ErrorCategory::Validation }
    }
}

/// A dispatch outcome a handler returns; the router's retry/DLQ middleware
/// acts on the variant, not the underlying error type.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Retryable(#[from] RetryableError),
    #[error(transparent)]
    Permanent(#[from] PermanentError),
}

impl HandlerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            HandlerError::Retryable(e) => e.category,
            HandlerError::Permanent(e) => e.category,
        }
    }

    /// Any error not explicitly classified is retryable up to the attempt
    /// cap, then routed to DLQ — the taxonomy's default fallback.
    pub fn should_retry(&self, attempt: u32, max_deliver: u32) -> bool {
        match self {
            HandlerError::Permanent(_) => false,
            HandlerError::Retryable(_) => attempt < max_deliver,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let config = RetryConfig::default();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(config, move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let config = RetryConfig {
            max_retries: 3,
            initial_backoff: Duration::from_millis(5),
            jitter: false,
            ..Default::default()
        };

        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(config, move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move { if count < 2 { Err("temporary error") } else { Ok(42) } }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let config = RetryConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(5),
            jitter: false,
            ..Default::default()
        };

        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(config, move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>("persistent error") }
        })
        .await;

        assert!(matches!(result, Err(RetryError::MaxRetriesExceeded(2))));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn handler_error_category_drives_retry_decision() {
        let retryable = HandlerError::Retryable(RetryableError::new(anyhow::anyhow!("timeout")));
        assert!(retryable.should_retry(0, 5));
        assert!(!retryable.should_retry(5, 5));

        let permanent = HandlerError::Permanent(PermanentError::validation(anyhow::anyhow!("bad json")));
        assert!(!permanent.should_retry(0, 5));
        assert_eq!(permanent.category(), ErrorCategory::Validation);
    }
}
