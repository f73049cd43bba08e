/// Circuit breaker with sliding-window error rate tracking and a
/// concurrency-limited half-open probe phase.
///
/// State transitions:
/// - Closed → Open: consecutive failures reach `failure_threshold`, or the
///   rolling error rate reaches `error_rate_threshold`.
/// - Open → HalfOpen: after `timeout` elapses since the circuit opened.
/// - HalfOpen → Closed: `success_threshold` consecutive successes.
/// - HalfOpen → Open: any failure.
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failure count to trigger circuit open.
    pub failure_threshold: u32,
    /// Success count in HalfOpen to close circuit.
    pub success_threshold: u32,
    /// Duration to wait before transitioning from Open to HalfOpen.
    pub timeout: Duration,
    /// Error rate threshold (0.0 - 1.0) to trigger circuit open.
    pub error_rate_threshold: f64,
    /// Sliding window size for error rate calculation.
    pub window_size: usize,
    /// Maximum number of calls admitted concurrently while HalfOpen.
    pub max_half_open_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            error_rate_threshold: 0.5,
            window_size: 100,
            max_half_open_requests: 1,
        }
    }
}

#[derive(Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Arc<RwLock<CircuitBreakerState>>,
}

struct CircuitBreakerState {
    current: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    half_open_inflight: u32,
    /// Sliding window: true = success, false = failure.
    window: VecDeque<bool>,
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError {
    #[error("circuit breaker is open - failing fast")]
    Open,
    #[error("call failed: {0}")]
    CallFailed(String),
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(CircuitBreakerState {
                current: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                half_open_inflight: 0,
                window: VecDeque::with_capacity(config.window_size),
            })),
            config,
        }
    }

    /// Execute a future with circuit breaker protection.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if self.should_reject_call() {
            return Err(CircuitBreakerError::Open);
        }

        match f().await {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitBreakerError::CallFailed(e.to_string()))
            }
        }
    }

    /// `true` if a call may proceed right now — performs the
    /// Open-to-HalfOpen timeout transition and half-open admission
    /// accounting as a side effect, same as the fast path inside
    /// [`CircuitBreaker::call`]. Pair with [`CircuitBreaker::record_success`]
    /// / [`CircuitBreaker::record_failure`] for callers that drive the
    /// protected operation themselves instead of going through `call`.
    pub fn try_admit(&self) -> bool {
        !self.should_reject_call()
    }

    fn should_reject_call(&self) -> bool {
        let mut state = self.state.write();

        match state.current {
            CircuitState::Open => {
                if let Some(opened_at) = state.opened_at {
                    if opened_at.elapsed() >= self.config.timeout {
                        info!("circuit breaker: open -> half_open");
                        state.current = CircuitState::HalfOpen;
                        state.consecutive_successes = 0;
                        state.consecutive_failures = 0;
                        state.half_open_inflight = 1;
                        false
                    } else {
                        true
                    }
                } else {
                    true
                }
            }
            CircuitState::HalfOpen => {
                if state.half_open_inflight >= self.config.max_half_open_requests {
                    true
                } else {
                    state.half_open_inflight += 1;
                    false
                }
            }
            CircuitState::Closed => false,
        }
    }

    /// Manually record a success outside of [`CircuitBreaker::call`], for
    /// callers that already invoked the protected operation themselves
    /// (e.g. a router that wraps the call with its own panic recovery).
    pub fn record_success(&self) {
        let mut state = self.state.write();

        state.consecutive_successes += 1;
        state.consecutive_failures = 0;
        if state.current == CircuitState::HalfOpen {
            state.half_open_inflight = state.half_open_inflight.saturating_sub(1);
        }
        self.add_to_window(&mut state, true);

        if state.current == CircuitState::HalfOpen
            && state.consecutive_successes >= self.config.success_threshold
        {
            info!("circuit breaker: half_open -> closed");
            state.current = CircuitState::Closed;
            state.half_open_inflight = 0;
        }
    }

    /// Manually record a failure; see [`CircuitBreaker::record_success`].
    pub fn record_failure(&self) {
        let mut state = self.state.write();

        state.consecutive_failures += 1;
        state.consecutive_successes = 0;
        self.add_to_window(&mut state, false);

        match state.current {
            CircuitState::Closed => {
                let error_rate = self.calculate_error_rate(&state);
                if state.consecutive_failures >= self.config.failure_threshold
                    || error_rate >= self.config.error_rate_threshold
                {
                    warn!(
                        "circuit breaker: closed -> open (failures: {}, error_rate: {:.2}%)",
                        state.consecutive_failures,
                        error_rate * 100.0
                    );
                    state.current = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!("circuit breaker: half_open -> open (probe failed)");
                state.current = CircuitState::Open;
                state.opened_at = Some(Instant::now());
                state.half_open_inflight = 0;
            }
            CircuitState::Open => {}
        }
    }

    fn add_to_window(&self, state: &mut CircuitBreakerState, success: bool) {
        if state.window.len() >= self.config.window_size {
            state.window.pop_front();
        }
        state.window.push_back(success);
    }

    fn calculate_error_rate(&self, state: &CircuitBreakerState) -> f64 {
        if state.window.is_empty() {
            return 0.0;
        }
        let failures = state.window.iter().filter(|&&x| !x).count();
        failures as f64 / state.window.len() as f64
    }

    pub fn state(&self) -> CircuitState {
        self.state.read().current
    }

    pub fn error_rate(&self) -> f64 {
        let state = self.state.read();
        self.calculate_error_rate(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_to_open_on_consecutive_failures() {
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        };
        let cb = CircuitBreaker::new(config);

        for _ in 0..3 {
            let _ = cb.call(|| async { Err::<(), _>("error") }).await;
        }

        assert_eq!(cb.state(), CircuitState::Open);

        let result = cb.call(|| async { Ok::<_, String>(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open)));
    }

    #[tokio::test]
    async fn open_to_half_open_after_timeout_admits_one_probe() {
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            timeout: Duration::from_millis(100),
            max_half_open_requests: 1,
            ..Default::default()
        };
        let cb = CircuitBreaker::new(config);

        for _ in 0..2 {
            let _ = cb.call(|| async { Err::<(), _>("error") }).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(150)).await;

        let _ = cb.call(|| async { Ok::<_, String>(()) }).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn half_open_to_closed_on_success_threshold() {
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 2,
            timeout: Duration::from_millis(100),
            max_half_open_requests: 2,
            ..Default::default()
        };
        let cb = CircuitBreaker::new(config);

        for _ in 0..2 {
            let _ = cb.call(|| async { Err::<(), _>("error") }).await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;

        for _ in 0..2 {
            let _ = cb.call(|| async { Ok::<_, String>(()) }).await;
        }

        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_to_open_on_failure() {
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let cb = CircuitBreaker::new(config);

        for _ in 0..2 {
            let _ = cb.call(|| async { Err::<(), _>("error") }).await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = cb.call(|| async { Ok::<_, String>(()) }).await;

        let _ = cb.call(|| async { Err::<(), _>("error") }).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn error_rate_threshold_trips_independently_of_consecutive_count() {
        let config = CircuitBreakerConfig {
            failure_threshold: 100,
            error_rate_threshold: 0.5,
            window_size: 10,
            ..Default::default()
        };
        let cb = CircuitBreaker::new(config);

        for i in 0..10 {
            if i % 2 == 0 {
                let _ = cb.call(|| async { Err::<(), _>("error") }).await;
            } else {
                let _ = cb.call(|| async { Ok::<_, String>(()) }).await;
            }
        }

        // Alternating failures keep consecutive_failures at 1, but the
        // window holds a 50% error rate, which meets the threshold on the
        // next failure.
        let _ = cb.call(|| async { Err::<(), _>("error") }).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn seed_s4_breaker_trips_and_recovers() {
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 1,
            timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let cb = CircuitBreaker::new(config);

        let _ = cb.call(|| async { Err::<(), _>("fail 1") }).await;
        let _ = cb.call(|| async { Err::<(), _>("fail 2") }).await;

        let third = cb.call(|| async { Ok::<_, String>(()) }).await;
        assert!(matches!(third, Err(CircuitBreakerError::Open)));

        tokio::time::sleep(Duration::from_millis(150)).await;

        let probe = cb.call(|| async { Ok::<_, String>(()) }).await;
        assert!(probe.is_ok());

        let after = cb.call(|| async { Ok::<_, String>(()) }).await;
        assert!(after.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
