//! Shared resilience primitives: circuit breaker, retry-with-backoff, and
//! timeout wrappers used by the publisher, router and resilient reader.

pub mod circuit_breaker;
pub mod retry;
pub mod timeout;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use retry::{
    calculate_backoff, with_retry, ErrorCategory, HandlerError, PermanentError, RetryConfig,
    RetryError, RetryableError,
};
pub use timeout::{with_timeout, with_timeout_result, TimeoutConfig, TimeoutError};
