//! Resilience primitives guarding broker operations.
//!
//! - `WindowedCircuitBreaker` / `CircuitBreakerRegistry` - Fail fast per operation
//! - `RetryHandler` - Exponential backoff with jitter, dead-lettering on exhaustion

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{
    guarded, CircuitBreakerRegistry, GuardedError, ProbeGuard, WindowedCircuitBreaker,
};
pub use retry::{
    DeadLetterContext, RetryError, RetryHandler, RetryPolicy, RetryStats, Retryable,
    DEFAULT_BASE_DELAY, DEFAULT_JITTER_RATIO, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY,
    MAX_JITTER_RATIO,
};
