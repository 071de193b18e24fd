//! CircuitBreaker port - Fail-fast guard for broker operations.
//!
//! ## States
//!
//! - **Closed**: Normal operation, calls flow through
//! - **Open**: Too many recent failures, calls rejected without touching the broker
//! - **Half-Open**: Cooldown elapsed, exactly one probe call allowed
//!
//! ## Transitions
//!
//! ```text
//! Closed --[K failures within W]--> Open
//! Open --[cooldown T elapsed]--> Half-Open
//! Half-Open --[probe succeeds]--> Closed
//! Half-Open --[probe fails]--> Open (cooldown grows)
//! ```

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - calls flow through.
    Closed,

    /// Failing fast - calls rejected immediately.
    /// Becomes HalfOpen once the cooldown has elapsed.
    Open,

    /// Recovery check - a single probe call is admitted.
    HalfOpen,
}

impl CircuitState {
    /// Check if the circuit may admit calls.
    pub fn allows_requests(&self) -> bool {
        matches!(self, CircuitState::Closed | CircuitState::HalfOpen)
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (K) that open the circuit.
    ///
    /// Default: 5 failures
    pub failure_threshold: u32,

    /// Window (W) the failures must fall within.
    ///
    /// Default: 30 seconds
    pub failure_window: Duration,

    /// Initial cooldown (T) before a probe is allowed.
    ///
    /// Default: 10 seconds
    pub cooldown: Duration,

    /// Factor applied to the cooldown each time a probe fails.
    ///
    /// Default: 2.0
    pub cooldown_multiplier: f64,

    /// Ceiling for the grown cooldown.
    ///
    /// Default: 5 minutes
    pub max_cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(30),
            cooldown: Duration::from_secs(10),
            cooldown_multiplier: 2.0,
            max_cooldown: Duration::from_secs(300),
        }
    }
}

impl CircuitBreakerConfig {
    /// Cooldown after `reopen_count` consecutive failed probes.
    pub fn cooldown_after(&self, reopen_count: u32) -> Duration {
        let factor = self.cooldown_multiplier.max(1.0).powi(reopen_count.min(32) as i32);
        let secs = self.cooldown.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_cooldown.as_secs_f64() {
            return self.max_cooldown.max(self.cooldown);
        }
        Duration::from_secs_f64(secs)
    }
}

/// Outcome of asking the breaker for permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed: proceed normally.
    Allowed,

    /// Circuit half-open: this caller carries the single probe and must
    /// record its outcome.
    Probe,

    /// Circuit open, or a probe is already in flight.
    Rejected {
        /// Time until a probe would be admitted, if known.
        retry_after: Option<Duration>,
    },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Admission::Rejected { .. })
    }
}

/// Port for circuit breaker functionality.
///
/// Transitions are atomic: two callers can never both observe the
/// open→half-open transition and both launch a probe.
///
/// Outcomes are recorded against the admission that allowed the call. Only
/// the probe settles a half-open circuit; a call admitted while closed that
/// finishes after the circuit opened is counted but moves nothing.
///
/// # Example
///
/// ```ignore
/// let admission = breaker.try_acquire();
/// if let Admission::Rejected { .. } = admission {
///     return Err(BrokerError::CircuitOpen { .. });
/// }
/// match transport.publish(&subject, &bytes).await {
///     Ok(()) => breaker.record_success(admission),
///     Err(_) => breaker.record_failure(admission),
/// }
/// ```
pub trait CircuitBreaker: Send + Sync {
    /// Name of the guarded operation (e.g. "broker.publish").
    fn name(&self) -> &str;

    /// Current state. Never mutates: an open circuit whose cooldown has
    /// elapsed is reported as half-open.
    fn state(&self) -> CircuitState;

    /// Asks permission for one call, performing any due transition.
    fn try_acquire(&self) -> Admission;

    /// Record a successful call admitted with `admission`.
    fn record_success(&self, admission: Admission);

    /// Record a failed call admitted with `admission`.
    fn record_failure(&self, admission: Admission);

    /// Force the circuit closed and clear counters.
    ///
    /// Use sparingly - typically for administrative intervention.
    fn reset(&self);

    /// Get metrics about the circuit breaker.
    fn metrics(&self) -> CircuitBreakerMetrics;
}

/// Metrics about circuit breaker behavior.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerMetrics {
    pub name: String,

    /// Current state
    pub state: CircuitState,

    /// Total successful calls since creation
    pub total_successes: u64,

    /// Total failed calls since creation
    pub total_failures: u64,

    /// Calls rejected without being attempted
    pub total_rejections: u64,

    /// Times the circuit has opened
    pub times_opened: u64,

    /// Failures currently inside the window (closed state)
    pub current_failures: u32,

    /// Cooldown that applies to the current (or next) open period
    pub current_cooldown_ms: u64,

    /// Time until a probe is admitted (when open)
    pub time_until_half_open_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_state_allows_requests() {
        assert!(CircuitState::Closed.allows_requests());
        assert!(CircuitState::HalfOpen.allows_requests());
        assert!(!CircuitState::Open.allows_requests());
    }

    #[test]
    fn default_config_values() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.failure_window, Duration::from_secs(30));
        assert_eq!(config.cooldown, Duration::from_secs(10));
    }

    #[test]
    fn cooldown_grows_and_is_capped() {
        let config = CircuitBreakerConfig {
            cooldown: Duration::from_secs(2),
            cooldown_multiplier: 2.0,
            max_cooldown: Duration::from_secs(10),
            ..Default::default()
        };
        assert_eq!(config.cooldown_after(0), Duration::from_secs(2));
        assert_eq!(config.cooldown_after(1), Duration::from_secs(4));
        assert_eq!(config.cooldown_after(2), Duration::from_secs(8));
        assert_eq!(config.cooldown_after(3), Duration::from_secs(10));
        assert_eq!(config.cooldown_after(40), Duration::from_secs(10));
    }

    #[test]
    fn rejected_admission_is_not_admitted() {
        assert!(Admission::Allowed.is_admitted());
        assert!(Admission::Probe.is_admitted());
        assert!(!Admission::Rejected { retry_after: None }.is_admitted());
    }

    #[test]
    fn state_displays_snake_case() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
    }
}
