//! Windowed circuit breaker and the per-operation breaker registry.
//!
//! All state lives behind one mutex so every transition (closed→open,
//! open→half-open, half-open→closed/open) is a single atomic step. Times
//! use `tokio::time::Instant` so tests can drive cooldowns with paused time.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::ports::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Closed,
    Open { until: Instant },
    /// The single probe is in flight.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    phase: Phase,
    /// Failure times inside the window (closed state only).
    failures: VecDeque<Instant>,
    /// Consecutive failed probes since the circuit last closed.
    reopen_count: u32,
}

/// Circuit breaker counting consecutive failures inside a sliding window.
pub struct WindowedCircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
    times_opened: AtomicU64,
}

impl WindowedCircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                phase: Phase::Closed,
                failures: VecDeque::new(),
                reopen_count: 0,
            }),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
            times_opened: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn prune(&self, failures: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = failures.front() {
            if now.duration_since(*oldest) > self.config.failure_window {
                failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn open(&self, state: &mut BreakerState, now: Instant) {
        let cooldown = self.config.cooldown_after(state.reopen_count);
        state.phase = Phase::Open {
            until: now + cooldown,
        };
        state.failures.clear();
        self.times_opened.fetch_add(1, Ordering::Relaxed);
        warn!(
            operation = %self.name,
            cooldown_ms = cooldown.as_millis() as u64,
            reopen_count = state.reopen_count,
            "Circuit breaker opened"
        );
    }
}

impl CircuitBreaker for WindowedCircuitBreaker {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> CircuitState {
        let state = self.state.lock();
        match state.phase {
            Phase::Closed => CircuitState::Closed,
            Phase::Open { until } if Instant::now() >= until => CircuitState::HalfOpen,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen => CircuitState::HalfOpen,
        }
    }

    fn try_acquire(&self) -> Admission {
        let now = Instant::now();
        let mut state = self.state.lock();
        let admission = match state.phase {
            Phase::Closed => Admission::Allowed,
            Phase::Open { until } if now >= until => {
                state.phase = Phase::HalfOpen;
                info!(operation = %self.name, "Circuit breaker half-open, admitting probe");
                Admission::Probe
            }
            Phase::Open { until } => Admission::Rejected {
                retry_after: Some(until - now),
            },
            Phase::HalfOpen => Admission::Rejected { retry_after: None },
        };

        if !admission.is_admitted() {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            debug!(operation = %self.name, "Circuit breaker rejected call");
        }
        admission
    }

    fn record_success(&self, admission: Admission) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        match (state.phase, admission) {
            (Phase::Closed, Admission::Allowed) => state.failures.clear(),
            (Phase::HalfOpen, Admission::Probe) => {
                state.phase = Phase::Closed;
                state.failures.clear();
                state.reopen_count = 0;
                info!(operation = %self.name, "Circuit breaker closed after successful probe");
            }
            // Admitted under an earlier phase.
            _ => debug!(operation = %self.name, "Stale success ignored"),
        }
    }

    fn record_failure(&self, admission: Admission) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut state = self.state.lock();
        match (state.phase, admission) {
            (Phase::Closed, Admission::Allowed) => {
                state.failures.push_back(now);
                self.prune(&mut state.failures, now);
                if state.failures.len() >= self.config.failure_threshold as usize {
                    self.open(&mut state, now);
                }
            }
            (Phase::HalfOpen, Admission::Probe) => {
                state.reopen_count = state.reopen_count.saturating_add(1);
                self.open(&mut state, now);
            }
            _ => debug!(operation = %self.name, "Stale failure ignored"),
        }
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.phase = Phase::Closed;
        state.failures.clear();
        state.reopen_count = 0;
        info!(operation = %self.name, "Circuit breaker reset");
    }

    fn metrics(&self) -> CircuitBreakerMetrics {
        let now = Instant::now();
        let state = self.state.lock();
        let (current, until) = match state.phase {
            Phase::Closed => (CircuitState::Closed, None),
            Phase::Open { until } if now >= until => (CircuitState::HalfOpen, None),
            Phase::Open { until } => (CircuitState::Open, Some(until - now)),
            Phase::HalfOpen => (CircuitState::HalfOpen, None),
        };
        let current_failures = state
            .failures
            .iter()
            .filter(|at| now.duration_since(**at) <= self.config.failure_window)
            .count() as u32;

        CircuitBreakerMetrics {
            name: self.name.clone(),
            state: current,
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
            times_opened: self.times_opened.load(Ordering::Relaxed),
            current_failures,
            current_cooldown_ms: self.config.cooldown_after(state.reopen_count).as_millis() as u64,
            time_until_half_open_ms: until.map(|d| d.as_millis() as u64),
        }
    }
}

/// Error from a call made through [`guarded`].
#[derive(Debug, Error)]
pub enum GuardedError<E> {
    #[error("Circuit open for {operation}")]
    Open {
        operation: String,
        retry_after: Option<Duration>,
    },

    #[error(transparent)]
    Inner(E),
}

/// Admission for one call; records its outcome exactly once.
///
/// A probe that is dropped without an outcome (the caller's future was
/// cancelled or timed out) counts as a failure, so the breaker never stays
/// half-open with a probe that will never report back.
pub struct ProbeGuard<'a> {
    breaker: &'a dyn CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl<'a> ProbeGuard<'a> {
    /// Asks the breaker for permission; `None` when rejected.
    pub fn acquire(breaker: &'a dyn CircuitBreaker) -> Result<Self, Option<Duration>> {
        match breaker.try_acquire() {
            Admission::Rejected { retry_after } => Err(retry_after),
            admission => Ok(Self {
                breaker,
                admission,
                settled: false,
            }),
        }
    }

    pub fn is_probe(&self) -> bool {
        self.admission == Admission::Probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success(self.admission);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.admission);
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Probe {
            debug!(operation = %self.breaker.name(), "Probe abandoned, counting as failure");
            self.breaker.record_failure(self.admission);
        }
    }
}

/// Runs `op` through the breaker.
///
/// Rejected calls return `GuardedError::Open` without invoking `op`.
pub async fn guarded<T, E, F, Fut>(
    breaker: &dyn CircuitBreaker,
    op: F,
) -> Result<T, GuardedError<E>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let guard = ProbeGuard::acquire(breaker).map_err(|retry_after| GuardedError::Open {
        operation: breaker.name().to_string(),
        retry_after,
    })?;

    match op().await {
        Ok(value) => {
            guard.success();
            Ok(value)
        }
        Err(e) => {
            guard.failure();
            Err(GuardedError::Inner(e))
        }
    }
}

/// Circuit breakers keyed by guarded-operation name.
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<WindowedCircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the breaker for `operation`, creating it with the default
    /// config on first use.
    pub fn get(&self, operation: &str) -> Arc<WindowedCircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(operation) {
            return breaker.clone();
        }
        self.breakers
            .write()
            .entry(operation.to_string())
            .or_insert_with(|| {
                Arc::new(WindowedCircuitBreaker::new(
                    operation,
                    self.default_config.clone(),
                ))
            })
            .clone()
    }

    /// Installs a breaker with its own config, replacing any existing one.
    pub fn configure(
        &self,
        operation: &str,
        config: CircuitBreakerConfig,
    ) -> Arc<WindowedCircuitBreaker> {
        let breaker = Arc::new(WindowedCircuitBreaker::new(operation, config));
        self.breakers
            .write()
            .insert(operation.to_string(), breaker.clone());
        breaker
    }

    /// Current state of every breaker.
    pub fn states(&self) -> BTreeMap<String, CircuitState> {
        self.breakers
            .read()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.state()))
            .collect()
    }

    /// Metrics of every breaker, sorted by operation name.
    pub fn metrics(&self) -> Vec<CircuitBreakerMetrics> {
        let mut all: Vec<CircuitBreakerMetrics> =
            self.breakers.read().values().map(|b| b.metrics()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
