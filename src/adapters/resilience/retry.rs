//! Retry handler: exponential backoff with jitter and dead-lettering.
//!
//! `delay(n) = min(base * 2^n, cap) ± jitter`, where `n` is the zero-based
//! retry index. Non-retryable failures fail immediately. When attempts run
//! out and a dead letter store is configured, the message is stored and a
//! terminal `DeadLettered` result is returned instead of the raw error.

use rand::Rng;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::domain::dead_letter::DeadLetterEntry;
use crate::domain::foundation::{DeadLetterId, Timestamp};
use crate::domain::subject::Subject;
use crate::ports::{DeadLetterError, DeadLetterStore, TransportError};

/// Default maximum attempts (including the first).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default base delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);
/// Default maximum delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);
/// Default jitter ratio.
pub const DEFAULT_JITTER_RATIO: f64 = 0.1;
/// Largest jitter ratio that keeps successive delays strictly increasing
/// below the cap: `base * 2^n * (1 + r) < base * 2^(n+1) * (1 - r)` needs
/// `r < 1/3`.
pub const MAX_JITTER_RATIO: f64 = 0.25;

/// Classifies errors as transient or permanent.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for TransportError {
    fn is_retryable(&self) -> bool {
        TransportError::is_retryable(self)
    }
}

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first. At least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Symmetric jitter as a fraction of the nominal delay.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_ratio: DEFAULT_JITTER_RATIO,
        }
    }
}

impl RetryPolicy {
    /// Nominal delay before retry `retry` (zero-based), without jitter.
    pub fn nominal_delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.min(31)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay with random jitter applied, never above `max_delay`.
    pub fn jittered_delay(&self, retry: u32) -> Duration {
        let nominal = self.nominal_delay(retry);
        let ratio = self.jitter_ratio.clamp(0.0, MAX_JITTER_RATIO);
        if ratio == 0.0 {
            return nominal;
        }
        let offset = rand::thread_rng().gen_range(-ratio..=ratio);
        let secs = (nominal.as_secs_f64() * (1.0 + offset)).max(0.0);
        Duration::from_secs_f64(secs).min(self.max_delay)
    }
}

/// What to store if a publish exhausts its attempts.
#[derive(Debug, Clone)]
pub struct DeadLetterContext {
    pub subject: Subject,
    pub payload: JsonValue,
}

/// Terminal result of a retried operation.
#[derive(Debug, Error)]
pub enum RetryError<E: fmt::Display> {
    #[error("Non-retryable failure: {0}")]
    NonRetryable(E),

    #[error("Gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: E },

    #[error("Dead-lettered as {id} after {attempts} attempts: {last_error}")]
    DeadLettered {
        id: DeadLetterId,
        attempts: u32,
        last_error: E,
    },

    #[error("Gave up after {attempts} attempts ({last_error}) and could not dead-letter: {store_error}")]
    DeadLetterFailed {
        attempts: u32,
        last_error: E,
        store_error: DeadLetterError,
    },

    #[error("Retry cancelled by shutdown after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl<E: fmt::Display> RetryError<E> {
    /// Attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::NonRetryable(_) => 1,
            RetryError::Exhausted { attempts, .. }
            | RetryError::DeadLettered { attempts, .. }
            | RetryError::DeadLetterFailed { attempts, .. }
            | RetryError::Cancelled { attempts } => *attempts,
        }
    }
}

/// Point-in-time retry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryStats {
    /// Every attempt, first tries included.
    pub attempts: u64,
    /// Attempts that were retries.
    pub retries: u64,
    pub successes: u64,
    pub exhausted: u64,
    pub dead_lettered: u64,
    pub non_retryable: u64,
    pub cancelled: u64,
}

#[derive(Debug, Default)]
struct RetryCounters {
    attempts: AtomicU64,
    retries: AtomicU64,
    successes: AtomicU64,
    exhausted: AtomicU64,
    dead_lettered: AtomicU64,
    non_retryable: AtomicU64,
    cancelled: AtomicU64,
}

/// Runs fallible async operations under a [`RetryPolicy`].
pub struct RetryHandler {
    policy: RetryPolicy,
    dead_letters: Option<Arc<dyn DeadLetterStore>>,
    shutdown: Option<watch::Receiver<bool>>,
    counters: RetryCounters,
}

impl RetryHandler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            dead_letters: None,
            shutdown: None,
            counters: RetryCounters::default(),
        }
    }

    /// Stores exhausted messages instead of surfacing the final error.
    pub fn with_dead_letter_store(mut self, store: Arc<dyn DeadLetterStore>) -> Self {
        self.dead_letters = Some(store);
        self
    }

    /// Aborts backoff waits once `shutdown` becomes `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn has_dead_letter_store(&self) -> bool {
        self.dead_letters.is_some()
    }

    pub fn stats(&self) -> RetryStats {
        let c = &self.counters;
        RetryStats {
            attempts: c.attempts.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            successes: c.successes.load(Ordering::Relaxed),
            exhausted: c.exhausted.load(Ordering::Relaxed),
            dead_lettered: c.dead_lettered.load(Ordering::Relaxed),
            non_retryable: c.non_retryable.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
        }
    }

    /// Retries `op` without dead-lettering; exhaustion surfaces the last error.
    pub async fn run<T, E, F, Fut>(&self, op: F) -> Result<T, RetryError<E>>
    where
        E: Retryable + fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute(None, op).await
    }

    /// Retries `op`; on exhaustion stores `letter` in the dead letter store
    /// if one is configured.
    pub async fn run_or_dead_letter<T, E, F, Fut>(
        &self,
        letter: DeadLetterContext,
        op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: Retryable + fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute(Some(letter), op).await
    }

    async fn execute<T, E, F, Fut>(
        &self,
        letter: Option<DeadLetterContext>,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: Retryable + fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut first_failed_at: Option<Timestamp> = None;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.counters.attempts.fetch_add(1, Ordering::Relaxed);
            if attempt > 1 {
                self.counters.retries.fetch_add(1, Ordering::Relaxed);
            }

            let error = match op(attempt).await {
                Ok(value) => {
                    self.counters.successes.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                self.counters.non_retryable.fetch_add(1, Ordering::Relaxed);
                debug!(attempt, error = %error, "Non-retryable failure");
                return Err(RetryError::NonRetryable(error));
            }
            first_failed_at.get_or_insert_with(Timestamp::now);

            if attempt >= max_attempts {
                self.counters.exhausted.fetch_add(1, Ordering::Relaxed);
                return Err(self
                    .give_up(letter, attempt, first_failed_at, error)
                    .await);
            }

            let delay = self.policy.jittered_delay(attempt - 1);
            debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after backoff"
            );
            if self.wait_or_cancel(delay).await {
                self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                return Err(RetryError::Cancelled { attempts: attempt });
            }
        }
    }

    async fn give_up<E: fmt::Display>(
        &self,
        letter: Option<DeadLetterContext>,
        attempts: u32,
        first_failed_at: Option<Timestamp>,
        last_error: E,
    ) -> RetryError<E> {
        let (Some(store), Some(letter)) = (&self.dead_letters, letter) else {
            warn!(attempts, error = %last_error, "Retries exhausted");
            return RetryError::Exhausted {
                attempts,
                last_error,
            };
        };

        let entry = DeadLetterEntry::new(
            letter.subject,
            letter.payload,
            attempts,
            first_failed_at.unwrap_or_else(Timestamp::now),
            last_error.to_string(),
        );
        let id = entry.id;
        let subject = entry.subject.clone();

        match store.put(entry).await {
            Ok(()) => {
                self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
                warn!(
                    dead_letter_id = %id,
                    subject = %subject,
                    attempts,
                    error = %last_error,
                    "Message dead-lettered after exhausting retries"
                );
                RetryError::DeadLettered {
                    id,
                    attempts,
                    last_error,
                }
            }
            Err(store_error) => {
                tracing::error!(
                    subject = %subject,
                    attempts,
                    error = %store_error,
                    "Failed to store dead letter"
                );
                RetryError::DeadLetterFailed {
                    attempts,
                    last_error,
                    store_error,
                }
            }
        }
    }

    /// Sleeps for `delay`; returns `true` if shutdown was signalled first.
    async fn wait_or_cancel(&self, delay: Duration) -> bool {
        let Some(shutdown) = &self.shutdown else {
            tokio::time::sleep(delay).await;
            return false;
        };
        let mut shutdown = shutdown.clone();
        if *shutdown.borrow() {
            return true;
        }

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        let cancelled = tokio::select! {
            _ = &mut sleep => return false,
            changed = shutdown.wait_for(|stop| *stop) => changed.is_ok(),
        };
        if cancelled {
            return true;
        }
        // Shutdown sender dropped: nobody can cancel any more, finish the wait.
        sleep.await;
        false
    }
}
