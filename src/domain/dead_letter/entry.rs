//! Dead letter entries and the filter used to inspect them.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::domain::foundation::{DeadLetterId, Timestamp};
use crate::domain::subject::{Subject, SubjectFilter, DEFAULT_MAX_WILDCARDS};

/// A message that exhausted its publish attempts.
///
/// `payload` holds the full wire message so a replay republishes exactly
/// what the original publisher sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: DeadLetterId,
    pub subject: Subject,
    pub payload: JsonValue,
    pub attempts: u32,
    pub first_failed_at: Timestamp,
    pub last_failed_at: Timestamp,
    pub last_error: String,
}

impl DeadLetterEntry {
    /// Creates an entry for a message whose first failure was at
    /// `first_failed_at` and whose final attempt failed just now.
    pub fn new(
        subject: Subject,
        payload: JsonValue,
        attempts: u32,
        first_failed_at: Timestamp,
        last_error: impl Into<String>,
    ) -> Self {
        Self {
            id: DeadLetterId::new(),
            subject,
            payload,
            attempts,
            first_failed_at,
            last_failed_at: Timestamp::now(),
            last_error: last_error.into(),
        }
    }

    /// Records one more failed attempt (used by replay).
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_failed_at = Timestamp::now();
        self.last_error = error.into();
    }
}

/// Selection criteria for listing dead letters.
///
/// The subject criterion is either an exact subject or a wildcard
/// subscription pattern; the time range applies to the last failure and is
/// inclusive at both ends.
#[derive(Debug, Clone, Default)]
pub struct DeadLetterFilter {
    subject: Option<SubjectFilter>,
    failed_after: Option<Timestamp>,
    failed_before: Option<Timestamp>,
    limit: Option<usize>,
}

impl DeadLetterFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to subjects selected by `pattern` (literal or wildcard).
    ///
    /// Operator inspection may use broad patterns, so the usual breadth
    /// limit is relaxed to any number of wildcards short of all of them.
    pub fn with_subject(
        mut self,
        pattern: &str,
    ) -> Result<Self, crate::domain::subject::SubjectError> {
        let max = pattern.split('.').count().max(DEFAULT_MAX_WILDCARDS);
        self.subject = Some(SubjectFilter::parse(pattern, max)?);
        Ok(self)
    }

    pub fn failed_after(mut self, at: Timestamp) -> Self {
        self.failed_after = Some(at);
        self
    }

    pub fn failed_before(mut self, at: Timestamp) -> Self {
        self.failed_before = Some(at);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn max_results(&self) -> Option<usize> {
        self.limit
    }

    /// Whether an entry satisfies every criterion.
    pub fn matches(&self, entry: &DeadLetterEntry) -> bool {
        if let Some(filter) = &self.subject {
            if !filter.matches(&entry.subject) {
                return false;
            }
        }
        if let Some(after) = &self.failed_after {
            if entry.last_failed_at.is_before(after) {
                return false;
            }
        }
        if let Some(before) = &self.failed_before {
            if entry.last_failed_at.is_after(before) {
                return false;
            }
        }
        true
    }

    /// Filters, sorts oldest-first by last failure and applies the limit.
    pub fn apply<I>(&self, entries: I) -> Vec<DeadLetterEntry>
    where
        I: IntoIterator<Item = DeadLetterEntry>,
    {
        let mut selected: Vec<DeadLetterEntry> =
            entries.into_iter().filter(|e| self.matches(e)).collect();
        selected.sort_by(|a, b| a.last_failed_at.cmp(&b.last_failed_at));
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}
