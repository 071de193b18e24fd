//! Structured delivery outcomes.
//!
//! Partial failures are data, never errors: callers inspect the report and
//! decide whether to alert.

use serde::Serialize;
use std::collections::HashMap;

use crate::domain::foundation::{ConnectionId, IdentityId};

/// Outcome of `deliver` for one identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Number of sends attempted (live connections at fan-out time).
    pub attempted: usize,
    pub delivered_ids: Vec<ConnectionId>,
    pub failed_ids: Vec<ConnectionId>,
}

impl DeliveryReport {
    pub fn delivered(&self) -> usize {
        self.delivered_ids.len()
    }

    pub fn failed(&self) -> usize {
        self.failed_ids.len()
    }

    /// True when every attempted send succeeded (vacuously true for zero).
    pub fn is_complete(&self) -> bool {
        self.failed_ids.is_empty() && self.delivered_ids.len() == self.attempted
    }
}

/// Outcome of `broadcast` across many identities.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateDeliveryReport {
    pub reports: HashMap<IdentityId, DeliveryReport>,
}

impl AggregateDeliveryReport {
    pub fn insert(&mut self, identity: IdentityId, report: DeliveryReport) {
        self.reports.insert(identity, report);
    }

    pub fn get(&self, identity: &IdentityId) -> Option<&DeliveryReport> {
        self.reports.get(identity)
    }

    pub fn total_attempted(&self) -> usize {
        self.reports.values().map(|r| r.attempted).sum()
    }

    pub fn total_delivered(&self) -> usize {
        self.reports.values().map(DeliveryReport::delivered).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.reports.values().map(DeliveryReport::failed).sum()
    }

    /// Identities that had no live connection at fan-out time.
    pub fn unreachable(&self) -> Vec<&IdentityId> {
        self.reports
            .iter()
            .filter(|(_, r)| r.attempted == 0)
            .map(|(id, _)| id)
            .collect()
    }
}
