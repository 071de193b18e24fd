//! Connection management.
//!
//! - `ConnectionManager` - Identity connection sets, fan-out, supersession
//! - `health` - Probe/idle sweep and dead connection cleanup
//! - `ClosedLog` - Bounded, expiring record of removed connections

mod closed_log;
mod health;
mod manager;

#[cfg(test)]
pub(crate) mod testing;

pub use closed_log::{ClosedConnection, ClosedLog};
pub use health::SweepReport;
pub use manager::{ConnectionManager, ConnectionManagerConfig, ConnectionStats};
