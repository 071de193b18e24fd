//! Application layer - Connection management and operational services.
//!
//! - `connections` - The connection manager and its health sweep
//! - `dead_letters` - Dead letter inspection, replay and expiry
//! - `metrics` - Pollable metrics snapshot
//! - `background` - Periodic tasks and their shutdown

pub mod background;
pub mod connections;
pub mod dead_letters;
pub mod metrics;

pub use background::{BackgroundTasks, DeadLetterJanitor, HealthSweeper, ShutdownReport};
pub use connections::{
    ClosedConnection, ConnectionManager, ConnectionManagerConfig, ConnectionStats, SweepReport,
};
pub use dead_letters::{DeadLetterService, ReplayOutcome};
pub use metrics::{HealthStatus, MetricsSnapshot, RelayMetrics};
