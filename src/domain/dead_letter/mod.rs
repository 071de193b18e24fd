//! Dead letter domain module.
//!
//! Messages that exhausted retries are kept as [`DeadLetterEntry`] records
//! until an operator replays them or the retention policy expires them.

mod entry;

pub use entry::{DeadLetterEntry, DeadLetterFilter};
