//! Domain layer containing the relay's value types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared primitives (IDs, timestamps, errors, event envelopes)
//! - `connection` - Connection records, liveness and delivery reports
//! - `subject` - Subject patterns, wildcard filters and the pattern registry
//! - `dead_letter` - Messages that exhausted their publish attempts

pub mod connection;
pub mod dead_letter;
pub mod foundation;
pub mod subject;
