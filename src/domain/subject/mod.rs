//! Subject domain module.
//!
//! Hierarchical topic names used for broker routing: literal subjects,
//! named templates, wildcard subscription filters and the runtime registry
//! that validates them.

mod errors;
mod filter;
mod pattern;
mod registry;

pub use errors::SubjectError;
pub use filter::{SubjectFilter, DEFAULT_MAX_WILDCARDS};
pub use pattern::{is_valid_segment, Subject, SubjectPattern, MAX_SUBJECT_LEN};
pub use registry::{SubjectRegistry, DEFAULT_PATTERNS, DEFAULT_VALIDATION_CACHE_SIZE};
