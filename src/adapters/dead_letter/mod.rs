//! Dead letter store adapters.
//!
//! - `InMemoryDeadLetterStore` - Process-local, lost on restart
//! - `FileDeadLetterStore` - One JSON document per entry on disk

mod file;
mod in_memory;

pub use file::FileDeadLetterStore;
pub use in_memory::InMemoryDeadLetterStore;
