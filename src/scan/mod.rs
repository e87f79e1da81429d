//! Storage scan surface
//!
//! Key/record model for the sharded, sorted store, the [`ScanSource`]
//! trait the engine consumes, and an in-memory reference implementation.

mod errors;
mod key;
mod memory;
mod source;

pub use errors::{ScanError, ScanResult};
pub use key::{shard_date, Record, RecordKey, ShardRange};
pub use memory::MemoryScanSource;
pub use source::{
    AcceptAll, AuthorizationFilter, IndexCursor, RecordCursor, ScanEvent, ScanSource, TermBound,
};
