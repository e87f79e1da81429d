//! Index metadata
//!
//! Per-field index flags and schemas, the metadata oracle the planner
//! consults, and declared index holes.

mod fields;
mod holes;
mod oracle;

pub use fields::{composite_field_name, FieldMetadata, FieldSchema, COMPOSITE_SEPARATOR};
pub use holes::{range_is_holed, IndexHole};
pub use oracle::{CachedOracle, MetadataOracle, StaticOracle};
