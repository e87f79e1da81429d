//! Disk-backed materialized candidate sets
//!
//! When an expansion would overrun its in-memory threshold, the matching
//! record keys are scanned out of the index and spilled to sorted runs on
//! disk. A set directory is complete only once its marker file exists;
//! everything else in this module is built around that single bit.

mod builder;
mod errors;
mod pool;
mod run;
mod set;

pub use builder::{Ivarator, IvaratorConfig, MaterializeRequest, RebuildPolicy};
pub use errors::{MaterializeError, MaterializeResult};
pub use pool::{PooledSource, ScanSourcePool};
pub use run::{RunReader, RunWriter};
pub use set::{is_complete, run_files, MaterializedSet, MergedIter, COMPLETE_MARKER, MERGED_RUN};
