//! Evaluation pipeline errors

use thiserror::Error;

use crate::ast::SetRef;
use crate::scan::{RecordKey, ScanError};

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors surfaced while evaluating a plan. None of these are swallowed;
/// a failed shard range reports its error in the pipeline summary.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A scan resumed at or before the last returned key. Always a
    /// defect in the scan source, never masked.
    #[error("Ordering violation: got {got} after {last}")]
    OrderingViolation { last: RecordKey, got: RecordKey },

    /// The tree references a materialized set the plan does not carry.
    #[error("Materialized set {0} missing from plan")]
    SetMissing(SetRef),

    /// A function node with no handler installed.
    #[error("No handler for function '{0}'")]
    UnsupportedFunction(String),

    /// A regex leaf carried a pattern the engine cannot compile.
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Scan failed: {0}")]
    Scan(#[from] ScanError),
}
