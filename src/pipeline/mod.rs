//! Concurrent, resumable plan evaluation
//!
//! Drives finalized plans against the scan source: bounded evaluation
//! workers, per-record boolean evaluation, cooperative yielding with
//! strictly-after resumption, and clean cancellation.

mod cursor;
mod errors;
mod evaluator;
mod workers;

pub use cursor::{CancelToken, ShardDriver, ShardReport, ShardState};
pub use errors::{PipelineError, PipelineResult};
pub use evaluator::{Evaluator, FunctionHandler};
pub use workers::{
    CollectingSink, EvaluationPipeline, PipelineSummary, ResultSink, ShardResult,
};
