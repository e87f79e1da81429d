//! Query planning
//!
//! Rewrites a parsed query tree into one executable plan per shard
//! range: boolean normalization, composite folding, per-leaf expansion,
//! materialized-set resolution, and the full-scan gate.

mod composite;
mod errors;
mod plan;
mod pushdown;
mod rewriter;

pub use composite::fold_composites;
pub use errors::{PlanResult, PlannerError, PlannerErrorCode, Severity};
pub use plan::{PlanFailure, PlanStats, QueryPlan, ShardQuery};
pub use pushdown::{classify, Executability};
pub use rewriter::PlanRewriter;
