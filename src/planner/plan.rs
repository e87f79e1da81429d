//! Finalized query plans
//!
//! One execution unit per shard range, each carrying its rewritten tree
//! and the materialized sets the tree's markers reference. Plans are
//! built once and consumed read-only by the evaluation pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ast::{MarkerKind, QueryNode, SetRef};
use crate::ivarator::MaterializedSet;
use crate::scan::ShardRange;

use super::errors::PlannerError;

/// Execution unit for a single shard range.
#[derive(Debug, Clone)]
pub struct ShardQuery {
    pub range: ShardRange,
    pub tree: QueryNode,
    /// Sets referenced by the tree's materialized markers.
    pub sets: BTreeMap<SetRef, Arc<MaterializedSet>>,
}

impl ShardQuery {
    /// Count of markers in the tree satisfying `pred`; used by threshold
    /// regression tests.
    pub fn marker_count(&self, pred: impl Fn(&MarkerKind) -> bool) -> usize {
        self.tree.count_markers(&pred)
    }
}

/// A shard range planning ended in error for. Other ranges proceed
/// independently.
#[derive(Debug, Clone)]
pub struct PlanFailure {
    pub range: ShardRange,
    pub error: PlannerError,
}

/// Counters accumulated across one plan() call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanStats {
    pub shards_planned: usize,
    pub shards_failed: usize,
    /// Ranges the index proved empty; they carry no execution unit.
    pub shards_pruned: usize,
    pub value_threshold_markers: usize,
    pub or_threshold_markers: usize,
    pub term_threshold_markers: usize,
    pub index_holes_applied: usize,
    pub composites_folded: usize,
    pub sets_materialized: usize,
}

/// The finalized plan: per-shard execution units plus per-shard failures.
#[derive(Debug, Clone, Default)]
pub struct QueryPlan {
    pub shards: Vec<ShardQuery>,
    pub failures: Vec<PlanFailure>,
    pub stats: PlanStats,
}

impl QueryPlan {
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Total markers matching `pred` across every planned shard.
    pub fn marker_count(&self, pred: impl Fn(&MarkerKind) -> bool) -> usize {
        self.shards
            .iter()
            .map(|s| s.tree.count_markers(&pred))
            .sum()
    }
}
