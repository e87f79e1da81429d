//! Plan rewriting
//!
//! Transforms the parsed query tree into one executable tree per shard
//! range. Rewriting is pure tree reconstruction; the input tree is never
//! mutated, so independent shard ranges can be planned concurrently.
//!
//! Passes, per shard range:
//!   1. boolean normalization (flatten, push negations to leaves)
//!   2. index-hole check (a holed range skips the index wholesale)
//!   3. composite-field folding
//!   4. per-leaf term expansion, splicing results back in place
//!   5. pruning of branches the index proved empty (a fully empty range
//!      is dropped from the plan without a scan)
//!   6. materialized-set builds for the expansion's requests
//!   7. executability gate, with a full-scan fallback when permitted
//!
//! A planning failure aborts the affected shard range only.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ast::{normalize, MarkerKind, QueryNode, SetRef};
use crate::context::{QueryContext, UidMode};
use crate::expand::{ExpandResult, TermExpander};
use crate::ivarator::{Ivarator, MaterializeRequest, MaterializedSet};
use crate::metadata::{range_is_holed, MetadataOracle};
use crate::observability::{Logger, MetricsRegistry};
use crate::scan::{ScanSource, ShardRange};

use super::composite::fold_composites;
use super::errors::{PlanResult, PlannerError};
use super::plan::{PlanFailure, PlanStats, QueryPlan, ShardQuery};
use super::pushdown::{classify, Executability};

/// Rewrites query trees into per-shard plans.
pub struct PlanRewriter<'a, S: ScanSource> {
    oracle: &'a dyn MetadataOracle,
    ctx: &'a QueryContext,
    source: &'a S,
    ivarator: &'a Ivarator<S>,
    metrics: &'a MetricsRegistry,
    logger: &'a Logger,
}

impl<'a, S: ScanSource> PlanRewriter<'a, S> {
    pub fn new(
        oracle: &'a dyn MetadataOracle,
        ctx: &'a QueryContext,
        source: &'a S,
        ivarator: &'a Ivarator<S>,
        metrics: &'a MetricsRegistry,
        logger: &'a Logger,
    ) -> Self {
        Self {
            oracle,
            ctx,
            source,
            ivarator,
            metrics,
            logger,
        }
    }

    /// Plans every shard range. Structural invalidity fails the whole
    /// query; anything else fails only the range it arose in.
    pub fn plan(&self, tree: &QueryNode, ranges: &[ShardRange]) -> QueryPlan {
        let mut plan = QueryPlan::default();

        if let Err(err) = tree.validate() {
            let error = PlannerError::plan_invalid(err.to_string());
            for range in ranges {
                plan.failures.push(PlanFailure {
                    range: range.clone(),
                    error: error.clone(),
                });
            }
            plan.stats.shards_failed = ranges.len();
            return plan;
        }

        let normalized = normalize(tree.clone());
        for range in ranges {
            match self.plan_shard(&normalized, range, &mut plan.stats) {
                Ok(Some(shard)) => {
                    plan.stats.shards_planned += 1;
                    accumulate_marker_stats(&shard, &mut plan.stats);
                    plan.shards.push(shard);
                }
                Ok(None) => {
                    plan.stats.shards_pruned += 1;
                }
                Err(error) => {
                    self.logger.warn(
                        "PLAN_SHARD_FAILED",
                        &[
                            ("range", format!("{}..{}", range.start, range.end)),
                            ("error", error.to_string()),
                        ],
                    );
                    plan.stats.shards_failed += 1;
                    plan.failures.push(PlanFailure {
                        range: range.clone(),
                        error,
                    });
                }
            }
        }

        self.logger.info(
            "PLAN_COMPLETE",
            &[
                ("query_id", self.ctx.query_id.to_string()),
                ("shards", plan.stats.shards_planned.to_string()),
                ("failed", plan.stats.shards_failed.to_string()),
            ],
        );
        plan
    }

    /// Plans one shard range. `Ok(None)` means the index proved the range
    /// holds no matches, so no execution unit is emitted for it.
    fn plan_shard(
        &self,
        tree: &QueryNode,
        range: &ShardRange,
        stats: &mut PlanStats,
    ) -> PlanResult<Option<ShardQuery>> {
        // A holed range cannot trust the index at all: the whole tree is
        // answered from raw records, and the hole itself authorizes the
        // scan.
        if range_is_holed(&self.ctx.index_holes, range, &self.ctx.datatype_filter) {
            self.metrics.incr_index_holes_applied();
            stats.index_holes_applied += 1;
            self.logger.info(
                "INDEX_HOLE_APPLIED",
                &[("range", format!("{}..{}", range.start, range.end))],
            );
            return Ok(Some(ShardQuery {
                range: range.clone(),
                tree: QueryNode::marker(MarkerKind::IndexHole, tree.clone()),
                sets: BTreeMap::new(),
            }));
        }

        let (tree, folds) = fold_composites(tree, self.oracle);
        for _ in 0..folds {
            self.metrics.incr_composites_folded();
        }
        stats.composites_folded += folds;

        let expander =
            TermExpander::new(self.oracle, self.ctx, self.source, self.metrics, self.logger);
        let mut requests: Vec<MaterializeRequest> = Vec::new();
        let expanded = self.expand_tree(&expander, &tree, range, &mut requests)?;
        let mut tree = prune_empty(&expanded);
        if is_empty_branch(&tree) {
            self.logger.info(
                "SHARD_PRUNED_EMPTY",
                &[("range", format!("{}..{}", range.start, range.end))],
            );
            return Ok(None);
        }

        let mut sets: BTreeMap<SetRef, Arc<MaterializedSet>> = BTreeMap::new();
        for request in requests {
            let set_ref = request.set_ref();
            if sets.contains_key(&set_ref) {
                continue;
            }
            match self.ivarator.build_or_reuse(&request) {
                Ok(mut set) => {
                    if self.ctx.uid_mode == UidMode::Sorted {
                        set.fill_sets()?;
                    }
                    stats.sets_materialized += 1;
                    sets.insert(set_ref, Arc::new(set));
                }
                Err(err) => {
                    tree = degrade_failed_set(&tree, &set_ref, self.oracle).ok_or_else(|| {
                        PlannerError::plan_invalid(format!(
                            "materialization of '{}' failed with no raw-record fallback: {}",
                            request.field, err
                        ))
                    })?;
                    self.logger.warn(
                        "MATERIALIZATION_DEGRADED",
                        &[
                            ("field", request.field.clone()),
                            ("error", err.to_string()),
                        ],
                    );
                }
            }
        }

        match classify(&tree, self.oracle) {
            Executability::Executable => {}
            Executability::Error => {
                return Err(PlannerError::plan_invalid("unanswerable branch in tree"));
            }
            _ if self.ctx.full_table_scan_allowed => {
                self.logger.warn(
                    "FULL_SCAN_FALLBACK",
                    &[("range", format!("{}..{}", range.start, range.end))],
                );
                tree = QueryNode::marker(MarkerKind::EvaluationOnly, tree);
            }
            state => {
                return Err(PlannerError::full_table_scan(format!(
                    "branch classified {:?} requires an unconstrained shard scan",
                    state
                )));
            }
        }

        Ok(Some(ShardQuery {
            range: range.clone(),
            tree,
            sets,
        }))
    }

    /// Post-order expansion walk. Leaves are replaced by the expander's
    /// result; junctions and negations are rebuilt around their rewritten
    /// children; pre-existing markers pass through untouched.
    fn expand_tree(
        &self,
        expander: &TermExpander<'a, S>,
        node: &QueryNode,
        range: &ShardRange,
        requests: &mut Vec<MaterializeRequest>,
    ) -> ExpandResult<QueryNode> {
        match node {
            QueryNode::And(children) => {
                let rewritten = children
                    .iter()
                    .map(|c| self.expand_tree(expander, c, range, requests))
                    .collect::<ExpandResult<Vec<_>>>()?;
                Ok(QueryNode::And(rewritten))
            }
            QueryNode::Or(children) => {
                let rewritten = children
                    .iter()
                    .map(|c| self.expand_tree(expander, c, range, requests))
                    .collect::<ExpandResult<Vec<_>>>()?;
                Ok(QueryNode::Or(rewritten))
            }
            QueryNode::Not(child) => {
                let rewritten = self.expand_tree(expander, child, range, requests)?;
                Ok(QueryNode::not(rewritten))
            }
            QueryNode::Marker { .. } => Ok(node.clone()),
            leaf => {
                let expansion = expander.expand_leaf(leaf, range)?;
                requests.extend(expansion.requests);
                Ok(expansion.node)
            }
        }
    }
}

fn is_empty_branch(node: &QueryNode) -> bool {
    matches!(
        node,
        QueryNode::Marker {
            kind: MarkerKind::EmptyIndex,
            ..
        }
    )
}

/// Drops branches the index proved empty. An empty disjunct vanishes from
/// its Or; an empty conjunct empties its And. Negated empties stay in
/// place for the evaluator, which answers them as matching every record.
fn prune_empty(node: &QueryNode) -> QueryNode {
    match node {
        QueryNode::And(children) => {
            let pruned: Vec<QueryNode> = children.iter().map(prune_empty).collect();
            if let Some(empty) = pruned.iter().find(|c| is_empty_branch(c)) {
                return empty.clone();
            }
            QueryNode::And(pruned)
        }
        QueryNode::Or(children) => {
            let mut live: Vec<QueryNode> = Vec::new();
            let mut empty: Option<QueryNode> = None;
            for child in children {
                let child = prune_empty(child);
                if is_empty_branch(&child) {
                    empty = Some(child);
                } else {
                    live.push(child);
                }
            }
            if live.is_empty() {
                if let Some(empty) = empty {
                    return empty;
                }
            }
            if live.len() == 1 {
                return live.remove(0);
            }
            QueryNode::Or(live)
        }
        QueryNode::Not(child) => QueryNode::not(prune_empty(child)),
        other => other.clone(),
    }
}

/// Rewrites markers referencing a failed set to deferred evaluation.
/// Returns `None` when the wrapped predicate cannot be answered from raw
/// records (index-only field), which escalates the failure.
fn degrade_failed_set(
    node: &QueryNode,
    failed: &SetRef,
    oracle: &dyn MetadataOracle,
) -> Option<QueryNode> {
    match node {
        QueryNode::Marker {
            kind: MarkerKind::ExceededValue { set: Some(r) },
            source,
        } if r == failed => {
            let index_only = source
                .leaf_field()
                .and_then(|f| f.name())
                .and_then(|n| oracle.lookup(n))
                .map_or(false, |m| m.index_only);
            if index_only {
                None
            } else {
                Some(QueryNode::marker(MarkerKind::Delayed, (**source).clone()))
            }
        }
        QueryNode::Marker {
            kind: MarkerKind::ExceededOr { sets },
            source,
        } if sets.contains(failed) => {
            // The union's other sets are dropped with it; raw evaluation
            // of the wrapped any-field predicate answers the whole union.
            Some(QueryNode::marker(
                MarkerKind::ExceededTerm,
                (**source).clone(),
            ))
        }
        QueryNode::And(children) => children
            .iter()
            .map(|c| degrade_failed_set(c, failed, oracle))
            .collect::<Option<Vec<_>>>()
            .map(QueryNode::And),
        QueryNode::Or(children) => children
            .iter()
            .map(|c| degrade_failed_set(c, failed, oracle))
            .collect::<Option<Vec<_>>>()
            .map(QueryNode::Or),
        QueryNode::Not(child) => {
            degrade_failed_set(child, failed, oracle).map(QueryNode::not)
        }
        other => Some(other.clone()),
    }
}

fn accumulate_marker_stats(shard: &ShardQuery, stats: &mut PlanStats) {
    stats.value_threshold_markers += shard
        .tree
        .count_markers(&|k| matches!(k, MarkerKind::ExceededValue { .. }));
    stats.or_threshold_markers += shard
        .tree
        .count_markers(&|k| matches!(k, MarkerKind::ExceededOr { .. }));
    stats.term_threshold_markers += shard
        .tree
        .count_markers(&|k| matches!(k, MarkerKind::ExceededTerm));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn empty(node: QueryNode) -> QueryNode {
        QueryNode::marker(MarkerKind::EmptyIndex, node)
    }

    #[test]
    fn test_prune_drops_empty_disjuncts() {
        let keep = QueryNode::eq("CITY", json!("rome"));
        let tree = QueryNode::or(vec![keep.clone(), empty(QueryNode::regex("CITY", "zzz.*"))]);
        assert_eq!(prune_empty(&tree), keep);

        let all_empty = QueryNode::or(vec![
            empty(QueryNode::regex("CITY", "zzz.*")),
            empty(QueryNode::regex("CODE", "zzz.*")),
        ]);
        assert!(is_empty_branch(&prune_empty(&all_empty)));
    }

    #[test]
    fn test_prune_empties_conjunctions() {
        let tree = QueryNode::and(vec![
            QueryNode::eq("CITY", json!("rome")),
            empty(QueryNode::regex("CODE", "zzz.*")),
        ]);
        assert!(is_empty_branch(&prune_empty(&tree)));
    }

    #[test]
    fn test_prune_keeps_negated_empties() {
        let tree = QueryNode::not(empty(QueryNode::regex("CITY", "zzz.*")));
        let pruned = prune_empty(&tree);
        assert!(matches!(pruned, QueryNode::Not(_)));
    }
}
