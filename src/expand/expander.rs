//! Per-leaf term expansion
//!
//! Turns one leaf predicate into an enumerated index subtree, a deferred
//! marker, or a materialization request, guided by the metadata oracle's
//! cardinality estimates and the per-query thresholds. The expander never
//! touches disk itself; materialization requests are handed back to the
//! caller, which resolves them and registers the resulting sets.
//!
//! Negated leaves go through the positive form of the same paths. The
//! complement of a negation is never enumerated or materialized; the
//! positive expansion is wrapped in `Not` instead.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::ast::{literal_to_index_string, FieldRef, MarkerKind, QueryNode};
use crate::context::QueryContext;
use crate::ivarator::MaterializeRequest;
use crate::metadata::{FieldMetadata, MetadataOracle};
use crate::observability::{Logger, MetricsRegistry};
use crate::scan::{ScanSource, ShardRange, TermBound};

use super::errors::{ExpandError, ExpandResult};

/// Result of expanding one leaf: the replacement subtree plus any
/// materialization requests its markers reference. Request order matches
/// the order of `SetRef`s inside the subtree's markers.
#[derive(Debug)]
pub struct Expansion {
    pub node: QueryNode,
    pub requests: Vec<MaterializeRequest>,
}

impl Expansion {
    fn unchanged(node: QueryNode) -> Self {
        Self {
            node,
            requests: Vec::new(),
        }
    }

    fn deferred(kind: MarkerKind, source: QueryNode) -> Self {
        Self {
            node: QueryNode::marker(kind, source),
            requests: Vec::new(),
        }
    }
}

/// Expands leaves for one shard range.
pub struct TermExpander<'a, S> {
    oracle: &'a dyn MetadataOracle,
    ctx: &'a QueryContext,
    source: &'a S,
    metrics: &'a MetricsRegistry,
    logger: &'a Logger,
}

impl<'a, S: ScanSource> TermExpander<'a, S> {
    pub fn new(
        oracle: &'a dyn MetadataOracle,
        ctx: &'a QueryContext,
        source: &'a S,
        metrics: &'a MetricsRegistry,
        logger: &'a Logger,
    ) -> Self {
        Self {
            oracle,
            ctx,
            source,
            metrics,
            logger,
        }
    }

    /// Expands a single leaf predicate. Junctions, negations, and markers
    /// are the rewriter's business and pass through unchanged.
    pub fn expand_leaf(&self, leaf: &QueryNode, range: &ShardRange) -> ExpandResult<Expansion> {
        match leaf {
            QueryNode::Eq { field, value } => self.expand_eq(field, value, range, false),
            QueryNode::Ne { field, value } => self.expand_eq(field, value, range, true),
            QueryNode::Regex { field, pattern } => {
                self.expand_matching(leaf, field, TermBound::Pattern(pattern.clone()), range, false)
            }
            QueryNode::NotRegex { field, pattern } => {
                self.expand_matching(leaf, field, TermBound::Pattern(pattern.clone()), range, true)
            }
            QueryNode::Range {
                field,
                lower,
                upper,
                lower_inclusive,
                upper_inclusive,
            } => {
                let bound = TermBound::Range {
                    lower: literal_to_index_string(lower),
                    upper: literal_to_index_string(upper),
                    lower_inclusive: *lower_inclusive,
                    upper_inclusive: *upper_inclusive,
                };
                self.expand_matching(leaf, field, bound, range, false)
            }
            QueryNode::Function { .. } => {
                // Opaque to the index; always a per-record check.
                Ok(Expansion::deferred(MarkerKind::Delayed, leaf.clone()))
            }
            other => Ok(Expansion::unchanged(other.clone())),
        }
    }

    /// Equality and its negation. A plain equality over an indexed,
    /// record-carried field needs no expansion at all.
    fn expand_eq(
        &self,
        field: &FieldRef,
        value: &Value,
        range: &ShardRange,
        negated: bool,
    ) -> ExpandResult<Expansion> {
        let rebuild = |f: &FieldRef| QueryNode::Eq {
            field: f.clone(),
            value: value.clone(),
        };
        let positive = rebuild(field);
        let original = if negated {
            QueryNode::Ne {
                field: field.clone(),
                value: value.clone(),
            }
        } else {
            positive.clone()
        };

        let name = match field.name() {
            Some(name) => name,
            None => {
                // Any-field equality expands like a pattern: one branch per
                // concrete indexed field carrying the value.
                let bound = TermBound::Value(literal_to_index_string(value));
                return self.expand_any_field(&positive, bound, range, negated);
            }
        };

        let meta = self.oracle.lookup(name);
        if !meta.as_ref().map_or(false, |m| m.index_only) {
            // The value lives on the record, so the evaluator can answer
            // the predicate directly; negations defer the same way.
            return if negated {
                Ok(Expansion::deferred(MarkerKind::Delayed, original))
            } else {
                Ok(Expansion::unchanged(original))
            };
        }

        // Index-only fields are absent from raw records; the predicate is
        // answered through a materialized set or not at all.
        if !self.ctx.materialization_enabled() {
            return Err(ExpandError::FatalPlanning {
                reason: format!(
                    "field {} is index-only and no materialization cache is configured",
                    name
                ),
            });
        }
        let request =
            MaterializeRequest::new(name, TermBound::Value(literal_to_index_string(value)), range.clone());
        let marker = QueryNode::marker(
            MarkerKind::ExceededValue {
                set: Some(request.set_ref()),
            },
            positive,
        );
        let node = if negated { QueryNode::not(marker) } else { marker };
        Ok(Expansion {
            node,
            requests: vec![request],
        })
    }

    /// Ranges and regexes: enumerate against the index when the value
    /// count stays under threshold, otherwise materialize or degrade.
    fn expand_matching(
        &self,
        leaf: &QueryNode,
        field: &FieldRef,
        bound: TermBound,
        range: &ShardRange,
        negated: bool,
    ) -> ExpandResult<Expansion> {
        let positive = positive_form(leaf);
        let name = match field.name() {
            Some(name) => name,
            None => return self.expand_any_field(&positive, bound, range, negated),
        };

        let meta = self.oracle.lookup(name);
        let indexed = meta.as_ref().map_or(false, |m| m.indexed);
        if !indexed {
            return Ok(wrap_negated(
                Expansion::deferred(MarkerKind::Delayed, positive),
                negated,
            ));
        }

        let limit = self.leaf_limit(&bound);
        match self.enumerate_field(name, &bound, range, limit, meta.as_ref())? {
            FieldExpansion::Enumerated(values) => {
                self.metrics.incr_terms_expanded();
                let node = or_of_values(name, &values, &positive);
                Ok(wrap_negated(
                    Expansion {
                        node,
                        requests: Vec::new(),
                    },
                    negated,
                ))
            }
            FieldExpansion::Materialize(request) => {
                self.metrics.incr_value_threshold_markers();
                self.logger.trace(
                    "EXPAND_MATERIALIZE",
                    &[("field", name.to_string()), ("bound", bound.describe())],
                );
                let marker = QueryNode::marker(
                    MarkerKind::ExceededValue {
                        set: Some(request.set_ref()),
                    },
                    positive,
                );
                Ok(wrap_negated(
                    Expansion {
                        node: marker,
                        requests: vec![request],
                    },
                    negated,
                ))
            }
            FieldExpansion::Degrade => {
                self.metrics.incr_value_threshold_markers();
                Ok(wrap_negated(
                    Expansion::deferred(MarkerKind::ExceededValue { set: None }, positive),
                    negated,
                ))
            }
        }
    }

    /// Any-field expansion: one branch per concrete indexed field, each
    /// field's value count measured independently against the thresholds.
    fn expand_any_field(
        &self,
        positive: &QueryNode,
        bound: TermBound,
        range: &ShardRange,
        negated: bool,
    ) -> ExpandResult<Expansion> {
        let fields = self.oracle.indexed_fields();
        if fields.is_empty() {
            // Nothing to expand against; the evaluator walks every record
            // field instead.
            return Ok(wrap_negated(
                Expansion::deferred(MarkerKind::Delayed, positive.clone()),
                negated,
            ));
        }

        let limit = self.leaf_limit(&bound);
        let mut branches: Vec<QueryNode> = Vec::new();
        let mut overflowed: Vec<(String, MaterializeRequest)> = Vec::new();
        let mut branch_count = 0usize;

        for name in &fields {
            let meta = self.oracle.lookup(name);
            if meta.as_ref().map_or(false, |m| m.index_only) {
                // An index-only member cannot enumerate into record-evaluated
                // nodes. A member the index holds nothing for drops out of
                // the union; one that matches needs a materialized set, and
                // without a cache the whole union degrades to raw evaluation.
                if !self.index_has_entries(name, &bound, range)? {
                    continue;
                }
                if self.ctx.materialization_enabled() {
                    overflowed.push((
                        name.clone(),
                        MaterializeRequest::new(name.clone(), bound.clone(), range.clone()),
                    ));
                } else {
                    self.metrics.incr_term_threshold_markers();
                    return Ok(wrap_negated(
                        Expansion::deferred(MarkerKind::ExceededTerm, positive.clone()),
                        negated,
                    ));
                }
                continue;
            }
            match self.enumerate_field(name, &bound, range, limit, meta.as_ref())? {
                FieldExpansion::Enumerated(values) => {
                    if values.is_empty() {
                        continue;
                    }
                    branch_count += values.len();
                    branches.push(or_of_values(name, &values, positive));
                }
                FieldExpansion::Materialize(request) => {
                    overflowed.push((name.clone(), request));
                }
                FieldExpansion::Degrade => {
                    // One field past threshold with no cache configured
                    // abandons the whole union; raw evaluation settles it.
                    self.metrics.incr_term_threshold_markers();
                    return Ok(wrap_negated(
                        Expansion::deferred(MarkerKind::ExceededTerm, positive.clone()),
                        negated,
                    ));
                }
            }
        }

        if branches.is_empty() && overflowed.is_empty() {
            // No indexed field carries a matching value in this range; the
            // union is empty, and raw evaluation settles whatever the index
            // cannot see.
            return Ok(wrap_negated(
                Expansion::deferred(MarkerKind::Delayed, positive.clone()),
                negated,
            ));
        }

        let t = &self.ctx.thresholds;
        if overflowed.is_empty() && branch_count <= t.max_or_expansion {
            self.metrics.incr_terms_expanded();
            let node = if branches.len() == 1 {
                branches.pop().unwrap()
            } else {
                QueryNode::or(branches)
            };
            return Ok(wrap_negated(
                Expansion {
                    node,
                    requests: Vec::new(),
                },
                negated,
            ));
        }

        if branch_count > t.max_or_expansion_fst || !self.ctx.materialization_enabled() {
            // Past the second ceiling even sets are off the table; the
            // union is abandoned wholesale.
            self.metrics.incr_term_threshold_markers();
            return Ok(wrap_negated(
                Expansion::deferred(MarkerKind::ExceededTerm, positive.clone()),
                negated,
            ));
        }

        // Union too wide to enumerate: every touched field gets its own
        // materialized set, enumerated branches included.
        self.metrics.incr_or_threshold_markers();
        let mut requests: Vec<MaterializeRequest> = Vec::new();
        let mut sets = Vec::new();
        for name in &fields {
            let touched = overflowed.iter().any(|(f, _)| f == name)
                || branches_touch_field(&branches, name);
            if !touched {
                continue;
            }
            let request = MaterializeRequest::new(name.clone(), bound.clone(), range.clone());
            sets.push(request.set_ref());
            requests.push(request);
        }
        let marker = QueryNode::marker(MarkerKind::ExceededOr { sets }, positive.clone());
        Ok(wrap_negated(
            Expansion {
                node: marker,
                requests,
            },
            negated,
        ))
    }

    /// Scans the index for one field's matching values, giving up as soon
    /// as the count passes `limit`.
    fn enumerate_field(
        &self,
        field: &str,
        bound: &TermBound,
        range: &ShardRange,
        limit: usize,
        meta: Option<&FieldMetadata>,
    ) -> ExpandResult<FieldExpansion> {
        let index_only = meta.map_or(false, |m| m.index_only);
        if index_only {
            // Index-only fields never enumerate into record-evaluated
            // equality nodes.
            return self.overflow(field, bound, range, index_only);
        }

        // A leading-wildcard pattern cannot walk the forward index; it
        // needs the reverse index (reversed values) or a set.
        if let TermBound::Pattern(p) = bound {
            if leading_wildcard(p) && !meta.map_or(false, |m| m.reverse_indexed) {
                return self.overflow(field, bound, range, index_only);
            }
        }

        // Cheap reject before touching the index.
        if self.oracle.estimate_cardinality(field, bound) as usize > limit {
            return self.overflow(field, bound, range, index_only);
        }

        let mut cursor = self.source.seek_index(field, bound, range)?;
        let mut values: BTreeSet<String> = BTreeSet::new();
        while let Some((value, _key)) = cursor.next_entry()? {
            values.insert(value);
            if values.len() > limit {
                return self.overflow(field, bound, range, index_only);
            }
        }
        Ok(FieldExpansion::Enumerated(values))
    }

    /// True when the index holds at least one matching entry for the field
    /// in this range.
    fn index_has_entries(
        &self,
        field: &str,
        bound: &TermBound,
        range: &ShardRange,
    ) -> ExpandResult<bool> {
        let mut cursor = self.source.seek_index(field, bound, range)?;
        Ok(cursor.next_entry()?.is_some())
    }

    fn overflow(
        &self,
        field: &str,
        bound: &TermBound,
        range: &ShardRange,
        index_only: bool,
    ) -> ExpandResult<FieldExpansion> {
        if self.ctx.materialization_enabled() {
            return Ok(FieldExpansion::Materialize(MaterializeRequest::new(
                field,
                bound.clone(),
                range.clone(),
            )));
        }
        if index_only {
            // No raw-record fallback exists for an index-only field.
            return Err(ExpandError::ThresholdExceeded {
                field: field.to_string(),
                limit: self.leaf_limit(bound),
            });
        }
        Ok(FieldExpansion::Degrade)
    }

    fn leaf_limit(&self, bound: &TermBound) -> usize {
        let t = &self.ctx.thresholds;
        match bound {
            TermBound::Range { .. } => t.max_range_expansion,
            TermBound::Value(_) | TermBound::Pattern(_) => t.max_value_expansion,
        }
    }
}

enum FieldExpansion {
    Enumerated(BTreeSet<String>),
    Materialize(MaterializeRequest),
    Degrade,
}

/// True when the pattern's first element is a wildcard, so no forward
/// index prefix exists to anchor the scan.
fn leading_wildcard(pattern: &str) -> bool {
    pattern.starts_with(".*") || pattern.starts_with(".+")
}

/// The positive form of a possibly-negated leaf.
fn positive_form(leaf: &QueryNode) -> QueryNode {
    match leaf {
        QueryNode::Ne { field, value } => QueryNode::Eq {
            field: field.clone(),
            value: value.clone(),
        },
        QueryNode::NotRegex { field, pattern } => QueryNode::Regex {
            field: field.clone(),
            pattern: pattern.clone(),
        },
        other => other.clone(),
    }
}

fn wrap_negated(expansion: Expansion, negated: bool) -> Expansion {
    if negated {
        Expansion {
            node: QueryNode::not(expansion.node),
            requests: expansion.requests,
        }
    } else {
        expansion
    }
}

/// An Or of equality nodes, one per enumerated index value. Outside
/// declared holes the index is authoritative for an indexed field, so an
/// empty enumeration resolves to an empty-index marker: the branch
/// matches nothing, and no scan is needed to prove it.
fn or_of_values(field: &str, values: &BTreeSet<String>, positive: &QueryNode) -> QueryNode {
    if values.is_empty() {
        return QueryNode::marker(MarkerKind::EmptyIndex, positive.clone());
    }
    let mut eqs: Vec<QueryNode> = values
        .iter()
        .map(|v| QueryNode::eq(field, Value::String(v.clone())))
        .collect();
    if eqs.len() == 1 {
        eqs.pop().unwrap()
    } else {
        QueryNode::or(eqs)
    }
}

fn branches_touch_field(branches: &[QueryNode], field: &str) -> bool {
    branches.iter().any(|b| subtree_touches_field(b, field))
}

fn subtree_touches_field(node: &QueryNode, field: &str) -> bool {
    match node {
        QueryNode::And(children) | QueryNode::Or(children) => {
            children.iter().any(|c| subtree_touches_field(c, field))
        }
        QueryNode::Not(child) => subtree_touches_field(child, field),
        QueryNode::Marker { source, .. } => subtree_touches_field(source, field),
        other => other
            .leaf_field()
            .and_then(FieldRef::name)
            .map_or(false, |n| n == field),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::ExpansionThresholds;
    use crate::metadata::{FieldMetadata, FieldSchema, StaticOracle};
    use crate::scan::{MemoryScanSource, Record, RecordKey};
    use serde_json::json;

    fn schema() -> FieldSchema {
        FieldSchema::new()
            .with_field("CITY", FieldMetadata::indexed_field())
            .with_field("CODE", FieldMetadata::indexed_field())
            .with_field("NOTE", FieldMetadata::unindexed_field())
            .with_field("GEO", FieldMetadata::indexed_field().with_index_only())
    }

    fn source() -> MemoryScanSource {
        let mut src = MemoryScanSource::new();
        for (i, city) in ["rome", "rennes", "r-star", "oslo"].iter().enumerate() {
            src.load(
                Record::new(RecordKey::new("20240301_0", "d1", format!("u{}", i)))
                    .with_field("CITY", json!(*city))
                    .with_field("CODE", json!("fra")),
                &schema(),
            );
        }
        src
    }

    fn expander<'a>(
        oracle: &'a StaticOracle,
        ctx: &'a QueryContext,
        src: &'a MemoryScanSource,
        metrics: &'a MetricsRegistry,
        logger: &'a Logger,
    ) -> TermExpander<'a, MemoryScanSource> {
        TermExpander::new(oracle, ctx, src, metrics, logger)
    }

    fn fixtures() -> (StaticOracle, MetricsRegistry, Logger, MemoryScanSource) {
        (
            StaticOracle::new(schema()),
            MetricsRegistry::new(),
            Logger::disabled(),
            source(),
        )
    }

    #[test]
    fn test_regex_enumerates_under_threshold() {
        let (oracle, metrics, logger, src) = fixtures();
        let ctx = QueryContext::new().with_thresholds(ExpansionThresholds::unlimited());
        let ex = expander(&oracle, &ctx, &src, &metrics, &logger);

        let out = ex
            .expand_leaf(
                &QueryNode::regex("CITY", "r.*"),
                &ShardRange::single("20240301_0"),
            )
            .unwrap();
        match out.node {
            QueryNode::Or(children) => assert_eq!(children.len(), 3),
            other => panic!("expected enumerated Or, got {:?}", other),
        }
        assert!(out.requests.is_empty());
    }

    #[test]
    fn test_empty_enumeration_resolves_to_empty_index() {
        let (oracle, metrics, logger, src) = fixtures();
        let ctx = QueryContext::new().with_thresholds(ExpansionThresholds::unlimited());
        let ex = expander(&oracle, &ctx, &src, &metrics, &logger);

        // No indexed value matches; the index settles the branch as empty
        // instead of deferring to a scan.
        let out = ex
            .expand_leaf(
                &QueryNode::regex("CITY", "zzz.*"),
                &ShardRange::single("20240301_0"),
            )
            .unwrap();
        match &out.node {
            QueryNode::Marker { kind, .. } => assert_eq!(*kind, MarkerKind::EmptyIndex),
            other => panic!("expected empty-index marker, got {:?}", other),
        }
    }

    #[test]
    fn test_regex_degrades_without_cache() {
        let (oracle, metrics, logger, src) = fixtures();
        let ctx = QueryContext::new().with_thresholds(ExpansionThresholds::uniform(1));
        let ex = expander(&oracle, &ctx, &src, &metrics, &logger);

        let out = ex
            .expand_leaf(
                &QueryNode::regex("CITY", "r.*"),
                &ShardRange::single("20240301_0"),
            )
            .unwrap();
        match &out.node {
            QueryNode::Marker { kind, .. } => {
                assert_eq!(*kind, MarkerKind::ExceededValue { set: None })
            }
            other => panic!("expected threshold marker, got {:?}", other),
        }
        assert_eq!(metrics.snapshot().value_threshold_markers, 1);
    }

    #[test]
    fn test_regex_materializes_with_cache() {
        let (oracle, metrics, logger, src) = fixtures();
        let ctx = QueryContext::new()
            .with_thresholds(ExpansionThresholds::uniform(1))
            .with_ivarator_cache_dir("/tmp/unused");
        let ex = expander(&oracle, &ctx, &src, &metrics, &logger);

        let out = ex
            .expand_leaf(
                &QueryNode::regex("CITY", "r.*"),
                &ShardRange::single("20240301_0"),
            )
            .unwrap();
        assert_eq!(out.requests.len(), 1);
        match &out.node {
            QueryNode::Marker { kind, .. } => assert!(kind.is_materialized()),
            other => panic!("expected materialized marker, got {:?}", other),
        }
    }

    #[test]
    fn test_leading_wildcard_needs_reverse_index() {
        let (oracle, metrics, logger, src) = fixtures();
        let ctx = QueryContext::new().with_thresholds(ExpansionThresholds::unlimited());
        let ex = expander(&oracle, &ctx, &src, &metrics, &logger);

        // CITY carries no reverse index: the pattern degrades even though
        // the value count is tiny.
        let out = ex
            .expand_leaf(
                &QueryNode::regex("CITY", ".*me"),
                &ShardRange::single("20240301_0"),
            )
            .unwrap();
        match &out.node {
            QueryNode::Marker { kind, .. } => {
                assert_eq!(*kind, MarkerKind::ExceededValue { set: None })
            }
            other => panic!("expected degraded marker, got {:?}", other),
        }

        // With the reverse index declared the same pattern enumerates.
        let reversed = StaticOracle::new(
            schema().with_field(
                "CITY",
                FieldMetadata::indexed_field().with_reverse_index(),
            ),
        );
        let ex = expander(&reversed, &ctx, &src, &metrics, &logger);
        let out = ex
            .expand_leaf(
                &QueryNode::regex("CITY", ".*me"),
                &ShardRange::single("20240301_0"),
            )
            .unwrap();
        assert_eq!(out.node, QueryNode::eq("CITY", json!("rome")));
    }

    #[test]
    fn test_unindexed_field_defers() {
        let (oracle, metrics, logger, src) = fixtures();
        let ctx = QueryContext::new();
        let ex = expander(&oracle, &ctx, &src, &metrics, &logger);

        let out = ex
            .expand_leaf(
                &QueryNode::regex("NOTE", "x.*"),
                &ShardRange::single("20240301_0"),
            )
            .unwrap();
        match &out.node {
            QueryNode::Marker { kind, .. } => assert_eq!(*kind, MarkerKind::Delayed),
            other => panic!("expected delayed marker, got {:?}", other),
        }
    }

    #[test]
    fn test_negated_regex_wraps_positive_expansion() {
        let (oracle, metrics, logger, src) = fixtures();
        let ctx = QueryContext::new().with_thresholds(ExpansionThresholds::unlimited());
        let ex = expander(&oracle, &ctx, &src, &metrics, &logger);

        let out = ex
            .expand_leaf(
                &QueryNode::not_regex("CITY", "r.*"),
                &ShardRange::single("20240301_0"),
            )
            .unwrap();
        match out.node {
            QueryNode::Not(inner) => match *inner {
                QueryNode::Or(children) => assert_eq!(children.len(), 3),
                other => panic!("expected positive enumeration under Not, got {:?}", other),
            },
            other => panic!("expected Not wrapper, got {:?}", other),
        }
    }

    #[test]
    fn test_index_only_equality_requires_cache() {
        let (oracle, metrics, logger, src) = fixtures();
        let ctx = QueryContext::new();
        let ex = expander(&oracle, &ctx, &src, &metrics, &logger);

        let err = ex
            .expand_leaf(
                &QueryNode::eq("GEO", json!("zone-4")),
                &ShardRange::single("20240301_0"),
            )
            .unwrap_err();
        assert!(matches!(err, ExpandError::FatalPlanning { .. }));
    }

    #[test]
    fn test_index_only_equality_materializes() {
        let (oracle, metrics, logger, src) = fixtures();
        let ctx = QueryContext::new().with_ivarator_cache_dir("/tmp/unused");
        let ex = expander(&oracle, &ctx, &src, &metrics, &logger);

        let out = ex
            .expand_leaf(
                &QueryNode::eq("GEO", json!("zone-4")),
                &ShardRange::single("20240301_0"),
            )
            .unwrap();
        assert_eq!(out.requests.len(), 1);
        assert!(matches!(
            out.node,
            QueryNode::Marker {
                kind: MarkerKind::ExceededValue { set: Some(_) },
                ..
            }
        ));
    }

    #[test]
    fn test_any_field_regex_expands_per_field() {
        let (oracle, metrics, logger, src) = fixtures();
        let ctx = QueryContext::new().with_thresholds(ExpansionThresholds::unlimited());
        let ex = expander(&oracle, &ctx, &src, &metrics, &logger);

        let out = ex
            .expand_leaf(
                &QueryNode::any_field_regex("r.*"),
                &ShardRange::single("20240301_0"),
            )
            .unwrap();
        // Only CITY carries values starting with "r"; the CODE branch is
        // empty and dropped.
        match out.node {
            QueryNode::Or(children) => assert_eq!(children.len(), 3),
            other => panic!("expected enumerated union, got {:?}", other),
        }
    }

    #[test]
    fn test_any_field_empty_index_only_member_drops_out() {
        let (oracle, metrics, logger, src) = fixtures();
        let ctx = QueryContext::new().with_thresholds(ExpansionThresholds::unlimited());
        let ex = expander(&oracle, &ctx, &src, &metrics, &logger);

        // GEO is index-only and holds no matching entries; the union is
        // carried by the other fields without error.
        let out = ex
            .expand_leaf(
                &QueryNode::any_field_regex("r.*"),
                &ShardRange::single("20240301_0"),
            )
            .unwrap();
        match out.node {
            QueryNode::Or(children) => assert_eq!(children.len(), 3),
            other => panic!("expected enumerated union, got {:?}", other),
        }
        assert!(out.requests.is_empty());
    }

    #[test]
    fn test_any_field_populated_index_only_member_degrades_without_cache() {
        let (oracle, metrics, logger, mut src) = fixtures();
        src.index_entry(
            "GEO",
            "r-zone".into(),
            RecordKey::new("20240301_0", "d1", "u9"),
        );
        let ctx = QueryContext::new().with_thresholds(ExpansionThresholds::unlimited());
        let ex = expander(&oracle, &ctx, &src, &metrics, &logger);

        let out = ex
            .expand_leaf(
                &QueryNode::any_field_regex("r.*"),
                &ShardRange::single("20240301_0"),
            )
            .unwrap();
        match &out.node {
            QueryNode::Marker { kind, .. } => assert_eq!(*kind, MarkerKind::ExceededTerm),
            other => panic!("expected degraded union, got {:?}", other),
        }
        assert_eq!(metrics.snapshot().term_threshold_markers, 1);
    }

    #[test]
    fn test_any_field_populated_index_only_member_materializes_with_cache() {
        let (oracle, metrics, logger, mut src) = fixtures();
        src.index_entry(
            "GEO",
            "r-zone".into(),
            RecordKey::new("20240301_0", "d1", "u9"),
        );
        let ctx = QueryContext::new()
            .with_thresholds(ExpansionThresholds::unlimited())
            .with_ivarator_cache_dir("/tmp/unused");
        let ex = expander(&oracle, &ctx, &src, &metrics, &logger);

        let out = ex
            .expand_leaf(
                &QueryNode::any_field_regex("r.*"),
                &ShardRange::single("20240301_0"),
            )
            .unwrap();
        // CITY's enumerated branch and GEO's overflow both resolve through
        // sets once any member needs one.
        match &out.node {
            QueryNode::Marker {
                kind: MarkerKind::ExceededOr { sets },
                ..
            } => assert_eq!(sets.len(), 2),
            other => panic!("expected union of sets, got {:?}", other),
        }
        assert_eq!(out.requests.len(), 2);
    }

    #[test]
    fn test_plain_equality_passes_through() {
        let (oracle, metrics, logger, src) = fixtures();
        let ctx = QueryContext::new();
        let ex = expander(&oracle, &ctx, &src, &metrics, &logger);

        let leaf = QueryNode::eq("CODE", json!("fra"));
        let out = ex
            .expand_leaf(&leaf, &ShardRange::single("20240301_0"))
            .unwrap();
        assert_eq!(out.node, leaf);
    }
}
