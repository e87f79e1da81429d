//! Planner Invariant Tests
//!
//! Proves the load-bearing planning properties end to end:
//! 1. Rewriting is sound and complete: the planned result set equals
//!    brute-force evaluation of the original tree, at any threshold.
//! 2. Lowering thresholds changes resolution strategy (enumerate, defer,
//!    materialize), never results; marker counts grow monotonically as
//!    thresholds shrink.
//! 3. The full-scan gate rejects unanchored plans unless the caller
//!    relaxed it.
//! 4. Composite folding fires only under a single And's direct children.
//! 5. Branches the index proves empty are pruned, never scanned.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use sievedb::ast::{MarkerKind, QueryNode};
use sievedb::context::QueryContext;
use sievedb::expand::ExpansionThresholds;
use sievedb::ivarator::{Ivarator, IvaratorConfig};
use sievedb::metadata::{FieldMetadata, FieldSchema, StaticOracle};
use sievedb::observability::{Logger, MetricsRegistry};
use sievedb::pipeline::{CollectingSink, EvaluationPipeline};
use sievedb::planner::{PlanRewriter, PlannerErrorCode, QueryPlan};
use sievedb::scan::{AcceptAll, MemoryScanSource, Record, RecordKey, ShardRange};

// =============================================================================
// Fixture: one shard, three fields, ~30 records
// =============================================================================

fn schema() -> FieldSchema {
    FieldSchema::new()
        .with_field("CITY", FieldMetadata::indexed_field())
        .with_field("CODE", FieldMetadata::indexed_field())
        .with_field("NOTE", FieldMetadata::unindexed_field())
}

/// Same fields, plus a declared CODE+CITY composite index. Kept separate
/// so threshold tests are not perturbed by composite folding.
fn composite_schema() -> FieldSchema {
    let group = vec!["CODE".to_string(), "CITY".to_string()];
    schema().merge(
        &FieldSchema::new()
            .with_field(
                "CITY",
                FieldMetadata::indexed_field().with_composite_group(group.clone()),
            )
            .with_field(
                "CODE",
                FieldMetadata::indexed_field().with_composite_group(group),
            )
            .with_field(
                "CODE_CITY",
                FieldMetadata::indexed_field().with_index_only(),
            ),
    )
}

fn populated_source(schema: &FieldSchema) -> MemoryScanSource {
    let mut src = MemoryScanSource::new();
    let cities = [
        "rome", "rennes", "riga", "riga", "oslo", "bern", "bonn", "basel", "basel", "athens",
    ];
    for i in 0..30 {
        let city = cities[i % cities.len()];
        let code = if i % 2 == 0 { "usa" } else { "fra" };
        src.load(
            Record::new(RecordKey::new("20240301_0", "d1", format!("u{:03}", i)))
                .with_field("CITY", json!(city))
                .with_field("CODE", json!(code))
                .with_field("NOTE", json!(format!("note-{}", i))),
            schema,
        );
    }
    src
}

struct Engine {
    source: Arc<MemoryScanSource>,
    oracle: StaticOracle,
    metrics: MetricsRegistry,
    logger: Logger,
    _cache: TempDir,
    ivarator: Ivarator<Arc<MemoryScanSource>>,
}

fn engine() -> Engine {
    engine_with(schema())
}

fn engine_with(schema: FieldSchema) -> Engine {
    let source = Arc::new(populated_source(&schema));
    let cache = TempDir::new().unwrap();
    let ivarator = Ivarator::new(
        IvaratorConfig::new(vec![cache.path().to_path_buf()]),
        vec![source.clone(), source.clone()],
        Arc::new(MetricsRegistry::new()),
        Arc::new(Logger::disabled()),
    );
    Engine {
        source,
        oracle: StaticOracle::new(schema),
        metrics: MetricsRegistry::new(),
        logger: Logger::disabled(),
        _cache: cache,
        ivarator,
    }
}

fn ctx_with(thresholds: ExpansionThresholds, engine: &Engine) -> QueryContext {
    QueryContext::new()
        .with_thresholds(thresholds)
        .with_ivarator_cache_dir(engine._cache.path())
}

fn plan(engine: &Engine, ctx: &QueryContext, tree: &QueryNode) -> QueryPlan {
    let rewriter = PlanRewriter::new(
        &engine.oracle,
        ctx,
        &engine.source,
        &engine.ivarator,
        &engine.metrics,
        &engine.logger,
    );
    rewriter.plan(tree, &[ShardRange::single("20240301_0")])
}

fn execute(engine: &Engine, ctx: &QueryContext, plan: &QueryPlan) -> Vec<RecordKey> {
    let pipeline = EvaluationPipeline::new(
        ctx,
        &engine.source,
        &AcceptAll,
        &engine.metrics,
        &engine.logger,
    );
    let sink = CollectingSink::new();
    let summary = pipeline.run(plan, &sink);
    assert!(
        summary.all_exhausted(),
        "evaluation failed: {:?}",
        summary.failed_shards().collect::<Vec<_>>()
    );
    let mut keys = sink.keys();
    keys.sort();
    keys
}

/// Ground truth: evaluate the original tree against every raw record.
fn brute_force(engine: &Engine, tree: &QueryNode) -> Vec<RecordKey> {
    let ctx = QueryContext::new().with_full_table_scan_allowed(true);
    let shard = sievedb::planner::ShardQuery {
        range: ShardRange::single("20240301_0"),
        tree: QueryNode::marker(MarkerKind::EvaluationOnly, tree.clone()),
        sets: Default::default(),
    };
    let plan = QueryPlan {
        shards: vec![shard],
        ..QueryPlan::default()
    };
    execute(engine, &ctx, &plan)
}

// =============================================================================
// Soundness and threshold monotonicity
// =============================================================================

/// Test: the same query at threshold=inf, =2, =1 returns identical result
/// sets while the count of value-threshold markers never decreases.
#[test]
fn test_threshold_never_changes_results() {
    let engine = engine();
    let tree = QueryNode::and(vec![
        QueryNode::regex("CITY", "b.*"),
        QueryNode::eq("CODE", json!("usa")),
    ]);
    let expected = brute_force(&engine, &tree);
    assert!(!expected.is_empty());

    let mut marker_counts = Vec::new();
    for thresholds in [
        ExpansionThresholds::unlimited(),
        ExpansionThresholds::uniform(2),
        ExpansionThresholds::uniform(1),
    ] {
        let ctx = ctx_with(thresholds, &engine);
        let plan = plan(&engine, &ctx, &tree);
        assert!(plan.failures.is_empty(), "{:?}", plan.failures);
        let keys = execute(&engine, &ctx, &plan);
        assert_eq!(keys, expected, "results drifted at {:?}", thresholds);
        marker_counts
            .push(plan.marker_count(|k| matches!(k, MarkerKind::ExceededValue { .. })));
    }
    assert!(
        marker_counts.windows(2).all(|w| w[0] <= w[1]),
        "marker count must grow as thresholds shrink: {:?}",
        marker_counts
    );
    assert_eq!(marker_counts[0], 0);
    assert!(*marker_counts.last().unwrap() > 0);
}

/// Test: an any-field pattern conjoined with a negated subtree resolves
/// identically at threshold=1 and threshold=inf.
#[test]
fn test_negation_stable_across_thresholds() {
    let engine = engine();
    let tree = QueryNode::and(vec![
        QueryNode::any_field_regex("b.*"),
        QueryNode::not(QueryNode::and(vec![
            QueryNode::any_field_regex("a.*"),
            QueryNode::eq("CITY", json!("basel")),
        ])),
    ]);
    let expected = brute_force(&engine, &tree);
    assert!(!expected.is_empty());

    let loose = ctx_with(ExpansionThresholds::unlimited(), &engine);
    let loose_plan = plan(&engine, &loose, &tree);
    assert!(loose_plan.failures.is_empty(), "{:?}", loose_plan.failures);
    assert_eq!(execute(&engine, &loose, &loose_plan), expected);

    let tight = ctx_with(ExpansionThresholds::uniform(1), &engine);
    let tight_plan = plan(&engine, &tight, &tree);
    assert!(tight_plan.failures.is_empty(), "{:?}", tight_plan.failures);
    assert_eq!(execute(&engine, &tight, &tight_plan), expected);

    let loose_markers = loose_plan.marker_count(MarkerKind::is_materialized);
    let tight_markers = tight_plan.marker_count(MarkerKind::is_materialized);
    assert!(tight_markers > loose_markers);
}

// =============================================================================
// Full-scan gate
// =============================================================================

/// Test: a plan with no index anchor is rejected unless full scans are
/// explicitly allowed, in which case it runs as an evaluation-only scan.
#[test]
fn test_full_scan_gate() {
    let engine = engine();
    let tree = QueryNode::eq("NOTE", json!("note-3"));

    let ctx = QueryContext::new();
    let rejected = plan(&engine, &ctx, &tree);
    assert!(rejected.shards.is_empty());
    assert_eq!(
        rejected.failures[0].error.code(),
        PlannerErrorCode::SieveFullTableScanDisallowed
    );

    let relaxed = QueryContext::new().with_full_table_scan_allowed(true);
    let allowed = plan(&engine, &relaxed, &tree);
    assert_eq!(allowed.shards.len(), 1);
    let keys = execute(&engine, &relaxed, &allowed);
    assert_eq!(keys, vec![RecordKey::new("20240301_0", "d1", "u003")]);
}

/// Test: structurally invalid trees fail every range with a fatal code.
#[test]
fn test_invalid_tree_is_fatal() {
    let engine = engine();
    let tree = QueryNode::and(vec![]);
    let ctx = QueryContext::new();
    let plan = plan(&engine, &ctx, &tree);
    assert!(plan.shards.is_empty());
    assert_eq!(
        plan.failures[0].error.code(),
        PlannerErrorCode::SievePlanInvalid
    );
    assert!(!plan.failures[0].error.code().recoverable());
}

// =============================================================================
// Empty-index pruning
// =============================================================================

/// Test: a disjunct the index proves empty is pruned from its Or and the
/// survivor returns brute-force results; a query that is empty in its
/// entirety is dropped from the plan and returns nothing instead of
/// tripping the full-scan gate.
#[test]
fn test_provably_empty_branches_are_pruned() {
    let engine = engine();
    let ctx = ctx_with(ExpansionThresholds::unlimited(), &engine);

    let tree = QueryNode::or(vec![
        QueryNode::eq("CITY", json!("rome")),
        QueryNode::regex("CITY", "zzz.*"),
    ]);
    let planned = plan(&engine, &ctx, &tree);
    assert!(planned.failures.is_empty(), "{:?}", planned.failures);
    assert_eq!(
        planned.marker_count(|k| matches!(k, MarkerKind::EmptyIndex)),
        0
    );
    assert_eq!(execute(&engine, &ctx, &planned), brute_force(&engine, &tree));

    let nothing = QueryNode::regex("CITY", "zzz.*");
    let planned = plan(&engine, &ctx, &nothing);
    assert!(planned.failures.is_empty(), "{:?}", planned.failures);
    assert!(planned.shards.is_empty());
    assert_eq!(planned.stats.shards_pruned, 1);
    assert!(execute(&engine, &ctx, &planned).is_empty());
}

// =============================================================================
// Composite folding boundary
// =============================================================================

/// Test: conjoined member equalities fold into one composite leaf that
/// resolves through the composite index and returns the same records as
/// brute force; the same fields joined by Or must not fold.
#[test]
fn test_composite_folds_only_under_and() {
    let engine = engine_with(composite_schema());
    // The folded leaf is index-only, so resolution needs the set cache.
    let ctx = ctx_with(ExpansionThresholds::unlimited(), &engine);

    let conjoined = QueryNode::and(vec![
        QueryNode::eq("CODE", json!("usa")),
        QueryNode::eq("CITY", json!("rome")),
    ]);
    let expected = brute_force(&engine, &conjoined);
    assert!(!expected.is_empty());

    let folded = plan(&engine, &ctx, &conjoined);
    assert!(folded.failures.is_empty(), "{:?}", folded.failures);
    assert_eq!(folded.stats.composites_folded, 1);
    assert_eq!(folded.stats.sets_materialized, 1);
    assert_eq!(execute(&engine, &ctx, &folded), expected);

    let disjoined = QueryNode::or(vec![
        QueryNode::eq("CODE", json!("usa")),
        QueryNode::eq("CITY", json!("rome")),
    ]);
    let unfolded = plan(&engine, &ctx, &disjoined);
    assert_eq!(unfolded.stats.composites_folded, 0);
    assert_eq!(
        execute(&engine, &ctx, &unfolded),
        brute_force(&engine, &disjoined)
    );
}
