//! Concurrent plan execution
//!
//! Shard ranges are fanned out over a bounded set of evaluation workers
//! through a channel; each worker drives one shard at a time with its own
//! evaluator, so no evaluation state is shared. Within a shard, keys come
//! back strictly increasing; in sorted mode the pipeline merges the
//! per-shard streams into one key-ordered stream before the sink sees
//! them, otherwise matches flow to the sink as workers find them.

use std::sync::Mutex;

use crossbeam_channel::unbounded;

use crate::context::{QueryContext, UidMode};
use crate::observability::{Logger, MetricsRegistry};
use crate::planner::{QueryPlan, ShardQuery};
use crate::scan::{AuthorizationFilter, Record, RecordKey, ScanSource, ShardRange};

use super::cursor::{CancelToken, ShardDriver, ShardReport, ShardState};
use super::evaluator::FunctionHandler;

/// Receives matches. Implementations must tolerate concurrent calls in
/// unsorted mode.
pub trait ResultSink: Send + Sync {
    fn accept(&self, record: Record);
}

/// Sink collecting matches in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    records: Mutex<Vec<Record>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records.into_inner().unwrap()
    }

    pub fn keys(&self) -> Vec<RecordKey> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultSink for CollectingSink {
    fn accept(&self, record: Record) {
        self.records.lock().unwrap().push(record);
    }
}

/// Per-shard outcome in the summary.
#[derive(Debug)]
pub struct ShardResult {
    pub range: ShardRange,
    pub report: ShardReport,
}

/// What one run() produced, shard by shard. Failed shards carry their
/// error here; nothing is dropped silently.
#[derive(Debug)]
pub struct PipelineSummary {
    pub shards: Vec<ShardResult>,
    pub total_matched: usize,
    pub total_scanned: usize,
    pub total_yields: usize,
    pub cancelled: bool,
}

impl PipelineSummary {
    pub fn failed_shards(&self) -> impl Iterator<Item = &ShardResult> {
        self.shards
            .iter()
            .filter(|s| s.report.state == ShardState::Failed)
    }

    pub fn all_exhausted(&self) -> bool {
        self.shards
            .iter()
            .all(|s| s.report.state == ShardState::Exhausted)
    }
}

/// Executes finalized plans.
pub struct EvaluationPipeline<'a, S: ScanSource + Sync> {
    ctx: &'a QueryContext,
    source: &'a S,
    auth: &'a dyn AuthorizationFilter,
    functions: Option<&'a dyn FunctionHandler>,
    metrics: &'a MetricsRegistry,
    logger: &'a Logger,
    cancel: CancelToken,
}

impl<'a, S: ScanSource + Sync> EvaluationPipeline<'a, S> {
    pub fn new(
        ctx: &'a QueryContext,
        source: &'a S,
        auth: &'a dyn AuthorizationFilter,
        metrics: &'a MetricsRegistry,
        logger: &'a Logger,
    ) -> Self {
        Self {
            ctx,
            source,
            auth,
            functions: None,
            metrics,
            logger,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_functions(mut self, functions: &'a dyn FunctionHandler) -> Self {
        self.functions = Some(functions);
        self
    }

    /// Token callers hold to stop the pipeline early. Cancellation is
    /// prompt but cooperative: in-flight record evaluations finish.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Runs the plan to completion. In count-only mode the sink never
    /// sees records; the summary carries the aggregate count.
    pub fn run(&self, plan: &QueryPlan, sink: &dyn ResultSink) -> PipelineSummary {
        let workers = self.ctx.eval_workers.min(plan.shards.len()).max(1);
        let (shard_tx, shard_rx) = unbounded::<&ShardQuery>();
        for shard in &plan.shards {
            // Channel sends to an unbounded queue cannot fail while the
            // receiver is alive.
            let _ = shard_tx.send(shard);
        }
        drop(shard_tx);

        let results: Mutex<Vec<ShardResult>> = Mutex::new(Vec::new());
        let sorted_buffer: Mutex<Vec<Record>> = Mutex::new(Vec::new());
        let sorted = self.ctx.uid_mode == UidMode::Sorted;
        let count_only = self.ctx.count_only;

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let shard_rx = shard_rx.clone();
                let results = &results;
                let sorted_buffer = &sorted_buffer;
                scope.spawn(move || {
                    while let Ok(shard) = shard_rx.recv() {
                        let mut driver = ShardDriver::new(
                            shard,
                            self.source,
                            self.ctx,
                            self.auth,
                            &self.cancel,
                            self.metrics,
                            self.logger,
                        );
                        if let Some(functions) = self.functions {
                            driver = driver.with_functions(functions);
                        }
                        let report = driver.run(|record| {
                            if count_only {
                                return;
                            }
                            if sorted {
                                sorted_buffer.lock().unwrap().push(record);
                            } else {
                                sink.accept(record);
                            }
                        });
                        results.lock().unwrap().push(ShardResult {
                            range: shard.range.clone(),
                            report,
                        });
                    }
                });
            }
        });

        if sorted && !count_only {
            // Per-shard streams are each ordered; one sort of the union
            // merges them into a single key-ordered stream.
            let mut buffered = sorted_buffer.into_inner().unwrap();
            buffered.sort_by(|a, b| a.key.cmp(&b.key));
            for record in buffered {
                sink.accept(record);
            }
        }

        let mut shards = results.into_inner().unwrap();
        shards.sort_by(|a, b| a.range.cmp(&b.range));
        let summary = PipelineSummary {
            total_matched: shards.iter().map(|s| s.report.matched).sum(),
            total_scanned: shards.iter().map(|s| s.report.scanned).sum(),
            total_yields: shards.iter().map(|s| s.report.yields).sum(),
            cancelled: self.cancel.is_cancelled(),
            shards,
        };
        self.logger.info(
            "PIPELINE_COMPLETE",
            &[
                ("query_id", self.ctx.query_id.to_string()),
                ("matched", summary.total_matched.to_string()),
                ("scanned", summary.total_scanned.to_string()),
                ("yields", summary.total_yields.to_string()),
            ],
        );
        summary
    }
}
