//! Resumable shard evaluation
//!
//! One driver per shard range. The driver owns the scan cursor, the
//! monotonicity check against the last returned key, and the resume
//! boundary after a yield. Resumption is strictly after the yielded key;
//! a source that replays at or before it trips an ordering violation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::context::QueryContext;
use crate::observability::{Logger, MetricsRegistry};
use crate::planner::ShardQuery;
use crate::scan::{AuthorizationFilter, Record, RecordKey, ScanEvent, ScanSource};

use super::errors::PipelineError;
use super::evaluator::{Evaluator, FunctionHandler};

/// Evaluation lifecycle of one shard range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardState {
    NotStarted,
    Seeking,
    Evaluating,
    Yielded,
    Exhausted,
    Failed,
}

/// Cooperative cancellation flag shared across workers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Outcome of driving one shard range to completion.
#[derive(Debug)]
pub struct ShardReport {
    pub state: ShardState,
    pub matched: usize,
    pub scanned: usize,
    pub yields: usize,
    pub error: Option<PipelineError>,
}

/// Drives one shard query against a scan source.
pub struct ShardDriver<'a, S: ScanSource> {
    shard: &'a ShardQuery,
    source: &'a S,
    ctx: &'a QueryContext,
    auth: &'a dyn AuthorizationFilter,
    cancel: &'a CancelToken,
    metrics: &'a MetricsRegistry,
    logger: &'a Logger,
    functions: Option<&'a dyn FunctionHandler>,
    state: ShardState,
    last_key: Option<RecordKey>,
}

impl<'a, S: ScanSource> ShardDriver<'a, S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        shard: &'a ShardQuery,
        source: &'a S,
        ctx: &'a QueryContext,
        auth: &'a dyn AuthorizationFilter,
        cancel: &'a CancelToken,
        metrics: &'a MetricsRegistry,
        logger: &'a Logger,
    ) -> Self {
        Self {
            shard,
            source,
            ctx,
            auth,
            cancel,
            metrics,
            logger,
            functions: None,
            state: ShardState::NotStarted,
            last_key: None,
        }
    }

    /// Installs the handler for opaque function nodes.
    pub fn with_functions(mut self, functions: &'a dyn FunctionHandler) -> Self {
        self.functions = Some(functions);
        self
    }

    pub fn state(&self) -> ShardState {
        self.state
    }

    /// Runs the shard to exhaustion, cancellation, or failure, feeding
    /// every match to `emit`.
    pub fn run(mut self, mut emit: impl FnMut(Record)) -> ShardReport {
        let evaluator = Evaluator::new(&self.shard.sets, self.functions);
        let mut report = ShardReport {
            state: ShardState::NotStarted,
            matched: 0,
            scanned: 0,
            yields: 0,
            error: None,
        };
        // The first seek starts at the range head; after a yield it
        // resumes strictly after the greater of the yielded key and the
        // last returned key.
        let mut resume_after: Option<RecordKey> = None;

        loop {
            self.state = ShardState::Seeking;
            let mut cursor = match self.source.seek_records(&self.shard.range, resume_after.as_ref())
            {
                Ok(cursor) => cursor,
                Err(err) => return self.fail(report, err.into()),
            };

            self.state = ShardState::Evaluating;
            let yielded = loop {
                if self.cancel.is_cancelled() {
                    self.state = ShardState::Exhausted;
                    report.state = self.state;
                    return report;
                }
                match cursor.next_event() {
                    Ok(Some(ScanEvent::Record(record))) => {
                        if let Some(last) = self.last_key.clone() {
                            if record.key <= last {
                                return self.fail(
                                    report,
                                    PipelineError::OrderingViolation {
                                        last,
                                        got: record.key.clone(),
                                    },
                                );
                            }
                        }
                        self.last_key = Some(record.key.clone());
                        report.scanned += 1;

                        if !self.accepts(&record) {
                            continue;
                        }
                        match evaluator.matches(&self.shard.tree, &record) {
                            Ok(true) => {
                                report.matched += 1;
                                self.metrics.add_keys_returned(1);
                                emit(record);
                            }
                            Ok(false) => {}
                            Err(err) => return self.fail(report, err),
                        }
                    }
                    Ok(Some(ScanEvent::Yield(key))) => {
                        self.metrics.incr_yields_observed();
                        report.yields += 1;
                        break Some(key);
                    }
                    Ok(None) => break None,
                    Err(err) => return self.fail(report, err.into()),
                }
            };

            match yielded {
                Some(key) => {
                    self.state = ShardState::Yielded;
                    let boundary = match &self.last_key {
                        Some(last) if *last > key => last.clone(),
                        _ => key,
                    };
                    resume_after = Some(boundary);
                }
                None => {
                    self.state = ShardState::Exhausted;
                    report.state = self.state;
                    return report;
                }
            }
        }
    }

    fn accepts(&self, record: &Record) -> bool {
        if !self.ctx.datatype_filter.is_empty()
            && !self.ctx.datatype_filter.contains(&record.key.datatype)
        {
            return false;
        }
        self.auth.accept(&record.visibility)
    }

    fn fail(mut self, mut report: ShardReport, err: PipelineError) -> ShardReport {
        self.state = ShardState::Failed;
        self.logger.error(
            "SHARD_EVAL_FAILED",
            &[
                ("range", self.shard.range.to_string()),
                ("error", err.to_string()),
            ],
        );
        report.state = self.state;
        report.error = Some(err);
        report
    }
}
