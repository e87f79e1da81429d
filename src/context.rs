//! Query context
//!
//! All caller-supplied configuration for one query, carried explicitly
//! through planning and evaluation. Immutable once built; shared across
//! shard ranges and workers without locking.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use crate::expand::ExpansionThresholds;
use crate::metadata::IndexHole;

/// Scan-consistency requested for the backing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsistencyLevel {
    /// Read what the store currently serves.
    #[default]
    Eventual,
    /// Require fully up-to-date shard views.
    Immediate,
}

/// How candidate identifiers from materialized sets are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UidMode {
    /// Streaming evaluation; no global sort of results.
    #[default]
    Unsorted,
    /// Results delivered in key order; materialized sets are pre-merged.
    Sorted,
}

/// Per-query configuration.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub query_id: Uuid,
    pub thresholds: ExpansionThresholds,
    /// Permit branches that degrade to an unconstrained shard scan.
    pub full_table_scan_allowed: bool,
    pub eval_workers: usize,
    pub uid_mode: UidMode,
    pub count_only: bool,
    /// Restrict evaluation to these datatypes; empty means all.
    pub datatype_filter: BTreeSet<String>,
    pub index_holes: Vec<IndexHole>,
    /// Directories available for materialized-set caches. Materialization
    /// is disabled when empty.
    pub ivarator_cache_dirs: Vec<PathBuf>,
    pub scan_timeout: Duration,
    pub consistency: ConsistencyLevel,
}

impl QueryContext {
    pub fn new() -> Self {
        Self {
            query_id: Uuid::new_v4(),
            thresholds: ExpansionThresholds::default(),
            full_table_scan_allowed: false,
            eval_workers: 4,
            uid_mode: UidMode::Unsorted,
            count_only: false,
            datatype_filter: BTreeSet::new(),
            index_holes: Vec::new(),
            ivarator_cache_dirs: Vec::new(),
            scan_timeout: Duration::from_secs(30),
            consistency: ConsistencyLevel::Eventual,
        }
    }

    pub fn with_thresholds(mut self, thresholds: ExpansionThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_full_table_scan_allowed(mut self, allowed: bool) -> Self {
        self.full_table_scan_allowed = allowed;
        self
    }

    pub fn with_eval_workers(mut self, workers: usize) -> Self {
        self.eval_workers = workers.max(1);
        self
    }

    pub fn with_uid_mode(mut self, mode: UidMode) -> Self {
        self.uid_mode = mode;
        self
    }

    pub fn with_count_only(mut self, count_only: bool) -> Self {
        self.count_only = count_only;
        self
    }

    pub fn with_datatype(mut self, dt: impl Into<String>) -> Self {
        self.datatype_filter.insert(dt.into());
        self
    }

    pub fn with_index_hole(mut self, hole: IndexHole) -> Self {
        self.index_holes.push(hole);
        self
    }

    pub fn with_ivarator_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ivarator_cache_dirs.push(dir.into());
        self
    }

    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    pub fn with_consistency(mut self, level: ConsistencyLevel) -> Self {
        self.consistency = level;
        self
    }

    /// True when the planner may hand leaves to the materializer.
    pub fn materialization_enabled(&self) -> bool {
        !self.ivarator_cache_dirs.is_empty()
    }
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let ctx = QueryContext::new();
        assert!(!ctx.full_table_scan_allowed);
        assert_eq!(ctx.uid_mode, UidMode::Unsorted);
        assert!(!ctx.materialization_enabled());
    }

    #[test]
    fn test_builder_chain() {
        let ctx = QueryContext::new()
            .with_eval_workers(0)
            .with_full_table_scan_allowed(true)
            .with_ivarator_cache_dir("/tmp/ivarator")
            .with_datatype("d1");
        assert_eq!(ctx.eval_workers, 1); // clamped to at least one worker
        assert!(ctx.full_table_scan_allowed);
        assert!(ctx.materialization_enabled());
        assert!(ctx.datatype_filter.contains("d1"));
    }
}
