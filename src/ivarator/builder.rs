//! Materialized-set builder
//!
//! Build-or-reuse of on-disk candidate sets. A build scans the index
//! through a pooled source, spills bounded-memory sorted runs, and writes
//! the completion marker last. Builds happen in a private directory that
//! is atomically promoted, so a set directory is only ever observed fully
//! formed; an existing complete set is never rewritten, not by one byte.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::observability::{Logger, MetricsRegistry};
use crate::scan::{ScanError, ScanSource, ShardRange, TermBound};

use super::errors::{MaterializeError, MaterializeResult};
use super::pool::ScanSourcePool;
use super::run::RunWriter;
use super::set::{is_complete, MaterializedSet, COMPLETE_MARKER};
use crate::ast::SetRef;

/// One materialization request: all matching record keys for (field,
/// bound) within a shard range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializeRequest {
    pub field: String,
    pub bound: TermBound,
    pub range: ShardRange,
}

impl MaterializeRequest {
    pub fn new(field: impl Into<String>, bound: TermBound, range: ShardRange) -> Self {
        Self {
            field: field.into(),
            bound,
            range,
        }
    }

    /// Stable cache identity: identical requests map to identical set
    /// directories, across queries and processes.
    pub fn set_ref(&self) -> SetRef {
        let mut hasher = Sha256::new();
        hasher.update(self.range.start.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.range.end.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.field.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.bound.describe().as_bytes());
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(32);
        for byte in &digest[..16] {
            hex.push_str(&format!("{:02x}", byte));
        }
        SetRef::new(hex)
    }
}

/// Behavior when a second request arrives for a set that is being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RebuildPolicy {
    /// Block until the first builder's completion marker appears.
    #[default]
    Wait,
    /// Build independently in a private directory; first promotion wins.
    Rebuild,
}

/// Materializer configuration.
#[derive(Debug, Clone)]
pub struct IvaratorConfig {
    pub cache_dirs: Vec<PathBuf>,
    /// Keys buffered in memory before a sorted run is spilled.
    pub buffer_size: usize,
    /// Bounded retries after an interrupted scan.
    pub max_retries: u32,
    pub scan_timeout: Duration,
    pub pool_acquire_timeout: Duration,
    /// How long a Wait-policy request waits for another builder.
    pub build_wait_timeout: Duration,
    pub rebuild_policy: RebuildPolicy,
}

impl IvaratorConfig {
    pub fn new(cache_dirs: Vec<PathBuf>) -> Self {
        Self {
            cache_dirs,
            buffer_size: 10_000,
            max_retries: 2,
            scan_timeout: Duration::from_secs(30),
            pool_acquire_timeout: Duration::from_secs(5),
            build_wait_timeout: Duration::from_secs(30),
            rebuild_policy: RebuildPolicy::Wait,
        }
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    pub fn with_rebuild_policy(mut self, policy: RebuildPolicy) -> Self {
        self.rebuild_policy = policy;
        self
    }
}

/// The materializer. Shared across planning threads; one instance per
/// engine.
pub struct Ivarator<S> {
    config: IvaratorConfig,
    pool: ScanSourcePool<S>,
    inflight: Mutex<HashSet<SetRef>>,
    inflight_done: Condvar,
    promote_lock: Mutex<()>,
    metrics: Arc<MetricsRegistry>,
    logger: Arc<Logger>,
}

enum FillOutcome {
    Done(usize),
    Interrupted(String),
}

impl<S: ScanSource> Ivarator<S> {
    pub fn new(
        config: IvaratorConfig,
        sources: Vec<S>,
        metrics: Arc<MetricsRegistry>,
        logger: Arc<Logger>,
    ) -> Self {
        Self {
            config,
            pool: ScanSourcePool::new(sources),
            inflight: Mutex::new(HashSet::new()),
            inflight_done: Condvar::new(),
            promote_lock: Mutex::new(()),
            metrics,
            logger,
        }
    }

    pub fn config(&self) -> &IvaratorConfig {
        &self.config
    }

    /// Directory a request's set lives in, chosen deterministically among
    /// the configured cache directories.
    pub fn dir_for(&self, set_ref: &SetRef) -> PathBuf {
        let sum: usize = set_ref.as_str().bytes().map(|b| b as usize).sum();
        let dir = &self.config.cache_dirs[sum % self.config.cache_dirs.len()];
        dir.join(set_ref.as_str())
    }

    /// Returns the complete set for the request, building it if absent.
    pub fn build_or_reuse(&self, req: &MaterializeRequest) -> MaterializeResult<MaterializedSet> {
        if self.config.cache_dirs.is_empty() {
            return Err(MaterializeError::Failed(
                "no materialization cache directories configured".into(),
            ));
        }
        let set_ref = req.set_ref();
        let final_dir = self.dir_for(&set_ref);
        let deadline = Instant::now() + self.config.build_wait_timeout;

        loop {
            if is_complete(&final_dir) {
                self.metrics.incr_ivarator_reuses();
                self.logger.trace(
                    "IVARATOR_REUSE",
                    &[("set", set_ref.as_str().to_string())],
                );
                return MaterializedSet::open(&final_dir);
            }

            let inflight = self.inflight.lock().unwrap();
            if is_complete(&final_dir) {
                continue; // completed while we took the lock
            }
            if !inflight.contains(&set_ref) {
                let mut inflight = inflight;
                inflight.insert(set_ref.clone());
                drop(inflight);
                let result = self.build(req, &set_ref, &final_dir);
                self.inflight.lock().unwrap().remove(&set_ref);
                self.inflight_done.notify_all();
                return result;
            }

            match self.config.rebuild_policy {
                RebuildPolicy::Wait => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(MaterializeError::Timeout(
                            self.config.build_wait_timeout.as_millis() as u64,
                        ));
                    }
                    let wait = remaining.min(Duration::from_millis(25));
                    let (guard, _) = self.inflight_done.wait_timeout(inflight, wait).unwrap();
                    drop(guard);
                }
                RebuildPolicy::Rebuild => {
                    drop(inflight);
                    return self.build(req, &set_ref, &final_dir);
                }
            }
        }
    }

    fn build(
        &self,
        req: &MaterializeRequest,
        set_ref: &SetRef,
        final_dir: &Path,
    ) -> MaterializeResult<MaterializedSet> {
        let parent = final_dir
            .parent()
            .ok_or_else(|| MaterializeError::Failed("cache directory has no parent".into()))?;
        std::fs::create_dir_all(parent)?;
        let tmp_dir = parent.join(format!(
            "{}.build-{}",
            set_ref.as_str(),
            Uuid::new_v4().simple()
        ));
        std::fs::create_dir_all(&tmp_dir)?;

        let mut attempts = 0u32;
        let result = loop {
            attempts += 1;
            match self.fill_runs(&tmp_dir, req) {
                Ok(FillOutcome::Done(keys)) => {
                    self.logger.info(
                        "IVARATOR_BUILD",
                        &[
                            ("set", set_ref.as_str().to_string()),
                            ("keys", keys.to_string()),
                            ("attempts", attempts.to_string()),
                        ],
                    );
                    break Ok(());
                }
                Ok(FillOutcome::Interrupted(detail)) => {
                    self.metrics.incr_ivarator_retries();
                    self.logger.warn(
                        "IVARATOR_RETRY",
                        &[
                            ("set", set_ref.as_str().to_string()),
                            ("attempt", attempts.to_string()),
                            ("detail", detail),
                        ],
                    );
                    if attempts > self.config.max_retries {
                        break Err(MaterializeError::Interrupted { attempts });
                    }
                    let jitter = rand::thread_rng().gen_range(5..25);
                    std::thread::sleep(Duration::from_millis(jitter));
                }
                Err(err) => break Err(err),
            }
        };

        match result {
            Ok(()) => {
                // Marker written last; the directory becomes visible only
                // through the atomic promotion below.
                std::fs::write(tmp_dir.join(COMPLETE_MARKER), b"complete")?;
                self.metrics.incr_ivarator_builds();
                self.promote(&tmp_dir, final_dir)
            }
            Err(err) => {
                let _ = std::fs::remove_dir_all(&tmp_dir);
                self.logger.error(
                    "IVARATOR_FAILED",
                    &[
                        ("set", set_ref.as_str().to_string()),
                        ("error", err.to_string()),
                    ],
                );
                Err(err)
            }
        }
    }

    /// Scans the index and spills sorted, deduplicated runs into `dir`.
    /// An interrupted scan reports `FillOutcome::Interrupted` after
    /// clearing any partial files, so a retry starts clean.
    fn fill_runs(&self, dir: &Path, req: &MaterializeRequest) -> MaterializeResult<FillOutcome> {
        for stale in super::set::run_files(dir)? {
            std::fs::remove_file(stale)?;
        }

        let source = self.pool.acquire(self.config.pool_acquire_timeout)?;
        let mut cursor = match source.seek_index(&req.field, &req.bound, &req.range) {
            Ok(cursor) => cursor,
            Err(ScanError::Interrupted(detail)) => {
                return Ok(FillOutcome::Interrupted(detail))
            }
            Err(err) => return Err(err.into()),
        };

        let started = Instant::now();
        let mut buffer = Vec::with_capacity(self.config.buffer_size.min(64 * 1024));
        let mut run_index = 0usize;
        let mut total = 0usize;

        loop {
            if started.elapsed() > self.config.scan_timeout {
                return Err(MaterializeError::Timeout(
                    self.config.scan_timeout.as_millis() as u64,
                ));
            }
            match cursor.next_entry() {
                Ok(Some((_value, key))) => {
                    buffer.push(key);
                    total += 1;
                    if buffer.len() >= self.config.buffer_size {
                        self.spill_run(dir, run_index, &mut buffer)?;
                        run_index += 1;
                    }
                }
                Ok(None) => break,
                Err(ScanError::Interrupted(detail)) => {
                    return Ok(FillOutcome::Interrupted(detail))
                }
                Err(err) => return Err(err.into()),
            }
        }

        if !buffer.is_empty() || run_index == 0 {
            self.spill_run(dir, run_index, &mut buffer)?;
        }
        Ok(FillOutcome::Done(total))
    }

    fn spill_run(
        &self,
        dir: &Path,
        run_index: usize,
        buffer: &mut Vec<crate::scan::RecordKey>,
    ) -> MaterializeResult<()> {
        buffer.sort();
        buffer.dedup();
        let mut writer = RunWriter::create(dir.join(format!("run-{:05}.bin", run_index)))?;
        for key in buffer.iter() {
            writer.write_key(key)?;
        }
        writer.finish()?;
        buffer.clear();
        Ok(())
    }

    /// Promotes a finished private build. An already-complete final set
    /// wins; the private build is discarded untouched-file for file.
    fn promote(&self, tmp_dir: &Path, final_dir: &Path) -> MaterializeResult<MaterializedSet> {
        let _guard = self.promote_lock.lock().unwrap();
        if is_complete(final_dir) {
            std::fs::remove_dir_all(tmp_dir)?;
            self.metrics.incr_ivarator_reuses();
            return MaterializedSet::open(final_dir);
        }
        if final_dir.exists() {
            // Leftover partial directory from an earlier crash; it carries
            // no marker and is not trusted by anyone.
            std::fs::remove_dir_all(final_dir)?;
        }
        std::fs::rename(tmp_dir, final_dir)?;
        MaterializedSet::open(final_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{FieldMetadata, FieldSchema};
    use crate::scan::{MemoryScanSource, Record, RecordKey};
    use serde_json::json;
    use tempfile::TempDir;

    fn schema() -> FieldSchema {
        FieldSchema::new().with_field("CITY", FieldMetadata::indexed_field())
    }

    fn populated_source(n: usize) -> MemoryScanSource {
        let mut src = MemoryScanSource::new();
        for i in 0..n {
            src.load(
                Record::new(RecordKey::new("20240301_0", "d1", format!("u{:03}", i)))
                    .with_field("CITY", json!("rome")),
                &schema(),
            );
        }
        src
    }

    fn ivarator(dir: &TempDir, sources: Vec<MemoryScanSource>) -> Ivarator<MemoryScanSource> {
        let config = IvaratorConfig::new(vec![dir.path().to_path_buf()]).with_buffer_size(10);
        Ivarator::new(
            config,
            sources,
            Arc::new(MetricsRegistry::new()),
            Arc::new(Logger::disabled()),
        )
    }

    fn request() -> MaterializeRequest {
        MaterializeRequest::new(
            "CITY",
            TermBound::Value("rome".into()),
            ShardRange::single("20240301_0"),
        )
    }

    #[test]
    fn test_build_produces_complete_sorted_set() {
        let cache = TempDir::new().unwrap();
        let iv = ivarator(&cache, vec![populated_source(25)]);

        let set = iv.build_or_reuse(&request()).unwrap();
        assert!(is_complete(set.dir()));
        let uids: Vec<String> = set.iter().map(|k| k.uid.clone()).collect();
        assert_eq!(uids.len(), 25);
        let mut sorted = uids.clone();
        sorted.sort();
        assert_eq!(uids, sorted);
    }

    #[test]
    fn test_reuse_leaves_files_untouched() {
        let cache = TempDir::new().unwrap();
        let iv = ivarator(&cache, vec![populated_source(25)]);

        let first = iv.build_or_reuse(&request()).unwrap();
        let files_before = file_state(first.dir());

        let second = iv.build_or_reuse(&request()).unwrap();
        assert_eq!(first.dir(), second.dir());
        assert_eq!(file_state(second.dir()), files_before);
        assert_eq!(iv.metrics.snapshot().ivarator_reuses, 1);
    }

    fn file_state(dir: &Path) -> Vec<(String, u64, std::time::SystemTime)> {
        let mut state: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                let meta = e.metadata().unwrap();
                (
                    e.file_name().to_string_lossy().to_string(),
                    meta.len(),
                    meta.modified().unwrap(),
                )
            })
            .collect();
        state.sort();
        state
    }

    #[test]
    fn test_interrupted_scan_retries_to_same_result() {
        let cache = TempDir::new().unwrap();
        let src = populated_source(25);
        src.interrupt_index_after(7);
        let iv = ivarator(&cache, vec![src]);

        let set = iv.build_or_reuse(&request()).unwrap();
        assert_eq!(set.iter().count(), 25);
        assert_eq!(iv.metrics.snapshot().ivarator_retries, 1);
    }

    #[test]
    fn test_identical_requests_share_set_ref() {
        assert_eq!(request().set_ref(), request().set_ref());
        let other = MaterializeRequest::new(
            "CITY",
            TermBound::Value("paris".into()),
            ShardRange::single("20240301_0"),
        );
        assert_ne!(request().set_ref(), other.set_ref());
    }
}
