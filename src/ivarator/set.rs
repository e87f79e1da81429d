//! Materialized set handle
//!
//! A complete on-disk set of matching record keys: one or more sorted run
//! files plus the `complete` marker. The marker's presence is the sole
//! truth of completeness; a directory without it is never trusted.
//!
//! Membership tests binary-search each run; ordered iteration merges runs
//! on the fly. Cost is proportional to the run sizes, never the shard.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};

use crate::scan::RecordKey;

use super::errors::{MaterializeError, MaterializeResult};
use super::run::{RunReader, RunWriter};

/// Name of the completion marker file.
pub const COMPLETE_MARKER: &str = "complete";
/// Name of the pre-merged run produced by [`MaterializedSet::fill_sets`].
pub const MERGED_RUN: &str = "merged.bin";

/// Read handle onto one complete materialized set.
#[derive(Debug)]
pub struct MaterializedSet {
    dir: PathBuf,
    runs: Vec<Vec<RecordKey>>,
}

impl MaterializedSet {
    /// Opens a set directory. Fails when the completion marker is absent
    /// or any run fails its checksum.
    pub fn open(dir: impl Into<PathBuf>) -> MaterializeResult<Self> {
        let dir = dir.into();
        if !is_complete(&dir) {
            return Err(MaterializeError::Incomplete {
                dir: dir.display().to_string(),
            });
        }

        // A merged run supersedes the individual runs it was built from.
        let merged = dir.join(MERGED_RUN);
        let run_paths = if merged.is_file() {
            vec![merged]
        } else {
            run_files(&dir)?
        };

        let mut runs = Vec::with_capacity(run_paths.len());
        for path in run_paths {
            runs.push(RunReader::open(path)?.read_all()?);
        }
        Ok(Self { dir, runs })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Total stored keys across runs (duplicates across runs counted).
    pub fn stored_len(&self) -> usize {
        self.runs.iter().map(|r| r.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.iter().all(|r| r.is_empty())
    }

    /// Point membership test.
    pub fn contains(&self, key: &RecordKey) -> bool {
        self.runs.iter().any(|run| run.binary_search(key).is_ok())
    }

    /// Ordered, deduplicated iteration over all runs.
    pub fn iter(&self) -> MergedIter<'_> {
        let mut heap = BinaryHeap::new();
        for (run_idx, run) in self.runs.iter().enumerate() {
            if !run.is_empty() {
                heap.push(Reverse((run[0].clone(), run_idx, 0usize)));
            }
        }
        MergedIter {
            runs: &self.runs,
            heap,
            last: None,
        }
    }

    /// Merges all runs into a single sorted file, after which the set
    /// iterates from that file alone. Idempotent; only invoked on the
    /// sorted-UID path.
    pub fn fill_sets(&mut self) -> MaterializeResult<()> {
        let merged_path = self.dir.join(MERGED_RUN);
        if merged_path.is_file() {
            return Ok(());
        }
        let mut writer = RunWriter::create(&merged_path)?;
        let keys: Vec<RecordKey> = self.iter().cloned().collect();
        for key in &keys {
            writer.write_key(key)?;
        }
        writer.finish()?;
        self.runs = vec![keys];
        Ok(())
    }
}

/// K-way merge over the set's runs, deduplicating as it goes.
pub struct MergedIter<'a> {
    runs: &'a [Vec<RecordKey>],
    heap: BinaryHeap<Reverse<(RecordKey, usize, usize)>>,
    last: Option<RecordKey>,
}

impl<'a> Iterator for MergedIter<'a> {
    type Item = &'a RecordKey;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(Reverse((key, run_idx, pos))) = self.heap.pop() {
            let next_pos = pos + 1;
            if next_pos < self.runs[run_idx].len() {
                self.heap.push(Reverse((
                    self.runs[run_idx][next_pos].clone(),
                    run_idx,
                    next_pos,
                )));
            }
            if self.last.as_ref() == Some(&key) {
                continue;
            }
            self.last = Some(key);
            return Some(&self.runs[run_idx][pos]);
        }
        None
    }
}

/// True when the directory carries the completion marker.
pub fn is_complete(dir: &Path) -> bool {
    dir.join(COMPLETE_MARKER).is_file()
}

/// Sorted run file paths in a set directory, excluding marker and merged
/// run.
pub fn run_files(dir: &Path) -> MaterializeResult<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if name.starts_with("run-") && name.ends_with(".bin") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
