//! In-memory scan source
//!
//! Deterministic reference implementation of [`ScanSource`] over BTree
//! maps. Supports scripted yields, one-shot scan interruptions, and a
//! misbehaving resume mode, so planner, ivarator, and pipeline behavior can
//! be exercised without a storage tier.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Mutex;

use regex::Regex;

use crate::metadata::{composite_field_name, FieldSchema, COMPOSITE_SEPARATOR};

use super::errors::{ScanError, ScanResult};
use super::key::{Record, RecordKey, ShardRange};
use super::source::{IndexCursor, RecordCursor, ScanEvent, ScanSource, TermBound};
use crate::ast::literal_to_index_string;

/// In-memory store: records keyed by [`RecordKey`], one value-sorted index
/// per field.
#[derive(Default)]
pub struct MemoryScanSource {
    records: BTreeMap<RecordKey, Record>,
    index: BTreeMap<String, BTreeMap<String, BTreeSet<RecordKey>>>,
    yield_every: Option<usize>,
    ignore_resume: AtomicBool,
    interrupt_index_after: Mutex<Option<usize>>,
}

impl MemoryScanSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a record and indexes the fields the schema marks indexed,
    /// using the canonical index string form of each value.
    pub fn load(&mut self, record: Record, schema: &FieldSchema) {
        for (field, values) in &record.fields {
            let indexed = schema.get(field).map(|m| m.indexed).unwrap_or(false);
            if !indexed {
                continue;
            }
            for value in values {
                self.index_entry(field, literal_to_index_string(value), record.key.clone());
            }
        }

        // Composite groups declared by the schema get joined index entries
        // under the composite field name, one per combination of member
        // values. Records missing any member contribute nothing.
        let mut groups: BTreeSet<Vec<String>> = BTreeSet::new();
        for field in record.fields.keys() {
            if let Some(meta) = schema.get(field) {
                for group in &meta.composite_groups {
                    groups.insert(group.clone());
                }
            }
        }
        for group in groups {
            for joined in Self::composite_values(&record, &group) {
                self.index_entry(&composite_field_name(&group), joined, record.key.clone());
            }
        }

        self.records.insert(record.key.clone(), record);
    }

    fn composite_values(record: &Record, members: &[String]) -> Vec<String> {
        let mut joined = vec![String::new()];
        for (i, member) in members.iter().enumerate() {
            let values = record.values(member);
            if values.is_empty() {
                return Vec::new();
            }
            let mut next = Vec::with_capacity(joined.len() * values.len());
            for prefix in &joined {
                for value in values {
                    let mut s = prefix.clone();
                    if i > 0 {
                        s.push(COMPOSITE_SEPARATOR);
                    }
                    s.push_str(&literal_to_index_string(value));
                    next.push(s);
                }
            }
            joined = next;
        }
        joined
    }

    /// Stores a record without touching the index (an index hole in data
    /// form: the record exists, the index does not know it).
    pub fn load_unindexed(&mut self, record: Record) {
        self.records.insert(record.key.clone(), record);
    }

    /// Adds a raw index entry.
    pub fn index_entry(&mut self, field: &str, value: String, key: RecordKey) {
        self.index
            .entry(field.to_string())
            .or_default()
            .entry(value)
            .or_default()
            .insert(key);
    }

    /// Emit a yield after every `n` records in record scans.
    pub fn yield_every(&mut self, n: usize) {
        self.yield_every = Some(n);
    }

    /// Defect script: resumed record scans start from the beginning of the
    /// range instead of after the resume key.
    pub fn misbehave_on_resume(&self) {
        self.ignore_resume.store(true, AtomicOrdering::SeqCst);
    }

    /// One-shot script: the next index scan fails with
    /// [`ScanError::Interrupted`] after `n` entries.
    pub fn interrupt_index_after(&self, n: usize) {
        *self.interrupt_index_after.lock().unwrap() = Some(n);
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    fn bound_matches(bound: &TermBound, pattern: Option<&Regex>, value: &str) -> bool {
        match bound {
            TermBound::Value(v) => value == v,
            TermBound::Range {
                lower,
                upper,
                lower_inclusive,
                upper_inclusive,
            } => {
                let above = if *lower_inclusive {
                    value >= lower.as_str()
                } else {
                    value > lower.as_str()
                };
                let below = if *upper_inclusive {
                    value <= upper.as_str()
                } else {
                    value < upper.as_str()
                };
                above && below
            }
            TermBound::Pattern(_) => pattern
                .map(|re| re.is_match(value))
                .unwrap_or(false),
        }
    }
}

impl ScanSource for MemoryScanSource {
    fn seek_index(
        &self,
        field: &str,
        bound: &TermBound,
        range: &ShardRange,
    ) -> ScanResult<Box<dyn IndexCursor>> {
        let pattern = match bound {
            TermBound::Pattern(p) => Some(
                Regex::new(&format!("^(?:{})$", p))
                    .map_err(|e| ScanError::Io(format!("bad index pattern: {}", e)))?,
            ),
            _ => None,
        };

        let mut entries = Vec::new();
        if let Some(values) = self.index.get(field) {
            for (value, keys) in values {
                if !Self::bound_matches(bound, pattern.as_ref(), value) {
                    continue;
                }
                for key in keys {
                    if range.contains(&key.shard) {
                        entries.push((value.clone(), key.clone()));
                    }
                }
            }
        }

        let interrupt_after = self.interrupt_index_after.lock().unwrap().take();
        Ok(Box::new(MemoryIndexCursor {
            entries: entries.into_iter(),
            interrupt_after,
        }))
    }

    fn seek_records(
        &self,
        range: &ShardRange,
        resume_after: Option<&RecordKey>,
    ) -> ScanResult<Box<dyn RecordCursor>> {
        let resume = if self.ignore_resume.load(AtomicOrdering::SeqCst) {
            None
        } else {
            resume_after
        };

        let records: Vec<Record> = self
            .records
            .values()
            .filter(|r| range.contains(&r.key.shard))
            .filter(|r| resume.map(|after| r.key > *after).unwrap_or(true))
            .cloned()
            .collect();

        Ok(Box::new(MemoryRecordCursor {
            records: records.into_iter(),
            yield_every: self.yield_every,
            emitted: 0,
            spent: false,
            last_key: None,
        }))
    }
}

struct MemoryIndexCursor {
    entries: std::vec::IntoIter<(String, RecordKey)>,
    interrupt_after: Option<usize>,
}

impl IndexCursor for MemoryIndexCursor {
    fn next_entry(&mut self) -> ScanResult<Option<(String, RecordKey)>> {
        if let Some(remaining) = self.interrupt_after {
            if remaining == 0 {
                self.interrupt_after = None;
                return Err(ScanError::Interrupted("source torn down".into()));
            }
            self.interrupt_after = Some(remaining - 1);
        }
        Ok(self.entries.next())
    }
}

struct MemoryRecordCursor {
    records: std::vec::IntoIter<Record>,
    yield_every: Option<usize>,
    emitted: usize,
    spent: bool,
    last_key: Option<RecordKey>,
}

impl RecordCursor for MemoryRecordCursor {
    fn next_event(&mut self) -> ScanResult<Option<ScanEvent>> {
        if self.spent {
            return Ok(None);
        }
        if let (Some(every), Some(last)) = (self.yield_every, self.last_key.as_ref()) {
            if self.emitted > 0 && self.emitted % every == 0 {
                self.spent = true;
                return Ok(Some(ScanEvent::Yield(last.clone())));
            }
        }
        match self.records.next() {
            Some(record) => {
                self.emitted += 1;
                self.last_key = Some(record.key.clone());
                Ok(Some(ScanEvent::Record(record)))
            }
            None => Ok(None),
        }
    }
}
