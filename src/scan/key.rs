//! Record keys, records, and shard ranges
//!
//! A record key addresses one record in the store: shard partition (date
//! plus partition suffix, `yyyymmdd_N`), datatype, and record uid. Ordering
//! is lexicographic over (shard, datatype, uid), matching the store's sort.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fully-qualified record identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub shard: String,
    pub datatype: String,
    pub uid: String,
}

impl RecordKey {
    pub fn new(
        shard: impl Into<String>,
        datatype: impl Into<String>,
        uid: impl Into<String>,
    ) -> Self {
        Self {
            shard: shard.into(),
            datatype: datatype.into(),
            uid: uid.into(),
        }
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.shard, self.datatype, self.uid)
    }
}

/// One record as handed to the evaluator: multi-valued fields plus the
/// opaque visibility string checked by the authorization filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: RecordKey,
    pub fields: BTreeMap<String, Vec<Value>>,
    pub visibility: String,
}

impl Record {
    pub fn new(key: RecordKey) -> Self {
        Self {
            key,
            fields: BTreeMap::new(),
            visibility: String::new(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>, value: Value) -> Self {
        self.fields.entry(field.into()).or_default().push(value);
        self
    }

    pub fn with_visibility(mut self, visibility: impl Into<String>) -> Self {
        self.visibility = visibility.into();
        self
    }

    /// Values for a field; empty slice when absent.
    pub fn values(&self, field: &str) -> &[Value] {
        self.fields.get(field).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

/// Inclusive range of shard partitions, the planning and evaluation unit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardRange {
    pub start: String,
    pub end: String,
}

impl ShardRange {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Range covering a single shard partition.
    pub fn single(shard: impl Into<String>) -> Self {
        let s = shard.into();
        Self {
            start: s.clone(),
            end: s,
        }
    }

    pub fn contains(&self, shard: &str) -> bool {
        self.start.as_str() <= shard && shard <= self.end.as_str()
    }

    /// Parses the date prefix of the range start (`yyyymmdd`). Returns
    /// None for shard ids that do not carry a date prefix.
    pub fn start_date(&self) -> Option<NaiveDate> {
        shard_date(&self.start)
    }

    pub fn end_date(&self) -> Option<NaiveDate> {
        shard_date(&self.end)
    }
}

impl std::fmt::Display for ShardRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}..{}", self.start, self.end)
        }
    }
}

/// Date prefix of a shard partition id. None when the id is too short or
/// its first 8 bytes do not fall on character boundaries.
pub fn shard_date(shard: &str) -> Option<NaiveDate> {
    let prefix = shard.get(..8)?;
    NaiveDate::parse_from_str(prefix, "%Y%m%d").ok()
}
