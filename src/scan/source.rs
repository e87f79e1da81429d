//! Storage-facing scan traits
//!
//! The storage engine is an external collaborator; the engine reaches it
//! through [`ScanSource`]. Index scans drive term expansion and
//! materialization; record scans drive the evaluation pipeline and support
//! cooperative yielding at key boundaries.

use super::errors::ScanResult;
use super::key::{Record, RecordKey, ShardRange};

/// Bound applied to an index scan over one field's values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TermBound {
    /// Exact value.
    Value(String),
    /// Value range in index order.
    Range {
        lower: String,
        upper: String,
        lower_inclusive: bool,
        upper_inclusive: bool,
    },
    /// Regular expression, full-match against the index value.
    Pattern(String),
}

impl TermBound {
    /// Canonical description, used as the materialization cache key input.
    pub fn describe(&self) -> String {
        match self {
            TermBound::Value(v) => format!("v:{}", v),
            TermBound::Range {
                lower,
                upper,
                lower_inclusive,
                upper_inclusive,
            } => format!(
                "r:{}{},{}{}",
                if *lower_inclusive { "[" } else { "(" },
                lower,
                upper,
                if *upper_inclusive { "]" } else { ")" },
            ),
            TermBound::Pattern(p) => format!("p:{}", p),
        }
    }
}

/// Event stream produced by a record cursor.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// Next record in key order.
    Record(Record),
    /// Cooperative suspension at a key boundary. The consumer must reseek
    /// strictly after this key; the cursor is spent.
    Yield(RecordKey),
}

/// Cursor over (value, key) pairs of one field's index, sorted by
/// (value, key).
pub trait IndexCursor {
    fn next_entry(&mut self) -> ScanResult<Option<(String, RecordKey)>>;
}

/// Cursor over records of a shard range, sorted by key.
pub trait RecordCursor {
    fn next_event(&mut self) -> ScanResult<Option<ScanEvent>>;
}

/// A handle onto the sharded store.
pub trait ScanSource {
    /// Index entries for `field` matching `bound`, restricted to keys in
    /// `range`.
    fn seek_index(
        &self,
        field: &str,
        bound: &TermBound,
        range: &ShardRange,
    ) -> ScanResult<Box<dyn IndexCursor>>;

    /// Records of `range` in key order, starting strictly after
    /// `resume_after` when present.
    fn seek_records(
        &self,
        range: &ShardRange,
        resume_after: Option<&RecordKey>,
    ) -> ScanResult<Box<dyn RecordCursor>>;
}

impl<T: ScanSource + ?Sized> ScanSource for &T {
    fn seek_index(
        &self,
        field: &str,
        bound: &TermBound,
        range: &ShardRange,
    ) -> ScanResult<Box<dyn IndexCursor>> {
        (**self).seek_index(field, bound, range)
    }

    fn seek_records(
        &self,
        range: &ShardRange,
        resume_after: Option<&RecordKey>,
    ) -> ScanResult<Box<dyn RecordCursor>> {
        (**self).seek_records(range, resume_after)
    }
}

impl<T: ScanSource + ?Sized> ScanSource for std::sync::Arc<T> {
    fn seek_index(
        &self,
        field: &str,
        bound: &TermBound,
        range: &ShardRange,
    ) -> ScanResult<Box<dyn IndexCursor>> {
        (**self).seek_index(field, bound, range)
    }

    fn seek_records(
        &self,
        range: &ShardRange,
        resume_after: Option<&RecordKey>,
    ) -> ScanResult<Box<dyn RecordCursor>> {
        (**self).seek_records(range, resume_after)
    }
}

/// Per-record visibility check, opaque to the engine.
pub trait AuthorizationFilter: Send + Sync {
    fn accept(&self, visibility: &str) -> bool;
}

/// Filter that accepts everything; the default for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl AuthorizationFilter for AcceptAll {
    fn accept(&self, _visibility: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_descriptions_distinct() {
        let a = TermBound::Value("rome".into());
        let b = TermBound::Pattern("rome".into());
        let c = TermBound::Range {
            lower: "a".into(),
            upper: "b".into(),
            lower_inclusive: true,
            upper_inclusive: false,
        };
        assert_ne!(a.describe(), b.describe());
        assert_eq!(c.describe(), "r:[a,b)");
    }
}
