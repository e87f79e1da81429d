//! Planner property markers
//!
//! A marker wraps the node it replaces and tells the evaluation pipeline
//! how the wrapped predicate is to be resolved: directly against the raw
//! record, or through a materialized candidate set.

use std::fmt;

/// Reference to a materialized set in a shard query's set table.
///
/// The value is the hex digest of the materialization request, so identical
/// requests across shards and queries resolve to the same cache directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SetRef(String);

impl SetRef {
    pub fn new(digest: impl Into<String>) -> Self {
        SetRef(digest.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The marker taxonomy.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerKind {
    /// Evaluate the wrapped predicate against the raw record at scan time;
    /// the index is not consulted.
    Delayed,
    /// Like [`MarkerKind::Delayed`], but chosen by the planner as a
    /// whole-branch fallback when full scans are permitted.
    EvaluationOnly,
    /// The index is declared incomplete for this shard/datatype window;
    /// raw-record evaluation is forced.
    IndexHole,
    /// The index proved the wrapped predicate matches nothing in this
    /// range; the branch resolves to no candidates without a scan.
    EmptyIndex,
    /// Value expansion exceeded its threshold; when `set` is present the
    /// predicate resolves through that materialized set.
    ExceededValue { set: Option<SetRef> },
    /// An any-field union exceeded the Or threshold; each member field
    /// resolved to its own materialized set.
    ExceededOr { sets: Vec<SetRef> },
    /// Term expansion was abandoned wholesale; the wrapped predicate is
    /// evaluated per record.
    ExceededTerm,
}

impl MarkerKind {
    /// True when the wrapped predicate is answered from the raw record.
    /// An `ExceededValue` without a set is a threshold hit that degraded
    /// to raw-record evaluation.
    pub fn is_deferred(&self) -> bool {
        matches!(
            self,
            MarkerKind::Delayed
                | MarkerKind::EvaluationOnly
                | MarkerKind::IndexHole
                | MarkerKind::ExceededTerm
                | MarkerKind::ExceededValue { set: None }
        )
    }

    /// True when the wrapped predicate is answered from materialized sets.
    pub fn is_materialized(&self) -> bool {
        matches!(
            self,
            MarkerKind::ExceededValue { set: Some(_) } | MarkerKind::ExceededOr { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            MarkerKind::Delayed => "DELAYED",
            MarkerKind::EvaluationOnly => "EVALUATION_ONLY",
            MarkerKind::IndexHole => "INDEX_HOLE",
            MarkerKind::EmptyIndex => "EMPTY_INDEX",
            MarkerKind::ExceededValue { .. } => "EXCEEDED_VALUE",
            MarkerKind::ExceededOr { .. } => "EXCEEDED_OR",
            MarkerKind::ExceededTerm => "EXCEEDED_TERM",
        }
    }
}

impl fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}
