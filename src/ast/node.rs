//! Boolean query tree
//!
//! The tree is immutable after construction: every rewrite pass builds new
//! nodes and leaves its input untouched, so concurrent planning over
//! independent shard ranges needs no locking and structural equality stays
//! trivial to assert in tests.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

use super::marker::MarkerKind;

/// Field reference carried by every leaf predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldRef {
    /// A concrete field name.
    Named(String),
    /// The "any field" sentinel; expanded per concrete indexed field.
    AnyField,
}

impl FieldRef {
    pub fn named(name: impl Into<String>) -> Self {
        FieldRef::Named(name.into())
    }

    /// Returns the concrete field name, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            FieldRef::Named(n) => Some(n),
            FieldRef::AnyField => None,
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, FieldRef::AnyField)
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldRef::Named(n) => write!(f, "{}", n),
            FieldRef::AnyField => write!(f, "ANY_FIELD"),
        }
    }
}

/// A node in the boolean query tree.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    /// field == value
    Eq { field: FieldRef, value: Value },
    /// field != value
    Ne { field: FieldRef, value: Value },
    /// Bounded range over one field.
    Range {
        field: FieldRef,
        lower: Value,
        upper: Value,
        lower_inclusive: bool,
        upper_inclusive: bool,
    },
    /// field =~ pattern
    Regex { field: FieldRef, pattern: String },
    /// field !~ pattern
    NotRegex { field: FieldRef, pattern: String },
    And(Vec<QueryNode>),
    Or(Vec<QueryNode>),
    Not(Box<QueryNode>),
    /// Opaque filter function, evaluated by the caller-supplied handler.
    Function { name: String, args: Vec<Value> },
    /// Planner annotation wrapping the node it replaces.
    Marker {
        kind: MarkerKind,
        source: Box<QueryNode>,
    },
}

impl QueryNode {
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        QueryNode::Eq {
            field: FieldRef::named(field),
            value,
        }
    }

    pub fn ne(field: impl Into<String>, value: Value) -> Self {
        QueryNode::Ne {
            field: FieldRef::named(field),
            value,
        }
    }

    pub fn range(
        field: impl Into<String>,
        lower: Value,
        upper: Value,
        lower_inclusive: bool,
        upper_inclusive: bool,
    ) -> Self {
        QueryNode::Range {
            field: FieldRef::named(field),
            lower,
            upper,
            lower_inclusive,
            upper_inclusive,
        }
    }

    pub fn regex(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        QueryNode::Regex {
            field: FieldRef::named(field),
            pattern: pattern.into(),
        }
    }

    pub fn not_regex(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        QueryNode::NotRegex {
            field: FieldRef::named(field),
            pattern: pattern.into(),
        }
    }

    pub fn any_field_regex(pattern: impl Into<String>) -> Self {
        QueryNode::Regex {
            field: FieldRef::AnyField,
            pattern: pattern.into(),
        }
    }

    pub fn any_field_eq(value: Value) -> Self {
        QueryNode::Eq {
            field: FieldRef::AnyField,
            value,
        }
    }

    pub fn and(children: Vec<QueryNode>) -> Self {
        QueryNode::And(children)
    }

    pub fn or(children: Vec<QueryNode>) -> Self {
        QueryNode::Or(children)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(child: QueryNode) -> Self {
        QueryNode::Not(Box::new(child))
    }

    pub fn marker(kind: MarkerKind, source: QueryNode) -> Self {
        QueryNode::Marker {
            kind,
            source: Box::new(source),
        }
    }

    /// Returns true for atomic predicates (anything that is not a
    /// junction, negation, or marker).
    pub fn is_leaf(&self) -> bool {
        !matches!(
            self,
            QueryNode::And(_) | QueryNode::Or(_) | QueryNode::Not(_) | QueryNode::Marker { .. }
        )
    }

    /// The field referenced by a leaf, if it has one.
    pub fn leaf_field(&self) -> Option<&FieldRef> {
        match self {
            QueryNode::Eq { field, .. }
            | QueryNode::Ne { field, .. }
            | QueryNode::Range { field, .. }
            | QueryNode::Regex { field, .. }
            | QueryNode::NotRegex { field, .. } => Some(field),
            _ => None,
        }
    }

    /// Counts markers in the tree whose kind satisfies the predicate.
    pub fn count_markers(&self, pred: &dyn Fn(&MarkerKind) -> bool) -> usize {
        match self {
            QueryNode::Marker { kind, source } => {
                (if pred(kind) { 1 } else { 0 }) + source.count_markers(pred)
            }
            QueryNode::And(children) | QueryNode::Or(children) => {
                children.iter().map(|c| c.count_markers(pred)).sum()
            }
            QueryNode::Not(child) => child.count_markers(pred),
            _ => 0,
        }
    }

    /// Validates well-formedness: junctions are nonempty and range bounds
    /// are ordered under the literal comparator.
    pub fn validate(&self) -> Result<(), AstError> {
        match self {
            QueryNode::And(children) | QueryNode::Or(children) => {
                if children.is_empty() {
                    return Err(AstError::EmptyJunction);
                }
                for child in children {
                    child.validate()?;
                }
                Ok(())
            }
            QueryNode::Not(child) => child.validate(),
            QueryNode::Marker { source, .. } => source.validate(),
            QueryNode::Range {
                field,
                lower,
                upper,
                ..
            } => match compare_literals(lower, upper) {
                Some(Ordering::Greater) => Err(AstError::InvertedRange {
                    field: field.to_string(),
                }),
                Some(_) => Ok(()),
                None => Err(AstError::IncomparableBounds {
                    field: field.to_string(),
                }),
            },
            _ => Ok(()),
        }
    }
}

/// Structural defects detected by [`QueryNode::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AstError {
    #[error("And/Or node must have at least one child")]
    EmptyJunction,
    #[error("Range on '{field}' has lower bound greater than upper bound")]
    InvertedRange { field: String },
    #[error("Range on '{field}' has bounds of incomparable types")]
    IncomparableBounds { field: String },
}

/// Compares two literals under the field comparator: numbers numerically,
/// strings lexicographically, booleans false < true. Cross-type bounds are
/// incomparable.
pub fn compare_literals(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x.as_f64().and_then(|x| y.as_f64().map(|y| (x, y)))
                .and_then(|(x, y)| x.partial_cmp(&y))
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Canonical string form of a literal as it appears in the index.
pub fn literal_to_index_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}
