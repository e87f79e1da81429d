//! Executability classification
//!
//! After expansion, every branch is classified by whether it can anchor
//! shard evaluation: an indexed equality, an enumerated union, or a
//! materialized set all narrow the candidate stream; a deferred marker
//! narrows nothing and is only admissible beside a narrowing sibling.
//! A plan whose root does not classify as executable degrades to a full
//! shard scan, which the caller must have allowed.

use crate::ast::{FieldRef, MarkerKind, QueryNode};
use crate::metadata::MetadataOracle;

/// Executability of one branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Executability {
    /// The branch anchors evaluation through the index or a set.
    Executable,
    /// A union with a mix of anchored and unanchored disjuncts; running
    /// only the anchored ones would drop results, so the branch as a
    /// whole cannot anchor.
    Partial,
    /// The branch must see every record to answer.
    NonExecutable,
    /// Contributes nothing to anchoring either way (negations beside an
    /// anchored sibling).
    Ignorable,
    /// Structurally unanswerable (empty junction).
    Error,
}

/// Classifies a rewritten tree.
pub fn classify(node: &QueryNode, oracle: &dyn MetadataOracle) -> Executability {
    match node {
        QueryNode::Eq {
            field: FieldRef::Named(name),
            ..
        }
        | QueryNode::Regex {
            field: FieldRef::Named(name),
            ..
        }
        | QueryNode::Range {
            field: FieldRef::Named(name),
            ..
        } => {
            if oracle.lookup(name).map_or(false, |m| m.indexed) {
                Executability::Executable
            } else {
                Executability::NonExecutable
            }
        }
        QueryNode::Eq { .. } | QueryNode::Regex { .. } | QueryNode::Range { .. } => {
            Executability::NonExecutable
        }
        QueryNode::Ne { .. } | QueryNode::NotRegex { .. } | QueryNode::Function { .. } => {
            Executability::NonExecutable
        }
        QueryNode::Not(_) => Executability::Ignorable,
        QueryNode::Marker { kind, .. } => {
            if kind.is_materialized()
                || matches!(kind, MarkerKind::IndexHole | MarkerKind::EmptyIndex)
            {
                // An index-hole marker legitimizes the raw scan it forces;
                // an empty-index marker is already answered.
                Executability::Executable
            } else {
                Executability::NonExecutable
            }
        }
        QueryNode::And(children) => {
            if children.is_empty() {
                return Executability::Error;
            }
            let states: Vec<Executability> = children
                .iter()
                .map(|c| classify(c, oracle))
                .collect();
            if states.contains(&Executability::Error) {
                Executability::Error
            } else if states.contains(&Executability::Executable) {
                // One anchored child narrows candidates for the rest.
                Executability::Executable
            } else if states.contains(&Executability::Partial) {
                Executability::Partial
            } else {
                Executability::NonExecutable
            }
        }
        QueryNode::Or(children) => {
            if children.is_empty() {
                return Executability::Error;
            }
            let states: Vec<Executability> = children
                .iter()
                .map(|c| classify(c, oracle))
                .collect();
            if states.contains(&Executability::Error) {
                Executability::Error
            } else if states
                .iter()
                .all(|s| matches!(s, Executability::Executable))
            {
                Executability::Executable
            } else if states
                .iter()
                .any(|s| matches!(s, Executability::Executable))
            {
                Executability::Partial
            } else {
                Executability::NonExecutable
            }
        }
    }
}
