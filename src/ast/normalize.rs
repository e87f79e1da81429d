//! Boolean structure normalization
//!
//! First rewrite pass: flatten nested junctions of the same kind and push
//! negations down to leaves that negate directly (Eq/Ne, Regex/NotRegex).
//! Negations over leaves without a direct negative form (ranges, functions)
//! stay wrapped in `Not`; the positive form is what gets expanded later,
//! never the complement.

use super::node::QueryNode;

/// Flattens same-kind junction nesting and unwraps single-child junctions.
pub fn flatten(node: QueryNode) -> QueryNode {
    match node {
        QueryNode::And(children) => {
            let mut flat = Vec::with_capacity(children.len());
            for child in children {
                match flatten(child) {
                    QueryNode::And(grand) => flat.extend(grand),
                    other => flat.push(other),
                }
            }
            if flat.len() == 1 {
                flat.pop().unwrap()
            } else {
                QueryNode::And(flat)
            }
        }
        QueryNode::Or(children) => {
            let mut flat = Vec::with_capacity(children.len());
            for child in children {
                match flatten(child) {
                    QueryNode::Or(grand) => flat.extend(grand),
                    other => flat.push(other),
                }
            }
            if flat.len() == 1 {
                flat.pop().unwrap()
            } else {
                QueryNode::Or(flat)
            }
        }
        QueryNode::Not(child) => QueryNode::not(flatten(*child)),
        QueryNode::Marker { kind, source } => QueryNode::marker(kind, flatten(*source)),
        leaf => leaf,
    }
}

/// Pushes `Not` toward the leaves, applying De Morgan over junctions and
/// double-negation elimination.
pub fn push_negations(node: QueryNode) -> QueryNode {
    push(node, false)
}

fn push(node: QueryNode, negated: bool) -> QueryNode {
    match node {
        QueryNode::Not(child) => push(*child, !negated),
        QueryNode::And(children) => {
            let rewritten: Vec<QueryNode> = children.into_iter().map(|c| push(c, negated)).collect();
            if negated {
                QueryNode::Or(rewritten)
            } else {
                QueryNode::And(rewritten)
            }
        }
        QueryNode::Or(children) => {
            let rewritten: Vec<QueryNode> = children.into_iter().map(|c| push(c, negated)).collect();
            if negated {
                QueryNode::And(rewritten)
            } else {
                QueryNode::Or(rewritten)
            }
        }
        QueryNode::Eq { field, value } if negated => QueryNode::Ne { field, value },
        QueryNode::Ne { field, value } if negated => QueryNode::Eq { field, value },
        QueryNode::Regex { field, pattern } if negated => QueryNode::NotRegex { field, pattern },
        QueryNode::NotRegex { field, pattern } if negated => QueryNode::Regex { field, pattern },
        // Markers are opaque to negation push-down; the negation stays
        // outside so the marker's resolution strategy is unchanged.
        other => {
            if negated {
                QueryNode::not(other)
            } else {
                other
            }
        }
    }
}

/// Full normalization: negation push-down followed by flattening.
pub fn normalize(node: QueryNode) -> QueryNode {
    flatten(push_negations(node))
}
