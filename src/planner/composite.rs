//! Composite-field folding
//!
//! A composite group declares that its member fields are jointly indexed
//! under a single composite key. When one And's direct children carry an
//! equality for every member, those children collapse into one composite
//! equality. Folding never crosses an Or boundary and never fires on a
//! partial group; both change query semantics.

use serde_json::Value;

use crate::ast::{literal_to_index_string, FieldRef, QueryNode};
use crate::metadata::{composite_field_name, MetadataOracle, COMPOSITE_SEPARATOR};

/// Folds every eligible composite group in the tree. Returns the new tree
/// and the number of folds performed.
pub fn fold_composites(node: &QueryNode, oracle: &dyn MetadataOracle) -> (QueryNode, usize) {
    match node {
        QueryNode::And(children) => {
            let mut folded = 0usize;
            let mut rewritten: Vec<QueryNode> = children
                .iter()
                .map(|c| {
                    let (n, f) = fold_composites(c, oracle);
                    folded += f;
                    n
                })
                .collect();
            folded += fold_and_level(&mut rewritten, oracle);
            let node = if rewritten.len() == 1 {
                rewritten.pop().unwrap()
            } else {
                QueryNode::And(rewritten)
            };
            (node, folded)
        }
        QueryNode::Or(children) => {
            let mut folded = 0usize;
            let rewritten = children
                .iter()
                .map(|c| {
                    let (n, f) = fold_composites(c, oracle);
                    folded += f;
                    n
                })
                .collect();
            (QueryNode::Or(rewritten), folded)
        }
        QueryNode::Not(child) => {
            let (n, f) = fold_composites(child, oracle);
            (QueryNode::not(n), f)
        }
        other => (other.clone(), 0),
    }
}

/// Collapses complete groups among one And's direct children, in place.
fn fold_and_level(children: &mut Vec<QueryNode>, oracle: &dyn MetadataOracle) -> usize {
    let mut folded = 0usize;
    loop {
        let Some((members, positions)) = find_complete_group(children, oracle) else {
            break;
        };
        // positions are in declared member order.
        let values: Vec<String> = positions
            .iter()
            .map(|&idx| match &children[idx] {
                QueryNode::Eq { value, .. } => literal_to_index_string(value),
                _ => unreachable!("positions only index equality children"),
            })
            .collect();
        let composite = QueryNode::eq(
            composite_field_name(&members),
            Value::String(values.join(&COMPOSITE_SEPARATOR.to_string())),
        );

        // Replace the first member's child, drop the rest back to front so
        // positions stay valid.
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        children[sorted[0]] = composite;
        for idx in sorted.iter().skip(1).rev() {
            children.remove(*idx);
        }
        folded += 1;
    }
    folded
}

/// First declared group whose every member field has an equality among
/// the direct children. Returns the member list in declared order plus
/// the child position of each member.
fn find_complete_group(
    children: &[QueryNode],
    oracle: &dyn MetadataOracle,
) -> Option<(Vec<String>, Vec<usize>)> {
    for (i, child) in children.iter().enumerate() {
        let QueryNode::Eq {
            field: FieldRef::Named(name),
            ..
        } = child
        else {
            continue;
        };
        let Some(meta) = oracle.lookup(name) else {
            continue;
        };
        'group: for group in &meta.composite_groups {
            if group.len() < 2 {
                continue;
            }
            // Folding is only sound when the composite index itself is
            // declared; the joined value lives nowhere on the record.
            if !oracle
                .lookup(&composite_field_name(group))
                .map_or(false, |m| m.indexed)
            {
                continue;
            }
            let mut positions = Vec::with_capacity(group.len());
            for member in group {
                let pos = children.iter().position(|c| {
                    matches!(
                        c,
                        QueryNode::Eq {
                            field: FieldRef::Named(n),
                            ..
                        } if n == member
                    )
                });
                match pos {
                    Some(p) => positions.push(p),
                    None => continue 'group,
                }
            }
            // The first member must be the child that led us here, so each
            // group folds exactly once.
            if positions.contains(&i) {
                return Some((group.clone(), positions));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{FieldMetadata, FieldSchema, StaticOracle};
    use serde_json::json;

    fn oracle() -> StaticOracle {
        let group = vec!["GEO".to_string(), "CODE".to_string()];
        StaticOracle::new(
            FieldSchema::new()
                .with_field(
                    "GEO",
                    FieldMetadata::indexed_field().with_composite_group(group.clone()),
                )
                .with_field(
                    "CODE",
                    FieldMetadata::indexed_field().with_composite_group(group),
                )
                .with_field(
                    "GEO_CODE",
                    FieldMetadata::indexed_field().with_index_only(),
                )
                .with_field("CITY", FieldMetadata::indexed_field()),
        )
    }

    #[test]
    fn test_folds_complete_group_under_and() {
        let tree = QueryNode::and(vec![
            QueryNode::eq("GEO", json!("zone-4")),
            QueryNode::eq("CODE", json!("usa")),
            QueryNode::eq("CITY", json!("rome")),
        ]);
        let (folded, count) = fold_composites(&tree, &oracle());
        assert_eq!(count, 1);
        let QueryNode::And(children) = folded else {
            panic!("expected And");
        };
        assert_eq!(children.len(), 2);
        assert!(children.iter().any(|c| matches!(
            c,
            QueryNode::Eq { field: FieldRef::Named(n), value }
                if n == "GEO_CODE" && *value == json!("zone-4\u{0}usa")
        )));
    }

    #[test]
    fn test_no_fold_across_or_boundary() {
        let tree = QueryNode::or(vec![
            QueryNode::eq("GEO", json!("zone-4")),
            QueryNode::eq("CODE", json!("usa")),
        ]);
        let (folded, count) = fold_composites(&tree, &oracle());
        assert_eq!(count, 0);
        assert_eq!(folded, tree);
    }

    #[test]
    fn test_no_fold_without_declared_composite_index() {
        let group = vec!["GEO".to_string(), "CODE".to_string()];
        let bare = StaticOracle::new(
            FieldSchema::new()
                .with_field(
                    "GEO",
                    FieldMetadata::indexed_field().with_composite_group(group.clone()),
                )
                .with_field(
                    "CODE",
                    FieldMetadata::indexed_field().with_composite_group(group),
                ),
        );
        let tree = QueryNode::and(vec![
            QueryNode::eq("GEO", json!("zone-4")),
            QueryNode::eq("CODE", json!("usa")),
        ]);
        let (_, count) = fold_composites(&tree, &bare);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_no_fold_on_partial_group() {
        let tree = QueryNode::and(vec![
            QueryNode::eq("GEO", json!("zone-4")),
            QueryNode::eq("CITY", json!("rome")),
        ]);
        let (_, count) = fold_composites(&tree, &oracle());
        assert_eq!(count, 0);
    }

    #[test]
    fn test_no_fold_when_member_nested_under_or() {
        let tree = QueryNode::and(vec![
            QueryNode::eq("GEO", json!("zone-4")),
            QueryNode::or(vec![
                QueryNode::eq("CODE", json!("usa")),
                QueryNode::eq("CITY", json!("rome")),
            ]),
        ]);
        let (_, count) = fold_composites(&tree, &oracle());
        assert_eq!(count, 0);
    }
}
