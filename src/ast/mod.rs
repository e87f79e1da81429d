//! Query tree model
//!
//! Immutable boolean expression tree over leaf predicates, the marker
//! taxonomy used to annotate planner decisions, and boolean-structure
//! normalization. Rewrites are pure tree reconstruction.

mod marker;
mod node;
mod normalize;

pub use marker::{MarkerKind, SetRef};
pub use node::{compare_literals, literal_to_index_string, AstError, FieldRef, QueryNode};
pub use normalize::{flatten, normalize, push_negations};
