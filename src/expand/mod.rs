//! Term expansion
//!
//! Decides, per leaf predicate, between enumerating index values,
//! deferring to raw-record evaluation, and requesting a materialized set.

mod errors;
mod expander;
mod thresholds;

pub use errors::{ExpandError, ExpandResult};
pub use expander::{Expansion, TermExpander};
pub use thresholds::ExpansionThresholds;
