//! Expansion thresholds
//!
//! Integer ceilings on how many literal values a single leaf may expand
//! into before the planner falls back to deferred or materialized
//! evaluation. Supplied per query, immutable for its lifetime.

/// Expansion ceilings. A threshold compares against the count of distinct
/// index values (or union branches) produced for one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpansionThresholds {
    /// Max distinct values a single-field leaf may enumerate.
    pub max_value_expansion: usize,
    /// Max branches an any-field union may carry.
    pub max_or_expansion: usize,
    /// Upper ceiling for a union past `max_or_expansion`: up to here the
    /// member fields are materialized, beyond it the union is abandoned
    /// wholesale.
    pub max_or_expansion_fst: usize,
    /// Max distinct values a bounded range may enumerate.
    pub max_range_expansion: usize,
}

impl ExpansionThresholds {
    /// Effectively unbounded; used to compare plans against the
    /// no-threshold baseline.
    pub fn unlimited() -> Self {
        Self {
            max_value_expansion: usize::MAX,
            max_or_expansion: usize::MAX,
            max_or_expansion_fst: usize::MAX,
            max_range_expansion: usize::MAX,
        }
    }

    /// Uniform ceilings, handy in tests.
    pub fn uniform(n: usize) -> Self {
        Self {
            max_value_expansion: n,
            max_or_expansion: n,
            max_or_expansion_fst: n,
            max_range_expansion: n,
        }
    }
}

impl Default for ExpansionThresholds {
    fn default() -> Self {
        Self {
            max_value_expansion: 50,
            max_or_expansion: 500,
            max_or_expansion_fst: 750,
            max_range_expansion: 50,
        }
    }
}
