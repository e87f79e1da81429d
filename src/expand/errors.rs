//! Term expansion errors

use thiserror::Error;

use crate::scan::ScanError;

pub type ExpandResult<T> = Result<T, ExpandError>;

/// Errors raised while expanding a single leaf predicate.
#[derive(Debug, Error)]
pub enum ExpandError {
    /// Expansion exceeded its threshold and no deferred or materialized
    /// fallback is permitted for this leaf.
    #[error("Expansion of '{field}' exceeded threshold {limit} with no permitted fallback")]
    ThresholdExceeded { field: String, limit: usize },

    /// Structurally invalid leaf (inverted range bounds, malformed
    /// pattern). Never retried.
    #[error("Fatal planning error: {reason}")]
    FatalPlanning { reason: String },

    #[error("Index scan failed during expansion: {0}")]
    Scan(#[from] ScanError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = ExpandError::ThresholdExceeded {
            field: "CITY".into(),
            limit: 5,
        };
        assert!(err.to_string().contains("CITY"));
        assert!(err.to_string().contains('5'));
    }
}
