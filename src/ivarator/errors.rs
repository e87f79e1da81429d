//! Materialization errors

use thiserror::Error;

use crate::scan::ScanError;

pub type MaterializeResult<T> = Result<T, MaterializeError>;

/// Errors raised while building or opening a materialized set.
#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("Materialization failed: {0}")]
    Failed(String),

    #[error("Materialization scan timed out after {0}ms")]
    Timeout(u64),

    #[error("No scan source available after {0}ms")]
    PoolExhausted(u64),

    #[error("Materialization abandoned after {attempts} interrupted attempts")]
    Interrupted { attempts: u32 },

    #[error("Materialization I/O failure: {0}")]
    Io(String),

    #[error("Corrupt run file: {path}")]
    Corrupt { path: String },

    #[error("Set directory '{dir}' has no completion marker")]
    Incomplete { dir: String },
}

impl From<std::io::Error> for MaterializeError {
    fn from(err: std::io::Error) -> Self {
        MaterializeError::Io(err.to_string())
    }
}

impl From<ScanError> for MaterializeError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::Timeout(ms) => MaterializeError::Timeout(ms),
            other => MaterializeError::Failed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_timeout_maps_to_timeout() {
        let err: MaterializeError = ScanError::Timeout(1500).into();
        assert!(matches!(err, MaterializeError::Timeout(1500)));
    }
}
