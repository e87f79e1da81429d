//! Scan error types

use thiserror::Error;

/// Result type for scan operations
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors surfaced by scan sources and cursors.
#[derive(Debug, Clone, Error)]
pub enum ScanError {
    /// The underlying source was torn down mid-scan; the consumer may
    /// restart the scan cleanly.
    #[error("Scan source interrupted: {0}")]
    Interrupted(String),

    #[error("Scan timed out after {0}ms")]
    Timeout(u64),

    #[error("Scan I/O failure: {0}")]
    Io(String),

    #[error("Scan source is closed")]
    SourceClosed,
}

impl ScanError {
    /// True when the same scan may be restarted and is expected to succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScanError::Interrupted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_interruptions_retryable() {
        assert!(ScanError::Interrupted("rebuild".into()).is_retryable());
        assert!(!ScanError::Timeout(500).is_retryable());
        assert!(!ScanError::Io("disk".into()).is_retryable());
    }
}
