//! Planner error types
//!
//! Error codes:
//! - SIEVE_PLAN_INVALID (FATAL)
//! - SIEVE_FULL_TABLE_SCAN_DISALLOWED (REJECT)
//! - SIEVE_EXPANSION_THRESHOLD_EXCEEDED (REJECT)
//! - SIEVE_MATERIALIZATION_FAILED (ERROR)
//! - SIEVE_PLANNING_SCAN_FAILED (ERROR)

use std::fmt;

use crate::expand::ExpandError;
use crate::ivarator::MaterializeError;

pub type PlanResult<T> = Result<T, PlannerError>;

/// Severity levels for planner errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Client request rejected; relaxing limits may make it plannable
    Reject,
    /// Transient planning failure; the caller may retry
    Error,
    /// Structurally invalid input; never retried
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Reject => write!(f, "REJECT"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Planner-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerErrorCode {
    /// Malformed query tree (empty junction, inverted range bounds)
    SievePlanInvalid,
    /// A branch requires an unconstrained shard scan and the caller
    /// forbids full scans
    SieveFullTableScanDisallowed,
    /// Expansion exceeded its threshold with no permitted fallback
    SieveExpansionThresholdExceeded,
    /// An ivarator build failed and the leaf could not degrade
    SieveMaterializationFailed,
    /// The index scan backing expansion failed
    SievePlanningScanFailed,
}

impl PlannerErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            PlannerErrorCode::SievePlanInvalid => "SIEVE_PLAN_INVALID",
            PlannerErrorCode::SieveFullTableScanDisallowed => "SIEVE_FULL_TABLE_SCAN_DISALLOWED",
            PlannerErrorCode::SieveExpansionThresholdExceeded => {
                "SIEVE_EXPANSION_THRESHOLD_EXCEEDED"
            }
            PlannerErrorCode::SieveMaterializationFailed => "SIEVE_MATERIALIZATION_FAILED",
            PlannerErrorCode::SievePlanningScanFailed => "SIEVE_PLANNING_SCAN_FAILED",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            PlannerErrorCode::SievePlanInvalid => Severity::Fatal,
            PlannerErrorCode::SieveFullTableScanDisallowed
            | PlannerErrorCode::SieveExpansionThresholdExceeded => Severity::Reject,
            PlannerErrorCode::SieveMaterializationFailed
            | PlannerErrorCode::SievePlanningScanFailed => Severity::Error,
        }
    }

    /// True when the caller can change something (limits, flags, retry)
    /// and resubmit the same query.
    pub fn recoverable(&self) -> bool {
        !matches!(self.severity(), Severity::Fatal)
    }
}

impl fmt::Display for PlannerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Planner error with full context
#[derive(Debug, Clone)]
pub struct PlannerError {
    code: PlannerErrorCode,
    message: String,
    field: Option<String>,
}

impl PlannerError {
    pub fn plan_invalid(reason: impl Into<String>) -> Self {
        Self {
            code: PlannerErrorCode::SievePlanInvalid,
            message: reason.into(),
            field: None,
        }
    }

    pub fn full_table_scan(reason: impl Into<String>) -> Self {
        Self {
            code: PlannerErrorCode::SieveFullTableScanDisallowed,
            message: reason.into(),
            field: None,
        }
    }

    pub fn threshold_exceeded(field: impl Into<String>, limit: usize) -> Self {
        let f = field.into();
        Self {
            code: PlannerErrorCode::SieveExpansionThresholdExceeded,
            message: format!("Expansion of '{}' exceeded threshold {}", f, limit),
            field: Some(f),
        }
    }

    pub fn materialization_failed(reason: impl Into<String>) -> Self {
        Self {
            code: PlannerErrorCode::SieveMaterializationFailed,
            message: reason.into(),
            field: None,
        }
    }

    pub fn scan_failed(reason: impl Into<String>) -> Self {
        Self {
            code: PlannerErrorCode::SievePlanningScanFailed,
            message: reason.into(),
            field: None,
        }
    }

    pub fn code(&self) -> PlannerErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }
}

impl fmt::Display for PlannerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)
    }
}

impl std::error::Error for PlannerError {}

impl From<ExpandError> for PlannerError {
    fn from(err: ExpandError) -> Self {
        match err {
            ExpandError::ThresholdExceeded { field, limit } => {
                PlannerError::threshold_exceeded(field, limit)
            }
            ExpandError::FatalPlanning { reason } => PlannerError::plan_invalid(reason),
            ExpandError::Scan(e) => PlannerError::scan_failed(e.to_string()),
        }
    }
}

impl From<MaterializeError> for PlannerError {
    fn from(err: MaterializeError) -> Self {
        PlannerError::materialization_failed(err.to_string())
    }
}
