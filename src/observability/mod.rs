//! Observability
//!
//! Structured logging and deterministic metrics for the engine.
//!
//! Principles:
//! 1. Observability is read-only; no side effects on planning or results.
//! 2. Synchronous output, no background threads.
//! 3. One log line = one event.

mod logger;
mod metrics;

pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
