//! Engine metrics
//!
//! Atomic counters over planning, materialization, and evaluation.
//! Snapshots are plain structs so tests can assert on exact counts.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter registry shared across engine components.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    terms_expanded: AtomicU64,
    value_threshold_markers: AtomicU64,
    or_threshold_markers: AtomicU64,
    term_threshold_markers: AtomicU64,
    index_holes_applied: AtomicU64,
    composites_folded: AtomicU64,
    ivarator_builds: AtomicU64,
    ivarator_reuses: AtomicU64,
    ivarator_retries: AtomicU64,
    yields_observed: AtomicU64,
    keys_returned: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_terms_expanded(&self) {
        self.terms_expanded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_value_threshold_markers(&self) {
        self.value_threshold_markers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_or_threshold_markers(&self) {
        self.or_threshold_markers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_term_threshold_markers(&self) {
        self.term_threshold_markers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_index_holes_applied(&self) {
        self.index_holes_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_composites_folded(&self) {
        self.composites_folded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_ivarator_builds(&self) {
        self.ivarator_builds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_ivarator_reuses(&self) {
        self.ivarator_reuses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_ivarator_retries(&self) {
        self.ivarator_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_yields_observed(&self) {
        self.yields_observed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_keys_returned(&self, n: u64) {
        self.keys_returned.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            terms_expanded: self.terms_expanded.load(Ordering::Relaxed),
            value_threshold_markers: self.value_threshold_markers.load(Ordering::Relaxed),
            or_threshold_markers: self.or_threshold_markers.load(Ordering::Relaxed),
            term_threshold_markers: self.term_threshold_markers.load(Ordering::Relaxed),
            index_holes_applied: self.index_holes_applied.load(Ordering::Relaxed),
            composites_folded: self.composites_folded.load(Ordering::Relaxed),
            ivarator_builds: self.ivarator_builds.load(Ordering::Relaxed),
            ivarator_reuses: self.ivarator_reuses.load(Ordering::Relaxed),
            ivarator_retries: self.ivarator_retries.load(Ordering::Relaxed),
            yields_observed: self.yields_observed.load(Ordering::Relaxed),
            keys_returned: self.keys_returned.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub terms_expanded: u64,
    pub value_threshold_markers: u64,
    pub or_threshold_markers: u64,
    pub term_threshold_markers: u64,
    pub index_holes_applied: u64,
    pub composites_folded: u64,
    pub ivarator_builds: u64,
    pub ivarator_reuses: u64,
    pub ivarator_retries: u64,
    pub yields_observed: u64,
    pub keys_returned: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = MetricsRegistry::new();
        metrics.incr_ivarator_builds();
        metrics.incr_ivarator_reuses();
        metrics.incr_ivarator_reuses();
        metrics.add_keys_returned(5);

        let snap = metrics.snapshot();
        assert_eq!(snap.ivarator_builds, 1);
        assert_eq!(snap.ivarator_reuses, 2);
        assert_eq!(snap.keys_returned, 5);
    }
}
