//! Index metadata oracle
//!
//! Read-only lookup the planner consults per field: index flags plus a
//! cardinality estimate per (field, bound). The backing store is external;
//! lookups are cached for the query's lifetime.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::scan::TermBound;

use super::fields::{FieldMetadata, FieldSchema};

/// Metadata lookup interface supplied by the caller.
pub trait MetadataOracle {
    fn lookup(&self, field: &str) -> Option<FieldMetadata>;

    /// Estimated number of distinct index values matching the bound.
    /// Estimates guide strategy selection only; results never depend on
    /// their accuracy.
    fn estimate_cardinality(&self, field: &str, bound: &TermBound) -> u64;

    /// All forward-indexed field names, used to expand any-field leaves.
    fn indexed_fields(&self) -> Vec<String>;
}

/// Oracle backed by a static schema and a per-field cardinality table.
#[derive(Debug, Clone, Default)]
pub struct StaticOracle {
    schema: FieldSchema,
    cardinalities: HashMap<String, u64>,
}

impl StaticOracle {
    pub fn new(schema: FieldSchema) -> Self {
        Self {
            schema,
            cardinalities: HashMap::new(),
        }
    }

    /// Declares the distinct-value estimate for one field.
    pub fn with_cardinality(mut self, field: impl Into<String>, estimate: u64) -> Self {
        self.cardinalities.insert(field.into(), estimate);
        self
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }
}

impl MetadataOracle for StaticOracle {
    fn lookup(&self, field: &str) -> Option<FieldMetadata> {
        self.schema.get(field).cloned()
    }

    fn estimate_cardinality(&self, field: &str, bound: &TermBound) -> u64 {
        let total = self.cardinalities.get(field).copied().unwrap_or(0);
        match bound {
            TermBound::Value(_) => 1.min(total),
            // Without value histograms, ranges and patterns are assumed to
            // touch the whole field.
            TermBound::Range { .. } | TermBound::Pattern(_) => total,
        }
    }

    fn indexed_fields(&self) -> Vec<String> {
        self.schema
            .indexed_fields()
            .into_iter()
            .map(String::from)
            .collect()
    }
}

/// Memoizing wrapper for an oracle whose lookups are expensive.
pub struct CachedOracle<O: MetadataOracle> {
    inner: O,
    lookups: RefCell<HashMap<String, Option<FieldMetadata>>>,
}

impl<O: MetadataOracle> CachedOracle<O> {
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            lookups: RefCell::new(HashMap::new()),
        }
    }
}

impl<O: MetadataOracle> MetadataOracle for CachedOracle<O> {
    fn lookup(&self, field: &str) -> Option<FieldMetadata> {
        if let Some(cached) = self.lookups.borrow().get(field) {
            return cached.clone();
        }
        let fresh = self.inner.lookup(field);
        self.lookups
            .borrow_mut()
            .insert(field.to_string(), fresh.clone());
        fresh
    }

    fn estimate_cardinality(&self, field: &str, bound: &TermBound) -> u64 {
        self.inner.estimate_cardinality(field, bound)
    }

    fn indexed_fields(&self) -> Vec<String> {
        self.inner.indexed_fields()
    }
}
