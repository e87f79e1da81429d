//! Field metadata and composable field schemas

use std::collections::{BTreeMap, BTreeSet};

/// Per-field index metadata, immutable for the lifetime of a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMetadata {
    /// The field appears in the forward index.
    pub indexed: bool,
    /// The field also appears in the reverse index (reversed values),
    /// enabling leading-wildcard enumeration.
    pub reverse_indexed: bool,
    /// Matches are determined solely from the index; the raw record must
    /// never be consulted for this field.
    pub index_only: bool,
    /// The field may carry multiple values per record.
    pub multi_valued: bool,
    /// Composite groups this field belongs to; each group lists the member
    /// fields of one jointly-indexed composite key.
    pub composite_groups: Vec<Vec<String>>,
    /// Value-codec identifiers of the datatypes observed for this field.
    pub data_types: BTreeSet<String>,
}

impl FieldMetadata {
    /// A plain forward-indexed field.
    pub fn indexed_field() -> Self {
        Self {
            indexed: true,
            ..Self::default()
        }
    }

    /// An unindexed field, evaluated against raw records only.
    pub fn unindexed_field() -> Self {
        Self::default()
    }

    pub fn with_reverse_index(mut self) -> Self {
        self.reverse_indexed = true;
        self
    }

    pub fn with_index_only(mut self) -> Self {
        self.index_only = true;
        self
    }

    pub fn with_multi_valued(mut self) -> Self {
        self.multi_valued = true;
        self
    }

    pub fn with_composite_group(mut self, members: Vec<String>) -> Self {
        self.composite_groups.push(members);
        self
    }

    pub fn with_data_type(mut self, dt: impl Into<String>) -> Self {
        self.data_types.insert(dt.into());
        self
    }
}

/// Separator between member values inside a composite index value.
pub const COMPOSITE_SEPARATOR: char = '\u{0}';

/// Name of the composite index field for a member group.
pub fn composite_field_name(members: &[String]) -> String {
    members.join("_")
}

/// Field name → metadata map for one query.
///
/// Variant configurations are built by merging a shared base schema with
/// variant-specific fields, so common fields are declared once instead of
/// being repeated per variant.
#[derive(Debug, Clone, Default)]
pub struct FieldSchema {
    fields: BTreeMap<String, FieldMetadata>,
}

impl FieldSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, meta: FieldMetadata) -> Self {
        self.fields.insert(name.into(), meta);
        self
    }

    /// Overlays `other` on top of this schema; fields present in both take
    /// the overlay's metadata.
    pub fn merge(&self, other: &FieldSchema) -> FieldSchema {
        let mut merged = self.clone();
        for (name, meta) in &other.fields {
            merged.fields.insert(name.clone(), meta.clone());
        }
        merged
    }

    pub fn get(&self, name: &str) -> Option<&FieldMetadata> {
        self.fields.get(name)
    }

    /// Names of all forward-indexed fields, in name order.
    pub fn indexed_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, m)| m.indexed)
            .map(|(n, _)| n.as_str())
            .collect()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
