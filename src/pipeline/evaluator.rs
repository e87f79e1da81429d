//! Per-record plan evaluation
//!
//! Evaluates a rewritten tree against one record. Deferred markers
//! evaluate their wrapped predicate from the record's fields; materialized
//! markers answer by key membership in their set, never touching fields.
//! Each worker owns its evaluator; nothing here is shared.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::ast::{compare_literals, literal_to_index_string, FieldRef, MarkerKind, QueryNode};
use crate::ivarator::MaterializedSet;
use crate::scan::Record;

use super::errors::{PipelineError, PipelineResult};
use crate::ast::SetRef;

/// Caller-supplied evaluation of opaque function nodes.
pub trait FunctionHandler: Send + Sync {
    fn eval(&self, name: &str, args: &[Value], record: &Record) -> PipelineResult<bool>;
}

/// Evaluates one shard query's tree against candidate records.
pub struct Evaluator<'a> {
    sets: &'a BTreeMap<SetRef, Arc<MaterializedSet>>,
    functions: Option<&'a dyn FunctionHandler>,
    // Patterns repeat across records; compile each once.
    patterns: RefCell<HashMap<String, Regex>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        sets: &'a BTreeMap<SetRef, Arc<MaterializedSet>>,
        functions: Option<&'a dyn FunctionHandler>,
    ) -> Self {
        Self {
            sets,
            functions,
            patterns: RefCell::new(HashMap::new()),
        }
    }

    pub fn matches(&self, tree: &QueryNode, record: &Record) -> PipelineResult<bool> {
        match tree {
            QueryNode::Eq { field, value } => Ok(self.eq_matches(field, value, record)),
            QueryNode::Ne { field, value } => Ok(!self.eq_matches(field, value, record)),
            QueryNode::Range {
                field,
                lower,
                upper,
                lower_inclusive,
                upper_inclusive,
            } => Ok(self.range_matches(
                field,
                lower,
                upper,
                *lower_inclusive,
                *upper_inclusive,
                record,
            )),
            QueryNode::Regex { field, pattern } => self.regex_matches(field, pattern, record),
            QueryNode::NotRegex { field, pattern } => {
                Ok(!self.regex_matches(field, pattern, record)?)
            }
            QueryNode::And(children) => {
                for child in children {
                    if !self.matches(child, record)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            QueryNode::Or(children) => {
                for child in children {
                    if self.matches(child, record)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            QueryNode::Not(child) => Ok(!self.matches(child, record)?),
            QueryNode::Function { name, args } => match self.functions {
                Some(handler) => handler.eval(name, args, record),
                None => Err(PipelineError::UnsupportedFunction(name.clone())),
            },
            QueryNode::Marker { kind, source } => self.marker_matches(kind, source, record),
        }
    }

    fn marker_matches(
        &self,
        kind: &MarkerKind,
        source: &QueryNode,
        record: &Record,
    ) -> PipelineResult<bool> {
        match kind {
            MarkerKind::ExceededValue { set: Some(set_ref) } => {
                let set = self
                    .sets
                    .get(set_ref)
                    .ok_or_else(|| PipelineError::SetMissing(set_ref.clone()))?;
                Ok(set.contains(&record.key))
            }
            MarkerKind::ExceededOr { sets } => {
                for set_ref in sets {
                    let set = self
                        .sets
                        .get(set_ref)
                        .ok_or_else(|| PipelineError::SetMissing(set_ref.clone()))?;
                    if set.contains(&record.key) {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            // The index already proved there is nothing to match.
            MarkerKind::EmptyIndex => Ok(false),
            // Deferred kinds answer from the raw record.
            _ => self.matches(source, record),
        }
    }

    fn eq_matches(&self, field: &FieldRef, value: &Value, record: &Record) -> bool {
        let wanted = literal_to_index_string(value);
        match field {
            FieldRef::Named(name) => record
                .values(name)
                .iter()
                .any(|v| literal_to_index_string(v) == wanted),
            FieldRef::AnyField => record
                .fields
                .values()
                .flatten()
                .any(|v| literal_to_index_string(v) == wanted),
        }
    }

    fn range_matches(
        &self,
        field: &FieldRef,
        lower: &Value,
        upper: &Value,
        lower_inclusive: bool,
        upper_inclusive: bool,
        record: &Record,
    ) -> bool {
        let in_bounds = |v: &Value| {
            let low_ok = match compare_literals(v, lower) {
                Some(std::cmp::Ordering::Greater) => true,
                Some(std::cmp::Ordering::Equal) => lower_inclusive,
                _ => false,
            };
            let high_ok = match compare_literals(v, upper) {
                Some(std::cmp::Ordering::Less) => true,
                Some(std::cmp::Ordering::Equal) => upper_inclusive,
                _ => false,
            };
            low_ok && high_ok
        };
        match field {
            FieldRef::Named(name) => record.values(name).iter().any(in_bounds),
            FieldRef::AnyField => record.fields.values().flatten().any(in_bounds),
        }
    }

    fn regex_matches(
        &self,
        field: &FieldRef,
        pattern: &str,
        record: &Record,
    ) -> PipelineResult<bool> {
        let compiled = self.compiled(pattern)?;
        let check = |v: &Value| compiled.is_match(&literal_to_index_string(v));
        Ok(match field {
            FieldRef::Named(name) => record.values(name).iter().any(check),
            FieldRef::AnyField => record.fields.values().flatten().any(check),
        })
    }

    fn compiled(&self, pattern: &str) -> PipelineResult<Regex> {
        if let Some(re) = self.patterns.borrow().get(pattern) {
            return Ok(re.clone());
        }
        // Anchored: a leaf pattern matches whole values, matching the
        // index's matching semantics.
        let re = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
            PipelineError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            }
        })?;
        self.patterns
            .borrow_mut()
            .insert(pattern.to_string(), re.clone());
        Ok(re)
    }
}
