//! Filter trees built from `filter{...}` parameters.
//!
//! Legacy filters use the key grammar `[-][rel.path|]field.path[.operator]`
//! and land in per-relation `include` / `exclude` buckets. Complex filters
//! arrive as one JSON object under `filter` and keep their boolean structure
//! as a [`Clause`] tree.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::params::QueryParams;
use crate::db::Lookup;
use crate::error::ApiError;
use crate::utils::is_truthy;

const FILTER_PREFIX: &str = "filter{";

/// One client filter: field path, optional operator, operand.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterNode {
    pub field: Vec<String>,
    /// `None` means equality.
    pub operator: Option<Lookup>,
    pub value: Value,
}

impl FilterNode {
    /// Bucket key: field parts and operator joined with `__`.
    pub fn key(&self) -> String {
        let mut key = self.field.join("__");
        if let Some(operator) = self.operator {
            key.push_str("__");
            key.push_str(operator.name());
        }
        key
    }

    /// Split `field.path[.operator]`, popping a trailing whitelisted operator.
    fn split_spec(spec: &str) -> (Vec<String>, Option<Lookup>) {
        let mut parts: Vec<String> = spec.split('.').map(str::to_string).collect();
        let mut operator = None;
        if parts.len() > 1 {
            if let Some(last) = parts.last().filter(|p| Lookup::NAMES.contains(&p.as_str())) {
                operator = Lookup::from_name(last);
                parts.pop();
            }
        }
        (parts, operator.filter(|op| *op != Lookup::Exact))
    }
}

/// Comma-split every raw value (`1,2,3` and repeated keys mean the same list).
fn split_values(values: &[String]) -> Vec<Value> {
    values
        .iter()
        .flat_map(|v| v.split(','))
        .map(|v| Value::String(v.to_string()))
        .collect()
}

/// Coerce raw query-string values for an operator.
fn coerce_values(operator: Option<Lookup>, values: &[String]) -> Value {
    let first = || values.first().cloned().unwrap_or_default();
    match operator {
        Some(Lookup::In) => Value::Array(split_values(values)),
        Some(Lookup::Range) => Value::Array(split_values(values).into_iter().take(2).collect()),
        Some(Lookup::Isnull) => Value::Bool(is_truthy(&first())),
        _ => Value::String(first()),
    }
}

/// Boolean clause tree of a complex filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    And(Vec<Clause>),
    Or(Vec<Clause>),
    Leaf { node: FilterNode, negated: bool },
}

impl Clause {
    /// Parse a complex filter object.
    ///
    /// `.or` / `$or` and `.and` / `$and` take arrays of sub-objects; any other
    /// key is a leaf `[-]field.path[.operator]` whose JSON value is used as is.
    pub fn from_json(value: &Value) -> Result<Clause, ApiError> {
        let object = value.as_object().ok_or_else(|| {
            ApiError::Validation(format!("Filter clause must be an object, got {}", value))
        })?;

        if let Some(items) = object.get(".or").or_else(|| object.get("$or")) {
            return Ok(Clause::Or(Self::sub_clauses("$or", items)?));
        }
        if let Some(items) = object.get(".and").or_else(|| object.get("$and")) {
            return Ok(Clause::And(Self::sub_clauses("$and", items)?));
        }
        Ok(Clause::And(Self::leaves(object)?))
    }

    fn sub_clauses(combinator: &str, items: &Value) -> Result<Vec<Clause>, ApiError> {
        let items = items.as_array().ok_or_else(|| {
            ApiError::Validation(format!("'{}' must be a list of clauses", combinator))
        })?;
        items.iter().map(Clause::from_json).collect()
    }

    fn leaves(object: &Map<String, Value>) -> Result<Vec<Clause>, ApiError> {
        let mut leaves = Vec::new();
        for (key, value) in object {
            let (negated, spec) = match key.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, key.as_str()),
            };
            if spec.is_empty() {
                return Err(ApiError::Validation(format!("Invalid filter clause: '{}'", key)));
            }
            let (field, operator) = FilterNode::split_spec(spec);
            leaves.push(Clause::Leaf {
                node: FilterNode {
                    field,
                    operator,
                    value: value.clone(),
                },
                negated,
            });
        }
        Ok(leaves)
    }
}

/// Legacy filters for one relation level, plus filters of nested relations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterTree {
    pub include: BTreeMap<String, FilterNode>,
    pub exclude: BTreeMap<String, FilterNode>,
    /// Filters scoped to a relation's sub-query, keyed by serializer field name.
    pub children: BTreeMap<String, FilterTree>,
    /// Complex filter; only ever set on the root level.
    pub complex: Option<Clause>,
}

impl FilterTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract every filter from the request parameters.
    ///
    /// # Errors
    /// `ApiError::Parse` for a `filter{` key that does not end in `}` or
    /// `}[]`; `ApiError::Validation` for a malformed complex filter.
    pub fn from_params(params: &QueryParams) -> Result<FilterTree, ApiError> {
        let mut tree = FilterTree::new();
        for (name, values) in params.lists() {
            let Some(rest) = name.strip_prefix(FILTER_PREFIX) else {
                continue;
            };
            let spec = rest
                .strip_suffix("}[]")
                .or_else(|| rest.strip_suffix('}'))
                .ok_or_else(|| ApiError::Parse(format!("\"{}\" is not a well-formed filter key.", name)))?;
            tree.insert_spec(spec, &values);
        }
        if let Some(raw) = params.get("filter").filter(|raw| !raw.trim().is_empty()) {
            let json: Value = serde_json::from_str(raw)
                .map_err(|e| ApiError::Validation(format!("Invalid complex filter: {}", e)))?;
            tree.complex = Some(Clause::from_json(&json)?);
        }
        Ok(tree)
    }

    fn insert_spec(&mut self, spec: &str, values: &[String]) {
        let (exclude, spec) = match spec.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, spec),
        };
        let (relation, spec) = match spec.split_once('|') {
            Some((rel, field)) => (rel.split('.').collect::<Vec<_>>(), field),
            None => (Vec::new(), spec),
        };
        let (field, operator) = FilterNode::split_spec(spec);
        let node = FilterNode {
            field,
            operator,
            value: coerce_values(operator, values),
        };

        let mut level = self;
        for name in relation {
            level = level.children.entry(name.to_string()).or_default();
        }
        let bucket = if exclude { &mut level.exclude } else { &mut level.include };
        bucket.insert(node.key(), node);
    }

    /// Filters scoped to a relation field.
    pub fn child(&self, name: &str) -> Option<&FilterTree> {
        self.children.get(name)
    }

    /// No filter at this level (children are not considered).
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty() && self.complex.is_none()
    }
}
