//! Rendered representations.
//!
//! Rendering produces a [`Tagged`] tree instead of plain JSON: every record
//! rendered as an object keeps a [`Tag`] naming its schema and primary key,
//! which is what the sideloading processor needs to hoist and deduplicate it.

use serde_json::{Map, Value};

/// Identity of a rendered record.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    /// Singular schema name
    pub name: String,
    pub plural_name: String,
    /// Primary key, or a `{"type", "id"}` object for generic relations
    pub pk: Value,
    /// Rendered in place; never hoisted
    pub embed: bool,
}

/// A rendered record: ordered fields plus its tag.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedDict {
    pub tag: Tag,
    pub fields: Vec<(String, Tagged)>,
}

impl TaggedDict {
    pub fn new(tag: Tag) -> Self {
        Self {
            tag,
            fields: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Tagged> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn insert(&mut self, name: &str, value: Tagged) {
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Tagged> {
        let index = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(index).1)
    }

    pub fn to_map(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|(name, value)| (name.clone(), value.to_value()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tagged {
    /// Scalars, pk references and plain objects (`links`, `{type, id}`).
    Value(Value),
    List(Vec<Tagged>),
    Dict(TaggedDict),
}

impl Tagged {
    pub fn null() -> Self {
        Tagged::Value(Value::Null)
    }

    /// Plain JSON, dropping tags.
    pub fn to_value(&self) -> Value {
        match self {
            Tagged::Value(value) => value.clone(),
            Tagged::List(items) => Value::Array(items.iter().map(Tagged::to_value).collect()),
            Tagged::Dict(dict) => Value::Object(dict.to_map()),
        }
    }

    pub fn as_dict(&self) -> Option<&TaggedDict> {
        match self {
            Tagged::Dict(dict) => Some(dict),
            _ => None,
        }
    }

    /// False for `null`, `false`, `0`, `""`, `[]` and `{}`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Tagged::Value(Value::Null) => false,
            Tagged::Value(Value::Bool(b)) => *b,
            Tagged::Value(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
            Tagged::Value(Value::String(s)) => !s.is_empty(),
            Tagged::Value(Value::Array(items)) => !items.is_empty(),
            Tagged::Value(Value::Object(map)) => !map.is_empty(),
            Tagged::List(items) => !items.is_empty(),
            Tagged::Dict(dict) => !dict.fields.is_empty(),
        }
    }
}

impl From<Value> for Tagged {
    fn from(value: Value) -> Self {
        Tagged::Value(value)
    }
}
