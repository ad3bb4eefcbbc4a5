//! Field inclusion trees built from `include[]` / `exclude[]`.

use std::collections::BTreeMap;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::ApiError;

/// What the client asked for on one field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldRequest {
    /// Render the field; relations render as ids.
    Include,
    Exclude,
    /// Render a relation as full objects, with further requests inside.
    Nested(RequestFields),
}

impl FieldRequest {
    /// Anything but an exclusion.
    pub fn is_included(&self) -> bool {
        !matches!(self, FieldRequest::Exclude)
    }
}

/// Nested map of field requests, keyed by serializer field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RequestFields(BTreeMap<String, FieldRequest>);

impl RequestFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the tree from the raw `include[]` and `exclude[]` values.
    ///
    /// Includes are applied before excludes. A later decision never loosens a
    /// stricter one: `Nested` beats `Include` and `Exclude` beats both.
    ///
    /// # Errors
    /// `ApiError::Parse` for an empty segment anywhere but the end of a path
    /// (`groups..name`).
    pub fn from_features(include: &[String], exclude: &[String]) -> Result<Self, ApiError> {
        let mut fields = RequestFields::new();
        for (paths, decision) in [(include, FieldRequest::Include), (exclude, FieldRequest::Exclude)] {
            for path in paths {
                fields.insert_path(path, &decision)?;
            }
        }
        Ok(fields)
    }

    fn insert_path(&mut self, path: &str, decision: &FieldRequest) -> Result<(), ApiError> {
        let segments: Vec<&str> = path.split('.').collect();
        let last = segments.len() - 1;
        let mut current = self;
        for (i, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                if i != last {
                    return Err(ApiError::Parse(format!("\"{}\" is not a valid field.", path)));
                }
                continue;
            }
            if i == last {
                current.decide(segment, decision.clone());
                break;
            }
            let entry = current
                .0
                .entry(segment.to_string())
                .or_insert_with(|| FieldRequest::Nested(RequestFields::new()));
            if matches!(entry, FieldRequest::Include) {
                *entry = FieldRequest::Nested(RequestFields::new());
            }
            match entry {
                FieldRequest::Nested(children) => current = children,
                _ => break,
            }
        }
        Ok(())
    }

    fn decide(&mut self, name: &str, decision: FieldRequest) {
        match (self.0.get(name), &decision) {
            (_, FieldRequest::Exclude) | (None, _) => {
                self.0.insert(name.to_string(), decision);
            }
            _ => {}
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldRequest> {
        self.0.get(name)
    }

    /// Set a field's request unconditionally.
    pub fn set(&mut self, name: &str, request: FieldRequest) {
        self.0.insert(name.to_string(), request);
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldRequest> {
        self.0.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldRequest)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Scope the tree under a field, as if every path had been written as
    /// `prefix.path`.
    pub fn nest_under(self, field: &str) -> RequestFields {
        let mut outer = RequestFields::new();
        outer.set(field, FieldRequest::Nested(self));
        outer
    }
}

impl Serialize for RequestFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, request) in &self.0 {
            match request {
                FieldRequest::Include => map.serialize_entry(name, &true)?,
                FieldRequest::Exclude => map.serialize_entry(name, &false)?,
                FieldRequest::Nested(children) => map.serialize_entry(name, children)?,
            }
        }
        map.end()
    }
}
