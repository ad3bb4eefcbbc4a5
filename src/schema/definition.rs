//! Serializer schemas.

use serde::{Deserialize, Serialize};

use super::field::FieldDef;
use crate::db::Predicate;
use crate::utils::pluralize;

/// A serializer over one storage model: ordered fields plus defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDef {
    /// Singular resource name (e.g., "user")
    pub name: String,

    /// Plural resource name; defaults to the pluralized name
    #[serde(default)]
    pub plural_name: Option<String>,

    /// Storage model name (e.g., "User")
    pub model: String,

    pub fields: Vec<FieldDef>,

    /// Fields left out of the default representation
    #[serde(default)]
    pub deferred_fields: Vec<String>,

    /// Per-schema override of the global `defer_many_relations` setting
    #[serde(default)]
    pub defer_many_relations: Option<bool>,

    /// Predicate ANDed into every query rendered by this schema, including
    /// sideloaded ones
    #[serde(default)]
    pub extra_filter: Option<Predicate>,
}

impl SchemaDef {
    pub fn plural_name(&self) -> String {
        self.plural_name
            .clone()
            .unwrap_or_else(|| pluralize(&self.name))
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

/// Builder for [`SchemaDef`].
///
/// # Examples
///
/// ```ignore
/// let schema = SchemaBuilder::new("user", "User")
///     .field(FieldDef::attribute("id"))
///     .field(FieldDef::attribute("name"))
///     .field(FieldDef::relation("groups", "group").deferred(true))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    schema: SchemaDef,
}

impl SchemaBuilder {
    pub fn new(name: &str, model: &str) -> Self {
        Self {
            schema: SchemaDef {
                name: name.to_string(),
                plural_name: None,
                model: model.to_string(),
                fields: Vec::new(),
                deferred_fields: Vec::new(),
                defer_many_relations: None,
                extra_filter: None,
            },
        }
    }

    pub fn plural(mut self, plural_name: &str) -> Self {
        self.schema.plural_name = Some(plural_name.to_string());
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.schema.fields.push(field);
        self
    }

    /// Add plain attribute fields.
    pub fn attributes(mut self, names: &[&str]) -> Self {
        for name in names {
            self.schema.fields.push(FieldDef::attribute(name));
        }
        self
    }

    pub fn deferred(mut self, names: &[&str]) -> Self {
        self.schema
            .deferred_fields
            .extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn defer_many_relations(mut self, value: bool) -> Self {
        self.schema.defer_many_relations = Some(value);
        self
    }

    pub fn extra_filter(mut self, predicate: Predicate) -> Self {
        self.schema.extra_filter = Some(predicate);
        self
    }

    pub fn build(self) -> SchemaDef {
        self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let schema = SchemaBuilder::new("category", "Category")
            .attributes(&["id", "name"])
            .deferred(&["name"])
            .build();
        assert_eq!(schema.plural_name(), "categories");
        assert_eq!(schema.field_names().collect::<Vec<_>>(), vec!["id", "name"]);
        assert_eq!(schema.deferred_fields, vec!["name"]);
        assert!(schema.get_field("missing").is_none());
    }

    #[test]
    fn test_explicit_plural() {
        let schema = SchemaBuilder::new("person", "Person").plural("people").build();
        assert_eq!(schema.plural_name(), "people");
    }
}
