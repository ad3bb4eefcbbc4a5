//! Catalog fixtures.
//!
//! A fixture is one JSON document holding models, schemas, canonical
//! resources and the rows to load into a [`MemoryDb`]:
//!
//! ```json
//! {
//!   "models": [{"name": "User", "columns": [{"name": "id", "type": "int"}]}],
//!   "schemas": [{"name": "user", "model": "User", "fields": ["id"]}],
//!   "resources": ["user"],
//!   "rows": {"User": [{"id": 1}]},
//!   "links": {"User.groups": [[1, 2]]}
//! }
//! ```
//!
//! Schema fields may be given as a bare name (an attribute) or as a full
//! field object.

use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::definition::SchemaDef;
use super::field::FieldDef;
use super::registry::{Catalog, CatalogBuilder, ResourceDef};
use crate::db::schema::ModelDef;
use crate::db::{DbError, MemoryDb, Predicate, Row};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FieldEntry {
    Name(String),
    Field(FieldDef),
}

#[derive(Debug, Deserialize)]
struct SchemaEntry {
    name: String,
    #[serde(default)]
    plural_name: Option<String>,
    model: String,
    fields: Vec<FieldEntry>,
    #[serde(default)]
    deferred_fields: Vec<String>,
    #[serde(default)]
    defer_many_relations: Option<bool>,
    #[serde(default)]
    extra_filter: Option<Predicate>,
}

impl From<SchemaEntry> for SchemaDef {
    fn from(entry: SchemaEntry) -> Self {
        SchemaDef {
            name: entry.name,
            plural_name: entry.plural_name,
            model: entry.model,
            fields: entry
                .fields
                .into_iter()
                .map(|f| match f {
                    FieldEntry::Name(name) => FieldDef::attribute(&name),
                    FieldEntry::Field(field) => field,
                })
                .collect(),
            deferred_fields: entry.deferred_fields,
            defer_many_relations: entry.defer_many_relations,
            extra_filter: entry.extra_filter,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResourceEntry {
    Name(String),
    Resource(ResourceDef),
}

/// A parsed catalog fixture.
#[derive(Debug, Deserialize)]
pub struct CatalogFile {
    models: Vec<ModelDef>,
    schemas: Vec<SchemaEntry>,
    #[serde(default)]
    resources: Vec<ResourceEntry>,
    #[serde(default)]
    rows: BTreeMap<String, Vec<Row>>,
    /// `"Model.relation"` to `[local pk, remote pk]` pairs
    #[serde(default)]
    links: BTreeMap<String, Vec<(Value, Value)>>,
}

impl CatalogFile {
    /// Read and parse a fixture file.
    pub fn load(path: &Path) -> Result<Self, Box<dyn Error>> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        let file = Self::from_json(&content)
            .map_err(|e| format!("Invalid catalog in {}: {}", path.display(), e))?;
        Ok(file)
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Build the catalog and load the rows into a fresh [`MemoryDb`].
    ///
    /// # Arguments
    /// * `builder` - Builder carrying anything a fixture cannot express
    ///   (method closures, extra schemas)
    pub fn into_catalog(self, mut builder: CatalogBuilder) -> Result<(Catalog, MemoryDb), Box<dyn Error>> {
        for model in self.models {
            builder.push_model(model);
        }
        for schema in self.schemas {
            builder.push_schema(schema.into());
        }
        for resource in self.resources {
            builder.push_resource(match resource {
                ResourceEntry::Name(schema) => ResourceDef {
                    schema,
                    namespace: None,
                },
                ResourceEntry::Resource(resource) => resource,
            });
        }
        let catalog = builder.build()?;

        let mut db = MemoryDb::new(catalog.models().clone());
        let mut loaded = 0;
        for (model, rows) in self.rows {
            for row in rows {
                db.insert(&model, row)?;
                loaded += 1;
            }
        }
        for (key, pairs) in self.links {
            let (model, relation) = key.split_once('.').ok_or_else(|| DbError::ImportFailed {
                data_type: "links".to_string(),
                message: format!("Link key '{}' must look like 'Model.relation'", key),
            })?;
            for (local, remote) in pairs {
                db.link(model, relation, local, remote)?;
            }
        }
        debug!(models = catalog.models().len(), rows = loaded, "catalog loaded");

        Ok((catalog, db))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DatabaseBackend, Query};

    const FIXTURE: &str = r#"
    {
        "models": [
            {"name": "Group", "columns": [{"name": "id", "type": "int"}, {"name": "name"}]},
            {
                "name": "User",
                "columns": [{"name": "id", "type": "int"}, {"name": "name"}],
                "relations": [{
                    "name": "groups", "kind": "m2m", "target": "Group",
                    "through": {"table": "user_groups", "source_column": "user_id", "target_column": "group_id"}
                }]
            }
        ],
        "schemas": [
            {"name": "group", "model": "Group", "fields": ["id", "name"]},
            {
                "name": "user", "model": "User",
                "fields": ["id", "name", {"name": "groups", "kind": "relation", "deferred": true}]
            }
        ],
        "resources": ["group", {"schema": "user", "namespace": "v2"}],
        "rows": {
            "Group": [{"id": 1, "name": "admins"}],
            "User": [{"id": 1, "name": "ann"}, {"id": 2, "name": "bob"}]
        },
        "links": {"User.groups": [[1, 1], [2, 1]]}
    }
    "#;

    #[test]
    fn test_load_fixture() {
        let (catalog, db) = CatalogFile::from_json(FIXTURE)
            .unwrap()
            .into_catalog(CatalogBuilder::new())
            .unwrap();
        let user = catalog.schema("user").unwrap();
        let groups = user.get_field("groups").unwrap();
        assert_eq!(groups.target_schema(), Some("group"));
        assert!(groups.is_many());
        assert_eq!(
            catalog.router().canonical_path("user", None).as_deref(),
            Some("/v2/users")
        );
        assert_eq!(db.fetch(&Query::new("User")).unwrap().len(), 2);
    }

    #[test]
    fn test_bad_link_key() {
        let mut file = CatalogFile::from_json(FIXTURE).unwrap();
        file.links.insert("nodot".into(), vec![]);
        let err = file.into_catalog(CatalogBuilder::new()).unwrap_err();
        assert!(err.to_string().contains("Model.relation"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = CatalogFile::load(Path::new("/nonexistent/catalog.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
