//! The immutable catalog of models, schemas, methods and routes.
//!
//! A [`CatalogBuilder`] collects everything at startup; [`CatalogBuilder::build`]
//! resolves every cross reference eagerly (relation targets, canonical schemas,
//! method names) so nothing is looked up by string at render time that was not
//! validated first.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use serde_json::Value;
use thiserror::Error;

use super::definition::SchemaDef;
use super::field::{FieldDef, FieldKind};
use crate::db::schema::{ModelDef, ModelRegistry};
use crate::db::{DbError, Record};
use crate::error::ApiError;
use crate::routers::{Router, RouterError};

/// Closure behind a method field.
pub type MethodFn = Arc<dyn Fn(&dyn Record) -> Result<Value, String> + Send + Sync>;

static CATALOG: OnceLock<Catalog> = OnceLock::new();

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("Unknown model '{model}' referenced by {referrer}")]
    UnknownModel { model: String, referrer: String },

    #[error("Unknown schema '{schema}' referenced by {referrer}")]
    UnknownSchema { schema: String, referrer: String },

    #[error("Duplicate schema name '{0}'")]
    DuplicateSchema(String),

    #[error("Invalid field {schema}.{field}: {message}")]
    InvalidField {
        schema: String,
        field: String,
        message: String,
    },

    #[error("Unknown method '{method}' for field {schema}.{field}")]
    UnknownMethod {
        schema: String,
        field: String,
        method: String,
    },

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("A catalog has already been installed")]
    AlreadyInstalled,
}

/// A resource registration request.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResourceDef {
    pub schema: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Default)]
pub struct CatalogBuilder {
    models: Vec<ModelDef>,
    schemas: Vec<SchemaDef>,
    methods: BTreeMap<String, MethodFn>,
    resources: Vec<ResourceDef>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model: ModelDef) -> Self {
        self.models.push(model);
        self
    }

    pub fn schema(mut self, schema: SchemaDef) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Register the closure behind method fields naming `name`.
    pub fn method<F>(mut self, name: &str, method: F) -> Self
    where
        F: Fn(&dyn Record) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.methods.insert(name.to_string(), Arc::new(method));
        self
    }

    /// Register `schema` as the canonical serializer of its model.
    pub fn resource(mut self, schema: &str, namespace: Option<&str>) -> Self {
        self.resources.push(ResourceDef {
            schema: schema.to_string(),
            namespace: namespace.map(str::to_string),
        });
        self
    }

    pub(crate) fn push_model(&mut self, model: ModelDef) {
        self.models.push(model);
    }

    pub(crate) fn push_schema(&mut self, schema: SchemaDef) {
        self.schemas.push(schema);
    }

    pub(crate) fn push_resource(&mut self, resource: ResourceDef) {
        self.resources.push(resource);
    }

    /// Validate and freeze.
    ///
    /// # Errors
    /// Returns the first problem found: unknown models or schemas, relation
    /// fields with dotted sources, attribute sources that do not resolve,
    /// unknown methods and duplicate resource registrations.
    pub fn build(self) -> Result<Catalog, CatalogError> {
        let models = ModelRegistry::new(self.models);
        for model in models.iter() {
            for relation in &model.relations {
                if !models.contains(&relation.target) {
                    return Err(CatalogError::UnknownModel {
                        model: relation.target.clone(),
                        referrer: format!("relation {}.{}", model.name, relation.name),
                    });
                }
            }
        }

        let mut raw: BTreeMap<String, SchemaDef> = BTreeMap::new();
        for schema in self.schemas {
            if !models.contains(&schema.model) {
                return Err(CatalogError::UnknownModel {
                    model: schema.model.clone(),
                    referrer: format!("schema '{}'", schema.name),
                });
            }
            if raw.contains_key(&schema.name) {
                return Err(CatalogError::DuplicateSchema(schema.name));
            }
            raw.insert(schema.name.clone(), schema);
        }

        // Canonical routes first: relation fields without an explicit schema
        // resolve through them.
        let mut canonical: BTreeMap<String, String> = BTreeMap::new();
        for resource in &self.resources {
            let schema = raw.get(&resource.schema).ok_or_else(|| CatalogError::UnknownSchema {
                schema: resource.schema.clone(),
                referrer: "resource registration".to_string(),
            })?;
            canonical.insert(schema.model.clone(), schema.name.clone());
        }

        let mut resolved: BTreeMap<String, Arc<SchemaDef>> = BTreeMap::new();
        for schema in raw.values() {
            let model = models.get(&schema.model).map_err(|_| CatalogError::UnknownModel {
                model: schema.model.clone(),
                referrer: format!("schema '{}'", schema.name),
            })?;
            let mut schema = schema.clone();
            let names: Vec<String> = schema.fields.iter().map(|f| f.name.clone()).collect();
            for (i, field) in schema.fields.iter_mut().enumerate() {
                if names[..i].contains(&field.name) {
                    return Err(invalid(&schema.name, &field.name, "duplicate field name"));
                }
                resolve_field(&models, model, &schema.name, field, &raw, &canonical, &self.methods, &names)?;
            }
            for name in &schema.deferred_fields {
                if !names.contains(name) {
                    return Err(invalid(&schema.name, name, "deferred field is not a field"));
                }
            }
            resolved.insert(schema.name.clone(), Arc::new(schema));
        }

        let mut router = Router::new();
        for resource in &self.resources {
            let schema = resolved.get(&resource.schema).cloned().ok_or_else(|| {
                CatalogError::UnknownSchema {
                    schema: resource.schema.clone(),
                    referrer: "resource registration".to_string(),
                }
            })?;
            let key = models
                .get(&schema.model)
                .map(|m| m.table_name())
                .map_err(|_| CatalogError::UnknownModel {
                    model: schema.model.clone(),
                    referrer: format!("resource '{}'", schema.name),
                })?;
            router.register(schema, &key, resource.namespace.as_deref())?;
        }

        Ok(Catalog {
            models,
            schemas: resolved,
            methods: self.methods,
            router,
        })
    }
}

fn invalid(schema: &str, field: &str, message: &str) -> CatalogError {
    CatalogError::InvalidField {
        schema: schema.to_string(),
        field: field.to_string(),
        message: message.to_string(),
    }
}

/// Check one field against its model and fill in what the model implies.
#[allow(clippy::too_many_arguments)]
fn resolve_field(
    models: &ModelRegistry,
    model: &ModelDef,
    schema_name: &str,
    field: &mut FieldDef,
    schemas: &BTreeMap<String, SchemaDef>,
    canonical: &BTreeMap<String, String>,
    methods: &BTreeMap<String, MethodFn>,
    siblings: &[String],
) -> Result<(), CatalogError> {
    let source = field.source_path().to_string();
    let field_name = field.name.clone();
    let err = |message: &str| invalid(schema_name, &field_name, message);

    match &mut field.kind {
        FieldKind::Relation { schema, many, .. } => {
            if source.contains('.') {
                return Err(err("Nested relationships are not supported"));
            }
            let relation = model
                .get_relation(&source)
                .ok_or_else(|| err(&format!("'{}' is not a relation of {}", source, model.name)))?;
            let target = match schema.as_ref() {
                Some(name) => name.clone(),
                None => canonical.get(&relation.target).cloned().ok_or_else(|| {
                    err(&format!("no canonical schema for model {}", relation.target))
                })?,
            };
            let target_schema = schemas.get(&target).ok_or_else(|| CatalogError::UnknownSchema {
                schema: target.clone(),
                referrer: format!("field {}.{}", schema_name, field_name),
            })?;
            if target_schema.model != relation.target {
                return Err(err(&format!(
                    "schema '{}' renders {}, not {}",
                    target, target_schema.model, relation.target
                )));
            }
            *schema = Some(target);
            *many = relation.kind.is_many();
        }
        FieldKind::GenericRelation { .. } => {
            if field.requires.is_some() {
                return Err(err("generic relations do not support overriding 'requires'"));
            }
            if model.get_generic(&source).is_none() {
                return Err(err(&format!("'{}' is not a generic relation of {}", source, model.name)));
            }
        }
        FieldKind::Count {
            serializer_source, ..
        } => {
            if !siblings.contains(serializer_source) {
                return Err(err(&format!("'{}' is not a field of this schema", serializer_source)));
            }
        }
        FieldKind::Method { method } => {
            if !methods.contains_key(method.as_str()) {
                return Err(CatalogError::UnknownMethod {
                    schema: schema_name.to_string(),
                    field: field_name.clone(),
                    method: method.clone(),
                });
            }
        }
        FieldKind::Attribute => {
            let parts: Vec<&str> = source.split('.').collect();
            let (column, hops) = parts
                .split_last()
                .ok_or_else(|| err("empty source"))?;
            let mut current = model;
            for hop in hops {
                let relation = current.get_relation(hop).ok_or_else(|| {
                    err(&format!("'{}' is not a relation of {}", hop, current.name))
                })?;
                if relation.kind.is_many() {
                    return Err(err(&format!("'{}' is a to-many relation", hop)));
                }
                current = models.get(&relation.target).map_err(|e: DbError| err(&e.to_string()))?;
            }
            if current.get_column(column).is_none() {
                return Err(err(&format!("'{}' is not a column of {}", column, current.name)));
            }
        }
    }
    Ok(())
}

/// Immutable set of models, schemas, methods and canonical routes.
pub struct Catalog {
    models: ModelRegistry,
    schemas: BTreeMap<String, Arc<SchemaDef>>,
    methods: BTreeMap<String, MethodFn>,
    router: Router,
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("models", &self.models.len())
            .field("schemas", &self.schemas.keys().collect::<Vec<_>>())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("routes", &self.router.len())
            .finish()
    }
}

impl Catalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::new()
    }

    /// Install as the process-wide catalog. Only the first call succeeds.
    pub fn install(self) -> Result<&'static Catalog, CatalogError> {
        CATALOG.set(self).map_err(|_| CatalogError::AlreadyInstalled)?;
        CATALOG.get().ok_or(CatalogError::AlreadyInstalled)
    }

    /// The installed process-wide catalog, if any.
    pub fn global() -> Option<&'static Catalog> {
        CATALOG.get()
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn model(&self, name: &str) -> Result<&Arc<ModelDef>, ApiError> {
        Ok(self.models.get(name)?)
    }

    pub fn schema(&self, name: &str) -> Result<&Arc<SchemaDef>, ApiError> {
        self.schemas
            .get(name)
            .ok_or_else(|| ApiError::ImproperlyConfigured(format!("Unknown schema '{}'", name)))
    }

    /// Target schema of a relation field.
    pub fn related_schema(&self, field: &FieldDef) -> Result<&Arc<SchemaDef>, ApiError> {
        let name = field.target_schema().ok_or_else(|| {
            ApiError::ImproperlyConfigured(format!("Field '{}' is not a relation", field.name))
        })?;
        self.schema(name)
    }

    pub fn method(&self, name: &str) -> Option<&MethodFn> {
        self.methods.get(name)
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn schemas(&self) -> impl Iterator<Item = &Arc<SchemaDef>> {
        self.schemas.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::DataType;
    use crate::schema::SchemaBuilder;

    fn base() -> CatalogBuilder {
        Catalog::builder()
            .model(ModelDef::new("Location").column("name", DataType::String))
            .model(
                ModelDef::new("User")
                    .column("name", DataType::String)
                    .fk("location", "Location"),
            )
            .schema(SchemaBuilder::new("location", "Location").attributes(&["id", "name"]).build())
            .resource("location", None)
    }

    #[test]
    fn test_relation_resolves_canonical_schema() {
        let catalog = base()
            .schema(
                SchemaBuilder::new("user", "User")
                    .attributes(&["id", "name"])
                    .field(FieldDef {
                        kind: FieldKind::Relation {
                            schema: None,
                            many: true,
                            embed: false,
                            sideloading: None,
                            link: true,
                            filter: None,
                        },
                        ..FieldDef::attribute("location")
                    })
                    .field(FieldDef::attribute("location_name").source("location.name"))
                    .build(),
            )
            .build()
            .unwrap();
        let user = catalog.schema("user").unwrap();
        let location = user.get_field("location").unwrap();
        assert_eq!(location.target_schema(), Some("location"));
        assert!(!location.is_many());
        assert_eq!(catalog.router().len(), 1);
    }

    #[test]
    fn test_dotted_relation_source_rejected() {
        let err = base()
            .schema(
                SchemaBuilder::new("user", "User")
                    .field(FieldDef::relation("home", "location").source("location.parent"))
                    .build(),
            )
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Nested relationships are not supported"));
    }

    #[test]
    fn test_attribute_hops_must_be_relations() {
        let err = base()
            .schema(
                SchemaBuilder::new("user", "User")
                    .field(FieldDef::attribute("x").source("name.length"))
                    .build(),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidField { .. }));
    }

    #[test]
    fn test_unknown_method() {
        let err = base()
            .schema(
                SchemaBuilder::new("user", "User")
                    .field(FieldDef::method("shout", "shout"))
                    .build(),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownMethod { .. }));
    }

    #[test]
    fn test_registered_method() {
        let catalog = base()
            .method("shout", |record: &dyn Record| {
                Ok(Value::String(format!("{}!", record.pk())))
            })
            .schema(
                SchemaBuilder::new("user", "User")
                    .field(FieldDef::method("shout", "shout"))
                    .build(),
            )
            .build()
            .unwrap();
        assert!(catalog.method("shout").is_some());
    }

    #[test]
    fn test_duplicate_resource() {
        let err = base().resource("location", Some("v2")).build().unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Router(RouterError::DuplicateResource { .. })
        ));
    }

    #[test]
    fn test_unknown_schema_reference() {
        let err = base()
            .schema(
                SchemaBuilder::new("user", "User")
                    .field(FieldDef::relation("location", "place"))
                    .build(),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownSchema { .. }));
    }
}
