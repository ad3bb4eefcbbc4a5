//! Canonical resource registry.
//!
//! Every model-backed resource has exactly one canonical schema and one
//! canonical path. The [`Router`] is filled once while the catalog is built and
//! is read-only afterwards: links, generic relations and relation fields
//! without an explicit schema all resolve through it.

use std::sync::Arc;

use heck::ToTitleCase;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::db::Record;
use crate::schema::SchemaDef;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouterError {
    #[error(
        "The resource '{key}' has already been mapped to '{path}'. Each resource can only be mapped to one canonical path."
    )]
    DuplicateResource { key: String, path: String },

    #[error("The resource name '{name}' has already been mapped to '{path}'. A resource name can only be used once.")]
    DuplicateName { name: String, path: String },
}

/// A registered canonical resource.
#[derive(Debug, Clone, Serialize)]
pub struct Route {
    /// Resource key: the model's table name
    pub key: String,
    /// Singular resource name
    pub name: String,
    pub plural_name: String,
    pub model: String,
    /// Path below the API root, e.g. `v2/users`
    pub path: String,
    #[serde(skip)]
    pub schema: Arc<SchemaDef>,
}

impl Route {
    pub fn url(&self) -> String {
        format!("/{}", self.path)
    }
}

/// One line of the API directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub url: String,
}

fn pk_segment(pk: &Value) -> String {
    match pk {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the canonical endpoint of a resource.
    ///
    /// The path is the schema's plural name, below `namespace` when given.
    ///
    /// # Errors
    /// A resource key or resource name may only be registered once.
    pub fn register(
        &mut self,
        schema: Arc<SchemaDef>,
        resource_key: &str,
        namespace: Option<&str>,
    ) -> Result<&Route, RouterError> {
        let plural_name = schema.plural_name();
        let path = match namespace {
            Some(ns) => format!("{}/{}", ns.trim_end_matches('/'), plural_name),
            None => plural_name.clone(),
        };

        if let Some(existing) = self.by_key(resource_key) {
            return Err(RouterError::DuplicateResource {
                key: resource_key.to_string(),
                path: existing.path.clone(),
            });
        }
        if let Some(existing) = self.by_name(&schema.name) {
            return Err(RouterError::DuplicateName {
                name: schema.name.clone(),
                path: existing.path.clone(),
            });
        }

        self.routes.push(Route {
            key: resource_key.to_string(),
            name: schema.name.clone(),
            plural_name,
            model: schema.model.clone(),
            path,
            schema,
        });
        Ok(&self.routes[self.routes.len() - 1])
    }

    pub fn by_key(&self, key: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.key == key)
    }

    pub fn by_name(&self, name: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.name == name)
    }

    pub fn by_model(&self, model: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.model == model)
    }

    pub fn for_record(&self, record: &dyn Record) -> Option<&Route> {
        self.by_model(record.model_name())
    }

    /// Find a route by anything a user might type: path, plural name,
    /// singular name or resource key.
    pub fn resolve(&self, resource: &str) -> Option<&Route> {
        let resource = resource.trim_matches('/');
        self.routes.iter().find(|r| {
            r.path == resource || r.plural_name == resource || r.name == resource || r.key == resource
        })
    }

    /// Canonical path of a resource, or of one of its records when `pk` is
    /// given.
    pub fn canonical_path(&self, key: &str, pk: Option<&Value>) -> Option<String> {
        let route = self.by_key(key)?;
        let base = route.url();
        match pk.filter(|pk| !pk.is_null()) {
            Some(pk) => Some(format!("{}/{}/", base, pk_segment(pk))),
            None => Some(base),
        }
    }

    /// Title-cased plural name to canonical path, in registration order.
    pub fn directory(&self) -> Vec<DirectoryEntry> {
        self.routes
            .iter()
            .map(|r| DirectoryEntry {
                name: r.plural_name.to_title_case(),
                url: r.url(),
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaBuilder;
    use serde_json::json;

    fn schema(name: &str, model: &str) -> Arc<SchemaDef> {
        Arc::new(SchemaBuilder::new(name, model).attributes(&["id"]).build())
    }

    #[test]
    fn test_register_and_lookup() {
        let mut router = Router::new();
        router.register(schema("user", "User"), "user", None).unwrap();
        router
            .register(schema("user_location", "UserLocation"), "user_location", Some("v2/"))
            .unwrap();

        assert_eq!(router.by_model("User").map(|r| r.path.as_str()), Some("users"));
        assert_eq!(
            router.canonical_path("user_location", None).as_deref(),
            Some("/v2/user_locations")
        );
        assert_eq!(
            router.canonical_path("user", Some(&json!(4))).as_deref(),
            Some("/users/4/")
        );
        assert_eq!(router.canonical_path("ghost", None), None);
        assert_eq!(router.resolve("/v2/user_locations/").map(|r| r.name.as_str()), Some("user_location"));
    }

    #[test]
    fn test_directory() {
        let mut router = Router::new();
        router.register(schema("user_location", "UserLocation"), "user_location", None).unwrap();
        router.register(schema("group", "Group"), "group", None).unwrap();
        assert_eq!(
            router.directory(),
            vec![
                DirectoryEntry {
                    name: "User Locations".into(),
                    url: "/user_locations".into()
                },
                DirectoryEntry {
                    name: "Groups".into(),
                    url: "/groups".into()
                },
            ]
        );
    }

    #[test]
    fn test_duplicate_resource_key() {
        let mut router = Router::new();
        router.register(schema("user", "User"), "user", None).unwrap();
        let err = router.register(schema("member", "User"), "user", None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "The resource 'user' has already been mapped to 'users'. Each resource can only be mapped to one canonical path."
        );
    }

    #[test]
    fn test_duplicate_resource_name() {
        let mut router = Router::new();
        router.register(schema("user", "User"), "user", None).unwrap();
        let err = router.register(schema("user", "Account"), "account", None).unwrap_err();
        assert!(matches!(err, RouterError::DuplicateName { .. }));
    }
}
