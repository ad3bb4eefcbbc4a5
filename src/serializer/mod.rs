//! Representation engine.
//!
//! A [`DynamicSerializer`] is one schema bound to one request shape: which
//! fields are visible, which relations render as ids and which render as full
//! objects. Serializers never hold the request context; it is passed into
//! every call instead, and child serializers are shared through the context's
//! cache.
//!
//! # Field visibility
//!
//! A field is deferred (hidden) when its `deferred` flag is set, when the
//! schema lists it in `deferred_fields`, or when it is a to-many relation with
//! no explicit flag and `defer_many_relations` is on. Request fields then
//! override: `Include` and `Nested` un-defer, `Exclude` defers.

mod context;
mod fields;
mod links;
mod tagged;
mod writes;

pub use context::{Operation, RequestContext};
pub use tagged::{Tag, Tagged, TaggedDict};
pub use writes::WriteSet;

use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;

use serde_json::Value;

use crate::db::{DatabaseBackend, Instance, Lookup, Predicate, Query, Record, coerce, compare_values};
use crate::error::ApiError;
use crate::request::{FieldRequest, RequestFields};
use crate::schema::{FieldDef, FieldKind, SchemaDef};

/// Which part of a record a serializer renders.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selection {
    /// Only the primary key, as a bare value.
    IdOnly,
    Fields(RequestFields),
}

/// Construction options layered on top of the request fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SerializerOptions {
    /// Render exactly these fields (plus nested requests).
    pub only_fields: Option<Vec<String>>,
    /// Add to the default field set; `*` adds every field.
    pub include_fields: Vec<String>,
    /// Remove from the default field set; `*` removes all but inclusions.
    pub exclude_fields: Vec<String>,
    /// Mark rendered records as embedded.
    pub embed: bool,
    /// Inherited sideloading override.
    pub sideloading: Option<bool>,
}

#[derive(Debug)]
pub struct DynamicSerializer {
    schema: Arc<SchemaDef>,
    selection: Selection,
    options: SerializerOptions,
    request_fields: RequestFields,
    /// Indices into `schema.fields`
    visible: Vec<usize>,
}

/// Fold the `only` / `include` / `exclude` options and a `"*": false` request
/// into plain per-field decisions.
fn apply_options(schema: &SchemaDef, mut fields: RequestFields, options: &SerializerOptions) -> RequestFields {
    let mut exclude_all = matches!(fields.remove("*"), Some(FieldRequest::Exclude));
    let mut include = options.include_fields.clone();
    let mut exclude = options.exclude_fields.clone();

    if let Some(only) = options.only_fields.as_ref().filter(|only| !only.is_empty()) {
        exclude_all = true;
        include = only.clone();
    }
    if exclude.iter().any(|name| name == "*") {
        exclude_all = true;
    }

    if exclude_all {
        // Exclude everything, then add back explicit inclusions.
        for (name, request) in fields.iter() {
            if request.is_included() && !include.contains(name) {
                include.push(name.clone());
            }
        }
        exclude = schema
            .field_names()
            .filter(|name| !include.iter().any(|i| i == name))
            .map(str::to_string)
            .collect();
    } else if include.iter().any(|name| name == "*") {
        include = schema.field_names().map(str::to_string).collect();
    }

    for name in exclude.iter().filter(|name| *name != "*") {
        fields.set(name, FieldRequest::Exclude);
    }
    for name in include.iter().filter(|name| *name != "*") {
        if !matches!(fields.get(name), Some(FieldRequest::Nested(_))) {
            fields.set(name, FieldRequest::Include);
        }
    }
    fields
}

impl DynamicSerializer {
    /// Bind a schema to a request shape.
    ///
    /// # Errors
    /// `ApiError::Parse` when the request names a field the schema does not
    /// have; `ApiError::Validation` for field inclusion inside a generic
    /// relation.
    pub fn new(
        ctx: &RequestContext<'_>,
        schema: Arc<SchemaDef>,
        selection: Selection,
        options: SerializerOptions,
    ) -> Result<Self, ApiError> {
        let request_fields = match &selection {
            Selection::IdOnly => RequestFields::new(),
            Selection::Fields(fields) => apply_options(&schema, fields.clone(), &options),
        };
        let mut serializer = Self {
            schema,
            selection,
            options,
            request_fields,
            visible: Vec::new(),
        };
        if !serializer.is_id_only() {
            serializer.visible = serializer.resolve_visible(ctx)?;
        }
        Ok(serializer)
    }

    /// Serializer for the top level of a request.
    pub fn root(ctx: &RequestContext<'_>, schema: Arc<SchemaDef>, fields: RequestFields) -> Result<Self, ApiError> {
        Self::new(ctx, schema, Selection::Fields(fields), SerializerOptions::default())
    }

    fn resolve_visible(&self, ctx: &RequestContext<'_>) -> Result<Vec<usize>, ApiError> {
        let schema = &self.schema;
        let defer_many = schema
            .defer_many_relations
            .unwrap_or(ctx.settings.defer_many_relations);

        let mut deferred: HashSet<String> = schema
            .fields
            .iter()
            .filter(|f| {
                f.deferred == Some(true)
                    || schema.deferred_fields.contains(&f.name)
                    || (defer_many && f.is_many() && f.deferred.is_none())
            })
            .map(|f| f.name.clone())
            .collect();

        for (name, request) in self.request_fields.iter() {
            let Some(field) = schema.get_field(name) else {
                return Err(ApiError::Parse(format!(
                    "'{}' is not a valid field name for '{}'.",
                    name, schema.name
                )));
            };
            match request {
                FieldRequest::Exclude => {
                    deferred.insert(name.clone());
                }
                FieldRequest::Nested(children) if field.is_generic() && !children.is_empty() => {
                    return Err(ApiError::Validation(format!(
                        "{}.{} does not support field inclusion/exclusion",
                        schema.name, name
                    )));
                }
                _ => {
                    deferred.remove(name);
                }
            }
        }

        Ok(schema
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| !deferred.contains(&f.name))
            .map(|(i, _)| i)
            .collect())
    }

    pub fn schema(&self) -> &Arc<SchemaDef> {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn options(&self) -> &SerializerOptions {
        &self.options
    }

    /// Request fields after the construction options were applied.
    pub fn request_fields(&self) -> &RequestFields {
        &self.request_fields
    }

    pub fn is_id_only(&self) -> bool {
        self.selection == Selection::IdOnly
    }

    pub fn visible_fields(&self) -> impl Iterator<Item = &FieldDef> + '_ {
        self.visible.iter().map(|&i| &self.schema.fields[i])
    }

    pub fn is_visible(&self, name: &str) -> bool {
        self.visible_fields().any(|f| f.name == name)
    }

    /// True when the request asked for the relation's full objects.
    pub fn is_sideloaded(&self, name: &str) -> bool {
        matches!(self.request_fields.get(name), Some(FieldRequest::Nested(_)))
    }

    /// Serializer of a relation field, from the request-scoped cache.
    pub fn child(&self, ctx: &RequestContext<'_>, field: &FieldDef) -> Result<Rc<DynamicSerializer>, ApiError> {
        let target = ctx.catalog.related_schema(field)?;
        let mut selection = match self.request_fields.get(&field.name) {
            Some(FieldRequest::Nested(fields)) => Selection::Fields(fields.clone()),
            _ => Selection::IdOnly,
        };
        let (field_embed, field_sideloading) = match &field.kind {
            FieldKind::Relation {
                embed, sideloading, ..
            } => (*embed, *sideloading),
            _ => (false, None),
        };
        let sideloading = field_sideloading.or(self.options.sideloading);
        let embed = match sideloading {
            Some(sideloading) => !sideloading,
            None => field_embed,
        };
        if embed && selection == Selection::IdOnly {
            selection = Selection::Fields(RequestFields::new());
        }
        let options = SerializerOptions {
            embed,
            sideloading,
            ..SerializerOptions::default()
        };
        ctx.child_serializer(&self.schema, field, target, selection, options)
    }

    /// Render one record: its pk when id-only, a tagged object otherwise.
    pub fn to_representation(&self, ctx: &RequestContext<'_>, record: &dyn Record) -> Result<Tagged, ApiError> {
        if self.is_id_only() {
            return Ok(Tagged::Value(record.pk()));
        }

        let mut dict = TaggedDict::new(Tag {
            name: self.schema.name.clone(),
            plural_name: self.schema.plural_name(),
            pk: record.pk(),
            embed: self.options.embed,
        });

        // Counts read their sibling's rendered value, so they go last.
        let mut counts = Vec::new();
        for field in self.visible_fields() {
            if matches!(field.kind, FieldKind::Count { .. }) {
                dict.insert(&field.name, Tagged::null());
                counts.push(field);
                continue;
            }
            let value = self.render_field(ctx, field, record)?;
            dict.insert(&field.name, value);
        }
        for field in counts {
            let value = self.render_count(field, &dict)?;
            dict.insert(&field.name, value);
        }

        if ctx.settings.enable_links {
            if let Some(links) = links::link_object(ctx, self, record, &dict)? {
                dict.insert("links", Tagged::Value(links));
            }
        }
        Ok(Tagged::Dict(dict))
    }

    /// Render a batch of records as a list.
    pub fn to_representation_many<'r>(
        &self,
        ctx: &RequestContext<'_>,
        records: impl IntoIterator<Item = &'r (dyn Record + 'r)>,
    ) -> Result<Tagged, ApiError> {
        records
            .into_iter()
            .map(|record| self.to_representation(ctx, record))
            .collect::<Result<Vec<_>, _>>()
            .map(Tagged::List)
    }

    /// Resolve the pks of a relation payload into records.
    ///
    /// Issues one bulk query per call, whatever the number of pks. Records
    /// come back in payload order.
    ///
    /// # Errors
    /// `ApiError::Validation` for unknown fields or malformed payloads,
    /// `ApiError::NotFound` naming the first pk with no matching record.
    pub fn resolve_related(
        &self,
        ctx: &RequestContext<'_>,
        backend: &dyn DatabaseBackend,
        field_name: &str,
        value: &Value,
    ) -> Result<Vec<Instance>, ApiError> {
        let field = self
            .schema
            .get_field(field_name)
            .filter(|f| f.is_relation())
            .ok_or_else(|| ApiError::Validation(format!("Unknown field: \"{}\".", field_name)))?;
        let target = ctx.catalog.related_schema(field)?;
        let model = ctx.catalog.model(&target.model)?;
        let pk_column = model.pk_column().ok_or_else(|| {
            ApiError::ImproperlyConfigured(format!("Model {} has no primary key column", model.name))
        })?;

        let raw = match (value, field.is_many()) {
            (Value::Null, _) => return Ok(Vec::new()),
            (Value::Array(items), true) => items.clone(),
            (single, false) if !single.is_array() => vec![single.clone()],
            (other, _) => {
                return Err(ApiError::Validation(format!(
                    "Invalid value for '{}': {}",
                    field_name, other
                )));
            }
        };
        let mut pks = Vec::with_capacity(raw.len());
        for item in &raw {
            if item.is_object() || item.is_array() {
                return Err(ApiError::Validation(format!(
                    "Invalid value for '{}': nested relationship values are not supported",
                    field_name
                )));
            }
            pks.push(coerce(pk_column, item).map_err(ApiError::from_filter_error)?);
        }
        if pks.is_empty() {
            return Ok(Vec::new());
        }

        let query = Query::new(&model.name).filter(Predicate::condition(
            &[model.pk.as_str()],
            Lookup::In,
            Value::Array(pks.clone()),
        ));
        let rows = backend.fetch(&query).map_err(ApiError::from_filter_error)?;

        let mut resolved = Vec::with_capacity(pks.len());
        for pk in &pks {
            let row = rows
                .iter()
                .find(|row| row.get(&model.pk).is_some_and(|v| compare_values(v, pk).is_eq()))
                .ok_or_else(|| {
                    ApiError::NotFound(format!(
                        "Invalid value for '{}': {} object with ID={} not found",
                        field_name, model.name, pk
                    ))
                })?;
            resolved.push(Instance::new(model.clone(), row.clone()));
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::test_utils;
    use crate::request::RequestFields;
    use serde_json::json;

    fn fields(include: &[&str], exclude: &[&str]) -> RequestFields {
        let include: Vec<String> = include.iter().map(|s| s.to_string()).collect();
        let exclude: Vec<String> = exclude.iter().map(|s| s.to_string()).collect();
        RequestFields::from_features(&include, &exclude).unwrap()
    }

    fn visible(serializer: &DynamicSerializer) -> Vec<&str> {
        serializer.visible_fields().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn test_default_fields_skip_deferred() {
        let (catalog, _) = test_utils::catalog();
        let settings = Settings::default();
        let ctx = RequestContext::new(&catalog, &settings);
        let schema = catalog.schema("user").unwrap().clone();
        let serializer = DynamicSerializer::root(&ctx, schema, RequestFields::new()).unwrap();
        assert_eq!(visible(&serializer), vec!["id", "name", "location"]);
    }

    #[test]
    fn test_include_undefers_and_exclude_defers() {
        let (catalog, _) = test_utils::catalog();
        let settings = Settings::default();
        let ctx = RequestContext::new(&catalog, &settings);
        let schema = catalog.schema("user").unwrap().clone();
        let serializer =
            DynamicSerializer::root(&ctx, schema, fields(&["groups", "last_name"], &["name", "last_name"])).unwrap();
        assert_eq!(visible(&serializer), vec!["id", "location", "groups"]);
    }

    #[test]
    fn test_unknown_field_is_parse_error() {
        let (catalog, _) = test_utils::catalog();
        let settings = Settings::default();
        let ctx = RequestContext::new(&catalog, &settings);
        let schema = catalog.schema("user").unwrap().clone();
        let err = DynamicSerializer::root(&ctx, schema, fields(&["nope"], &[])).unwrap_err();
        assert!(matches!(err, ApiError::Parse(_)));
        assert_eq!(err.to_string(), "'nope' is not a valid field name for 'user'.");
    }

    #[test]
    fn test_exclude_star_keeps_explicit_inclusions() {
        let (catalog, _) = test_utils::catalog();
        let settings = Settings::default();
        let ctx = RequestContext::new(&catalog, &settings);
        let schema = catalog.schema("user").unwrap().clone();
        let serializer = DynamicSerializer::root(&ctx, schema, fields(&["groups."], &["*"])).unwrap();
        assert_eq!(visible(&serializer), vec!["groups"]);
    }

    #[test]
    fn test_only_fields_option() {
        let (catalog, _) = test_utils::catalog();
        let settings = Settings::default();
        let ctx = RequestContext::new(&catalog, &settings);
        let schema = catalog.schema("user").unwrap().clone();
        let options = SerializerOptions {
            only_fields: Some(vec!["name".into()]),
            ..SerializerOptions::default()
        };
        let serializer =
            DynamicSerializer::new(&ctx, schema, Selection::Fields(RequestFields::new()), options).unwrap();
        assert_eq!(visible(&serializer), vec!["name"]);
    }

    #[test]
    fn test_defer_many_relations_respects_explicit_flag() {
        let (catalog, _) = test_utils::catalog();
        let settings = Settings {
            defer_many_relations: true,
            ..Settings::default()
        };
        let ctx = RequestContext::new(&catalog, &settings);
        let mut group = catalog.schema("group").unwrap().as_ref().clone();
        for field in group.fields.iter_mut() {
            match field.name.as_str() {
                "permissions" => field.deferred = Some(false),
                "users" => field.deferred = None,
                _ => {}
            }
        }
        let serializer = DynamicSerializer::root(&ctx, Arc::new(group.clone()), RequestFields::new()).unwrap();
        // `permissions` is explicitly not deferred, `users` follows the setting.
        assert_eq!(visible(&serializer), vec!["id", "name", "permissions"]);

        group.defer_many_relations = Some(false);
        let serializer = DynamicSerializer::root(&ctx, Arc::new(group), RequestFields::new()).unwrap();
        assert_eq!(visible(&serializer), vec!["id", "name", "permissions", "users"]);
    }

    #[test]
    fn test_child_serializers_are_cached() {
        let (catalog, _) = test_utils::catalog();
        let settings = Settings::default();
        let ctx = RequestContext::new(&catalog, &settings);
        let schema = catalog.schema("user").unwrap().clone();
        let serializer = DynamicSerializer::root(&ctx, schema.clone(), RequestFields::new()).unwrap();
        let field = schema.get_field("location").unwrap();
        let first = serializer.child(&ctx, field).unwrap();
        let second = serializer.child(&ctx, field).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert!(first.is_id_only());
        assert_eq!(ctx.cached_serializers(), 1);
    }

    #[test]
    fn test_embed_promotes_id_only() {
        let (catalog, _) = test_utils::catalog();
        let settings = Settings::default();
        let ctx = RequestContext::new(&catalog, &settings);
        let schema = catalog.schema("cat").unwrap().clone();
        let serializer = DynamicSerializer::root(&ctx, schema.clone(), RequestFields::new()).unwrap();
        let child = serializer.child(&ctx, schema.get_field("home").unwrap()).unwrap();
        assert!(!child.is_id_only());
        assert!(child.options().embed);
    }

    #[test]
    fn test_resolve_related() {
        let (catalog, db) = test_utils::catalog();
        let settings = Settings::default();
        let ctx = RequestContext::new(&catalog, &settings);
        let schema = catalog.schema("user").unwrap().clone();
        let serializer = DynamicSerializer::root(&ctx, schema, RequestFields::new()).unwrap();

        db.reset_query_count();
        let groups = serializer
            .resolve_related(&ctx, &db, "groups", &json!([2, "1"]))
            .unwrap();
        assert_eq!(groups.iter().map(|g| g.pk()).collect::<Vec<_>>(), vec![json!(2), json!(1)]);
        assert_eq!(db.query_count(), 1);

        let err = serializer
            .resolve_related(&ctx, &db, "groups", &json!([1, 99]))
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert!(err.to_string().contains("ID=99"));
    }
}
