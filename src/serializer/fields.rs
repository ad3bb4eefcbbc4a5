//! Per-kind field rendering.

use std::collections::HashSet;

use serde_json::{Value, json};
use tracing::{error, warn};

use super::{DynamicSerializer, RequestContext, Selection, SerializerOptions, Tagged, TaggedDict};
use crate::db::{DatabaseValue, Record, Related};
use crate::error::ApiError;
use crate::request::RequestFields;
use crate::schema::{FieldDef, FieldKind};

/// Walk a dotted attribute source across to-one relations.
fn attribute_value(record: &dyn Record, parts: &[&str]) -> Result<Value, String> {
    match parts {
        [] => Ok(Value::Null),
        [column] => Ok(record.value(column).unwrap_or(Value::Null)),
        [hop, rest @ ..] => match record.related(hop) {
            Related::One(related) => attribute_value(related.as_ref(), rest),
            Related::Null => Ok(Value::Null),
            Related::Many(_) => Err(format!("'{}' is a to-many relation", hop)),
            Related::Unloaded => Err(format!("'{}' was not loaded", hop)),
        },
    }
}

impl DynamicSerializer {
    pub(super) fn render_field(
        &self,
        ctx: &RequestContext<'_>,
        field: &FieldDef,
        record: &dyn Record,
    ) -> Result<Tagged, ApiError> {
        match &field.kind {
            FieldKind::Attribute => self.render_attribute(ctx, field, record),
            FieldKind::Relation { .. } => self.render_relation(ctx, field, record),
            FieldKind::GenericRelation { .. } => self.render_generic(ctx, field, record),
            FieldKind::Method { method } => self.render_method(ctx, field, method, record),
            // Rendered after their siblings; see `render_count`.
            FieldKind::Count { .. } => Ok(Tagged::null()),
        }
    }

    fn render_attribute(
        &self,
        ctx: &RequestContext<'_>,
        field: &FieldDef,
        record: &dyn Record,
    ) -> Result<Tagged, ApiError> {
        let parts: Vec<&str> = field.source_path().split('.').collect();
        attribute_value(record, &parts)
            .map(Tagged::Value)
            .map_err(|message| self.render_error(ctx, field, Some(record), message))
    }

    fn render_relation(
        &self,
        ctx: &RequestContext<'_>,
        field: &FieldDef,
        record: &dyn Record,
    ) -> Result<Tagged, ApiError> {
        let child = self.child(ctx, field)?;
        let source = field.source_path();

        if !field.is_many() && child.is_id_only() {
            let model = ctx.catalog.model(&self.schema.model)?;
            if let Some(column) = model.get_relation(source).and_then(|r| r.column.as_deref()) {
                return Ok(Tagged::Value(record.value(column).unwrap_or(Value::Null)));
            }
        }

        let rendered = match record.related(source) {
            Related::Null if field.is_many() => Ok(Tagged::List(Vec::new())),
            Related::Null => Ok(Tagged::null()),
            Related::Unloaded => {
                return Err(ApiError::ImproperlyConfigured(format!(
                    "'{}' was not prefetched for {}",
                    source,
                    record.describe()
                )));
            }
            Related::One(related) => child.to_representation(ctx, related.as_ref()),
            Related::Many(related) => related
                .iter()
                .map(|r| child.to_representation(ctx, r.as_ref()))
                .collect::<Result<Vec<_>, _>>()
                .map(Tagged::List),
        };
        rendered.map_err(|e| self.render_error(ctx, field, Some(record), e.to_string()))
    }

    /// `{type, id}` for the related record, or its full representation when
    /// the request sideloads the field. Failures degrade to `null`.
    fn render_generic(
        &self,
        ctx: &RequestContext<'_>,
        field: &FieldDef,
        record: &dyn Record,
    ) -> Result<Tagged, ApiError> {
        let related = record.related(field.source_path());
        let Related::One(target) = related else {
            return Ok(Tagged::null());
        };
        let Some(route) = ctx.catalog.router().for_record(target.as_ref()) else {
            return Ok(Tagged::Value(json!({"type": target.model_name(), "id": target.pk()})));
        };
        let pk = json!({"type": route.name, "id": target.pk()});
        if !self.is_sideloaded(&field.name) {
            return Ok(Tagged::Value(pk));
        }

        let options = SerializerOptions {
            embed: field.embeds(),
            ..SerializerOptions::default()
        };
        let rendered = DynamicSerializer::new(
            ctx,
            route.schema.clone(),
            Selection::Fields(RequestFields::new()),
            options,
        )
        .and_then(|serializer| serializer.to_representation(ctx, target.as_ref()));

        match rendered {
            Ok(Tagged::Dict(mut dict)) => {
                dict.tag.pk = pk;
                Ok(Tagged::Dict(dict))
            }
            Ok(other) => Ok(other),
            Err(e) => {
                warn!(
                    schema = %self.schema.name,
                    field = %field.name,
                    error = %e,
                    "generic relation failed to render"
                );
                Ok(Tagged::null())
            }
        }
    }

    fn render_method(
        &self,
        ctx: &RequestContext<'_>,
        field: &FieldDef,
        method: &str,
        record: &dyn Record,
    ) -> Result<Tagged, ApiError> {
        let function = ctx.catalog.method(method).ok_or_else(|| {
            ApiError::ImproperlyConfigured(format!("Unknown method '{}'", method))
        })?;
        function(record)
            .map(Tagged::Value)
            .map_err(|message| self.render_error(ctx, field, Some(record), message))
    }

    /// Size of a sibling field's rendered value.
    pub(super) fn render_count(&self, field: &FieldDef, dict: &TaggedDict) -> Result<Tagged, ApiError> {
        let FieldKind::Count {
            serializer_source,
            unique,
        } = &field.kind
        else {
            return Ok(Tagged::null());
        };
        if !self.is_visible(serializer_source) {
            return Ok(Tagged::null());
        }

        let items: Vec<Value> = match dict.get(serializer_source) {
            None | Some(Tagged::Value(Value::Null)) => return Ok(Tagged::null()),
            Some(Tagged::List(items)) => items.iter().map(Tagged::to_value).collect(),
            Some(Tagged::Value(Value::Array(items))) => items.clone(),
            Some(other) => {
                let type_name = match other {
                    Tagged::Value(value) => value.type_name(),
                    _ => "object",
                };
                return Err(ApiError::Render {
                    field: field.name.clone(),
                    parent: self.schema.name.clone(),
                    source_path: serializer_source.clone(),
                    message: format!(
                        "'{}' is {}. Must be list, set or tuple to be countable.",
                        serializer_source, type_name
                    ),
                    instance: None,
                });
            }
        };

        let count = if *unique {
            items.iter().map(Value::to_string).collect::<HashSet<_>>().len()
        } else {
            items.len()
        };
        Ok(Tagged::Value(Value::from(count)))
    }

    fn render_error(
        &self,
        ctx: &RequestContext<'_>,
        field: &FieldDef,
        record: Option<&dyn Record>,
        message: String,
    ) -> ApiError {
        let instance = record.filter(|_| ctx.debug()).map(|r| format!("{:?}", r));
        if ctx.debug() {
            error!(
                schema = %self.schema.name,
                field = %field.name,
                error = %message,
                "field failed to render"
            );
        }
        ApiError::Render {
            field: field.name.clone(),
            parent: self.schema.name.clone(),
            source_path: field.source_path().to_string(),
            message,
            instance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::db::Instance;
    use crate::test_utils;
    use crate::serializer::Tagged;
    use std::sync::Arc;

    fn instance(catalog: &crate::schema::Catalog, model: &str, row: Value) -> Instance {
        let model: Arc<_> = catalog.model(model).unwrap().clone();
        Instance::new(model, row.as_object().cloned().unwrap())
    }

    #[test]
    fn test_id_only_fk_reads_local_column() {
        let (catalog, _) = test_utils::catalog();
        let settings = Settings {
            enable_links: false,
            ..Settings::default()
        };
        let ctx = RequestContext::new(&catalog, &settings);
        let schema = catalog.schema("user").unwrap().clone();
        let serializer = DynamicSerializer::root(&ctx, schema, RequestFields::new()).unwrap();
        let user = instance(&catalog, "User", json!({"id": 1, "name": "0", "location_id": 1}));
        let rendered = serializer.to_representation(&ctx, &user).unwrap();
        assert_eq!(rendered.to_value(), json!({"id": 1, "name": "0", "location": 1}));
    }

    #[test]
    fn test_unloaded_relation_is_configuration_error() {
        let (catalog, _) = test_utils::catalog();
        let settings = Settings::default();
        let ctx = RequestContext::new(&catalog, &settings);
        let schema = catalog.schema("user").unwrap().clone();
        let fields = RequestFields::from_features(&["groups".to_string()], &[]).unwrap();
        let serializer = DynamicSerializer::root(&ctx, schema, fields).unwrap();
        let user = instance(&catalog, "User", json!({"id": 1, "location_id": 1}));
        let err = serializer.to_representation(&ctx, &user).unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert!(err.to_string().contains("'groups' was not prefetched"));
    }

    #[test]
    fn test_unloaded_attribute_hop_is_render_error() {
        let (catalog, _) = test_utils::catalog();
        let settings = Settings::default();
        let ctx = RequestContext::new(&catalog, &settings);
        let schema = catalog.schema("user").unwrap().clone();
        let fields = RequestFields::from_features(&["display_name".to_string()], &[]).unwrap();
        let serializer = DynamicSerializer::root(&ctx, schema, fields).unwrap();
        let user = instance(&catalog, "User", json!({"id": 1, "location_id": 1}));
        let err = serializer.to_representation(&ctx, &user).unwrap_err();
        match err {
            ApiError::Render {
                parent, source_path, instance, ..
            } => {
                assert_eq!(parent, "user");
                assert_eq!(source_path, "profile.display_name");
                assert!(instance.is_none());
            }
            other => panic!("Expected Render, got {:?}", other),
        }
    }

    #[test]
    fn test_debug_keeps_instance_in_render_error() {
        let (catalog, _) = test_utils::catalog();
        let settings = Settings::default();
        let ctx = RequestContext::new(&catalog, &settings);
        ctx.set_debug(true);
        let schema = catalog.schema("user").unwrap().clone();
        let fields = RequestFields::from_features(&["display_name".to_string()], &[]).unwrap();
        let serializer = DynamicSerializer::root(&ctx, schema, fields).unwrap();
        let user = instance(&catalog, "User", json!({"id": 1, "location_id": 1}));
        let err = serializer.to_representation(&ctx, &user).unwrap_err();
        assert!(err.to_string().contains("\nObj: "));
    }

    #[test]
    fn test_count_of_non_list_is_render_error() {
        let (catalog, _) = test_utils::catalog();
        let settings = Settings::default();
        let ctx = RequestContext::new(&catalog, &settings);
        let schema = catalog.schema("location").unwrap().clone();
        let serializer = DynamicSerializer::root(&ctx, schema.clone(), RequestFields::new()).unwrap();
        let field = crate::schema::FieldDef::count("name_count", "name");
        let mut dict = TaggedDict::new(crate::serializer::Tag {
            name: "location".into(),
            plural_name: "locations".into(),
            pk: json!(1),
            embed: false,
        });
        dict.insert("name", Tagged::Value(json!("0")));
        let err = serializer.render_count(&field, &dict).unwrap_err();
        assert!(err.to_string().contains("'name' is string. Must be list, set or tuple to be countable."));

        dict.insert("name", Tagged::Value(json!([1, 1, 2])));
        assert_eq!(serializer.render_count(&field, &dict).unwrap(), Tagged::Value(json!(2)));
        let field = field.non_unique();
        assert_eq!(serializer.render_count(&field, &dict).unwrap(), Tagged::Value(json!(3)));
    }
}
