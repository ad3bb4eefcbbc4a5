//! The `links` object of a rendered record.

use serde_json::{Map, Value};

use super::{DynamicSerializer, RequestContext, TaggedDict};
use crate::db::Record;
use crate::error::ApiError;

/// Links for relations rendered as ids or left out of the representation.
///
/// Sideloaded relations and included to-one relations carry their data
/// already and get no link; neither does an included relation that rendered
/// empty. Returns `None` when there is nothing to link.
pub(super) fn link_object(
    ctx: &RequestContext<'_>,
    serializer: &DynamicSerializer,
    record: &dyn Record,
    dict: &TaggedDict,
) -> Result<Option<Value>, ApiError> {
    let pk = record.pk();
    if pk.is_null() {
        return Ok(None);
    }

    let mut links = Map::new();
    let mut base = String::new();
    if ctx.settings.enable_host_relative_links {
        let model = ctx.catalog.model(&serializer.schema().model)?;
        if let Some(path) = ctx.catalog.router().canonical_path(&model.table_name(), Some(&pk)) {
            if ctx.settings.enable_self_links {
                links.insert("self".to_string(), Value::String(path.clone()));
            }
            base = path;
        }
    }

    for field in serializer.schema().fields.iter().filter(|f| f.links()) {
        if serializer.is_visible(&field.name)
            && (serializer.is_sideloaded(&field.name) || !field.is_many())
        {
            continue;
        }
        if dict.get(&field.name).is_some_and(|value| !value.is_truthy()) {
            continue;
        }
        links.insert(
            field.name.clone(),
            Value::String(format!("{}{}/", base, field.name)),
        );
    }

    if links.is_empty() {
        return Ok(None);
    }
    Ok(Some(Value::Object(links)))
}
