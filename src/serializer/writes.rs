//! Write payloads: client JSON to storage changes.
//!
//! Columns are coerced to their storage type, relation payloads are resolved
//! through [`DynamicSerializer::resolve_related`] (one bulk query per field),
//! fk and o2o relations become their local column and m2m relations become
//! link-table replacements. Read-only fields are ignored.

use serde_json::Value;
use tracing::debug;

use super::{DynamicSerializer, Operation, RequestContext};
use crate::db::schema::{DataType, RelationKind};
use crate::db::{DatabaseBackend, Record, Row, coerce};
use crate::error::ApiError;
use crate::schema::FieldKind;

/// Storage changes for one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteSet {
    /// Local columns to store
    pub columns: Row,
    /// m2m accessor and the full list of related pks
    pub links: Vec<(String, Vec<Value>)>,
}

impl WriteSet {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.links.is_empty()
    }
}

impl DynamicSerializer {
    /// Validate a write payload against the schema.
    ///
    /// The primary key is only writable when `ctx.operation` is
    /// [`Operation::Create`].
    ///
    /// # Errors
    /// `ApiError::Validation` for non-object payloads, unknown field names
    /// and values that do not fit their column; `ApiError::NotFound` when a
    /// relation payload names a missing record.
    pub fn to_internal_value(
        &self,
        ctx: &RequestContext<'_>,
        backend: &dyn DatabaseBackend,
        payload: &Value,
    ) -> Result<WriteSet, ApiError> {
        let Value::Object(data) = payload else {
            return Err(ApiError::Validation(format!(
                "Invalid data. Expected an object, but got {}.",
                payload
            )));
        };
        let schema = self.schema();
        let model = ctx.catalog.model(&schema.model)?;

        let mut write = WriteSet::default();
        for (name, value) in data {
            let field = schema
                .get_field(name)
                .ok_or_else(|| ApiError::Validation(format!("Unknown field: \"{}\".", name)))?;
            let source = field.source_path();
            match &field.kind {
                FieldKind::Attribute => {
                    let Some(column) = model.get_column(source) else {
                        debug!(schema = %schema.name, field = %name, "read-only field ignored");
                        continue;
                    };
                    if column.name == model.pk && ctx.operation != Operation::Create {
                        continue;
                    }
                    if value.is_array() && column.data_type != DataType::Json {
                        return Err(ApiError::Validation(format!(
                            "Invalid value for '{}': expected a single value",
                            name
                        )));
                    }
                    let value = coerce(column, value).map_err(ApiError::from_filter_error)?;
                    write.columns.insert(column.name.clone(), value);
                }
                FieldKind::Relation { .. } => {
                    let Some(relation) = model.get_relation(source) else {
                        continue;
                    };
                    let pks: Vec<Value> = self
                        .resolve_related(ctx, backend, name, value)?
                        .iter()
                        .map(|record| record.pk())
                        .collect();
                    match relation.kind {
                        RelationKind::Fk | RelationKind::O2o => {
                            let column = relation.column.clone().ok_or_else(|| {
                                ApiError::ImproperlyConfigured(format!(
                                    "{}.{} has no local column",
                                    model.name, relation.name
                                ))
                            })?;
                            write.columns.insert(column, pks.into_iter().next().unwrap_or(Value::Null));
                        }
                        RelationKind::M2m => write.links.push((relation.name.clone(), pks)),
                        RelationKind::O2or | RelationKind::M2o => {
                            debug!(schema = %schema.name, field = %name, "reverse relation ignored");
                        }
                    }
                }
                _ => {
                    debug!(schema = %schema.name, field = %name, "read-only field ignored");
                }
            }
        }
        Ok(write)
    }
}
