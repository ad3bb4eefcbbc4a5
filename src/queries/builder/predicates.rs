//! Rewriting client filters into storage predicates.
//!
//! Filter paths name serializer fields. Each segment is resolved against the
//! schema of its level: relation fields contribute their relation's query
//! name and switch to the related schema, attribute fields contribute their
//! (possibly dotted) source and end the path.

use serde_json::Value;

use crate::db::schema::{ColumnDef, DataType, ModelRegistry};
use crate::db::{Condition, Lookup, Predicate};
use crate::error::ApiError;
use crate::request::{Clause, FilterNode, FilterTree};
use crate::schema::{Catalog, FieldKind, SchemaDef};
use crate::utils::is_truthy;

fn invalid_field(name: &str) -> ApiError {
    ApiError::Validation(format!("Invalid filter field: {}", name))
}

/// Resolve a serializer field path into a storage path.
///
/// Returns the storage path and, when the path ends on a column, that
/// column's definition (used to coerce the operand).
///
/// # Errors
/// `ApiError::Validation` naming the first segment that does not resolve.
pub fn resolve_path(
    catalog: &Catalog,
    schema: &SchemaDef,
    parts: &[String],
) -> Result<(Vec<String>, Option<ColumnDef>), ApiError> {
    let mut storage = Vec::new();
    let mut schema: &SchemaDef = schema;
    let mut model = catalog.model(&schema.model)?;

    for (i, part) in parts.iter().enumerate() {
        let last = i + 1 == parts.len();
        if part == "pk" {
            if !last {
                return Err(ApiError::Validation(format!(
                    "Invalid nested filter field: {}",
                    parts[i..].join(".")
                )));
            }
            storage.push(model.pk.clone());
            return Ok((storage, model.pk_column().cloned()));
        }

        let field = schema.get_field(part).ok_or_else(|| invalid_field(part))?;
        match &field.kind {
            FieldKind::Relation { .. } => {
                let relation = model
                    .get_relation(field.source_path())
                    .ok_or_else(|| invalid_field(part))?;
                storage.push(relation.query_name().to_string());
                schema = catalog.related_schema(field)?.as_ref();
                model = catalog.model(&schema.model)?;
                if last {
                    return Ok((storage, model.pk_column().cloned()));
                }
            }
            FieldKind::Attribute => {
                if !last {
                    return Err(ApiError::Validation(format!(
                        "Invalid nested filter field: {}",
                        parts[i + 1..].join(".")
                    )));
                }
                let source: Vec<&str> = field.source_path().split('.').collect();
                let Some((column, hops)) = source.split_last() else {
                    return Err(invalid_field(part));
                };
                for hop in hops {
                    let relation = model.get_relation(hop).ok_or_else(|| invalid_field(part))?;
                    storage.push(relation.query_name().to_string());
                    model = catalog.model(&relation.target)?;
                }
                let column = model.get_column(column).cloned().ok_or_else(|| invalid_field(part))?;
                storage.push(column.name.clone());
                return Ok((storage, Some(column)));
            }
            _ => return Err(invalid_field(part)),
        }
    }
    Err(invalid_field(&parts.join(".")))
}

/// Build the predicate for one filter.
pub fn condition(catalog: &Catalog, schema: &SchemaDef, node: &FilterNode) -> Result<Predicate, ApiError> {
    let (path, column) = resolve_path(catalog, schema, &node.field)?;
    let value = match (&column, &node.value) {
        (Some(column), Value::String(raw)) if column.data_type == DataType::Bool => {
            Value::Bool(is_truthy(raw))
        }
        (_, value) => value.clone(),
    };
    Ok(Predicate::Condition(Condition {
        path,
        lookup: node.operator.unwrap_or(Lookup::Exact),
        value,
    }))
}

/// Reduce a complex filter clause.
fn reduce_clause(catalog: &Catalog, schema: &SchemaDef, clause: &Clause) -> Result<Option<Predicate>, ApiError> {
    match clause {
        Clause::Leaf { node, negated } => {
            let predicate = condition(catalog, schema, node)?;
            Ok(Some(if *negated { predicate.negate() } else { predicate }))
        }
        Clause::And(items) | Clause::Or(items) => {
            let mut reduced: Option<Predicate> = None;
            for item in items {
                let Some(next) = reduce_clause(catalog, schema, item)? else {
                    continue;
                };
                reduced = Some(match (reduced, matches!(clause, Clause::Or(_))) {
                    (None, _) => next,
                    (Some(acc), true) => acc.or(next),
                    (Some(acc), false) => acc.and(next),
                });
            }
            Ok(reduced)
        }
    }
}

/// Predicate for one level of a filter tree.
///
/// Legacy filters AND every inclusion and AND NOT every exclusion; a complex
/// filter is reduced as written and ANDed on top.
pub fn filter_predicate(
    catalog: &Catalog,
    schema: &SchemaDef,
    filters: &FilterTree,
) -> Result<Option<Predicate>, ApiError> {
    let mut predicate = None;
    for node in filters.include.values() {
        predicate = Predicate::merge(predicate, Some(condition(catalog, schema, node)?));
    }
    for node in filters.exclude.values() {
        predicate = Predicate::merge(predicate, Some(condition(catalog, schema, node)?.negate()));
    }
    if let Some(complex) = &filters.complex {
        predicate = Predicate::merge(predicate, reduce_clause(catalog, schema, complex)?);
    }
    Ok(predicate)
}

/// True when a condition path walks through a to-many relation.
pub fn crosses_to_many(models: &ModelRegistry, model: &str, predicate: &Predicate) -> bool {
    predicate.conditions().iter().any(|condition| {
        let Ok(mut current) = models.get(model) else {
            return false;
        };
        for hop in &condition.path {
            let Some(relation) = current.relation_by_query_name(hop) else {
                return false;
            };
            if relation.kind.is_many() {
                return true;
            }
            match models.get(&relation.target) {
                Ok(next) => current = next,
                Err(_) => return false,
            }
        }
        false
    })
}
