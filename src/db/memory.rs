//! In-process reference backend.
//!
//! `MemoryDb` keeps one row list per model plus the link tables of m2m
//! relations, evaluates [`Predicate`]s across relations the way a relational
//! backend would (any-match semantics over to-many hops), and counts every
//! round trip so callers can assert on query budgets.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use regex::Regex;
use serde_json::Value;
use tracing::trace;

use super::backend::{DatabaseBackend, Query, Row};
use super::predicate::{Condition, Lookup, Predicate};
use super::schema::{ColumnDef, DataType, ModelDef, ModelRegistry, RelationDef, RelationKind, ThroughDef};
use super::value::{coerce, compare_values, date_parts, value_key, week_day, DatabaseValue};
use super::DbError;

/// In-memory storage with round-trip counting.
#[derive(Debug, Default)]
pub struct MemoryDb {
    models: ModelRegistry,
    tables: BTreeMap<String, Vec<Row>>,
    links: BTreeMap<String, Vec<Row>>,
    queries: AtomicUsize,
}

fn same(a: &Value, b: &Value) -> bool {
    !a.is_null() && compare_values(a, b) == Ordering::Equal
}

fn pk_of(model: &ModelDef, row: &Row) -> Value {
    row.get(&model.pk).cloned().unwrap_or(Value::Null)
}

fn import_error(message: String) -> DbError {
    DbError::ImportFailed {
        data_type: "rows".to_string(),
        message,
    }
}

impl MemoryDb {
    pub fn new(models: ModelRegistry) -> Self {
        Self {
            models,
            ..Default::default()
        }
    }

    /// Insert a row, coercing every cell to its column type.
    ///
    /// Missing columns are stored as null; unknown columns and a missing
    /// primary key are rejected.
    pub fn insert(&mut self, model_name: &str, row: Row) -> Result<(), DbError> {
        self.store(model_name, row).map(|_| ())
    }

    fn store(&mut self, model_name: &str, mut row: Row) -> Result<Row, DbError> {
        let model = self.models.get(model_name)?.clone();
        let mut stored = Row::new();
        for column in &model.columns {
            let value = row.remove(&column.name).unwrap_or(Value::Null);
            stored.insert(column.name.clone(), coerce(column, &value)?);
        }
        if let Some(extra) = row.keys().next() {
            return Err(import_error(format!(
                "Unknown column '{}' for model {}",
                extra, model.name
            )));
        }
        if pk_of(&model, &stored).is_null() {
            return Err(import_error(format!(
                "Row for model {} has no primary key",
                model.name
            )));
        }
        self.tables.entry(model.name.clone()).or_default().push(stored.clone());
        Ok(stored)
    }

    /// One past the largest integer primary key stored for the model.
    fn next_pk(&self, model: &ModelDef) -> Result<Value, DbError> {
        match model.pk_column() {
            Some(column) if column.data_type == DataType::Int => {
                let max = self
                    .rows(&model.name)
                    .iter()
                    .filter_map(|row| pk_of(model, row).as_i64())
                    .max()
                    .unwrap_or(0);
                Ok(Value::from(max + 1))
            }
            _ => Err(DbError::InvalidValue {
                column: model.pk.clone(),
                value: "null".to_string(),
                expected: "primary key".to_string(),
            }),
        }
    }

    fn row_index(&self, model: &ModelDef, pk: &Value) -> Result<usize, DbError> {
        self.rows(&model.name)
            .iter()
            .position(|row| same(&pk_of(model, row), pk))
            .ok_or_else(|| DbError::MissingRow {
                model: model.name.clone(),
                pk: pk.to_string(),
            })
    }

    /// Record an m2m link for `relation` (an accessor on `model_name`).
    pub fn link(
        &mut self,
        model_name: &str,
        relation: &str,
        local: Value,
        remote: Value,
    ) -> Result<(), DbError> {
        let model = self.models.get(model_name)?;
        let through = model
            .get_relation(relation)
            .and_then(|r| r.through.clone())
            .ok_or_else(|| {
                import_error(format!(
                    "{}.{} is not a many-to-many relation",
                    model_name, relation
                ))
            })?;
        let mut link = Row::new();
        link.insert(through.source_column.clone(), local);
        link.insert(through.target_column.clone(), remote);
        let rows = self.links.entry(through.table.clone()).or_default();
        if !rows.contains(&link) {
            rows.push(link);
        }
        Ok(())
    }

    /// Rows stored for a model, in insertion order.
    pub fn rows(&self, model_name: &str) -> &[Row] {
        self.tables.get(model_name).map(Vec::as_slice).unwrap_or(&[])
    }

    fn link_rows(&self, table: &str) -> &[Row] {
        self.links.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    fn record_round_trip(&self, kind: &str, query: &Query) {
        let n = self.queries.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        trace!(backend = "memory", round_trip = n, kind, model = %query.model, "query");
    }

    fn record_write(&self, kind: &str, model: &str) {
        let n = self.queries.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        trace!(backend = "memory", round_trip = n, kind, model, "write");
    }

    fn find_by_pk<'a>(&'a self, model: &ModelDef, pk: &Value) -> Option<&'a Row> {
        self.rows(&model.name)
            .iter()
            .find(|row| same(&pk_of(model, row), pk))
    }

    fn related_rows<'a>(
        &'a self,
        model: &ModelDef,
        row: &Row,
        relation: &RelationDef,
    ) -> Result<Vec<&'a Row>, DbError> {
        let target = self.models.get(&relation.target)?;
        let missing = |what: &str| DbError::InvalidLookup {
            model: model.name.clone(),
            keyword: format!("{} ({} missing)", relation.name, what),
        };
        let related = match relation.kind {
            RelationKind::Fk | RelationKind::O2o => {
                let column = relation.column.as_deref().ok_or_else(|| missing("column"))?;
                let value = row.get(column).cloned().unwrap_or(Value::Null);
                self.find_by_pk(target, &value).into_iter().collect()
            }
            RelationKind::O2or | RelationKind::M2o => {
                let column = relation
                    .remote_column
                    .as_deref()
                    .ok_or_else(|| missing("remote_column"))?;
                let pk = pk_of(model, row);
                self.rows(&target.name)
                    .iter()
                    .filter(|r| r.get(column).is_some_and(|v| same(v, &pk)))
                    .collect()
            }
            RelationKind::M2m => {
                let through = relation.through.as_ref().ok_or_else(|| missing("through"))?;
                let pk = pk_of(model, row);
                self.link_rows(&through.table)
                    .iter()
                    .filter(|l| l.get(&through.source_column).is_some_and(|v| same(v, &pk)))
                    .filter_map(|l| l.get(&through.target_column))
                    .filter_map(|remote| self.find_by_pk(target, remote))
                    .collect()
            }
        };
        Ok(related)
    }

    /// Column reached by a storage path, validated against model metadata.
    fn column_for_path(&self, model: &ModelDef, path: &[String]) -> Result<ColumnDef, DbError> {
        let unresolved = |keyword: &str| DbError::InvalidLookup {
            model: model.name.clone(),
            keyword: keyword.to_string(),
        };
        let (head, rest) = path.split_first().ok_or_else(|| unresolved(""))?;
        if let Some(column) = model.get_column(head) {
            return match rest.first() {
                Some(extra) => Err(unresolved(extra)),
                None => Ok(column.clone()),
            };
        }
        let relation = model
            .relation_by_query_name(head)
            .ok_or_else(|| unresolved(head))?;
        let target = self.models.get(&relation.target)?;
        if rest.is_empty() {
            return target.pk_column().cloned().ok_or_else(|| unresolved(&target.pk));
        }
        self.column_for_path(target, rest)
    }

    /// Values found at a storage path; to-many hops fan out.
    fn values_at(&self, model: &ModelDef, row: &Row, path: &[String]) -> Result<Vec<Value>, DbError> {
        let Some((head, rest)) = path.split_first() else {
            return Ok(Vec::new());
        };
        if let Some(column) = model.get_column(head) {
            return Ok(vec![row.get(&column.name).cloned().unwrap_or(Value::Null)]);
        }
        let Some(relation) = model.relation_by_query_name(head) else {
            return Err(DbError::InvalidLookup {
                model: model.name.clone(),
                keyword: head.clone(),
            });
        };
        let target = self.models.get(&relation.target)?;
        let mut values = Vec::new();
        for related in self.related_rows(model, row, relation)? {
            if rest.is_empty() {
                values.push(pk_of(target, related));
            } else {
                values.extend(self.values_at(target, related, rest)?);
            }
        }
        Ok(values)
    }

    fn evaluate(&self, model: &ModelDef, row: &Row, predicate: &Predicate) -> Result<bool, DbError> {
        match predicate {
            Predicate::Condition(condition) => self.evaluate_condition(model, row, condition),
            Predicate::Not(inner) => Ok(!self.evaluate(model, row, inner)?),
            Predicate::And(items) => {
                for item in items {
                    if !self.evaluate(model, row, item)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::Or(items) => {
                for item in items {
                    if self.evaluate(model, row, item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    fn evaluate_condition(&self, model: &ModelDef, row: &Row, condition: &Condition) -> Result<bool, DbError> {
        let column = self.column_for_path(model, &condition.path)?;
        let operand = prepare_operand(&column, condition.lookup, &condition.value)?;
        let values = self.values_at(model, row, &condition.path)?;

        if condition.lookup == Lookup::Isnull || (condition.lookup == Lookup::Exact && operand.is_null()) {
            let is_null = values.iter().all(Value::is_null);
            let expected = operand.as_bool().unwrap_or(true);
            return Ok(is_null == expected);
        }

        for value in values.iter().filter(|v| !v.is_null()) {
            if matches_lookup(&column, condition.lookup, value, &operand)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Validate every condition up front so that an empty table still reports
    /// malformed filters.
    fn validate(&self, model: &ModelDef, predicate: &Predicate) -> Result<(), DbError> {
        for condition in predicate.conditions() {
            let column = self.column_for_path(model, &condition.path)?;
            prepare_operand(&column, condition.lookup, &condition.value)?;
        }
        Ok(())
    }

    /// Rows matching the predicate, in query order, before slicing.
    fn matching<'a>(&'a self, query: &Query) -> Result<(&'a ModelDef, Vec<&'a Row>), DbError> {
        let model: &ModelDef = self.models.get(&query.model)?;
        if let Some(predicate) = &query.predicate {
            self.validate(model, predicate)?;
        }
        for term in &query.ordering {
            self.column_for_path(model, &term.path)?;
        }

        let mut rows = Vec::new();
        for row in self.rows(&model.name) {
            let keep = match &query.predicate {
                Some(predicate) => self.evaluate(model, row, predicate)?,
                None => true,
            };
            if keep {
                rows.push(row);
            }
        }

        if query.distinct {
            let mut seen = crate::dedup::DeduplicationFilter::new();
            rows.retain(|row| seen.should_process(value_key(&pk_of(model, row))));
        }

        if !query.ordering.is_empty() {
            let mut keyed = Vec::with_capacity(rows.len());
            for row in rows {
                let mut keys = Vec::with_capacity(query.ordering.len());
                for term in &query.ordering {
                    let first = self.values_at(model, row, &term.path)?.into_iter().next();
                    keys.push(first.unwrap_or(Value::Null));
                }
                keyed.push((keys, row));
            }
            keyed.sort_by(|(a, _), (b, _)| {
                for (term, (left, right)) in query.ordering.iter().zip(a.iter().zip(b.iter())) {
                    let ord = compare_values(left, right);
                    let ord = if term.descending { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
            rows = keyed.into_iter().map(|(_, row)| row).collect();
        }

        Ok((model, rows))
    }

    fn project(model: &ModelDef, row: &Row, only: Option<&Vec<String>>) -> Row {
        match only {
            None => row.clone(),
            Some(columns) => row
                .iter()
                .filter(|(name, _)| **name == model.pk || columns.contains(name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }
}

fn list_operand(column: &ColumnDef, value: &Value) -> Result<Vec<Value>, DbError> {
    let items = match value {
        Value::Array(items) => items.clone(),
        Value::String(s) => s.split(',').map(|part| Value::String(part.to_string())).collect(),
        other => vec![other.clone()],
    };
    items.iter().map(|item| coerce(column, item)).collect()
}

fn date_column(column: &ColumnDef, lookup: Lookup) -> Result<(), DbError> {
    if column.data_type == DataType::Date {
        Ok(())
    } else {
        Err(DbError::TypeMismatch {
            column: column.name.clone(),
            lookup: lookup.name().to_string(),
            data_type: column.data_type.name().to_string(),
        })
    }
}

/// Coerce the right-hand side of a condition to the column's type.
fn prepare_operand(column: &ColumnDef, lookup: Lookup, value: &Value) -> Result<Value, DbError> {
    match lookup {
        Lookup::Isnull => Ok(Value::Bool(match value {
            Value::Bool(b) => *b,
            other => crate::utils::is_truthy(&other.as_string_or("")),
        })),
        Lookup::In => list_operand(column, value).map(Value::Array),
        Lookup::Any | Lookup::All => {
            let element = ColumnDef::new(&column.name, DataType::String);
            let target = if column.data_type == DataType::Json { &element } else { column };
            list_operand(target, value).map(Value::Array)
        }
        Lookup::Range => {
            let bounds = list_operand(column, value)?;
            if bounds.len() != 2 {
                return Err(DbError::InvalidValue {
                    column: column.name.clone(),
                    value: value.to_string(),
                    expected: "pair of bounds".to_string(),
                });
            }
            Ok(Value::Array(bounds))
        }
        Lookup::Year | Lookup::Month | Lookup::Day | Lookup::WeekDay => {
            date_column(column, lookup)?;
            coerce(&ColumnDef::new(lookup.name(), DataType::Int), value)
        }
        Lookup::Regex => {
            let pattern = value.as_string_or("");
            Regex::new(&pattern).map_err(|e| DbError::InvalidValue {
                column: column.name.clone(),
                value: pattern.clone(),
                expected: format!("regular expression ({})", e),
            })?;
            Ok(Value::String(pattern))
        }
        Lookup::Contains
        | Lookup::Icontains
        | Lookup::Startswith
        | Lookup::Istartswith
        | Lookup::Endswith
        | Lookup::Iendswith => {
            if column.data_type == DataType::Json {
                Ok(value.clone())
            } else {
                Ok(Value::String(value.as_string_or("")))
            }
        }
        Lookup::Exact | Lookup::Gt | Lookup::Lt | Lookup::Gte | Lookup::Lte => coerce(column, value),
    }
}

fn matches_lookup(column: &ColumnDef, lookup: Lookup, cell: &Value, operand: &Value) -> Result<bool, DbError> {
    let text = || cell.as_string().unwrap_or_else(|| cell.to_string());
    let needle = || operand.as_string_or("");
    let list = || operand.as_array().cloned().unwrap_or_default();
    let cell_items = || match cell {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    };
    let date_part = |pick: fn((i64, u32, u32)) -> i64| {
        cell.as_str()
            .and_then(date_parts)
            .map(|parts| Value::from(pick(parts)))
    };

    let matched = match lookup {
        Lookup::Exact => same(cell, operand),
        Lookup::In => list().iter().any(|item| same(cell, item)),
        Lookup::Any => {
            let wanted = list();
            cell_items()
                .iter()
                .any(|item| wanted.iter().any(|w| value_key(w) == value_key(item) || same(item, w)))
        }
        Lookup::All => {
            let items = cell_items();
            list()
                .iter()
                .all(|w| items.iter().any(|item| value_key(w) == value_key(item) || same(item, w)))
        }
        Lookup::Contains if column.data_type == DataType::Json => match (cell, operand) {
            (Value::Array(items), Value::Array(wanted)) => wanted.iter().all(|w| items.contains(w)),
            (Value::Array(items), single) => items.contains(single),
            _ => false,
        },
        Lookup::Contains => text().contains(&needle()),
        Lookup::Icontains => text().to_lowercase().contains(&needle().to_lowercase()),
        Lookup::Startswith => text().starts_with(&needle()),
        Lookup::Istartswith => text().to_lowercase().starts_with(&needle().to_lowercase()),
        Lookup::Endswith => text().ends_with(&needle()),
        Lookup::Iendswith => text().to_lowercase().ends_with(&needle().to_lowercase()),
        Lookup::Year => date_part(|(y, _, _)| y).is_some_and(|v| same(&v, operand)),
        Lookup::Month => date_part(|(_, m, _)| m as i64).is_some_and(|v| same(&v, operand)),
        Lookup::Day => date_part(|(_, _, d)| d as i64).is_some_and(|v| same(&v, operand)),
        Lookup::WeekDay => {
            date_part(|(y, m, d)| week_day(y, m, d) as i64).is_some_and(|v| same(&v, operand))
        }
        Lookup::Regex => {
            let pattern = needle();
            let regex = Regex::new(&pattern).map_err(|e| DbError::InvalidValue {
                column: column.name.clone(),
                value: pattern.clone(),
                expected: format!("regular expression ({})", e),
            })?;
            regex.is_match(&text())
        }
        Lookup::Range => {
            let bounds = list();
            match (bounds.first(), bounds.get(1)) {
                (Some(lo), Some(hi)) => {
                    compare_values(cell, lo) != Ordering::Less
                        && compare_values(cell, hi) != Ordering::Greater
                }
                _ => false,
            }
        }
        Lookup::Gt => compare_values(cell, operand) == Ordering::Greater,
        Lookup::Lt => compare_values(cell, operand) == Ordering::Less,
        Lookup::Gte => compare_values(cell, operand) != Ordering::Less,
        Lookup::Lte => compare_values(cell, operand) != Ordering::Greater,
        Lookup::Isnull => false,
    };
    Ok(matched)
}

impl DatabaseBackend for MemoryDb {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn models(&self) -> &ModelRegistry {
        &self.models
    }

    fn fetch(&self, query: &Query) -> Result<Vec<Row>, DbError> {
        self.record_round_trip("fetch", query);
        let (model, rows) = self.matching(query)?;
        Ok(rows
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|row| Self::project(model, row, query.only.as_ref()))
            .collect())
    }

    fn count(&self, query: &Query) -> Result<usize, DbError> {
        self.record_round_trip("count", query);
        let (_, rows) = self.matching(query)?;
        Ok(rows.len())
    }

    fn fetch_through(
        &self,
        query: &Query,
        through: &ThroughDef,
        owners: &[Value],
    ) -> Result<Vec<(Value, Row)>, DbError> {
        self.record_round_trip("fetch_through", query);
        let (model, rows) = self.matching(query)?;
        let links = self.link_rows(&through.table);
        let mut result = Vec::new();
        for row in rows {
            let pk = pk_of(model, row);
            for link in links {
                let (Some(owner), Some(target)) =
                    (link.get(&through.source_column), link.get(&through.target_column))
                else {
                    continue;
                };
                if same(target, &pk) && owners.iter().any(|o| same(o, owner)) {
                    result.push((owner.clone(), Self::project(model, row, query.only.as_ref())));
                }
            }
        }
        Ok(result)
    }

    fn fetch_pairs(&self, query: &Query, relation: &str) -> Result<Vec<(Value, Value)>, DbError> {
        self.record_round_trip("fetch_pairs", query);
        let (model, rows) = self.matching(query)?;
        let relation_def = model
            .get_relation(relation)
            .ok_or_else(|| DbError::InvalidLookup {
                model: model.name.clone(),
                keyword: relation.to_string(),
            })?;
        let target = self.models.get(&relation_def.target)?;
        let mut pairs = Vec::new();
        for row in rows {
            let pk = pk_of(model, row);
            for related in self.related_rows(model, row, relation_def)? {
                pairs.push((pk.clone(), pk_of(target, related)));
            }
        }
        Ok(pairs)
    }

    fn insert_row(&mut self, model: &str, mut row: Row) -> Result<Row, DbError> {
        self.record_write("insert", model);
        let model_def = self.models.get(model)?.clone();
        let pk = row.get(&model_def.pk).cloned().unwrap_or(Value::Null);
        if pk.is_null() {
            row.insert(model_def.pk.clone(), self.next_pk(&model_def)?);
        } else if let Some(column) = model_def.pk_column() {
            let pk = coerce(column, &pk)?;
            if self.find_by_pk(&model_def, &pk).is_some() {
                return Err(DbError::InvalidValue {
                    column: column.name.clone(),
                    value: pk.to_string(),
                    expected: "unique primary key".to_string(),
                });
            }
        }
        self.store(model, row)
    }

    fn update_row(&mut self, model: &str, pk: &Value, changes: Row) -> Result<(), DbError> {
        self.record_write("update", model);
        let model_def = self.models.get(model)?.clone();
        let index = self.row_index(&model_def, pk)?;
        let mut coerced = Vec::with_capacity(changes.len());
        for (name, value) in changes {
            let column = model_def.get_column(&name).ok_or_else(|| DbError::InvalidLookup {
                model: model_def.name.clone(),
                keyword: name.clone(),
            })?;
            coerced.push((column.name.clone(), coerce(column, &value)?));
        }
        if let Some(row) = self.tables.get_mut(&model_def.name).and_then(|rows| rows.get_mut(index)) {
            row.extend(coerced);
        }
        Ok(())
    }

    fn delete_row(&mut self, model: &str, pk: &Value) -> Result<(), DbError> {
        self.record_write("delete", model);
        let model_def = self.models.get(model)?.clone();
        let index = self.row_index(&model_def, pk)?;
        if let Some(rows) = self.tables.get_mut(&model_def.name) {
            rows.remove(index);
        }

        // Link rows on either side of every m2m touching this model.
        let mut stale = Vec::new();
        for owner in self.models.iter() {
            for relation in &owner.relations {
                let Some(through) = &relation.through else {
                    continue;
                };
                if owner.name == model_def.name {
                    stale.push((through.table.clone(), through.source_column.clone()));
                }
                if relation.target == model_def.name {
                    stale.push((through.table.clone(), through.target_column.clone()));
                }
            }
        }
        for (table, column) in stale {
            if let Some(links) = self.links.get_mut(&table) {
                links.retain(|link| !link.get(&column).is_some_and(|v| same(v, pk)));
            }
        }
        Ok(())
    }

    fn set_links(&mut self, model: &str, relation: &str, owner: &Value, targets: &[Value]) -> Result<(), DbError> {
        self.record_write("set_links", model);
        let through = self
            .models
            .get(model)?
            .get_relation(relation)
            .and_then(|r| r.through.clone())
            .ok_or_else(|| DbError::InvalidLookup {
                model: model.to_string(),
                keyword: relation.to_string(),
            })?;
        let rows = self.links.entry(through.table.clone()).or_default();
        rows.retain(|link| !link.get(&through.source_column).is_some_and(|v| same(v, owner)));
        for target in targets {
            let mut link = Row::new();
            link.insert(through.source_column.clone(), owner.clone());
            link.insert(through.target_column.clone(), target.clone());
            if !rows.contains(&link) {
                rows.push(link);
            }
        }
        Ok(())
    }

    fn query_count(&self) -> usize {
        self.queries.load(AtomicOrdering::SeqCst)
    }

    fn reset_query_count(&self) {
        self.queries.store(0, AtomicOrdering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::OrderTerm;
    use rstest::{fixture, rstest};
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[fixture]
    fn db() -> MemoryDb {
        let models = ModelRegistry::new(vec![
            ModelDef::new("Location").column("name", DataType::String),
            ModelDef::new("User")
                .column("name", DataType::String)
                .column("age", DataType::Int)
                .column("joined", DataType::Date)
                .column("tags", DataType::Json)
                .fk("location", "Location")
                .relation(RelationDef {
                    name: "groups".into(),
                    kind: RelationKind::M2m,
                    target: "Group".into(),
                    column: None,
                    remote_column: None,
                    through: Some(ThroughDef {
                        table: "user_groups".into(),
                        source_column: "user_id".into(),
                        target_column: "group_id".into(),
                    }),
                    query_name: None,
                    reverse: None,
                }),
            ModelDef::new("Group").column("name", DataType::String),
        ]);
        let mut db = MemoryDb::new(models);
        db.insert("Location", row(json!({"id": 1, "name": "Paris"}))).unwrap();
        db.insert("Location", row(json!({"id": 2, "name": "Oslo"}))).unwrap();
        db.insert("Group", row(json!({"id": 1, "name": "admins"}))).unwrap();
        db.insert("Group", row(json!({"id": 2, "name": "staff"}))).unwrap();
        let users = [
            json!({"id": 1, "name": "ann", "age": 20, "joined": "2024-01-07", "tags": ["a", "b"], "location_id": 1}),
            json!({"id": 2, "name": "Bob", "age": 31, "joined": "2023-06-15", "tags": ["b"], "location_id": 2}),
            json!({"id": 3, "name": null, "age": 45, "joined": "2022-12-31", "tags": [], "location_id": null}),
        ];
        for user in users {
            db.insert("User", row(user)).unwrap();
        }
        db.link("User", "groups", json!(1), json!(1)).unwrap();
        db.link("User", "groups", json!(1), json!(2)).unwrap();
        db.link("User", "groups", json!(2), json!(2)).unwrap();
        db
    }

    fn ids(db: &MemoryDb, predicate: Predicate) -> Vec<i64> {
        db.fetch(&Query::new("User").filter(predicate))
            .unwrap()
            .iter()
            .map(|r| r["id"].as_i64().unwrap())
            .collect()
    }

    #[rstest]
    #[case(Predicate::condition(&["age"], Lookup::Gte, json!("31")), vec![2, 3])]
    #[case(Predicate::condition(&["age"], Lookup::Lt, json!(31)), vec![1])]
    #[case(Predicate::condition(&["name"], Lookup::Isnull, json!(true)), vec![3])]
    #[case(Predicate::condition(&["name"], Lookup::Isnull, json!(false)), vec![1, 2])]
    #[case(Predicate::condition(&["id"], Lookup::In, json!(["1", "3"])), vec![1, 3])]
    #[case(Predicate::condition(&["id"], Lookup::In, json!("1,2")), vec![1, 2])]
    #[case(Predicate::condition(&["name"], Lookup::Icontains, json!("B")), vec![2])]
    #[case(Predicate::condition(&["name"], Lookup::Contains, json!("B")), vec![2])]
    #[case(Predicate::condition(&["name"], Lookup::Istartswith, json!("a")), vec![1])]
    #[case(Predicate::condition(&["name"], Lookup::Endswith, json!("b")), vec![2])]
    #[case(Predicate::condition(&["name"], Lookup::Regex, json!("^[A-Z]")), vec![2])]
    #[case(Predicate::condition(&["age"], Lookup::Range, json!(["20", "31"])), vec![1, 2])]
    #[case(Predicate::condition(&["joined"], Lookup::Year, json!("2023")), vec![2])]
    #[case(Predicate::condition(&["joined"], Lookup::Month, json!("12")), vec![3])]
    #[case(Predicate::condition(&["joined"], Lookup::Day, json!("7")), vec![1])]
    #[case(Predicate::condition(&["joined"], Lookup::WeekDay, json!("1")), vec![1])]
    #[case(Predicate::condition(&["tags"], Lookup::Any, json!("a,z")), vec![1])]
    #[case(Predicate::condition(&["tags"], Lookup::All, json!("a,b")), vec![1])]
    #[case(Predicate::condition(&["location", "name"], Lookup::Exact, json!("Oslo")), vec![2])]
    #[case(Predicate::condition(&["location"], Lookup::Isnull, json!(true)), vec![3])]
    #[case(Predicate::condition(&["groups", "name"], Lookup::Exact, json!("staff")), vec![1, 2])]
    #[case(Predicate::condition(&["groups"], Lookup::Exact, json!(1)), vec![1])]
    fn test_lookups(db: MemoryDb, #[case] predicate: Predicate, #[case] expected: Vec<i64>) {
        assert_eq!(ids(&db, predicate), expected);
    }

    #[rstest]
    fn test_not_over_to_many_excludes_any_match(db: MemoryDb) {
        let predicate = Predicate::condition(&["groups", "name"], Lookup::Exact, json!("admins")).negate();
        assert_eq!(ids(&db, predicate), vec![2, 3]);
    }

    #[rstest]
    fn test_invalid_lookup_path(db: MemoryDb) {
        let query = Query::new("User").filter(Predicate::condition(&["nope"], Lookup::Exact, json!(1)));
        let err = db.fetch(&query).unwrap_err();
        assert!(matches!(err, DbError::InvalidLookup { .. }));
    }

    #[rstest]
    fn test_invalid_value_reported_on_empty_result(db: MemoryDb) {
        let query = Query::new("Group").filter(Predicate::condition(&["id"], Lookup::Exact, json!("abc")));
        let err = db.fetch(&query).unwrap_err();
        assert!(matches!(err, DbError::InvalidValue { .. }));
    }

    #[rstest]
    fn test_date_lookup_on_text_column(db: MemoryDb) {
        let query = Query::new("User").filter(Predicate::condition(&["name"], Lookup::Year, json!(2020)));
        assert!(matches!(db.fetch(&query), Err(DbError::TypeMismatch { .. })));
    }

    #[rstest]
    fn test_ordering_and_slice(db: MemoryDb) {
        let query = Query::new("User")
            .order_by(vec![OrderTerm::desc(&["age"])])
            .slice(1, Some(1));
        let rows = db.fetch(&query).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(2));
    }

    #[rstest]
    fn test_ordering_across_relation(db: MemoryDb) {
        let query = Query::new("User").order_by(vec![OrderTerm::asc(&["location", "name"])]);
        let order: Vec<Value> = db.fetch(&query).unwrap().iter().map(|r| r["id"].clone()).collect();
        assert_eq!(order, vec![json!(3), json!(2), json!(1)]);
    }

    #[rstest]
    fn test_only_projects_columns(db: MemoryDb) {
        let rows = db.fetch(&Query::new("User").only(vec!["name".into()])).unwrap();
        let keys: Vec<&String> = rows[0].keys().collect();
        assert_eq!(keys, vec!["id", "name"]);
    }

    #[rstest]
    fn test_round_trips_counted(db: MemoryDb) {
        assert_eq!(db.query_count(), 0);
        db.fetch(&Query::new("User")).unwrap();
        db.count(&Query::new("User")).unwrap();
        assert_eq!(db.query_count(), 2);
        db.reset_query_count();
        assert_eq!(db.query_count(), 0);
    }

    #[rstest]
    fn test_fetch_through(db: MemoryDb) {
        let through = ThroughDef {
            table: "user_groups".into(),
            source_column: "user_id".into(),
            target_column: "group_id".into(),
        };
        let rows = db
            .fetch_through(&Query::new("Group"), &through, &[json!(1), json!(2)])
            .unwrap();
        let pairs: Vec<(Value, Value)> = rows.iter().map(|(o, r)| (o.clone(), r["id"].clone())).collect();
        assert_eq!(
            pairs,
            vec![(json!(1), json!(1)), (json!(1), json!(2)), (json!(2), json!(2))]
        );
        assert_eq!(db.query_count(), 1);
    }

    #[rstest]
    fn test_fetch_pairs(db: MemoryDb) {
        let query = Query::new("User").filter(Predicate::condition(&["id"], Lookup::In, json!([1])));
        let pairs = db.fetch_pairs(&query, "groups").unwrap();
        assert_eq!(pairs, vec![(json!(1), json!(1)), (json!(1), json!(2))]);
    }

    #[rstest]
    fn test_insert_row_assigns_next_pk(mut db: MemoryDb) {
        let stored = db.insert_row("Group", row(json!({"name": "guests"}))).unwrap();
        assert_eq!(stored["id"], json!(3));
        assert_eq!(db.rows("Group").len(), 3);
        let err = db.insert_row("Group", row(json!({"id": "1", "name": "again"}))).unwrap_err();
        assert!(matches!(err, DbError::InvalidValue { .. }));
        assert_eq!(db.query_count(), 2);
    }

    #[rstest]
    fn test_update_row_coerces_changes(mut db: MemoryDb) {
        db.update_row("User", &json!(2), row(json!({"age": "32", "location_id": 1}))).unwrap();
        assert_eq!(ids(&db, Predicate::condition(&["age"], Lookup::Exact, json!(32))), vec![2]);
        assert_eq!(ids(&db, Predicate::condition(&["location", "name"], Lookup::Exact, json!("Paris"))), vec![1, 2]);

        let err = db.update_row("User", &json!(9), Row::new()).unwrap_err();
        assert_eq!(err.to_string(), "No User row with primary key 9");
        let err = db.update_row("User", &json!(1), row(json!({"colour": "red"}))).unwrap_err();
        assert!(matches!(err, DbError::InvalidLookup { .. }));
    }

    #[rstest]
    fn test_delete_row_drops_links(mut db: MemoryDb) {
        db.delete_row("Group", &json!(2)).unwrap();
        assert_eq!(db.rows("Group").len(), 1);
        let pairs = db.fetch_pairs(&Query::new("User"), "groups").unwrap();
        assert_eq!(pairs, vec![(json!(1), json!(1))]);
    }

    #[rstest]
    fn test_set_links_replaces_owner_links(mut db: MemoryDb) {
        db.set_links("User", "groups", &json!(1), &[json!(2)]).unwrap();
        db.set_links("User", "groups", &json!(3), &[json!(1), json!(2)]).unwrap();
        let pairs = db.fetch_pairs(&Query::new("User"), "groups").unwrap();
        assert_eq!(
            pairs,
            vec![(json!(1), json!(2)), (json!(2), json!(2)), (json!(3), json!(1)), (json!(3), json!(2))]
        );
    }

    #[rstest]
    fn test_insert_rejects_unknown_columns(mut db: MemoryDb) {
        let err = db.insert("Group", row(json!({"id": 9, "colour": "red"}))).unwrap_err();
        assert!(err.to_string().contains("colour"));
        let err = db.insert("Group", row(json!({"name": "x"}))).unwrap_err();
        assert!(err.to_string().contains("primary key"));
    }
}
