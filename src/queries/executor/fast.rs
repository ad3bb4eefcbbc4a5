//! Row-merging execution.
//!
//! Rows stay plain JSON maps. Each prefetch is merged into its parent rows
//! under the relation's accessor name: an object (or `null`) for to-one
//! relations, an array for to-many relations. Models with
//! `use_fastquery = false` are loaded by the [`StandardExecutor`] instead and
//! folded into the same row shape.

use std::collections::HashMap;
use std::fmt;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{
    QueryExecutor, ResultSet, StandardExecutor, check_unique, distinct_values, ensure_column, generic_plan,
    relation_plan, restrict,
};
use crate::db::schema::{ModelDef, ModelRegistry, RelationDef, RelationKind};
use crate::db::{DatabaseBackend, Instance, Lookup, Predicate, Prefetched, Query, Record, Related, Row};
use crate::error::ApiError;
use crate::queries::plan::{Prefetch, QueryPlan};

#[derive(Debug, Clone, Copy, Default)]
pub struct FastExecutor;

impl QueryExecutor for FastExecutor {
    fn name(&self) -> &'static str {
        "fast"
    }

    fn execute(&self, backend: &dyn DatabaseBackend, plan: &QueryPlan) -> Result<ResultSet, ApiError> {
        let model = backend.models().get(&plan.query.model)?;
        if !model.use_fastquery {
            debug!(model = %model.name, "fast path disabled, loading full objects");
            return StandardExecutor.execute(backend, plan);
        }
        Ok(ResultSet::Rows {
            model: model.name.clone(),
            rows: self.rows(backend, plan)?,
        })
    }
}

fn pk_of(model: &ModelDef, row: &Row) -> Value {
    row.get(&model.pk).cloned().unwrap_or(Value::Null)
}

/// Fold an instance and its prefetched relations into one row.
fn inline(instance: Instance) -> Row {
    let mut row = instance.row;
    for (name, data) in instance.prefetched {
        let value = match data {
            Prefetched::One(Some(related)) => Value::Object(inline(*related)),
            Prefetched::One(None) => Value::Null,
            Prefetched::Many(related) => Value::Array(related.into_iter().map(|i| Value::Object(inline(i))).collect()),
        };
        row.insert(name, value);
    }
    row
}

impl FastExecutor {
    /// Run one plan level and merge its prefetches into the rows.
    pub fn rows(&self, backend: &dyn DatabaseBackend, plan: &QueryPlan) -> Result<Vec<Row>, ApiError> {
        check_unique(&plan.prefetches)?;
        let model = backend.models().get(&plan.query.model)?.clone();
        if !model.use_fastquery {
            let instances = StandardExecutor.instances(backend, plan)?;
            return Ok(instances.into_iter().map(inline).collect());
        }

        let mut rows = backend.fetch(&plan.query).map_err(ApiError::from_filter_error)?;
        for prefetch in &plan.prefetches {
            if rows.is_empty() {
                break;
            }
            self.merge(backend, &model, &mut rows, prefetch)?;
        }
        Ok(rows)
    }

    fn merge(
        &self,
        backend: &dyn DatabaseBackend,
        model: &ModelDef,
        rows: &mut [Row],
        prefetch: &Prefetch,
    ) -> Result<(), ApiError> {
        if let Some(relation) = model.get_relation(&prefetch.source) {
            debug!(model = %model.name, relation = %relation.name, kind = relation.kind.code(), "merge");
            let plan = relation_plan(prefetch, &relation.target);
            return match relation.kind {
                RelationKind::Fk | RelationKind::O2o => self.merge_fk(backend, rows, relation, &plan),
                RelationKind::O2or => self.merge_o2or(backend, model, rows, relation, &plan, false),
                RelationKind::M2o => self.merge_o2or(backend, model, rows, relation, &plan, true),
                RelationKind::M2m => self.merge_m2m(backend, model, rows, relation, &plan),
            };
        }
        if model.get_generic(&prefetch.source).is_some() {
            return self.merge_generic(backend, model, rows, prefetch);
        }
        Err(ApiError::ImproperlyConfigured(format!(
            "Cannot prefetch '{}' on {}",
            prefetch.source, model.name
        )))
    }

    /// Pull the fk values out of the rows and fetch them with `pk IN`.
    fn merge_fk(
        &self,
        backend: &dyn DatabaseBackend,
        rows: &mut [Row],
        relation: &RelationDef,
        plan: &QueryPlan,
    ) -> Result<(), ApiError> {
        let Some(column) = relation.column.as_deref() else {
            return Err(ApiError::ImproperlyConfigured(format!(
                "Relation '{}' has no local column",
                relation.name
            )));
        };
        let target = backend.models().get(&relation.target)?;
        let ids = distinct_values(rows.iter().filter_map(|row| row.get(column).cloned()));
        let related = if ids.is_empty() {
            Vec::new()
        } else {
            let query = restrict(&plan.query, &target.pk, ids);
            self.rows(backend, &QueryPlan { query, prefetches: plan.prefetches.clone() })?
        };
        let id_map: HashMap<String, Row> = related
            .into_iter()
            .map(|row| (pk_of(target, &row).to_string(), row))
            .collect();

        for row in rows.iter_mut() {
            let key = row.get(column).cloned().unwrap_or(Value::Null);
            let value = id_map.get(&key.to_string()).cloned().map(Value::Object).unwrap_or(Value::Null);
            row.insert(relation.name.clone(), value);
        }
        Ok(())
    }

    /// Fetch remote rows pointing at the local pks. In many mode every local
    /// row gets a list; otherwise the single match or `null`.
    fn merge_o2or(
        &self,
        backend: &dyn DatabaseBackend,
        model: &ModelDef,
        rows: &mut [Row],
        relation: &RelationDef,
        plan: &QueryPlan,
        many: bool,
    ) -> Result<(), ApiError> {
        let Some(remote_column) = relation.remote_column.as_deref() else {
            return Err(ApiError::ImproperlyConfigured(format!(
                "Relation '{}' has no remote column",
                relation.name
            )));
        };
        let my_ids = distinct_values(rows.iter().map(|row| pk_of(model, row)));
        let query = ensure_column(restrict(&plan.query, remote_column, my_ids), remote_column);
        let remote = self.rows(backend, &QueryPlan { query, prefetches: plan.prefetches.clone() })?;

        let mut by_owner: HashMap<String, Vec<Value>> = HashMap::new();
        for remote_row in remote {
            let owner = remote_row.get(remote_column).cloned().unwrap_or(Value::Null);
            by_owner.entry(owner.to_string()).or_default().push(Value::Object(remote_row));
        }
        for row in rows.iter_mut() {
            let found = by_owner.get(&pk_of(model, row).to_string()).cloned().unwrap_or_default();
            let value = if many {
                Value::Array(found)
            } else {
                found.into_iter().next().unwrap_or(Value::Null)
            };
            row.insert(relation.name.clone(), value);
        }
        Ok(())
    }

    /// Collect (remote, local) join pairs, fetch the distinct remote rows
    /// once, then fan them out per local row.
    fn merge_m2m(
        &self,
        backend: &dyn DatabaseBackend,
        model: &ModelDef,
        rows: &mut [Row],
        relation: &RelationDef,
        plan: &QueryPlan,
    ) -> Result<(), ApiError> {
        let target = backend.models().get(&relation.target)?;
        let my_ids = distinct_values(rows.iter().map(|row| pk_of(model, row)));
        let local_keys: Vec<String> = my_ids.iter().map(Value::to_string).collect();

        let reverse = relation
            .reverse
            .as_deref()
            .and_then(|name| target.get_relation(name));
        let joins: Vec<(Value, Value)> = match reverse {
            Some(reverse) => {
                // Group.users for User.groups, with the sub-query's filter.
                let query = Query {
                    predicate: plan.query.predicate.clone(),
                    distinct: plan.query.distinct,
                    ..Query::new(&target.name)
                };
                let query = restrict(&query, reverse.query_name(), my_ids.clone());
                backend
                    .fetch_pairs(&query, &reverse.name)
                    .map_err(ApiError::from_filter_error)?
            }
            None => {
                let query = Query::new(&model.name).filter(Predicate::condition(
                    &[model.pk.as_str()],
                    Lookup::In,
                    Value::Array(my_ids.clone()),
                ));
                backend
                    .fetch_pairs(&query, &relation.name)
                    .map_err(ApiError::from_filter_error)?
                    .into_iter()
                    .map(|(local, remote)| (remote, local))
                    .collect()
            }
        };
        let joins: Vec<(Value, Value)> = joins
            .into_iter()
            .filter(|(_, local)| local_keys.contains(&local.to_string()))
            .collect();

        let remote_ids = distinct_values(joins.iter().map(|(remote, _)| remote.clone()));
        let remote = if remote_ids.is_empty() {
            Vec::new()
        } else {
            let query = restrict(&plan.query, &target.pk, remote_ids);
            self.rows(backend, &QueryPlan { query, prefetches: plan.prefetches.clone() })?
        };

        let mut locals_of: HashMap<String, Vec<String>> = HashMap::new();
        for (remote_id, local_id) in &joins {
            locals_of.entry(remote_id.to_string()).or_default().push(local_id.to_string());
        }
        // Fan out in remote query order.
        let mut object_map: HashMap<String, Vec<Value>> = HashMap::new();
        for remote_row in remote {
            let Some(locals) = locals_of.get(&pk_of(target, &remote_row).to_string()) else {
                continue;
            };
            for local in locals {
                object_map
                    .entry(local.clone())
                    .or_default()
                    .push(Value::Object(remote_row.clone()));
            }
        }
        for row in rows.iter_mut() {
            let found = object_map.remove(&pk_of(model, row).to_string()).unwrap_or_default();
            row.insert(relation.name.clone(), Value::Array(found));
        }
        Ok(())
    }

    /// One `pk IN` fetch per model referenced by the type column.
    fn merge_generic(
        &self,
        backend: &dyn DatabaseBackend,
        model: &ModelDef,
        rows: &mut [Row],
        prefetch: &Prefetch,
    ) -> Result<(), ApiError> {
        let Some(generic) = model.get_generic(&prefetch.source) else {
            return Ok(());
        };
        let mut by_type: Vec<(String, Vec<Value>)> = Vec::new();
        for row in rows.iter() {
            let (Some(Value::String(type_name)), Some(id)) = (row.get(&generic.type_column), row.get(&generic.id_column))
            else {
                continue;
            };
            match by_type.iter_mut().find(|(t, _)| t == type_name) {
                Some((_, ids)) => ids.push(id.clone()),
                None => by_type.push((type_name.clone(), vec![id.clone()])),
            }
        }

        let mut found: HashMap<(String, String), Row> = HashMap::new();
        for (type_name, ids) in by_type {
            let Ok(target) = backend.models().get(&type_name) else {
                warn!(model = %model.name, relation = %generic.name, target = %type_name, "unknown generic target");
                continue;
            };
            let plan = generic_plan(prefetch, &target.name);
            let query = restrict(&plan.query, &target.pk, distinct_values(ids));
            for row in self.rows(backend, &QueryPlan { query, prefetches: plan.prefetches })? {
                found.insert((type_name.clone(), pk_of(target, &row).to_string()), row);
            }
        }

        for row in rows.iter_mut() {
            let value = match (row.get(&generic.type_column), row.get(&generic.id_column)) {
                (Some(Value::String(type_name)), Some(id)) => found
                    .get(&(type_name.clone(), id.to_string()))
                    .cloned()
                    .map(Value::Object)
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            };
            row.insert(generic.name.clone(), value);
        }
        Ok(())
    }
}

/// A row produced by the [`FastExecutor`], seen as a [`Record`].
pub struct FastRecord<'a> {
    models: &'a ModelRegistry,
    model: &'a ModelDef,
    row: &'a Map<String, Value>,
}

impl<'a> FastRecord<'a> {
    pub fn new(models: &'a ModelRegistry, model: &'a ModelDef, row: &'a Row) -> Self {
        Self { models, model, row }
    }

    fn nested(&self, model: &str, value: &'a Value) -> Option<Box<dyn Record + 'a>> {
        let model = self.models.get(model).ok()?;
        let row = value.as_object()?;
        Some(Box::new(FastRecord::new(self.models, model, row)))
    }
}

impl fmt::Debug for FastRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(&self.model.name).field("row", self.row).finish()
    }
}

impl Record for FastRecord<'_> {
    fn model_name(&self) -> &str {
        &self.model.name
    }

    fn pk(&self) -> Value {
        pk_of(self.model, self.row)
    }

    fn value(&self, column: &str) -> Option<Value> {
        let column = self.model.get_column(column)?;
        self.row.get(&column.name).cloned()
    }

    fn related(&self, name: &str) -> Related<'_> {
        let target = if let Some(relation) = self.model.get_relation(name) {
            relation.target.clone()
        } else if let Some(generic) = self.model.get_generic(name) {
            match self.row.get(&generic.type_column) {
                Some(Value::String(type_name)) => type_name.clone(),
                _ => return Related::Null,
            }
        } else {
            return Related::Unloaded;
        };

        match self.row.get(name) {
            Some(Value::Null) => Related::Null,
            Some(Value::Array(items)) => {
                Related::Many(items.iter().filter_map(|item| self.nested(&target, item)).collect())
            }
            Some(value) => match self.nested(&target, value) {
                Some(record) => Related::One(record),
                None => Related::Unloaded,
            },
            None => {
                let local_null = self
                    .model
                    .local_column(name)
                    .filter(|column| column != name)
                    .and_then(|column| self.row.get(&column))
                    .is_some_and(Value::is_null);
                if local_null { Related::Null } else { Related::Unloaded }
            }
        }
    }
}
