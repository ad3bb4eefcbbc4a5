//! Plan execution.
//!
//! Two executors honour the same [`QueryPlan`]: the standard executor
//! materializes [`Instance`]s with their prefetched relations attached, the
//! fast executor merges related rows straight into plain row maps. Both issue
//! one round trip per prefetch level (two for fast many-to-many merges),
//! whatever the number of rows.

mod fast;
mod standard;

pub use fast::{FastExecutor, FastRecord};
pub use standard::StandardExecutor;

use std::collections::HashSet;

use enum_dispatch::enum_dispatch;
use serde_json::Value;

use super::plan::{Prefetch, QueryPlan};
use crate::db::schema::ModelRegistry;
use crate::db::{DatabaseBackend, Instance, Lookup, Predicate, Query, Record, Row, value_key};
use crate::dedup::deduplicate_retain;
use crate::error::ApiError;

/// Runs a [`QueryPlan`] against a backend.
#[enum_dispatch]
pub trait QueryExecutor {
    fn name(&self) -> &'static str;

    /// Fetch the root rows and every prefetch in the plan.
    ///
    /// # Errors
    /// Backend failures caused by client filters become
    /// `ApiError::Validation`; a plan that prefetches the same relation twice
    /// is `ApiError::ImproperlyConfigured`.
    fn execute(&self, backend: &dyn DatabaseBackend, plan: &QueryPlan) -> Result<ResultSet, ApiError>;
}

#[enum_dispatch(QueryExecutor)]
#[derive(Debug, Clone, Copy)]
pub enum Executor {
    Standard(StandardExecutor),
    Fast(FastExecutor),
}

impl Executor {
    pub fn for_settings(use_fast_executor: bool) -> Self {
        if use_fast_executor {
            Executor::Fast(FastExecutor)
        } else {
            Executor::Standard(StandardExecutor)
        }
    }
}

/// Records produced by an executor.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultSet {
    Instances(Vec<Instance>),
    /// Plain rows of `model`, related rows merged in under their accessor names
    Rows { model: String, rows: Vec<Row> },
}

impl ResultSet {
    pub fn len(&self) -> usize {
        match self {
            ResultSet::Instances(instances) => instances.len(),
            ResultSet::Rows { rows, .. } => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn truncate(&mut self, len: usize) {
        match self {
            ResultSet::Instances(instances) => instances.truncate(len),
            ResultSet::Rows { rows, .. } => rows.truncate(len),
        }
    }

    /// Records to render, in query order.
    ///
    /// # Errors
    /// `ApiError::Backend` when the rows belong to a model `models` does not know.
    pub fn records<'a>(&'a self, models: &'a ModelRegistry) -> Result<Vec<Box<dyn Record + 'a>>, ApiError> {
        match self {
            ResultSet::Instances(instances) => Ok(instances
                .iter()
                .map(|i| Box::new(i) as Box<dyn Record + 'a>)
                .collect()),
            ResultSet::Rows { model, rows } => {
                let model = models.get(model)?;
                Ok(rows
                    .iter()
                    .map(|row| Box::new(FastRecord::new(models, model, row)) as Box<dyn Record + 'a>)
                    .collect())
            }
        }
    }
}

/// Reject plans that register the same relation twice at one level.
fn check_unique(prefetches: &[Prefetch]) -> Result<(), ApiError> {
    let mut seen = HashSet::new();
    for prefetch in prefetches {
        if !seen.insert(prefetch.source.as_str()) {
            return Err(ApiError::ImproperlyConfigured(format!(
                "'{}' lookup was already seen with a different queryset",
                prefetch.source
            )));
        }
    }
    Ok(())
}

/// Distinct non-null values, in first-seen order.
fn distinct_values(values: impl IntoIterator<Item = Value>) -> Vec<Value> {
    let mut values: Vec<Value> = values.into_iter().filter(|v| !v.is_null()).collect();
    deduplicate_retain(&mut values, value_key);
    values
}

/// `query` restricted to rows whose `column` is one of `values`.
fn restrict(query: &Query, column: &str, values: Vec<Value>) -> Query {
    query
        .clone()
        .filter(Predicate::condition(&[column], Lookup::In, Value::Array(values)))
}

/// Make sure a projected query still loads `column`.
fn ensure_column(mut query: Query, column: &str) -> Query {
    if let Some(only) = query.only.as_mut() {
        if !only.iter().any(|c| c == column) {
            only.push(column.to_string());
        }
    }
    query
}

/// Sub-plan of a relation prefetch, or a full load of the target model.
fn relation_plan(prefetch: &Prefetch, target: &str) -> QueryPlan {
    prefetch
        .plan
        .clone()
        .unwrap_or_else(|| QueryPlan::new(Query::new(target).distinct()))
}

/// Sub-plan for one target model of a generic relation.
fn generic_plan(prefetch: &Prefetch, target: &str) -> QueryPlan {
    prefetch
        .targets
        .get(target)
        .cloned()
        .unwrap_or_else(|| QueryPlan::new(Query::new(target)))
}
