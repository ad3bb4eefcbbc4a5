//! Database backend trait for abstracting storage implementations.
//!
//! The pipeline never builds SQL. It describes what it wants as a [`Query`]
//! (model, predicate, projection, ordering, slicing) and hands it to a
//! [`DatabaseBackend`], which owns evaluation and counts every round trip.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use super::predicate::Predicate;
use super::schema::{ModelRegistry, ThroughDef};
use super::DbError;

/// A fetched row: column name to cell.
pub type Row = Map<String, Value>;

/// One ordering term over a storage path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderTerm {
    pub path: Vec<String>,
    pub descending: bool,
}

impl OrderTerm {
    pub fn asc(path: &[&str]) -> Self {
        Self {
            path: path.iter().map(|s| s.to_string()).collect(),
            descending: false,
        }
    }

    pub fn desc(path: &[&str]) -> Self {
        Self {
            descending: true,
            ..Self::asc(path)
        }
    }
}

impl fmt::Display for OrderTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "-")?;
        }
        write!(f, "{}", self.path.join("__"))
    }
}

/// Description of a single-model read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicate: Option<Predicate>,
    /// Columns to load; `None` loads every column.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub only: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ordering: Vec<OrderTerm>,
    pub distinct: bool,
    #[serde(skip_serializing_if = "is_zero")]
    pub offset: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl Query {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            predicate: None,
            only: None,
            ordering: Vec::new(),
            distinct: false,
            offset: 0,
            limit: None,
        }
    }

    /// AND a predicate onto the query.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Predicate::merge(self.predicate.take(), Some(predicate));
        self
    }

    pub fn only(mut self, columns: Vec<String>) -> Self {
        self.only = Some(columns);
        self
    }

    pub fn order_by(mut self, ordering: Vec<OrderTerm>) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn slice(mut self, offset: usize, limit: Option<usize>) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }
}

/// Trait for storage backends the pipeline reads from and writes to.
///
/// Every method that touches stored rows is one round trip and must be
/// reflected by `query_count`.
pub trait DatabaseBackend: Send + Sync {
    /// Get the backend name for logging/debugging.
    fn backend_name(&self) -> &'static str;

    /// Model metadata the backend evaluates against.
    fn models(&self) -> &ModelRegistry;

    /// Rows of `query.model` matching the predicate, ordered, sliced and
    /// projected to `query.only`.
    fn fetch(&self, query: &Query) -> Result<Vec<Row>, DbError>;

    /// Number of rows matching the predicate, ignoring the slice.
    fn count(&self, query: &Query) -> Result<usize, DbError>;

    /// Rows of `query.model` joined to a link table, each paired with the
    /// owner pk found in `through.source_column`.
    ///
    /// # Arguments
    /// * `query` - Query over the related model
    /// * `through` - Link table; `target_column` points at `query.model`
    /// * `owners` - Owner pks to restrict the link rows to
    fn fetch_through(
        &self,
        query: &Query,
        through: &ThroughDef,
        owners: &[Value],
    ) -> Result<Vec<(Value, Row)>, DbError>;

    /// `(row pk, related pk)` pairs for rows of `query.model` matching the
    /// query, following `relation` (an accessor on `query.model`).
    fn fetch_pairs(&self, query: &Query, relation: &str) -> Result<Vec<(Value, Value)>, DbError>;

    /// Store a new row and return it as stored. A missing primary key is
    /// assigned by the backend.
    fn insert_row(&mut self, model: &str, row: Row) -> Result<Row, DbError>;

    /// Overwrite some columns of the row with primary key `pk`.
    fn update_row(&mut self, model: &str, pk: &Value, changes: Row) -> Result<(), DbError>;

    /// Remove the row with primary key `pk` together with its link-table rows.
    fn delete_row(&mut self, model: &str, pk: &Value) -> Result<(), DbError>;

    /// Replace the link-table rows of `owner` for the m2m `relation`.
    fn set_links(&mut self, model: &str, relation: &str, owner: &Value, targets: &[Value]) -> Result<(), DbError>;

    /// Round trips issued since creation or the last reset.
    fn query_count(&self) -> usize;

    fn reset_query_count(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::predicate::Lookup;
    use serde_json::json;

    #[test]
    fn test_filter_ands_predicates() {
        let query = Query::new("User")
            .filter(Predicate::condition(&["name"], Lookup::Exact, json!("0")))
            .filter(Predicate::condition(&["id"], Lookup::Gt, json!(1)));
        assert!(matches!(query.predicate, Some(Predicate::And(ref items)) if items.len() == 2));
    }

    #[test]
    fn test_order_term_display() {
        assert_eq!(OrderTerm::desc(&["location", "name"]).to_string(), "-location__name");
        assert_eq!(OrderTerm::asc(&["id"]).to_string(), "id");
    }

    #[test]
    fn test_serialize_skips_defaults() {
        let value = serde_json::to_value(Query::new("User")).unwrap();
        assert_eq!(value, json!({"model": "User", "distinct": false}));
    }
}
