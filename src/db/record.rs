//! Record access for the renderer.
//!
//! Executors hand the serializer records, not rows. A record knows its model,
//! its primary key, its loaded columns and whatever relations were prefetched
//! for it. The standard executor produces [`Instance`]s; the fast executor
//! produces views over plain nested rows. Both go through [`Record`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::backend::Row;
use super::schema::ModelDef;

/// Result of following a relation on a record.
pub enum Related<'a> {
    /// The relation was never fetched for this record.
    Unloaded,
    Null,
    One(Box<dyn Record + 'a>),
    Many(Vec<Box<dyn Record + 'a>>),
}

impl fmt::Debug for Related<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Related::Unloaded => write!(f, "Unloaded"),
            Related::Null => write!(f, "Null"),
            Related::One(record) => write!(f, "One({})", record.describe()),
            Related::Many(records) => write!(f, "Many({})", records.len()),
        }
    }
}

/// A fetched record of some model.
pub trait Record: fmt::Debug {
    fn model_name(&self) -> &str;

    fn pk(&self) -> Value;

    /// Value of a local column (`pk` aliases the primary key column).
    ///
    /// Returns `None` when the column was not loaded.
    fn value(&self, column: &str) -> Option<Value>;

    /// Follow a relation or generic relation by accessor name.
    fn related(&self, name: &str) -> Related<'_>;

    /// Short human-readable form used in render error messages.
    fn describe(&self) -> String {
        format!("<{}: {}>", self.model_name(), self.pk())
    }
}

impl<R: Record + ?Sized> Record for &R {
    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn pk(&self) -> Value {
        (**self).pk()
    }

    fn value(&self, column: &str) -> Option<Value> {
        (**self).value(column)
    }

    fn related(&self, name: &str) -> Related<'_> {
        (**self).related(name)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Prefetched relation data attached to an [`Instance`].
#[derive(Debug, Clone, PartialEq)]
pub enum Prefetched {
    One(Option<Box<Instance>>),
    Many(Vec<Instance>),
}

/// A fully materialized record: its row plus prefetched relations.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub model: Arc<ModelDef>,
    pub row: Row,
    pub prefetched: BTreeMap<String, Prefetched>,
}

impl Instance {
    pub fn new(model: Arc<ModelDef>, row: Row) -> Self {
        Self {
            model,
            row,
            prefetched: BTreeMap::new(),
        }
    }

    /// Attach prefetched data for a relation, replacing anything already there.
    pub fn attach(&mut self, name: &str, data: Prefetched) {
        self.prefetched.insert(name.to_string(), data);
    }
}

impl Record for Instance {
    fn model_name(&self) -> &str {
        &self.model.name
    }

    fn pk(&self) -> Value {
        self.row.get(&self.model.pk).cloned().unwrap_or(Value::Null)
    }

    fn value(&self, column: &str) -> Option<Value> {
        let column = self.model.get_column(column)?;
        self.row.get(&column.name).cloned()
    }

    fn related(&self, name: &str) -> Related<'_> {
        match self.prefetched.get(name) {
            Some(Prefetched::One(Some(instance))) => Related::One(Box::new(instance.as_ref())),
            Some(Prefetched::One(None)) => Related::Null,
            Some(Prefetched::Many(instances)) => Related::Many(
                instances
                    .iter()
                    .map(|i| Box::new(i) as Box<dyn Record + '_>)
                    .collect(),
            ),
            None => {
                // A to-one relation with a null local column needs no fetch.
                let local_null = self
                    .model
                    .local_column(name)
                    .filter(|column| column != name)
                    .and_then(|column| self.row.get(&column))
                    .is_some_and(Value::is_null);
                if local_null {
                    Related::Null
                } else {
                    Related::Unloaded
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::{DataType, ModelDef};
    use serde_json::json;

    fn user(row: Value) -> Instance {
        let model = ModelDef::new("User")
            .column("name", DataType::String)
            .fk("location", "Location");
        Instance::new(Arc::new(model), row.as_object().cloned().unwrap())
    }

    #[test]
    fn test_pk_and_columns() {
        let instance = user(json!({"id": 3, "name": "2", "location_id": 2}));
        assert_eq!(instance.pk(), json!(3));
        assert_eq!(instance.value("pk"), Some(json!(3)));
        assert_eq!(instance.value("name"), Some(json!("2")));
        assert_eq!(instance.value("missing"), None);
        assert_eq!(instance.describe(), "<User: 3>");
    }

    #[test]
    fn test_related_states() {
        let mut instance = user(json!({"id": 1, "name": "0", "location_id": 1}));
        assert!(matches!(instance.related("location"), Related::Unloaded));

        let location = Instance::new(
            Arc::new(ModelDef::new("Location")),
            json!({"id": 1}).as_object().cloned().unwrap(),
        );
        instance.attach("location", Prefetched::One(Some(Box::new(location))));
        match instance.related("location") {
            Related::One(record) => assert_eq!(record.pk(), json!(1)),
            other => panic!("Expected One, got {:?}", other),
        }
    }

    #[test]
    fn test_null_fk_needs_no_prefetch() {
        let instance = user(json!({"id": 1, "name": "0", "location_id": null}));
        assert!(matches!(instance.related("location"), Related::Null));
    }
}
