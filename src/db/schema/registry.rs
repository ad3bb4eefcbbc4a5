//! Name-indexed registry of storage models.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::definition::ModelDef;
use crate::db::DbError;

/// Immutable lookup table of models, keyed by model name.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, Arc<ModelDef>>,
}

impl ModelRegistry {
    pub fn new(models: impl IntoIterator<Item = ModelDef>) -> Self {
        Self {
            models: models
                .into_iter()
                .map(|m| (m.name.clone(), Arc::new(m)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Result<&Arc<ModelDef>, DbError> {
        self.models.get(name).ok_or_else(|| DbError::UnknownModel {
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Find a model by its table name.
    pub fn by_table(&self, table: &str) -> Option<&Arc<ModelDef>> {
        self.models.values().find(|m| m.table_name() == table)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ModelDef>> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
