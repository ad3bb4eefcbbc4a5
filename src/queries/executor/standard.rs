//! Full-object execution.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use super::{
    QueryExecutor, ResultSet, check_unique, distinct_values, ensure_column, generic_plan, relation_plan, restrict,
};
use crate::db::schema::{ModelDef, RelationDef, RelationKind};
use crate::db::{DatabaseBackend, Instance, Prefetched, Record};
use crate::error::ApiError;
use crate::queries::plan::{Prefetch, QueryPlan};

/// Materializes [`Instance`]s and attaches prefetched relations to them.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardExecutor;

impl QueryExecutor for StandardExecutor {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn execute(&self, backend: &dyn DatabaseBackend, plan: &QueryPlan) -> Result<ResultSet, ApiError> {
        self.instances(backend, plan).map(ResultSet::Instances)
    }
}

impl StandardExecutor {
    /// Run one plan level and its prefetches.
    pub fn instances(&self, backend: &dyn DatabaseBackend, plan: &QueryPlan) -> Result<Vec<Instance>, ApiError> {
        check_unique(&plan.prefetches)?;
        let model = backend.models().get(&plan.query.model)?.clone();
        let rows = backend.fetch(&plan.query).map_err(ApiError::from_filter_error)?;
        let mut instances: Vec<Instance> = rows
            .into_iter()
            .map(|row| Instance::new(model.clone(), row))
            .collect();
        for prefetch in &plan.prefetches {
            self.prefetch(backend, &model, &mut instances, prefetch)?;
        }
        Ok(instances)
    }

    fn prefetch(
        &self,
        backend: &dyn DatabaseBackend,
        model: &ModelDef,
        instances: &mut [Instance],
        prefetch: &Prefetch,
    ) -> Result<(), ApiError> {
        if instances.is_empty() {
            return Ok(());
        }
        if let Some(relation) = model.get_relation(&prefetch.source) {
            debug!(model = %model.name, relation = %relation.name, kind = relation.kind.code(), "prefetch");
            let plan = relation_plan(prefetch, &relation.target);
            return match relation.kind {
                RelationKind::Fk | RelationKind::O2o => self.merge_local(backend, instances, relation, &plan),
                RelationKind::O2or | RelationKind::M2o => self.merge_remote(backend, instances, relation, &plan),
                RelationKind::M2m => self.merge_through(backend, instances, relation, &plan),
            };
        }
        if model.get_generic(&prefetch.source).is_some() {
            return self.merge_generic(backend, model, instances, prefetch);
        }
        Err(ApiError::ImproperlyConfigured(format!(
            "Cannot prefetch '{}' on {}",
            prefetch.source, model.name
        )))
    }

    /// fk / o2o: one `pk IN` fetch over the local column values.
    fn merge_local(
        &self,
        backend: &dyn DatabaseBackend,
        instances: &mut [Instance],
        relation: &RelationDef,
        plan: &QueryPlan,
    ) -> Result<(), ApiError> {
        let Some(column) = relation.column.as_deref() else {
            return Err(ApiError::ImproperlyConfigured(format!(
                "Relation '{}' has no local column",
                relation.name
            )));
        };
        let ids = distinct_values(instances.iter().filter_map(|i| i.row.get(column).cloned()));
        let related = if ids.is_empty() {
            Vec::new()
        } else {
            let target = backend.models().get(&relation.target)?;
            let query = restrict(&plan.query, &target.pk, ids);
            self.instances(backend, &QueryPlan { query, prefetches: plan.prefetches.clone() })?
        };
        let by_pk: HashMap<String, Instance> = related.into_iter().map(|i| (i.pk().to_string(), i)).collect();

        for instance in instances.iter_mut() {
            let key = instance.row.get(column).cloned().unwrap_or(Value::Null);
            let found = by_pk.get(&key.to_string()).cloned().map(Box::new);
            instance.attach(&relation.name, Prefetched::One(found));
        }
        Ok(())
    }

    /// o2or / m2o: one fetch of remote rows pointing back at the local pks.
    fn merge_remote(
        &self,
        backend: &dyn DatabaseBackend,
        instances: &mut [Instance],
        relation: &RelationDef,
        plan: &QueryPlan,
    ) -> Result<(), ApiError> {
        let Some(remote_column) = relation.remote_column.as_deref() else {
            return Err(ApiError::ImproperlyConfigured(format!(
                "Relation '{}' has no remote column",
                relation.name
            )));
        };
        let pks = distinct_values(instances.iter().map(Record::pk));
        let query = ensure_column(restrict(&plan.query, remote_column, pks), remote_column);
        let related = self.instances(backend, &QueryPlan { query, prefetches: plan.prefetches.clone() })?;

        let mut by_owner: HashMap<String, Vec<Instance>> = HashMap::new();
        for instance in related {
            let owner = instance.row.get(remote_column).cloned().unwrap_or(Value::Null);
            by_owner.entry(owner.to_string()).or_default().push(instance);
        }
        for instance in instances.iter_mut() {
            let mut found = by_owner.get(&instance.pk().to_string()).cloned().unwrap_or_default();
            let data = if relation.kind.is_many() {
                Prefetched::Many(found)
            } else {
                Prefetched::One(if found.is_empty() { None } else { Some(Box::new(found.remove(0))) })
            };
            instance.attach(&relation.name, data);
        }
        Ok(())
    }

    /// m2m: one round trip joining the link table.
    fn merge_through(
        &self,
        backend: &dyn DatabaseBackend,
        instances: &mut [Instance],
        relation: &RelationDef,
        plan: &QueryPlan,
    ) -> Result<(), ApiError> {
        let Some(through) = relation.through.as_ref() else {
            return Err(ApiError::ImproperlyConfigured(format!(
                "Relation '{}' has no link table",
                relation.name
            )));
        };
        check_unique(&plan.prefetches)?;
        let target = backend.models().get(&relation.target)?.clone();
        let owners = distinct_values(instances.iter().map(Record::pk));
        let joined = backend
            .fetch_through(&plan.query, through, &owners)
            .map_err(ApiError::from_filter_error)?;

        // Each related record is built (and its own prefetches run) once.
        let mut related: Vec<Instance> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut edges: Vec<(String, usize)> = Vec::with_capacity(joined.len());
        for (owner, row) in joined {
            let instance = Instance::new(target.clone(), row);
            let key = instance.pk().to_string();
            let position = *index.entry(key).or_insert_with(|| {
                related.push(instance);
                related.len() - 1
            });
            edges.push((owner.to_string(), position));
        }
        for prefetch in &plan.prefetches {
            self.prefetch(backend, &target, &mut related, prefetch)?;
        }

        let mut by_owner: HashMap<String, Vec<Instance>> = HashMap::new();
        for (owner, position) in edges {
            by_owner.entry(owner).or_default().push(related[position].clone());
        }
        for instance in instances.iter_mut() {
            let found = by_owner.remove(&instance.pk().to_string()).unwrap_or_default();
            instance.attach(&relation.name, Prefetched::Many(found));
        }
        Ok(())
    }

    /// Generic relations: one `pk IN` fetch per referenced model.
    fn merge_generic(
        &self,
        backend: &dyn DatabaseBackend,
        model: &ModelDef,
        instances: &mut [Instance],
        prefetch: &Prefetch,
    ) -> Result<(), ApiError> {
        let Some(generic) = model.get_generic(&prefetch.source) else {
            return Ok(());
        };
        let mut by_type: Vec<(String, Vec<Value>)> = Vec::new();
        for instance in instances.iter() {
            let (Some(Value::String(type_name)), Some(id)) =
                (instance.row.get(&generic.type_column), instance.row.get(&generic.id_column))
            else {
                continue;
            };
            match by_type.iter_mut().find(|(t, _)| t == type_name) {
                Some((_, ids)) => ids.push(id.clone()),
                None => by_type.push((type_name.clone(), vec![id.clone()])),
            }
        }

        let mut found: HashMap<(String, String), Instance> = HashMap::new();
        for (type_name, ids) in by_type {
            let Ok(target) = backend.models().get(&type_name) else {
                warn!(model = %model.name, relation = %generic.name, target = %type_name, "unknown generic target");
                continue;
            };
            let plan = generic_plan(prefetch, &target.name);
            let query = restrict(&plan.query, &target.pk, distinct_values(ids));
            for instance in self.instances(backend, &QueryPlan { query, prefetches: plan.prefetches })? {
                found.insert((type_name.clone(), instance.pk().to_string()), instance);
            }
        }

        for instance in instances.iter_mut() {
            let key = match (instance.row.get(&generic.type_column), instance.row.get(&generic.id_column)) {
                (Some(Value::String(type_name)), Some(id)) => Some((type_name.clone(), id.to_string())),
                _ => None,
            };
            let related = key.and_then(|key| found.get(&key).cloned()).map(Box::new);
            instance.attach(&generic.name, Prefetched::One(related));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Query, Related};
    use crate::queries::plan::Prefetch;
    use crate::test_utils;
    use serde_json::json;

    fn execute(plan: &QueryPlan) -> (Vec<Instance>, usize) {
        let (_, db) = test_utils::catalog();
        db.reset_query_count();
        let instances = StandardExecutor.instances(&db, plan).unwrap();
        (instances, db.query_count())
    }

    fn with_prefetch(model: &str, source: &str, target: &str) -> QueryPlan {
        let mut plan = QueryPlan::new(Query::new(model));
        plan.prefetches.push(Prefetch::new(
            source,
            source,
            Some(QueryPlan::new(Query::new(target).distinct())),
        ));
        plan
    }

    fn related_pks(instance: &Instance, name: &str) -> Vec<serde_json::Value> {
        match instance.related(name) {
            Related::Many(items) => items.iter().map(|r| r.pk()).collect(),
            Related::One(item) => vec![item.pk()],
            Related::Null => Vec::new(),
            Related::Unloaded => panic!("{} was not loaded", name),
        }
    }

    #[test]
    fn test_fk_prefetch_is_one_query() {
        let (users, queries) = execute(&with_prefetch("User", "location", "Location"));
        assert_eq!(queries, 2);
        assert_eq!(related_pks(&users[0], "location"), vec![json!(1)]);
        assert_eq!(related_pks(&users[2], "location"), vec![json!(2)]);
    }

    #[test]
    fn test_m2m_prefetch_joins_link_table() {
        let (users, queries) = execute(&with_prefetch("User", "groups", "Group"));
        assert_eq!(queries, 2);
        assert_eq!(related_pks(&users[0], "groups"), vec![json!(1), json!(2)]);
        assert_eq!(related_pks(&users[1], "groups"), vec![json!(1)]);
        assert_eq!(related_pks(&users[2], "groups"), vec![json!(2)]);
    }

    #[test]
    fn test_remote_prefetch_fills_misses() {
        let (locations, _) = execute(&with_prefetch("Location", "users", "User"));
        assert_eq!(related_pks(&locations[0], "users"), vec![json!(1), json!(2)]);
        assert!(related_pks(&locations[2], "users").is_empty());

        let (users, _) = execute(&with_prefetch("User", "profile", "Profile"));
        assert_eq!(related_pks(&users[0], "profile"), vec![json!(1)]);
        assert!(matches!(users[1].related("profile"), Related::Null));
    }

    #[test]
    fn test_generic_prefetch_per_model() {
        let mut plan = QueryPlan::new(Query::new("User"));
        plan.prefetches.push(Prefetch::new("favorite_pet", "favorite_pet", None));
        let (users, queries) = execute(&plan);
        // Root, cats, dogs.
        assert_eq!(queries, 3);
        match users[1].related("favorite_pet") {
            Related::One(pet) => {
                assert_eq!(pet.model_name(), "Dog");
                assert_eq!(pet.value("name"), Some(json!("Snoopy")));
            }
            other => panic!("Expected One, got {:?}", other),
        }
        assert!(matches!(users[2].related("favorite_pet"), Related::Null));
    }
}
