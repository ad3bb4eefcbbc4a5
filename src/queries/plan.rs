//! Query plans: what the executors run.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::db::Query;

/// One level of a read: the query itself plus the relations to prefetch for
/// the rows it returns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPlan {
    pub query: Query,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub prefetches: Vec<Prefetch>,
}

impl QueryPlan {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            prefetches: Vec::new(),
        }
    }

    pub fn prefetch(&self, source: &str) -> Option<&Prefetch> {
        self.prefetches.iter().find(|p| p.source == source)
    }

    /// Fold another plan over the same model into this one.
    ///
    /// Projections and prefetch trees are unioned; this plan's predicate,
    /// ordering and slice are kept.
    ///
    /// # Errors
    /// A message naming the conflict when the plans read different models or
    /// load one relation in incompatible ways.
    pub fn merge(&mut self, other: QueryPlan) -> Result<(), String> {
        if self.query.model != other.query.model {
            return Err(format!("{} and {} are different models", self.query.model, other.query.model));
        }
        self.query.only = match (self.query.only.take(), other.query.only) {
            (Some(mut columns), Some(more)) => {
                for column in more {
                    if !columns.contains(&column) {
                        columns.push(column);
                    }
                }
                Some(columns)
            }
            _ => None,
        };
        self.query.distinct |= other.query.distinct;
        for prefetch in other.prefetches {
            match self.prefetches.iter_mut().find(|p| p.source == prefetch.source) {
                Some(existing) => existing.merge(prefetch)?,
                None => self.prefetches.push(prefetch),
            }
        }
        Ok(())
    }

    /// Number of prefetches in the whole tree.
    pub fn prefetch_count(&self) -> usize {
        self.prefetches
            .iter()
            .map(|p| {
                1 + p.plan.as_ref().map(QueryPlan::prefetch_count).unwrap_or(0)
                    + p.targets.values().map(QueryPlan::prefetch_count).sum::<usize>()
            })
            .sum()
    }
}

/// A relation to load for every row of the parent level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prefetch {
    /// Serializer field that asked for it; the source for implicit prefetches
    pub field: String,
    /// Relation accessor on the parent model
    pub source: String,
    /// Sub-plan over the related model; `None` for generic relations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<QueryPlan>,
    /// Per-model sub-plans of a sideloaded generic relation
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub targets: BTreeMap<String, QueryPlan>,
}

impl Prefetch {
    pub fn new(field: &str, source: &str, plan: Option<QueryPlan>) -> Self {
        Self {
            field: field.to_string(),
            source: source.to_string(),
            plan,
            targets: BTreeMap::new(),
        }
    }

    fn merge(&mut self, other: Prefetch) -> Result<(), String> {
        match (self.plan.as_mut(), other.plan) {
            (Some(plan), Some(more)) => plan.merge(more)?,
            (None, None) => {}
            _ => return Err(format!("'{}' is loaded both as a relation and as a generic relation", self.source)),
        }
        for (model, plan) in other.targets {
            match self.targets.get_mut(&model) {
                Some(existing) => existing.merge(plan)?,
                None => {
                    self.targets.insert(model, plan);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Lookup, Predicate};
    use serde_json::json;

    #[test]
    fn test_prefetch_count_walks_tree() {
        let mut groups = QueryPlan::new(Query::new("Group"));
        groups
            .prefetches
            .push(Prefetch::new("permissions", "permissions", Some(QueryPlan::new(Query::new("Permission")))));
        let mut plan = QueryPlan::new(Query::new("User"));
        plan.prefetches.push(Prefetch::new("groups", "groups", Some(groups)));
        plan.prefetches.push(Prefetch::new("favorite_pet", "favorite_pet", None));
        assert_eq!(plan.prefetch_count(), 3);
        assert!(plan.prefetch("groups").is_some());
        assert!(plan.prefetch("location").is_none());
    }

    #[test]
    fn test_merge_unions_projection_and_prefetches() {
        let mut cats = QueryPlan::new(Query::new("Cat").only(vec!["id".into(), "home_id".into()]));
        cats.prefetches
            .push(Prefetch::new("home", "home", Some(QueryPlan::new(Query::new("Location").only(vec!["id".into()])))));
        let mut other = QueryPlan::new(
            Query::new("Cat")
                .only(vec!["id".into(), "backup_home_id".into()])
                .filter(Predicate::condition(&["name"], Lookup::Startswith, json!("K"))),
        );
        other.prefetches.push(Prefetch::new(
            "home",
            "home",
            Some(QueryPlan::new(Query::new("Location").only(vec!["name".into()]))),
        ));
        other
            .prefetches
            .push(Prefetch::new("backup_home", "backup_home", Some(QueryPlan::new(Query::new("Location")))));

        cats.merge(other).unwrap();
        assert_eq!(
            cats.query.only,
            Some(vec!["id".to_string(), "home_id".to_string(), "backup_home_id".to_string()])
        );
        assert_eq!(cats.query.predicate, None);
        let home = cats.prefetch("home").unwrap().plan.as_ref().unwrap();
        assert_eq!(home.query.only, Some(vec!["id".to_string(), "name".to_string()]));
        assert_eq!(cats.prefetch("backup_home").unwrap().plan.as_ref().unwrap().query.only, None);
    }

    #[test]
    fn test_merge_rejects_conflicts() {
        let mut plan = QueryPlan::new(Query::new("Cat"));
        assert!(plan.merge(QueryPlan::new(Query::new("Dog"))).is_err());

        plan.prefetches.push(Prefetch::new("home", "home", Some(QueryPlan::new(Query::new("Location")))));
        let mut other = QueryPlan::new(Query::new("Cat"));
        other.prefetches.push(Prefetch::new("home", "home", None));
        let err = plan.merge(other).unwrap_err();
        assert_eq!(err, "'home' is loaded both as a relation and as a generic relation");
    }

    #[test]
    fn test_serialize_skips_empty_parts() {
        let plan = QueryPlan::new(Query::new("User"));
        assert_eq!(
            serde_json::to_value(&plan).unwrap(),
            json!({"query": {"model": "User", "distinct": false}})
        );
    }
}
