//! Query planning for one request.
//!
//! The builder turns a bound serializer plus the request's filters into a
//! [`QueryPlan`]: the root query (projection, predicate, distinct) and a tree
//! of prefetches, one per relation that has to be loaded.
//!
//! # Architecture
//!
//! Planning happens in four passes per level:
//!
//! 1. **Requirements** (`requirements.rs`) - every visible field's storage
//!    paths go into a [`TreeMap`]
//! 2. **Explicit prefetches** - relation fields rendered as objects (or
//!    through a remote relation) get a sub-plan built from their own child
//!    serializer
//! 3. **Implicit prefetches** - leftover nested requirements (method fields,
//!    dotted attributes, generic relations) get unprojected sub-plans
//! 4. **Predicate** (`predicates.rs`) - client filters, the schema's extra
//!    filter and the access policy's row filter
//!
//! # Example
//!
//! ```ignore
//! let builder = QueryBuilder::new(&ctx);
//! let plan = builder.build_queryset(&serializer, Some(&features.filters), TreeMap::new(), true)?;
//! let results = executor.execute(&db, &plan)?;
//! ```

pub mod predicates;
pub mod requirements;
pub mod sorting;

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use super::plan::{Prefetch, QueryPlan};
use crate::db::schema::ModelDef;
use crate::db::{Predicate, Query};
use crate::error::ApiError;
use crate::request::{FilterTree, RequestFields};
use crate::schema::FieldDef;
use crate::serializer::{DynamicSerializer, RequestContext, Selection, SerializerOptions};
use crate::tree::TreeMap;

pub struct QueryBuilder<'r, 'c> {
    ctx: &'r RequestContext<'c>,
}

impl<'r, 'c> QueryBuilder<'r, 'c> {
    pub fn new(ctx: &'r RequestContext<'c>) -> Self {
        Self { ctx }
    }

    /// Plan the read for one serializer level.
    ///
    /// # Arguments
    /// * `serializer` - The bound serializer whose visible fields drive the plan
    /// * `filters` - Client filters scoped to this level
    /// * `requirements` - Storage paths a parent level already needs here
    /// * `is_root` - False for prefetch sub-plans, which are always distinct
    ///
    /// # Errors
    /// `ApiError::Validation` for filters that do not resolve against the
    /// schema; configuration errors for relations missing from the model.
    pub fn build_queryset(
        &self,
        serializer: &DynamicSerializer,
        filters: Option<&FilterTree>,
        mut requirements: TreeMap,
        is_root: bool,
    ) -> Result<QueryPlan, ApiError> {
        let schema = serializer.schema();
        let model = self.ctx.catalog.model(&schema.model)?.clone();

        requirements::collect(serializer, &mut requirements);

        let mut prefetches: Vec<Prefetch> = Vec::new();
        let mut sources: HashSet<String> = HashSet::new();
        for field in serializer.visible_fields().filter(|f| f.is_relation()) {
            let source = field.source_path();
            if source == "*" {
                continue;
            }
            let relation = model.get_relation(source).ok_or_else(|| {
                ApiError::ImproperlyConfigured(format!("'{}' is not a relation of {}", source, model.name))
            })?;
            let child = serializer.child(self.ctx, field)?;
            if let Some(registered) = prefetches.iter_mut().find(|p| p.source == source) {
                // The first field's query wins; later fields only add what
                // their own serializer needs below the relation.
                debug!(schema = %schema.name, field = %field.name, source, "prefetch already registered");
                if !child.is_id_only() {
                    let child_filters = filters.and_then(|f| f.child(&field.name));
                    let extra = self.build_queryset(&child, child_filters, TreeMap::new(), false)?;
                    let kept = registered.field.clone();
                    if let Some(plan) = registered.plan.as_mut() {
                        plan.merge(extra).map_err(|conflict| {
                            ApiError::Validation(format!(
                                "Cannot load {}.{} together with {}.{}: {}",
                                schema.name, field.name, schema.name, kept, conflict
                            ))
                        })?;
                    }
                }
                continue;
            }
            if field.relation_filter().is_none() && child.is_id_only() && !relation.kind.is_remote() {
                continue;
            }

            let required = requirements.pop(source).unwrap_or_default();
            let child_filters = filters.and_then(|f| f.child(&field.name));
            let mut plan = self.build_queryset(&child, child_filters, required, false)?;
            if let Some(filter) = field.relation_filter() {
                plan.query = plan.query.filter(filter.clone());
            }
            debug!(schema = %schema.name, field = %field.name, source, "prefetch");
            sources.insert(source.to_string());
            prefetches.push(Prefetch::new(&field.name, source, Some(plan)));
        }

        for (key, subtree) in requirements.iter() {
            if key == "*" || subtree.is_empty() || sources.contains(key.as_str()) {
                continue;
            }
            if let Some(relation) = model.get_relation(key) {
                let target = self.ctx.catalog.model(&relation.target)?;
                let plan = self.plan_requirements(target, subtree)?;
                prefetches.push(Prefetch::new(key, key, Some(plan)));
            } else if model.get_generic(key).is_some() {
                let mut prefetch = Prefetch::new(key, key, None);
                if let Some(field) = serializer
                    .visible_fields()
                    .find(|f| f.is_generic() && f.source_path() == key)
                    .filter(|f| serializer.is_sideloaded(&f.name))
                {
                    prefetch.field = field.name.clone();
                    prefetch.targets = self.generic_targets(field)?;
                }
                prefetches.push(prefetch);
            } else {
                continue;
            }
            debug!(schema = %schema.name, source = %key, "implicit prefetch");
            sources.insert(key.clone());
        }

        let mut query = Query::new(&model.name);
        if !requirements.contains_key("*") && !self.ctx.operation.writes() {
            query = query.only(requirements::projection(&model, &requirements));
        }

        let mut predicate = match filters {
            Some(filters) => predicates::filter_predicate(self.ctx.catalog, schema, filters)?,
            None => None,
        };
        predicate = Predicate::merge(predicate, schema.extra_filter.clone());
        predicate = Predicate::merge(predicate, self.ctx.policy.row_filter(self.ctx.operation, schema));
        let crosses = predicate
            .as_ref()
            .is_some_and(|p| predicates::crosses_to_many(self.ctx.catalog.models(), &model.name, p));
        query.predicate = predicate;
        if !is_root || crosses {
            query = query.distinct();
        }

        Ok(QueryPlan { query, prefetches })
    }

    /// Sub-plan for nested requirements that no serializer renders.
    fn plan_requirements(&self, model: &ModelDef, tree: &TreeMap) -> Result<QueryPlan, ApiError> {
        let mut plan = QueryPlan::new(Query::new(&model.name).distinct());
        for (key, subtree) in tree.iter() {
            if key == "*" || subtree.is_empty() {
                continue;
            }
            if let Some(relation) = model.get_relation(key) {
                let target = self.ctx.catalog.model(&relation.target)?;
                let nested = self.plan_requirements(target, subtree)?;
                plan.prefetches.push(Prefetch::new(key, key, Some(nested)));
            } else if model.get_generic(key).is_some() {
                plan.prefetches.push(Prefetch::new(key, key, None));
            }
        }
        Ok(plan)
    }

    /// Plans for every canonical resource a sideloaded generic relation may
    /// point at, keyed by model name.
    fn generic_targets(&self, field: &FieldDef) -> Result<BTreeMap<String, QueryPlan>, ApiError> {
        let mut targets = BTreeMap::new();
        for route in self.ctx.catalog.router().iter() {
            let options = SerializerOptions {
                embed: field.embeds(),
                ..SerializerOptions::default()
            };
            let serializer = DynamicSerializer::new(
                self.ctx,
                route.schema.clone(),
                Selection::Fields(RequestFields::new()),
                options,
            )?;
            let plan = self.build_queryset(&serializer, None, TreeMap::new(), false)?;
            targets.insert(route.model.clone(), plan);
        }
        Ok(targets)
    }
}
