//! Request handling for one resource.
//!
//! A [`ViewSet`] runs the whole pipeline for a request:
//!
//! 1. parse the query string into [`RequestFeatures`]
//! 2. bind the resource schema to the requested fields
//! 3. plan the read (projection, prefetches, predicate, ordering, page)
//! 4. execute the plan with the standard or fast executor
//! 5. render and sideload into an [`Envelope`]
//!
//! Writes (`create`, `update`, `destroy` and their bulk forms) check the
//! policy for their operation, load the targeted rows in full, apply the
//! payload and answer with the records as the request's read shape renders
//! them.
//!
//! Every failure becomes a [`Response`] with the error's status code and a
//! `{"detail": message}` body.

mod pagination;
mod permissions;
mod writes;

pub use pagination::{Page, PageRequest};
pub use permissions::{Access, AccessPolicy, AllowAll, RolePolicy};

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error};

use crate::db::{DatabaseBackend, Lookup, Predicate, Record, Related, coerce};
use crate::error::ApiError;
use crate::queries::builder::{QueryBuilder, sorting};
use crate::queries::executor::{Executor, QueryExecutor, ResultSet};
use crate::queries::plan::QueryPlan;
use crate::request::{RequestFeatures, RequestFields};
use crate::schema::{Catalog, SchemaDef};
use crate::serializer::{DynamicSerializer, Operation, RequestContext, Selection, SerializerOptions, Tagged};
use crate::sideload::{Envelope, SideloadingProcessor};
use crate::tree::TreeMap;

fn not_found() -> ApiError {
    ApiError::NotFound("Not found.".to_string())
}

/// Status code plus JSON body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

impl Response {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn from_error(err: &ApiError) -> Self {
        Self {
            status: err.status_code(),
            body: json!({"detail": err.to_string()}),
        }
    }

    fn from_result(result: Result<Value, ApiError>) -> Self {
        Self::with_status(200, result)
    }

    /// `status` on success, the error's status otherwise.
    fn with_status(status: u16, result: Result<Value, ApiError>) -> Self {
        match result {
            Ok(body) => Self { status, body },
            Err(err) => {
                if err.status_code() >= 500 {
                    error!(status = err.status_code(), error = %err, "request failed");
                } else {
                    debug!(status = err.status_code(), error = %err, "request rejected");
                }
                Self::from_error(&err)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ViewSet {
    schema: Arc<SchemaDef>,
    ordering_fields: Option<Vec<String>>,
    ordering: Vec<String>,
    executor: Option<Executor>,
}

impl ViewSet {
    pub fn new(schema: Arc<SchemaDef>) -> Self {
        Self {
            schema,
            ordering_fields: None,
            ordering: Vec::new(),
            executor: None,
        }
    }

    /// View over a registered resource (key, name, plural name or path).
    ///
    /// # Errors
    /// `ApiError::NotFound` when no such resource is registered.
    pub fn for_resource(catalog: &Catalog, resource: &str) -> Result<Self, ApiError> {
        let route = catalog
            .router()
            .resolve(resource)
            .ok_or_else(|| ApiError::NotFound(format!("Unknown resource '{}'", resource)))?;
        Ok(Self::new(route.schema.clone()))
    }

    /// Field paths clients may sort by. Unset allows any resolvable path.
    pub fn ordering_fields(mut self, fields: &[&str]) -> Self {
        self.ordering_fields = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    /// Ordering used when the request has no `sort[]`.
    pub fn ordering(mut self, terms: &[&str]) -> Self {
        self.ordering = terms.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Force an executor instead of the one `use_fast_executor` selects.
    pub fn executor(mut self, executor: Executor) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn schema(&self) -> &Arc<SchemaDef> {
        &self.schema
    }

    pub fn list(&self, ctx: &RequestContext<'_>, backend: &dyn DatabaseBackend, query: &str) -> Response {
        Response::from_result(self.try_list(ctx, backend, query).map(|e| e.to_value()))
    }

    pub fn retrieve(&self, ctx: &RequestContext<'_>, backend: &dyn DatabaseBackend, query: &str, pk: &str) -> Response {
        Response::from_result(self.try_retrieve(ctx, backend, query, pk).map(|e| e.to_value()))
    }

    /// Related records of one record, rendered as if sideloaded.
    ///
    /// An empty to-one relation answers `200 {}`.
    pub fn list_related(
        &self,
        ctx: &RequestContext<'_>,
        backend: &dyn DatabaseBackend,
        query: &str,
        pk: &str,
        field_name: &str,
    ) -> Response {
        Response::from_result(
            self.try_list_related(ctx, backend, query, pk, field_name)
                .map(|envelope| envelope.map(|e| e.to_value()).unwrap_or_else(|| json!({}))),
        )
    }

    /// Plan a list request without running it.
    pub fn plan(&self, ctx: &RequestContext<'_>, query: &str) -> Result<QueryPlan, ApiError> {
        ctx.policy.check(Operation::Read, &self.schema)?;
        let features = self.features(ctx, query)?;
        let serializer = self.serializer(ctx, features.fields.clone(), &features)?;
        self.plan_for(ctx, &serializer, &features)
    }

    /// # Errors
    /// Any [`ApiError`] raised while parsing, planning, executing or rendering.
    pub fn try_list(
        &self,
        ctx: &RequestContext<'_>,
        backend: &dyn DatabaseBackend,
        query: &str,
    ) -> Result<Envelope, ApiError> {
        ctx.policy.check(Operation::Read, &self.schema)?;
        let features = self.features(ctx, query)?;
        let serializer = self.serializer(ctx, features.fields.clone(), &features)?;
        let mut plan = self.plan_for(ctx, &serializer, &features)?;

        let mut page = None;
        if let Some(request) = PageRequest::from_features(&features, ctx.settings)? {
            let (query, info) = request.apply(backend, plan.query)?;
            plan.query = query;
            page = Some(info);
        }

        let mut results = self.run(ctx, backend, &plan)?;
        if let Some(page) = page.as_mut() {
            let keep = page.settle(results.len());
            results.truncate(keep);
        }
        let records = results.records(backend.models())?;
        let data = serializer.to_representation_many(ctx, records.iter().map(|r| -> &dyn Record { r.as_ref() }))?;

        let mut envelope = self.sideload(ctx, &serializer, data);
        envelope.meta = page.map(|p| p.meta());
        Ok(envelope)
    }

    /// # Errors
    /// `ApiError::NotFound` when no visible record has this pk.
    pub fn try_retrieve(
        &self,
        ctx: &RequestContext<'_>,
        backend: &dyn DatabaseBackend,
        query: &str,
        pk: &str,
    ) -> Result<Envelope, ApiError> {
        ctx.policy.check(Operation::Read, &self.schema)?;
        let features = self.features(ctx, query)?;
        let serializer = self.serializer(ctx, features.fields.clone(), &features)?;
        let mut plan = self.plan_for(ctx, &serializer, &features)?;
        plan.query = plan.query.filter(self.pk_condition(ctx, pk)?);

        let results = self.run(ctx, backend, &plan)?;
        let records = results.records(backend.models())?;
        let record = records.first().ok_or_else(not_found)?;
        let data = serializer.to_representation(ctx, record.as_ref())?;
        Ok(self.sideload(ctx, &serializer, data))
    }

    /// Returns `None` for an empty to-one relation.
    ///
    /// # Errors
    /// `ApiError::Validation` for filters or unknown relation fields,
    /// `ApiError::NotFound` when the parent record does not exist.
    pub fn try_list_related(
        &self,
        ctx: &RequestContext<'_>,
        backend: &dyn DatabaseBackend,
        query: &str,
        pk: &str,
        field_name: &str,
    ) -> Result<Option<Envelope>, ApiError> {
        ctx.policy.check(Operation::Read, &self.schema)?;
        let features = self.features(ctx, query)?;
        if !features.filters.is_empty() {
            return Err(ApiError::Validation(
                "Filtering is not enabled on relation endpoints.".to_string(),
            ));
        }
        let field = self
            .schema
            .get_field(field_name)
            .filter(|f| f.is_relation())
            .ok_or_else(|| ApiError::Validation(format!("Unknown field: \"{}\".", field_name)))?;

        let serializer = self.serializer(ctx, features.fields.clone().nest_under(field_name), &features)?;
        let mut plan = QueryBuilder::new(ctx).build_queryset(&serializer, None, TreeMap::new(), true)?;
        plan.query = plan.query.filter(self.pk_condition(ctx, pk)?);

        let results = self.run(ctx, backend, &plan)?;
        let records = results.records(backend.models())?;
        let record = records.first().ok_or_else(not_found)?;
        let child = serializer.child(ctx, field)?;
        let data = match record.related(field.source_path()) {
            Related::Null => return Ok(None),
            Related::Unloaded => {
                return Err(ApiError::ImproperlyConfigured(format!(
                    "'{}' was not prefetched for {}",
                    field.source_path(),
                    record.describe()
                )));
            }
            Related::One(related) => child.to_representation(ctx, related.as_ref())?,
            Related::Many(related) => {
                child.to_representation_many(ctx, related.iter().map(|r| -> &dyn Record { r.as_ref() }))?
            }
        };
        Ok(Some(self.sideload(ctx, &child, data)))
    }

    fn features(&self, ctx: &RequestContext<'_>, query: &str) -> Result<RequestFeatures, ApiError> {
        let features = RequestFeatures::parse(query, ctx.settings)?;
        if let Some(debug) = features.debug {
            ctx.set_debug(debug);
        }
        debug!(schema = %self.schema.name, query, "request");
        Ok(features)
    }

    fn serializer(
        &self,
        ctx: &RequestContext<'_>,
        fields: RequestFields,
        features: &RequestFeatures,
    ) -> Result<DynamicSerializer, ApiError> {
        let options = SerializerOptions {
            sideloading: features.sideloading.filter(|sideloading| !sideloading),
            ..SerializerOptions::default()
        };
        DynamicSerializer::new(ctx, self.schema.clone(), Selection::Fields(fields), options)
    }

    fn plan_for(
        &self,
        ctx: &RequestContext<'_>,
        serializer: &DynamicSerializer,
        features: &RequestFeatures,
    ) -> Result<QueryPlan, ApiError> {
        let mut plan = QueryBuilder::new(ctx).build_queryset(serializer, Some(&features.filters), TreeMap::new(), true)?;
        let ordering = if features.sort.is_empty() {
            sorting::ordering(ctx.catalog, &self.schema, &self.ordering, None)?
        } else {
            sorting::ordering(ctx.catalog, &self.schema, &features.sort, self.ordering_fields.as_deref())?
        };
        plan.query = plan.query.order_by(ordering);
        debug!(schema = %self.schema.name, prefetches = plan.prefetch_count(), "planned");
        Ok(plan)
    }

    fn pk_condition(&self, ctx: &RequestContext<'_>, pk: &str) -> Result<Predicate, ApiError> {
        let model = ctx.catalog.model(&self.schema.model)?;
        let column = model.pk_column().ok_or_else(|| {
            ApiError::ImproperlyConfigured(format!("Model {} has no primary key column", model.name))
        })?;
        let value = coerce(column, &Value::String(pk.to_string())).map_err(|_| not_found())?;
        Ok(Predicate::condition(&[model.pk.as_str()], Lookup::Exact, value))
    }

    fn run(
        &self,
        ctx: &RequestContext<'_>,
        backend: &dyn DatabaseBackend,
        plan: &QueryPlan,
    ) -> Result<ResultSet, ApiError> {
        let executor = self
            .executor
            .unwrap_or_else(|| Executor::for_settings(ctx.settings.use_fast_executor));
        let results = executor.execute(backend, plan)?;
        debug!(
            schema = %self.schema.name,
            executor = executor.name(),
            rows = results.len(),
            round_trips = backend.query_count(),
            "executed"
        );
        Ok(results)
    }

    fn sideload(&self, ctx: &RequestContext<'_>, serializer: &DynamicSerializer, data: Tagged) -> Envelope {
        SideloadingProcessor::for_serializer(serializer, &ctx.settings.additional_primary_resource_prefix).process(data)
    }
}
