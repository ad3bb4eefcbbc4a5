//! Write endpoints: create, update and destroy, single and bulk.
//!
//! A bulk payload is either a JSON list or an object holding the list under
//! the resource's plural name. A single payload may be wrapped under the
//! singular name.

use serde_json::{Map, Value, json};
use tracing::debug;

use super::{Response, ViewSet, not_found};
use crate::db::{DatabaseBackend, Lookup, Predicate, Record, coerce, compare_values};
use crate::error::ApiError;
use crate::queries::builder::QueryBuilder;
use crate::request::RequestFields;
use crate::serializer::{DynamicSerializer, Operation, RequestContext, Selection, SerializerOptions, WriteSet};
use crate::sideload::Envelope;
use crate::tree::TreeMap;

enum Payload<'a> {
    One(&'a Value),
    Many(&'a [Value]),
}

impl ViewSet {
    /// Create one record, or every entry of a bulk payload.
    ///
    /// Answers 201 with the created records rendered for `query`. Bulk
    /// entries are all validated before anything is stored; when some fail,
    /// nothing is created and the failures are listed under `errors` with a
    /// 400.
    pub fn create(
        &self,
        ctx: &RequestContext<'_>,
        backend: &mut dyn DatabaseBackend,
        query: &str,
        payload: &Value,
    ) -> Response {
        match self.payload(payload) {
            Payload::One(data) => {
                Response::with_status(201, self.try_create(ctx, backend, query, data).map(|e| e.to_value()))
            }
            Payload::Many(items) => self
                .try_create_many(ctx, backend, query, items)
                .unwrap_or_else(|err| Response::from_result(Err(err))),
        }
    }

    /// Partially update the record `pk`. Without a pk, update every entry of
    /// a bulk payload by the primary key it carries.
    pub fn update(
        &self,
        ctx: &RequestContext<'_>,
        backend: &mut dyn DatabaseBackend,
        query: &str,
        pk: Option<&str>,
        payload: &Value,
    ) -> Response {
        let result = match (pk, self.payload(payload)) {
            (Some(pk), Payload::One(data)) => self.try_update(ctx, backend, query, pk, data),
            (None, Payload::Many(items)) => self.try_update_many(ctx, backend, query, items),
            (Some(_), Payload::Many(_)) => Err(ApiError::Validation(
                "Expected a single record to update.".to_string(),
            )),
            (None, Payload::One(_)) => Err(ApiError::Validation(
                "Expected a list of records to update.".to_string(),
            )),
        };
        Response::from_result(result.map(|e| e.to_value()))
    }

    /// Delete the record `pk`. Without a pk, delete the records a bulk
    /// payload names; names that match nothing are skipped.
    ///
    /// Answers 204 with a null body.
    pub fn destroy(
        &self,
        ctx: &RequestContext<'_>,
        backend: &mut dyn DatabaseBackend,
        pk: Option<&str>,
        payload: &Value,
    ) -> Response {
        let result = match (pk, self.payload(payload)) {
            (Some(pk), _) => self.try_destroy(ctx, backend, pk),
            (None, Payload::Many(items)) => self.try_destroy_many(ctx, backend, items).map(|_| ()),
            (None, Payload::One(_)) => {
                return Response {
                    status: 405,
                    body: json!({"detail": "Method \"DELETE\" not allowed."}),
                };
            }
        };
        Response::with_status(204, result.map(|_| Value::Null))
    }

    /// # Errors
    /// `ApiError::PermissionDenied` without a create grant,
    /// `ApiError::Validation` for payloads that do not fit the schema and
    /// `ApiError::NotFound` for relation payloads naming missing records.
    pub fn try_create(
        &self,
        ctx: &RequestContext<'_>,
        backend: &mut dyn DatabaseBackend,
        query: &str,
        data: &Value,
    ) -> Result<Envelope, ApiError> {
        self.features(ctx, query)?;
        let write_ctx = ctx.for_operation(Operation::Create);
        write_ctx.policy.check(Operation::Create, &self.schema)?;
        let write = self.write_serializer(&write_ctx)?.to_internal_value(&write_ctx, &*backend, data)?;
        let pk = self.insert(&write_ctx, backend, write)?;
        self.render_written(ctx, &*backend, query, &[pk], true)
    }

    fn try_create_many(
        &self,
        ctx: &RequestContext<'_>,
        backend: &mut dyn DatabaseBackend,
        query: &str,
        items: &[Value],
    ) -> Result<Response, ApiError> {
        self.features(ctx, query)?;
        let write_ctx = ctx.for_operation(Operation::Create);
        write_ctx.policy.check(Operation::Create, &self.schema)?;
        let serializer = self.write_serializer(&write_ctx)?;

        let mut writes = Vec::with_capacity(items.len());
        let mut errors = Vec::new();
        for item in items {
            match serializer.to_internal_value(&write_ctx, &*backend, item) {
                Ok(write) => writes.push(write),
                Err(err @ (ApiError::Validation(_) | ApiError::Parse(_))) => {
                    errors.push(json!({"detail": err.to_string(), "source": item}));
                }
                Err(err) => return Err(err),
            }
        }
        if !errors.is_empty() {
            debug!(schema = %self.schema.name, errors = errors.len(), "bulk create rejected");
            let mut body = Map::new();
            body.insert(self.schema.plural_name(), json!([]));
            body.insert("errors".to_string(), Value::Array(errors));
            return Ok(Response {
                status: 400,
                body: Value::Object(body),
            });
        }

        let mut pks = Vec::with_capacity(writes.len());
        for write in writes {
            pks.push(self.insert(&write_ctx, backend, write)?);
        }
        let envelope = self.render_written(ctx, &*backend, query, &pks, false)?;
        Ok(Response {
            status: 201,
            body: envelope.to_value(),
        })
    }

    /// # Errors
    /// `ApiError::NotFound` when the record does not exist or the policy's
    /// update rows exclude it.
    pub fn try_update(
        &self,
        ctx: &RequestContext<'_>,
        backend: &mut dyn DatabaseBackend,
        query: &str,
        pk: &str,
        data: &Value,
    ) -> Result<Envelope, ApiError> {
        self.features(ctx, query)?;
        let write_ctx = ctx.for_operation(Operation::Update);
        write_ctx.policy.check(Operation::Update, &self.schema)?;
        let pk = self
            .writable(&write_ctx, &*backend, self.pk_condition(ctx, pk)?)?
            .into_iter()
            .next()
            .ok_or_else(not_found)?;
        let write = self.write_serializer(&write_ctx)?.to_internal_value(&write_ctx, &*backend, data)?;
        self.apply(&write_ctx, backend, &pk, write)?;
        self.render_written(ctx, &*backend, query, &[pk], true)
    }

    /// Every entry is validated before the first one is written.
    ///
    /// # Errors
    /// `ApiError::Validation` for entries without a primary key,
    /// `ApiError::NotFound` naming the first pk that matches no updatable
    /// record.
    pub fn try_update_many(
        &self,
        ctx: &RequestContext<'_>,
        backend: &mut dyn DatabaseBackend,
        query: &str,
        items: &[Value],
    ) -> Result<Envelope, ApiError> {
        self.features(ctx, query)?;
        let write_ctx = ctx.for_operation(Operation::Update);
        write_ctx.policy.check(Operation::Update, &self.schema)?;
        let model = ctx.catalog.model(&self.schema.model)?;
        let pks = self.payload_pks(ctx, items)?;

        let found = self.writable(&write_ctx, &*backend, self.pk_in(ctx, &pks)?)?;
        if let Some(missing) = pks.iter().find(|pk| !found.iter().any(|f| compare_values(f, pk).is_eq())) {
            return Err(ApiError::NotFound(format!(
                "{} object with ID={} not found",
                model.name, missing
            )));
        }

        let serializer = self.write_serializer(&write_ctx)?;
        let writes = items
            .iter()
            .map(|item| serializer.to_internal_value(&write_ctx, &*backend, item))
            .collect::<Result<Vec<_>, _>>()?;
        for (pk, write) in pks.iter().zip(writes) {
            self.apply(&write_ctx, backend, pk, write)?;
        }
        self.render_written(ctx, &*backend, query, &pks, false)
    }

    /// # Errors
    /// `ApiError::NotFound` when the record does not exist or the policy's
    /// delete rows exclude it.
    pub fn try_destroy(
        &self,
        ctx: &RequestContext<'_>,
        backend: &mut dyn DatabaseBackend,
        pk: &str,
    ) -> Result<(), ApiError> {
        let write_ctx = ctx.for_operation(Operation::Delete);
        write_ctx.policy.check(Operation::Delete, &self.schema)?;
        let pk = self
            .writable(&write_ctx, &*backend, self.pk_condition(ctx, pk)?)?
            .into_iter()
            .next()
            .ok_or_else(not_found)?;
        self.delete(&write_ctx, backend, &[pk]).map(|_| ())
    }

    /// Returns the number of deleted records.
    pub fn try_destroy_many(
        &self,
        ctx: &RequestContext<'_>,
        backend: &mut dyn DatabaseBackend,
        items: &[Value],
    ) -> Result<usize, ApiError> {
        let write_ctx = ctx.for_operation(Operation::Delete);
        write_ctx.policy.check(Operation::Delete, &self.schema)?;
        let pks = self.payload_pks(ctx, items)?;
        let found = self.writable(&write_ctx, &*backend, self.pk_in(ctx, &pks)?)?;
        self.delete(&write_ctx, backend, &found)
    }

    fn payload<'a>(&self, payload: &'a Value) -> Payload<'a> {
        match payload {
            Value::Array(items) => Payload::Many(items),
            Value::Object(map) if map.len() == 1 => {
                if let Some(Value::Array(items)) = map.get(&self.schema.plural_name()) {
                    return Payload::Many(items);
                }
                match map.get(&self.schema.name) {
                    Some(inner @ Value::Object(_)) => Payload::One(inner),
                    _ => Payload::One(payload),
                }
            }
            _ => Payload::One(payload),
        }
    }

    /// Primary keys carried by bulk entries, coerced to the pk column.
    fn payload_pks(&self, ctx: &RequestContext<'_>, items: &[Value]) -> Result<Vec<Value>, ApiError> {
        let model = ctx.catalog.model(&self.schema.model)?;
        let column = model.pk_column().ok_or_else(|| {
            ApiError::ImproperlyConfigured(format!("Model {} has no primary key column", model.name))
        })?;
        items
            .iter()
            .map(|item| {
                let pk = item
                    .get(model.pk.as_str())
                    .filter(|pk| !pk.is_null())
                    .ok_or_else(|| ApiError::Validation(format!("Every entry needs its \"{}\".", model.pk)))?;
                coerce(column, pk).map_err(ApiError::from_filter_error)
            })
            .collect()
    }

    fn pk_in(&self, ctx: &RequestContext<'_>, pks: &[Value]) -> Result<Predicate, ApiError> {
        let model = ctx.catalog.model(&self.schema.model)?;
        Ok(Predicate::condition(
            &[model.pk.as_str()],
            Lookup::In,
            Value::Array(pks.to_vec()),
        ))
    }

    fn write_serializer(&self, ctx: &RequestContext<'_>) -> Result<DynamicSerializer, ApiError> {
        DynamicSerializer::root(ctx, self.schema.clone(), RequestFields::new())
    }

    /// Pks of the records `predicate` selects among those `ctx.operation`
    /// may touch. Rows are loaded in full.
    fn writable(
        &self,
        ctx: &RequestContext<'_>,
        backend: &dyn DatabaseBackend,
        predicate: Predicate,
    ) -> Result<Vec<Value>, ApiError> {
        let serializer = DynamicSerializer::new(
            ctx,
            self.schema.clone(),
            Selection::IdOnly,
            SerializerOptions::default(),
        )?;
        let mut plan = QueryBuilder::new(ctx).build_queryset(&serializer, None, TreeMap::new(), true)?;
        plan.query = plan.query.filter(predicate);
        let results = self.run(ctx, backend, &plan)?;
        let records = results.records(backend.models())?;
        Ok(records.iter().map(|record| record.pk()).collect())
    }

    fn insert(
        &self,
        ctx: &RequestContext<'_>,
        backend: &mut dyn DatabaseBackend,
        write: WriteSet,
    ) -> Result<Value, ApiError> {
        let model = ctx.catalog.model(&self.schema.model)?;
        let stored = backend
            .insert_row(&model.name, write.columns)
            .map_err(ApiError::from_filter_error)?;
        let pk = stored.get(&model.pk).cloned().unwrap_or(Value::Null);
        for (relation, targets) in &write.links {
            backend
                .set_links(&model.name, relation, &pk, targets)
                .map_err(ApiError::from_filter_error)?;
        }
        debug!(schema = %self.schema.name, pk = %pk, "created");
        Ok(pk)
    }

    fn apply(
        &self,
        ctx: &RequestContext<'_>,
        backend: &mut dyn DatabaseBackend,
        pk: &Value,
        write: WriteSet,
    ) -> Result<(), ApiError> {
        let model = ctx.catalog.model(&self.schema.model)?;
        if !write.columns.is_empty() {
            backend
                .update_row(&model.name, pk, write.columns)
                .map_err(ApiError::from_filter_error)?;
        }
        for (relation, targets) in &write.links {
            backend
                .set_links(&model.name, relation, pk, targets)
                .map_err(ApiError::from_filter_error)?;
        }
        debug!(schema = %self.schema.name, pk = %pk, "updated");
        Ok(())
    }

    fn delete(
        &self,
        ctx: &RequestContext<'_>,
        backend: &mut dyn DatabaseBackend,
        pks: &[Value],
    ) -> Result<usize, ApiError> {
        let model = ctx.catalog.model(&self.schema.model)?;
        for pk in pks {
            backend
                .delete_row(&model.name, pk)
                .map_err(ApiError::from_filter_error)?;
            debug!(schema = %self.schema.name, pk = %pk, "deleted");
        }
        Ok(pks.len())
    }

    /// Written records as a read of `query` renders them.
    fn render_written(
        &self,
        ctx: &RequestContext<'_>,
        backend: &dyn DatabaseBackend,
        query: &str,
        pks: &[Value],
        single: bool,
    ) -> Result<Envelope, ApiError> {
        let features = self.features(ctx, query)?;
        let serializer = self.serializer(ctx, features.fields.clone(), &features)?;
        let mut plan = QueryBuilder::new(ctx).build_queryset(&serializer, None, TreeMap::new(), true)?;
        plan.query = plan.query.filter(self.pk_in(ctx, pks)?);

        let results = self.run(ctx, backend, &plan)?;
        let records = results.records(backend.models())?;
        let data = if single {
            let record = records.first().ok_or_else(not_found)?;
            serializer.to_representation(ctx, record.as_ref())?
        } else {
            serializer.to_representation_many(ctx, records.iter().map(|r| -> &dyn Record { r.as_ref() }))?
        };
        Ok(self.sideload(ctx, &serializer, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::db::MemoryDb;
    use crate::test_utils;
    use crate::viewset::{Access, RolePolicy};

    fn view(catalog: &crate::schema::Catalog) -> ViewSet {
        ViewSet::for_resource(catalog, "users").unwrap().ordering(&["id"])
    }

    fn settings() -> Settings {
        Settings {
            enable_links: false,
            ..Settings::default()
        }
    }

    fn names(db: &MemoryDb) -> Vec<Value> {
        db.rows("User").iter().map(|row| row["name"].clone()).collect()
    }

    #[test]
    fn test_payload_shapes() {
        let (catalog, _) = test_utils::catalog();
        let view = view(&catalog);
        assert!(matches!(view.payload(&json!([{"name": "a"}])), Payload::Many(items) if items.len() == 1));
        assert!(matches!(view.payload(&json!({"users": [{}, {}]})), Payload::Many(items) if items.len() == 2));
        assert!(matches!(view.payload(&json!({"user": {"name": "a"}})), Payload::One(v) if v["name"] == "a"));
        assert!(matches!(view.payload(&json!({"name": "a"})), Payload::One(v) if v["name"] == "a"));
    }

    #[test]
    fn test_create_wrapped_payload() {
        let (catalog, mut db) = test_utils::catalog();
        let settings = settings();
        let ctx = RequestContext::new(&catalog, &settings);
        let response = view(&catalog).create(&ctx, &mut db, "", &json!({"user": {"name": "new", "location": 2}}));
        assert_eq!(response.status, 201);
        assert_eq!(response.body, json!({"user": {"id": 4, "name": "new", "location": 2}}));
    }

    #[test]
    fn test_update_payload_must_match_target() {
        let (catalog, mut db) = test_utils::catalog();
        let settings = settings();
        let ctx = RequestContext::new(&catalog, &settings);
        let view = view(&catalog);
        let response = view.update(&ctx, &mut db, "", None, &json!({"name": "x"}));
        assert_eq!(response.body, json!({"detail": "Expected a list of records to update."}));
        let response = view.update(&ctx, &mut db, "", Some("1"), &json!([{"id": 1}]));
        assert_eq!(response.status, 400);
        assert_eq!(names(&db), vec![json!("0"), json!("1"), json!("2")]);
    }

    #[test]
    fn test_bulk_entries_need_pk() {
        let (catalog, mut db) = test_utils::catalog();
        let settings = settings();
        let ctx = RequestContext::new(&catalog, &settings);
        let response = view(&catalog).update(&ctx, &mut db, "", None, &json!([{"id": 1, "name": "a"}, {"name": "b"}]));
        assert_eq!(response.body, json!({"detail": "Every entry needs its \"id\"."}));
        assert_eq!(names(&db), vec![json!("0"), json!("1"), json!("2")]);
    }

    #[test]
    fn test_destroy_without_target_is_not_allowed() {
        let (catalog, mut db) = test_utils::catalog();
        let settings = settings();
        let ctx = RequestContext::new(&catalog, &settings);
        let response = view(&catalog).destroy(&ctx, &mut db, None, &json!({"name": "x"}));
        assert_eq!(response.status, 405);
        assert_eq!(db.rows("User").len(), 3);
    }

    #[test]
    fn test_update_rows_come_from_policy() {
        let (catalog, mut db) = test_utils::catalog();
        let settings = settings();
        let own = Predicate::condition(&["id"], Lookup::Exact, json!(1));
        let policy = RolePolicy::new()
            .grant("user", Operation::Read, Access::Full)
            .grant("user", Operation::Update, Access::Rows(own));
        let ctx = RequestContext::new(&catalog, &settings).with_policy(&policy);
        let view = view(&catalog);

        assert_eq!(view.update(&ctx, &mut db, "", Some("2"), &json!({"name": "x"})).status, 404);
        let response = view.update(&ctx, &mut db, "", Some("1"), &json!({"name": "x"}));
        assert_eq!(response.status, 200);
        assert_eq!(response.body["user"]["name"], json!("x"));
        assert_eq!(view.destroy(&ctx, &mut db, Some("1"), &Value::Null).status, 403);
    }
}
