//! Per-request rendering context.
//!
//! A [`RequestContext`] is created for one top-level request and handed down
//! explicitly to every serializer, builder and executor call. It owns the
//! serializer cache, so nothing built for one request can leak into another.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use super::{DynamicSerializer, Selection, SerializerOptions};
use crate::config::Settings;
use crate::error::ApiError;
use crate::schema::{Catalog, FieldDef, SchemaDef};
use crate::viewset::{AccessPolicy, AllowAll};

static ALLOW_ALL: AllowAll = AllowAll;

/// What the request is about to do with the records it reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Operation {
    #[default]
    Read,
    Create,
    Update,
    Delete,
}

impl Operation {
    /// Whether records are loaded to be written back, which needs full rows.
    pub fn writes(&self) -> bool {
        matches!(self, Operation::Update | Operation::Delete)
    }
}

/// Child serializers are shared per (parent schema, field, selection, options).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    parent: String,
    field: String,
    selection: Selection,
    options: SerializerOptions,
}

pub struct RequestContext<'c> {
    pub catalog: &'c Catalog,
    pub settings: &'c Settings,
    pub policy: &'c dyn AccessPolicy,
    pub operation: Operation,
    debug: Cell<bool>,
    cache: RefCell<HashMap<CacheKey, Rc<DynamicSerializer>>>,
}

impl<'c> RequestContext<'c> {
    pub fn new(catalog: &'c Catalog, settings: &'c Settings) -> Self {
        Self {
            catalog,
            settings,
            policy: &ALLOW_ALL,
            operation: Operation::Read,
            debug: Cell::new(settings.debug),
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn with_policy(mut self, policy: &'c dyn AccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = operation;
        self
    }

    /// Fresh context for another operation of the same request: same
    /// catalog, settings, policy and debug flag, empty serializer cache.
    pub fn for_operation(&self, operation: Operation) -> RequestContext<'c> {
        Self {
            catalog: self.catalog,
            settings: self.settings,
            policy: self.policy,
            operation,
            debug: Cell::new(self.debug.get()),
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn debug(&self) -> bool {
        self.debug.get()
    }

    /// Per-request override of the `debug` setting.
    pub fn set_debug(&self, debug: bool) {
        self.debug.set(debug);
    }

    /// Serializer for a relation field of `parent`.
    ///
    /// Built once per request for every distinct (parent schema, field,
    /// selection, options) combination unless `enable_serializer_cache` is
    /// off.
    pub fn child_serializer(
        &self,
        parent: &SchemaDef,
        field: &FieldDef,
        target: &Arc<SchemaDef>,
        selection: Selection,
        options: SerializerOptions,
    ) -> Result<Rc<DynamicSerializer>, ApiError> {
        let schema = target.clone();
        if !self.settings.enable_serializer_cache {
            return Ok(Rc::new(DynamicSerializer::new(self, schema, selection, options)?));
        }

        let key = CacheKey {
            parent: parent.name.clone(),
            field: field.name.clone(),
            selection,
            options,
        };
        if let Some(serializer) = self.cache.borrow().get(&key) {
            return Ok(serializer.clone());
        }
        let serializer = Rc::new(DynamicSerializer::new(
            self,
            schema,
            key.selection.clone(),
            key.options.clone(),
        )?);
        self.cache.borrow_mut().insert(key, serializer.clone());
        Ok(serializer)
    }

    /// Number of cached child serializers.
    pub fn cached_serializers(&self) -> usize {
        self.cache.borrow().len()
    }
}
