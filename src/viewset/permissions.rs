//! Access control collaborators.
//!
//! An [`AccessPolicy`] answers two questions for a request: may this
//! operation run on this schema at all (403 otherwise), and which rows may it
//! see. The row filter is ANDed into every query the builder plans for the
//! schema, prefetches included.

use std::collections::HashMap;

use serde_json::Value;

use crate::db::{Lookup, Predicate};
use crate::error::ApiError;
use crate::schema::SchemaDef;
use crate::serializer::Operation;

pub trait AccessPolicy {
    /// # Errors
    /// `ApiError::PermissionDenied` when the operation is not allowed.
    fn check(&self, _operation: Operation, _schema: &SchemaDef) -> Result<(), ApiError> {
        Ok(())
    }

    /// Predicate restricting the rows `operation` may touch.
    fn row_filter(&self, _operation: Operation, _schema: &SchemaDef) -> Option<Predicate> {
        None
    }
}

/// No checks, no row filters.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {}

/// What one role may do with one operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Access {
    Full,
    Denied,
    /// Allowed on rows matching the predicate
    Rows(Predicate),
}

impl Access {
    /// Union of two grants.
    pub fn or(self, other: Access) -> Access {
        match (self, other) {
            (Access::Full, _) | (_, Access::Full) => Access::Full,
            (Access::Denied, other) | (other, Access::Denied) => other,
            (Access::Rows(a), Access::Rows(b)) => Access::Rows(a.or(b)),
        }
    }
}

/// Per-schema grants for a set of active roles.
///
/// Schemas without any rule are unrestricted. For a schema with rules, an
/// operation no active role grants is denied.
#[derive(Debug, Clone, Default)]
pub struct RolePolicy {
    rules: HashMap<String, HashMap<Operation, Access>>,
}

impl RolePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a grant; grants for the same (schema, operation) are ORed.
    pub fn grant(mut self, schema: &str, operation: Operation, access: Access) -> Self {
        let operations = self.rules.entry(schema.to_string()).or_default();
        let merged = match operations.remove(&operation) {
            Some(existing) => existing.or(access),
            None => access,
        };
        operations.insert(operation, merged);
        self
    }

    fn access(&self, operation: Operation, schema: &SchemaDef) -> Access {
        match self.rules.get(&schema.name) {
            None => Access::Full,
            Some(operations) => operations.get(&operation).cloned().unwrap_or(Access::Denied),
        }
    }
}

impl AccessPolicy for RolePolicy {
    fn check(&self, operation: Operation, schema: &SchemaDef) -> Result<(), ApiError> {
        match self.access(operation, schema) {
            Access::Denied => Err(ApiError::PermissionDenied(
                "You do not have permission to perform this action.".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn row_filter(&self, operation: Operation, schema: &SchemaDef) -> Option<Predicate> {
        match self.access(operation, schema) {
            Access::Rows(predicate) => Some(predicate),
            // Matches nothing.
            Access::Denied => Some(Predicate::condition(&["pk"], Lookup::Isnull, Value::Bool(true))),
            Access::Full => None,
        }
    }
}
