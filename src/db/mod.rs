//! Storage layer seen by the shaping pipeline.
//!
//! This module provides everything the query builder and executors need from
//! storage:
//! - Model metadata (`schema`): columns, primary keys, relation kinds
//! - A backend-neutral predicate tree (`predicate`) and query description (`backend`)
//! - Value coercion and comparison for JSON cells (`value`)
//! - Record access for rendering (`record`)
//! - `MemoryDb`, the in-process reference backend with round-trip counting (`memory`)
//!
//! # Type Decisions
//!
//! **Why `serde_json::Value` cells?**
//! Rows cross the backend boundary as JSON maps because that is what the
//! renderer produces anyway; keeping one value type end to end avoids a second
//! conversion layer for every attribute.
//!
//! **Why count round trips on the backend?**
//! The pipeline's promise is a bounded number of queries per relation shape.
//! Counting at the backend seam makes that promise testable without a real
//! database.

mod backend;
mod memory;
mod predicate;
mod record;
pub mod schema;
mod value;

pub use backend::{DatabaseBackend, OrderTerm, Query, Row};
pub use memory::MemoryDb;
pub use predicate::{Condition, Lookup, Predicate};
pub use record::{Instance, Prefetched, Record, Related};
pub use value::{DatabaseValue, coerce, compare_values, value_key};

use thiserror::Error;

/// Storage error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    #[error("Unknown model '{name}'")]
    UnknownModel { name: String },

    #[error("Cannot resolve keyword '{keyword}' into field of {model}")]
    InvalidLookup { model: String, keyword: String },

    #[error("Field '{column}' expected a {expected} value but got '{value}'")]
    InvalidValue {
        column: String,
        value: String,
        expected: String,
    },

    #[error("Unsupported lookup '{lookup}' on {data_type} field '{column}'")]
    TypeMismatch {
        column: String,
        lookup: String,
        data_type: String,
    },

    #[error("Failed to import {data_type}: {message}")]
    ImportFailed { data_type: String, message: String },

    #[error("No {model} row with primary key {pk}")]
    MissingRow { model: String, pk: String },
}
