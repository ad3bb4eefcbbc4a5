//! rest_shape library - response shaping for REST resources
//!
//! Turns a resource schema plus a query string (`include[]`, `exclude[]`,
//! `filter{}`, `sort[]`, paging) into a bounded set of storage reads and a
//! sideloaded JSON envelope.
//!
//! The pipeline, front to back:
//! - `request`: query-string features
//! - `serializer`: schema binding and rendering
//! - `queries`: prefetch planning and the standard/fast executors
//! - `sideload`: flattening rendered records into resource buckets
//! - `viewset`: list, retrieve and related-list endpoints
//!
//! `db` holds the storage seam and the in-memory reference backend; `schema`
//! and `routers` the catalog built at startup.

pub mod cli;
pub mod commands;
pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod output;
pub mod queries;
pub mod request;
pub mod routers;
pub mod schema;
pub mod serializer;
pub mod sideload;
pub mod tree;
pub mod utils;
pub mod viewset;

#[macro_use]
pub mod test_macros;

#[cfg(test)]
pub mod fixtures;

#[cfg(test)]
pub mod test_utils;
