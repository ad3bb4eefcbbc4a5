//! Read planning and execution.
//!
//! - `plan`: the [`plan::QueryPlan`] tree executors run
//! - `builder`: serializer + filters to a plan (projection, prefetches, predicates)
//! - `executor`: standard and fast plan execution

pub mod builder;
pub mod executor;
pub mod plan;
