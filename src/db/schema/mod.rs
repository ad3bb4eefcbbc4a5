//! Storage model definitions.
//!
//! This module describes the shape of the data the pipeline reads:
//!
//! 1. **Core Types** (`definition.rs`):
//!    - `DataType` - Column data types (String, Int, Float, Bool, Date, Json)
//!    - `ColumnDef` - A single typed column
//!    - `RelationDef` / `RelationKind` - Relations classified as fk, o2o, o2or, m2m, m2o
//!    - `GenericRelationDef` - Polymorphic (model name, pk) relations
//!    - `ModelDef` - A complete model with its primary key
//!
//! 2. **Registry** (`registry.rs`):
//!    - `ModelRegistry` - Name-indexed, immutable set of models
//!
//! # Relation kinds
//!
//! | Kind | Stored in | Renders as |
//! |------|-----------|------------|
//! | fk   | local `<name>_id` column | one |
//! | o2o  | local column | one |
//! | o2or | remote column | one |
//! | m2o  | remote column | many |
//! | m2m  | link table | many |

mod definition;
mod registry;

pub use definition::{
    ColumnDef, DataType, GenericRelationDef, ModelDef, RelationDef, RelationKind, ThroughDef,
};
pub use registry::ModelRegistry;
