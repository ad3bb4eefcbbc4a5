//! Serializer schemas and the catalog that binds them to storage models.
//!
//! 1. **Fields** (`field.rs`): `FieldDef` / `FieldKind`, the nodes of the
//!    field graph (attributes, relations, counts, methods, generic relations)
//! 2. **Schemas** (`definition.rs`): `SchemaDef` and `SchemaBuilder`
//! 3. **Catalog** (`registry.rs`): validated, immutable set of models, schemas,
//!    method closures and canonical routes
//! 4. **Fixtures** (`file.rs`): JSON catalogs with rows for the CLI and tests

mod definition;
mod field;
mod file;
mod registry;

pub use definition::{SchemaBuilder, SchemaDef};
pub use field::{FieldDef, FieldKind};
pub use file::CatalogFile;
pub use registry::{Catalog, CatalogBuilder, CatalogError, MethodFn, ResourceDef};
