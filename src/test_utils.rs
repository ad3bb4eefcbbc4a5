//! Shared test utilities for unit, execute and CLI tests.
//!
//! This module provides the fixture catalog every pipeline test runs against,
//! plus helpers for command tests.

use std::io::Write;

use serde_json::{Value, json};
use tempfile::NamedTempFile;

use crate::commands::{Env, Execute};
use crate::db::{MemoryDb, Record, Related};
use crate::fixtures;
use crate::schema::{Catalog, CatalogBuilder, CatalogFile};

/// Create a temporary file containing the given content.
///
/// Used to hand catalog and config files to commands.
pub fn create_temp_json_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write temp file");
    file
}

/// Execute a command against an environment and return the result.
pub fn execute_cmd<C: Execute>(cmd: C, env: &Env) -> Result<C::Output, Box<dyn std::error::Error>> {
    cmd.execute(env)
}

// =============================================================================
// Fixture-based helpers
// =============================================================================

/// `number_of_cats`: cats living at the user's location.
fn number_of_cats(record: &dyn Record) -> Result<Value, String> {
    match record.related("location") {
        Related::Null => Ok(Value::Null),
        Related::One(location) => match location.related("cats") {
            Related::Many(cats) => Ok(json!(cats.len())),
            other => Err(format!("location.cats not loaded: {:?}", other)),
        },
        other => Err(format!("location not loaded: {:?}", other)),
    }
}

/// The pet shop catalog and its rows.
///
/// Use for: builder, executor, serializer, sideloading and viewset tests
pub fn catalog() -> (Catalog, MemoryDb) {
    CatalogFile::from_json(fixtures::CATALOG)
        .expect("Fixture catalog should parse")
        .into_catalog(CatalogBuilder::new().method("number_of_cats", number_of_cats))
        .expect("Fixture catalog should build")
}

/// An execution environment over the fixture catalog.
///
/// Use for: query, plan, directory execute tests
pub fn env() -> Env {
    let (catalog, db) = catalog();
    Env::new(catalog, db, Default::default())
}
