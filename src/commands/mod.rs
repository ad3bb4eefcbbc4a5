//! Command definitions and implementations.
//!
//! Each command is defined in its own module with:
//! - The command struct with clap attributes for CLI parsing
//! - `execute.rs`: the [`Execute`] impl and its result type
//! - `output.rs`: the [`Outputable`] impl for that result

mod directory;
mod plan;
mod query;

pub use directory::DirectoryCmd;
pub use plan::PlanCmd;
pub use query::QueryCmd;

use clap::Subcommand;
use std::error::Error;
use std::path::Path;

use crate::config::Settings;
use crate::db::MemoryDb;
use crate::output::{OutputFormat, Outputable};
use crate::schema::{Catalog, CatalogBuilder, CatalogFile};

/// What every command runs against: a catalog, its rows and the settings.
pub struct Env {
    pub catalog: Catalog,
    pub db: MemoryDb,
    pub settings: Settings,
}

impl Env {
    pub fn new(catalog: Catalog, db: MemoryDb, settings: Settings) -> Self {
        Self { catalog, db, settings }
    }

    /// Load a catalog fixture file.
    pub fn load(fixture: &Path, settings: Settings) -> Result<Self, Box<dyn Error>> {
        let (catalog, db) = CatalogFile::load(fixture)?.into_catalog(CatalogBuilder::new())?;
        Ok(Self::new(catalog, db, settings))
    }
}

/// Trait for executing commands with command-specific result types.
pub trait Execute {
    type Output: Outputable;

    fn execute(self, env: &Env) -> Result<Self::Output, Box<dyn Error>>;
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a request against a resource and print the response envelope
    Query(QueryCmd),

    /// Show the query plan a list request would run
    Plan(PlanCmd),

    /// List registered resources and their paths
    Directory(DirectoryCmd),

    /// Catch-all for unknown commands
    #[command(external_subcommand)]
    Unknown(Vec<String>),
}

impl Command {
    /// Execute the command and return formatted output
    pub fn run(self, env: &Env, format: OutputFormat) -> Result<String, Box<dyn Error>> {
        match self {
            Command::Query(cmd) => {
                let result = cmd.execute(env)?;
                Ok(result.format(format))
            }
            Command::Plan(cmd) => {
                let result = cmd.execute(env)?;
                Ok(result.format(format))
            }
            Command::Directory(cmd) => {
                let result = cmd.execute(env)?;
                Ok(result.format(format))
            }
            Command::Unknown(args) => {
                Err(format!("Unknown command: {}", args.first().unwrap_or(&String::new())).into())
            }
        }
    }
}
