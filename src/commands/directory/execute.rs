use std::error::Error;

use serde::Serialize;

use super::DirectoryCmd;
use crate::commands::{Env, Execute};
use crate::routers::DirectoryEntry;

/// Result of the directory command execution
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryResult {
    pub resources: Vec<DirectoryEntry>,
}

impl Execute for DirectoryCmd {
    type Output = DirectoryResult;

    fn execute(self, env: &Env) -> Result<Self::Output, Box<dyn Error>> {
        Ok(DirectoryResult {
            resources: env.catalog.router().directory(),
        })
    }
}
