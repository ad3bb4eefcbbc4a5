mod cli_tests;
mod execute;
mod output;

pub use execute::DirectoryResult;

use clap::Args;

/// List registered resources and their paths
#[derive(Args, Debug)]
#[command(after_help = "\
Examples:
  rest_shape directory                         # Resource names and paths
  rest_shape directory --format json           # Same, as JSON")]
pub struct DirectoryCmd {}
