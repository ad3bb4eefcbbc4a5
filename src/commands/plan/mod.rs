mod execute;
mod execute_tests;
mod output;

pub use execute::PlanResult;

use clap::Args;

/// Show the query plan a list request would run
#[derive(Args, Debug)]
#[command(after_help = "\
Examples:
  rest_shape plan users                                   # Default representation
  rest_shape plan users -p 'include[]=groups.permissions.'
  rest_shape plan users -p 'include[]=favorite_pet.' --format json")]
pub struct PlanCmd {
    /// Resource name, plural name or path (e.g. users, v2/users)
    pub resource: String,

    /// Query string, as it would follow `?` in a URL
    #[arg(short, long, default_value = "")]
    pub params: String,
}
