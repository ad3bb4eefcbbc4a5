mod execute;
mod output;

pub use execute::QueryResult;

use clap::Args;

/// Run a request against a resource and print the response envelope
#[derive(Args, Debug)]
#[command(after_help = "\
Examples:
  rest_shape query users                                  # List users
  rest_shape query users -p 'include[]=groups.'           # Sideload groups
  rest_shape query users -p 'filter{name.icontains}=an'   # Filter by name
  rest_shape query users --id 1                           # Retrieve one user
  rest_shape query users --id 1 --related groups          # Groups of user 1
  rest_shape query users --fast -p 'per_page=10&page=2'   # Fast executor, paged")]
pub struct QueryCmd {
    /// Resource name, plural name or path (e.g. users, v2/users)
    pub resource: String,

    /// Query string, as it would follow `?` in a URL
    #[arg(short, long, default_value = "")]
    pub params: String,

    /// Retrieve a single record by primary key
    #[arg(long)]
    pub id: Option<String>,

    /// List the records related to `--id` through this field
    #[arg(long, requires = "id")]
    pub related: Option<String>,

    /// Run with the fast executor
    #[arg(long, default_value_t = false)]
    pub fast: bool,
}
