//! Utility functions shared by the request parser, schemas and renderer.

use heck::ToSnakeCase;

/// Strings treated as false by boolean query parameters (compared lowercased).
pub const FALSEY_STRINGS: [&str; 3] = ["0", "false", ""];

/// Interpret a query-string value as a boolean.
///
/// Anything outside [`FALSEY_STRINGS`] is true, so `?debug=yes` and
/// `?debug=1` both enable the flag.
pub fn is_truthy(value: &str) -> bool {
    !FALSEY_STRINGS.contains(&value.to_lowercase().as_str())
}

/// Underscored resource name for a model name (e.g. `UserLocation` -> `user_location`).
pub fn underscore(name: &str) -> String {
    name.to_snake_case()
}

/// Pluralize a resource name.
///
/// Handles the regular English suffix rules; irregular nouns must be given
/// explicitly as a schema's plural name.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(pluralize("user"), "users");
/// assert_eq!(pluralize("category"), "categories");
/// assert_eq!(pluralize("box"), "boxes");
/// ```
pub fn pluralize(name: &str) -> String {
    let lower = name.to_lowercase();
    if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey")
        && !lower.ends_with("oy") && !lower.ends_with("uy")
    {
        return format!("{}ies", &name[..name.len() - 1]);
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|suffix| lower.ends_with(suffix)) {
        return format!("{}es", name);
    }
    format!("{}s", name)
}

/// Split a dotted path into its segments.
pub fn split_path(path: &str) -> Vec<String> {
    path.split('.').map(str::to_string).collect()
}
