//! Output formatting for command results.
//!
//! Supports multiple output formats: table (human-readable), JSON, and toon.

use clap::ValueEnum;
use serde::Serialize;

/// Output format for command results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// Token-efficient toon format
    Toon,
}

/// Trait for types that can be formatted for output
pub trait Outputable: Serialize {
    /// Format as a human-readable table
    fn to_table(&self) -> String;

    /// Format according to the specified output format
    fn format(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Table => self.to_table(),
            OutputFormat::Json => serde_json::to_string_pretty(self).unwrap_or_default(),
            OutputFormat::Toon => {
                let json_value = serde_json::to_value(self).unwrap_or_default();
                toon::encode(&json_value, None)
            }
        }
    }
}

/// Render a JSON value as indented `key: value` lines.
///
/// Objects and arrays nest by two spaces; scalars print inline.
pub fn value_lines(value: &serde_json::Value, indent: usize) -> Vec<String> {
    use serde_json::Value;

    let pad = "  ".repeat(indent);
    match value {
        Value::Object(map) => map
            .iter()
            .flat_map(|(key, value)| match value {
                Value::Object(_) | Value::Array(_) => {
                    let mut lines = vec![format!("{}{}:", pad, key)];
                    lines.extend(value_lines(value, indent + 1));
                    lines
                }
                scalar => vec![format!("{}{}: {}", pad, key, scalar)],
            })
            .collect(),
        Value::Array(items) => items
            .iter()
            .flat_map(|item| match item {
                Value::Object(_) | Value::Array(_) => {
                    let mut lines = vec![format!("{}-", pad)];
                    lines.extend(value_lines(item, indent + 1));
                    lines
                }
                scalar => vec![format!("{}- {}", pad, scalar)],
            })
            .collect(),
        scalar => vec![format!("{}{}", pad, scalar)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_lines_nest() {
        let value = json!({"user": {"groups": [1, {"id": 2}]}});
        assert_eq!(
            value_lines(&value, 0),
            vec!["user:", "  groups:", "    - 1", "    -", "      id: 2"]
        );
    }
}
