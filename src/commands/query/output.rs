//! Output formatting for query command results.

use super::execute::QueryResult;
use crate::output::{Outputable, value_lines};

fn count(value: &serde_json::Value) -> usize {
    value.as_array().map(Vec::len).unwrap_or(1)
}

impl Outputable for QueryResult {
    fn to_table(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!(
            "Query: {} ({}, {} round trips)",
            self.resource, self.executor, self.round_trips
        ));
        lines.push(String::new());

        let Some(envelope) = &self.response else {
            lines.push("No related record.".to_string());
            return lines.join("\n");
        };

        if envelope.data.as_array().is_some_and(Vec::is_empty) {
            lines.push(format!("{} (0):", envelope.primary));
            lines.push("  No results found.".to_string());
        } else {
            lines.push(format!("{} ({}):", envelope.primary, count(&envelope.data)));
            lines.extend(value_lines(&envelope.data, 1));
        }

        for (name, records) in &envelope.buckets {
            lines.push(format!("{} ({}):", name, records.len()));
            for record in records {
                lines.push("  -".to_string());
                lines.extend(value_lines(record, 2));
            }
        }

        if let Some(meta) = &envelope.meta {
            lines.push("meta:".to_string());
            lines.extend(value_lines(meta, 1));
        }

        lines.join("\n")
    }
}
