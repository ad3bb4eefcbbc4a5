//! Output formatting for directory command results.

use super::execute::DirectoryResult;
use crate::output::Outputable;

impl Outputable for DirectoryResult {
    fn to_table(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Resources ({}):", self.resources.len()));
        lines.push(String::new());

        if self.resources.is_empty() {
            lines.push("No resources registered.".to_string());
            return lines.join("\n");
        }

        let width = self.resources.iter().map(|r| r.name.len()).max().unwrap_or(0);
        for entry in &self.resources {
            lines.push(format!("  {:<width$}  {}", entry.name, entry.url, width = width));
        }

        lines.join("\n")
    }
}
