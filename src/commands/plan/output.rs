//! Output formatting for plan command results.

use super::execute::PlanResult;
use crate::db::Query;
use crate::output::Outputable;
use crate::queries::plan::QueryPlan;

fn query_lines(query: &Query, pad: &str) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(only) = &query.only {
        lines.push(format!("{}only: {}", pad, only.join(", ")));
    }
    if let Some(predicate) = &query.predicate {
        lines.push(format!("{}where: {}", pad, predicate));
    }
    if !query.ordering.is_empty() {
        let terms: Vec<String> = query.ordering.iter().map(ToString::to_string).collect();
        lines.push(format!("{}order: {}", pad, terms.join(", ")));
    }
    if query.distinct {
        lines.push(format!("{}distinct", pad));
    }
    if query.offset > 0 || query.limit.is_some() {
        let limit = query.limit.map(|l| l.to_string()).unwrap_or_else(|| "-".to_string());
        lines.push(format!("{}slice: {}..{}", pad, query.offset, limit));
    }
    lines
}

fn plan_lines(plan: &QueryPlan, depth: usize, lines: &mut Vec<String>) {
    let pad = "  ".repeat(depth + 1);
    lines.extend(query_lines(&plan.query, &pad));
    for prefetch in &plan.prefetches {
        let label = if prefetch.field == prefetch.source {
            prefetch.source.clone()
        } else {
            format!("{} (for {})", prefetch.source, prefetch.field)
        };
        match &prefetch.plan {
            Some(sub) => {
                lines.push(format!("{}prefetch {} -> {}", pad, label, sub.query.model));
                plan_lines(sub, depth + 1, lines);
            }
            None if prefetch.targets.is_empty() => {
                lines.push(format!("{}prefetch {} (generic)", pad, label));
            }
            None => {
                lines.push(format!("{}prefetch {} (generic)", pad, label));
                for (model, target) in &prefetch.targets {
                    lines.push(format!("{}  as {}", pad, model));
                    plan_lines(target, depth + 2, lines);
                }
            }
        }
    }
}

impl Outputable for PlanResult {
    fn to_table(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Plan: {} ({} prefetches)", self.resource, self.prefetch_count));
        lines.push(String::new());
        lines.push(self.plan.query.model.clone());
        plan_lines(&self.plan, 0, &mut lines);

        lines.join("\n")
    }
}
