//! Backend-neutral boolean predicate tree.
//!
//! The query builder rewrites client filters into [`Predicate`]s whose
//! condition paths are storage names (column names and relation query names).
//! Backends evaluate them; `Display` renders the `a__b__lookup` form used in
//! plans and logs.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison applied to the value found at a condition path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lookup {
    Exact,
    In,
    Any,
    All,
    Icontains,
    Contains,
    Startswith,
    Istartswith,
    Endswith,
    Iendswith,
    Year,
    Month,
    Day,
    WeekDay,
    Regex,
    Range,
    Gt,
    Lt,
    Gte,
    Lte,
    Isnull,
}

impl Lookup {
    /// Every lookup accepted as a trailing filter term. `eq` is the spelled-out
    /// form of `Exact`.
    pub const NAMES: [&'static str; 21] = [
        "in", "any", "all", "icontains", "contains", "startswith", "istartswith", "endswith",
        "iendswith", "year", "month", "day", "week_day", "regex", "range", "gt", "lt", "gte",
        "lte", "isnull", "eq",
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        let lookup = match name {
            "eq" | "exact" => Lookup::Exact,
            "in" => Lookup::In,
            "any" => Lookup::Any,
            "all" => Lookup::All,
            "icontains" => Lookup::Icontains,
            "contains" => Lookup::Contains,
            "startswith" => Lookup::Startswith,
            "istartswith" => Lookup::Istartswith,
            "endswith" => Lookup::Endswith,
            "iendswith" => Lookup::Iendswith,
            "year" => Lookup::Year,
            "month" => Lookup::Month,
            "day" => Lookup::Day,
            "week_day" => Lookup::WeekDay,
            "regex" => Lookup::Regex,
            "range" => Lookup::Range,
            "gt" => Lookup::Gt,
            "lt" => Lookup::Lt,
            "gte" => Lookup::Gte,
            "lte" => Lookup::Lte,
            "isnull" => Lookup::Isnull,
            _ => return None,
        };
        Some(lookup)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Lookup::Exact => "exact",
            Lookup::In => "in",
            Lookup::Any => "any",
            Lookup::All => "all",
            Lookup::Icontains => "icontains",
            Lookup::Contains => "contains",
            Lookup::Startswith => "startswith",
            Lookup::Istartswith => "istartswith",
            Lookup::Endswith => "endswith",
            Lookup::Iendswith => "iendswith",
            Lookup::Year => "year",
            Lookup::Month => "month",
            Lookup::Day => "day",
            Lookup::WeekDay => "week_day",
            Lookup::Regex => "regex",
            Lookup::Range => "range",
            Lookup::Gt => "gt",
            Lookup::Lt => "lt",
            Lookup::Gte => "gte",
            Lookup::Lte => "lte",
            Lookup::Isnull => "isnull",
        }
    }

    /// Lookups whose operand is a list rather than a single value.
    pub fn takes_list(&self) -> bool {
        matches!(self, Lookup::In | Lookup::Range)
    }
}

/// A single `path lookup value` test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Storage path: relation query names followed by a column name
    pub path: Vec<String>,
    #[serde(default = "default_lookup")]
    pub lookup: Lookup,
    pub value: Value,
}

fn default_lookup() -> Lookup {
    Lookup::Exact
}

impl Condition {
    pub fn new(path: &[&str], lookup: Lookup, value: Value) -> Self {
        Self {
            path: path.iter().map(|s| s.to_string()).collect(),
            lookup,
            value,
        }
    }

    /// Django-style key, e.g. `location__name__icontains`.
    pub fn key(&self) -> String {
        let mut key = self.path.join("__");
        if self.lookup != Lookup::Exact {
            key.push_str("__");
            key.push_str(self.lookup.name());
        }
        key
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Condition(Condition),
}

impl Predicate {
    pub fn condition(path: &[&str], lookup: Lookup, value: Value) -> Self {
        Predicate::Condition(Condition::new(path, lookup, value))
    }

    /// Conjunction that flattens nested `And`s.
    pub fn and(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::And(mut left), Predicate::And(right)) => {
                left.extend(right);
                Predicate::And(left)
            }
            (Predicate::And(mut left), right) => {
                left.push(right);
                Predicate::And(left)
            }
            (left, right) => Predicate::And(vec![left, right]),
        }
    }

    pub fn or(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::Or(mut left), Predicate::Or(right)) => {
                left.extend(right);
                Predicate::Or(left)
            }
            (Predicate::Or(mut left), right) => {
                left.push(right);
                Predicate::Or(left)
            }
            (left, right) => Predicate::Or(vec![left, right]),
        }
    }

    pub fn negate(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }

    /// AND an optional predicate onto an optional predicate.
    pub fn merge(left: Option<Predicate>, right: Option<Predicate>) -> Option<Predicate> {
        match (left, right) {
            (Some(l), Some(r)) => Some(l.and(r)),
            (l, r) => l.or(r),
        }
    }

    /// Visit every condition in the tree.
    pub fn conditions(&self) -> Vec<&Condition> {
        match self {
            Predicate::Condition(c) => vec![c],
            Predicate::Not(inner) => inner.conditions(),
            Predicate::And(items) | Predicate::Or(items) => {
                items.iter().flat_map(|p| p.conditions()).collect()
            }
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Condition(c) => write!(f, "{}={}", c.key(), c.value),
            Predicate::Not(inner) => write!(f, "NOT ({})", inner),
            Predicate::And(items) | Predicate::Or(items) => {
                let sep = if matches!(self, Predicate::And(_)) { " AND " } else { " OR " };
                let parts: Vec<String> = items.iter().map(|p| format!("({})", p)).collect();
                write!(f, "{}", parts.join(sep))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_every_name_resolves() {
        for name in Lookup::NAMES {
            assert!(Lookup::from_name(name).is_some(), "{} should resolve", name);
        }
        assert_eq!(Lookup::from_name("eq"), Some(Lookup::Exact));
        assert_eq!(Lookup::from_name("between"), None);
    }

    #[test]
    fn test_condition_key() {
        let c = Condition::new(&["location", "name"], Lookup::Icontains, json!("x"));
        assert_eq!(c.key(), "location__name__icontains");
        let c = Condition::new(&["id"], Lookup::Exact, json!(1));
        assert_eq!(c.key(), "id");
    }

    #[test]
    fn test_and_flattens() {
        let a = Predicate::condition(&["a"], Lookup::Exact, json!(1));
        let b = Predicate::condition(&["b"], Lookup::Exact, json!(2));
        let c = Predicate::condition(&["c"], Lookup::Exact, json!(3));
        match a.and(b).and(c) {
            Predicate::And(items) => assert_eq!(items.len(), 3),
            other => panic!("Expected And, got {:?}", other),
        }
    }

    #[test]
    fn test_merge_optional() {
        let a = Predicate::condition(&["a"], Lookup::Exact, json!(1));
        assert_eq!(Predicate::merge(None, Some(a.clone())), Some(a.clone()));
        assert_eq!(Predicate::merge(None, None), None);
        assert!(matches!(Predicate::merge(Some(a.clone()), Some(a)), Some(Predicate::And(_))));
    }

    #[test]
    fn test_display() {
        let p = Predicate::condition(&["name"], Lookup::Exact, json!("0"))
            .and(Predicate::condition(&["id"], Lookup::In, json!([1, 2])).negate());
        assert_eq!(p.to_string(), "(name=\"0\") AND (NOT (id__in=[1,2]))");
    }

    #[test]
    fn test_deserializes_from_fixture_shape() {
        let p: Predicate = serde_json::from_value(json!({
            "condition": {"path": ["name"], "value": "0"}
        }))
        .unwrap();
        assert_eq!(p, Predicate::condition(&["name"], Lookup::Exact, json!("0")));
    }
}
