//! Trait abstraction and helpers for storage values.
//!
//! Cells are `serde_json::Value`s. The `DatabaseValue` trait gives lenient
//! extraction to Rust types, `coerce` turns request strings into typed cells
//! for a column, and `compare_values` provides the total order used by sorting
//! and range lookups.

use std::cmp::Ordering;

use serde_json::Value;

use super::schema::{ColumnDef, DataType};
use super::DbError;

/// Trait for storage values that can be extracted to Rust types.
pub trait DatabaseValue {
    /// Extract as String if the value is scalar.
    ///
    /// Numbers and booleans are rendered with their JSON spelling; `None` for
    /// null, arrays and objects.
    fn as_string(&self) -> Option<String>;

    /// Extract as i64 if the value is numeric.
    ///
    /// Floats are truncated and numeric strings are parsed.
    fn as_i64(&self) -> Option<i64>;

    /// Extract as f64 if the value is numeric or a numeric string.
    fn as_f64(&self) -> Option<f64>;

    /// Extract as bool if the value is boolean.
    fn as_bool(&self) -> Option<bool>;

    /// Get type name for error messages.
    fn type_name(&self) -> &'static str;

    /// Extract as i64 with a default value.
    fn as_i64_or(&self, default: i64) -> i64 {
        self.as_i64().unwrap_or(default)
    }

    /// Extract as String with a default value.
    fn as_string_or(&self, default: &str) -> String {
        self.as_string().unwrap_or_else(|| default.to_string())
    }

    /// Extract as bool with a default value.
    fn as_bool_or(&self, default: bool) -> bool {
        self.as_bool().unwrap_or(default)
    }
}

impl DatabaseValue for Value {
    fn as_string(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

fn invalid(column: &ColumnDef, value: &Value) -> DbError {
    DbError::InvalidValue {
        column: column.name.clone(),
        value: match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
        expected: column.data_type.name().to_string(),
    }
}

/// Coerce a request or fixture value into the representation of `column`.
///
/// Null passes through. Arrays are coerced element by element.
pub fn coerce(column: &ColumnDef, value: &Value) -> Result<Value, DbError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    if let Value::Array(items) = value {
        if column.data_type != DataType::Json {
            return items
                .iter()
                .map(|item| coerce(column, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array);
        }
    }

    match column.data_type {
        DataType::Int => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| invalid(column, value)),
            _ => Err(invalid(column, value)),
        },
        DataType::Float => DatabaseValue::as_f64(value)
            .map(Value::from)
            .ok_or_else(|| invalid(column, value)),
        DataType::Bool => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(invalid(column, value)),
            },
            Value::String(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(Value::Bool(true)),
                "false" | "f" | "0" => Ok(Value::Bool(false)),
                _ => Err(invalid(column, value)),
            },
            _ => Err(invalid(column, value)),
        },
        DataType::Date => match value {
            Value::String(s) if date_parts(s).is_some() => Ok(value.clone()),
            _ => Err(invalid(column, value)),
        },
        DataType::String => DatabaseValue::as_string(value)
            .map(Value::String)
            .ok_or_else(|| invalid(column, value)),
        DataType::Json => Ok(value.clone()),
    }
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over cells: null first, then booleans, numbers, strings.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .unwrap_or_default()
                .partial_cmp(&y.as_f64().unwrap_or_default())
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ord = compare_values(left, right);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Hashable identity of a cell, distinguishing `1` from `"1"`.
pub fn value_key(value: &Value) -> String {
    value.to_string()
}

/// Split an ISO-8601 date or datetime into (year, month, day).
pub fn date_parts(text: &str) -> Option<(i64, u32, u32)> {
    let date = text.get(..10)?;
    let mut parts = date.split('-');
    let year = parts.next()?.parse::<i64>().ok()?;
    let month = parts.next()?.parse::<u32>().ok()?;
    let day = parts.next()?.parse::<u32>().ok()?;
    if parts.next().is_some() || !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    Some((year, month, day))
}

/// Day of week with Sunday = 1 through Saturday = 7.
pub fn week_day(year: i64, month: u32, day: u32) -> u32 {
    const OFFSETS: [i64; 12] = [0, 3, 2, 5, 0, 3, 5, 1, 4, 6, 2, 4];
    let y = if month < 3 { year - 1 } else { year };
    let dow = (y + y.div_euclid(4) - y.div_euclid(100) + y.div_euclid(400)
        + OFFSETS[(month - 1) as usize]
        + day as i64)
        .rem_euclid(7);
    dow as u32 + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(json!("hello"), Some("hello".to_string()))]
    #[case(json!(42), Some("42".to_string()))]
    #[case(json!(true), Some("true".to_string()))]
    #[case(json!(null), None)]
    fn test_as_string(#[case] value: Value, #[case] expected: Option<String>) {
        assert_eq!(DatabaseValue::as_string(&value), expected);
    }

    #[test]
    fn test_as_i64_truncates_and_parses() {
        assert_eq!(DatabaseValue::as_i64(&json!(3.9)), Some(3));
        assert_eq!(DatabaseValue::as_i64(&json!(" 7 ")), Some(7));
        assert_eq!(json!("x").as_i64_or(-1), -1);
    }

    #[rstest]
    #[case(DataType::Int, json!("12"), json!(12))]
    #[case(DataType::Float, json!("1.5"), json!(1.5))]
    #[case(DataType::Bool, json!("True"), json!(true))]
    #[case(DataType::Bool, json!("0"), json!(false))]
    #[case(DataType::String, json!(5), json!("5"))]
    #[case(DataType::Date, json!("2020-02-29"), json!("2020-02-29"))]
    fn test_coerce(#[case] data_type: DataType, #[case] input: Value, #[case] expected: Value) {
        let column = ColumnDef::new("c", data_type);
        assert_eq!(coerce(&column, &input).unwrap(), expected);
    }

    #[rstest]
    #[case(DataType::Int, json!("abc"))]
    #[case(DataType::Bool, json!("maybe"))]
    #[case(DataType::Date, json!("yesterday"))]
    fn test_coerce_rejects(#[case] data_type: DataType, #[case] input: Value) {
        let column = ColumnDef::new("c", data_type);
        let err = coerce(&column, &input).unwrap_err();
        assert!(matches!(err, DbError::InvalidValue { .. }));
    }

    #[test]
    fn test_coerce_array_elementwise() {
        let column = ColumnDef::new("id", DataType::Int);
        assert_eq!(coerce(&column, &json!(["1", "2"])).unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_compare_values() {
        assert_eq!(compare_values(&json!(1), &json!(2)), Ordering::Less);
        assert_eq!(compare_values(&json!(2.5), &json!(2)), Ordering::Greater);
        assert_eq!(compare_values(&json!(null), &json!("a")), Ordering::Less);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
    }

    #[test]
    fn test_value_key_distinguishes_types() {
        assert_ne!(value_key(&json!(1)), value_key(&json!("1")));
    }

    #[rstest]
    #[case(2024, 1, 7, 1)] // Sunday
    #[case(2024, 1, 8, 2)]
    #[case(2000, 2, 29, 3)]
    #[case(2023, 12, 30, 7)]
    fn test_week_day(#[case] y: i64, #[case] m: u32, #[case] d: u32, #[case] expected: u32) {
        assert_eq!(week_day(y, m, d), expected);
    }

    #[test]
    fn test_date_parts_accepts_datetimes() {
        assert_eq!(date_parts("2021-06-15T10:00:00Z"), Some((2021, 6, 15)));
        assert_eq!(date_parts("2021-13-01"), None);
    }
}
