//! Query operators and value ordering.
//!
//! Ordering follows the remote database's type ordering:
//!
//! ```text
//! null < boolean < number < timestamp {seconds, nanoseconds} < string < array < map
//! ```
//!
//! Inequalities across type classes are false. Unknown operators pass every
//! document.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A where-clause operator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    Lt,
    Lte,
    Eq,
    NotEq,
    Gte,
    Gt,
    ArrayContains,
    In,
    ArrayContainsAny,
    NotIn,
    /// Any other symbol. Always satisfied.
    Unknown(String),
}

impl Operator {
    /// Parses an operator symbol.
    pub fn parse(symbol: &str) -> Self {
        match symbol {
            "<" => Self::Lt,
            "<=" => Self::Lte,
            "==" => Self::Eq,
            "!=" => Self::NotEq,
            ">=" => Self::Gte,
            ">" => Self::Gt,
            "array-contains" => Self::ArrayContains,
            "in" => Self::In,
            "array-contains-any" => Self::ArrayContainsAny,
            "not-in" => Self::NotIn,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Returns the operator symbol.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Gte => ">=",
            Self::Gt => ">",
            Self::ArrayContains => "array-contains",
            Self::In => "in",
            Self::ArrayContainsAny => "array-contains-any",
            Self::NotIn => "not-in",
            Self::Unknown(symbol) => symbol,
        }
    }

    /// Tests a document field (`None` when missing) against a query value.
    pub fn matches(&self, left: Option<&Value>, right: &Value) -> bool {
        let Some(left) = left else {
            return matches!(self, Self::NotEq | Self::NotIn | Self::Unknown(_));
        };
        match self {
            Self::Lt => compare_values(left, right) == Some(Ordering::Less),
            Self::Lte => matches!(
                compare_values(left, right),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::Eq => values_equal(left, right),
            Self::NotEq => !values_equal(left, right),
            Self::Gte => matches!(
                compare_values(left, right),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Gt => compare_values(left, right) == Some(Ordering::Greater),
            Self::ArrayContains => match left {
                Value::Array(items) => items.iter().any(|item| values_equal(item, right)),
                _ => false,
            },
            Self::In => is_member(left, right),
            Self::ArrayContainsAny => match left {
                Value::Array(items) => items.iter().any(|item| is_member(item, right)),
                _ => false,
            },
            Self::NotIn => !is_member(left, right),
            Self::Unknown(_) => true,
        }
    }
}

impl From<String> for Operator {
    fn from(symbol: String) -> Self {
        Self::parse(&symbol)
    }
}

impl From<&str> for Operator {
    fn from(symbol: &str) -> Self {
        Self::parse(symbol)
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.as_str().to_string()
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Applies `op` to a document field and a query value.
pub fn compare(op: &Operator, left: Option<&Value>, right: &Value) -> bool {
    op.matches(left, right)
}

/// Compares two values of the same type class; `None` across classes.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if type_rank(a) != type_rank(b) {
        return None;
    }
    Some(total_cmp(a, b))
}

/// Deep equality with numeric comparison (`1 == 1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    total_cmp(a, b) == Ordering::Equal
}

/// Total order over all values, used for sorting.
pub fn total_cmp(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(_), Value::Number(_)) => cmp_numbers(a, b),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ord = total_cmp(left, right);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            if let (Some(tx), Some(ty)) = (timestamp_parts(a), timestamp_parts(b)) {
                return tx.cmp(&ty);
            }
            let mut left: Vec<_> = x.iter().collect();
            let mut right: Vec<_> = y.iter().collect();
            left.sort_by(|p, q| p.0.cmp(q.0));
            right.sort_by(|p, q| p.0.cmp(q.0));
            for ((lk, lv), (rk, rv)) in left.iter().zip(right.iter()) {
                let ord = lk.cmp(rk).then_with(|| total_cmp(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            left.len().cmp(&right.len())
        }
        _ => Ordering::Equal,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::Object(_) if timestamp_parts(value).is_some() => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

fn cmp_numbers(a: &Value, b: &Value) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.cmp(&y);
    }
    let x = a.as_f64().unwrap_or(f64::NAN);
    let y = b.as_f64().unwrap_or(f64::NAN);
    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
}

/// `{seconds, nanoseconds}` objects as a comparable pair.
fn timestamp_parts(value: &Value) -> Option<(i64, i64)> {
    let map = value.as_object()?;
    if map.len() != 2 {
        return None;
    }
    let seconds = map.get("seconds")?.as_i64()?;
    let nanoseconds = map.get("nanoseconds")?.as_i64()?;
    Some((seconds, nanoseconds))
}

/// Membership of `needle` in `list`; a non-list is compared by equality.
fn is_member(needle: &Value, list: &Value) -> bool {
    match list {
        Value::Array(items) => items.iter().any(|item| values_equal(needle, item)),
        other => values_equal(needle, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(op: &str, left: Value, right: Value) -> bool {
        compare(&Operator::parse(op), Some(&left), &right)
    }

    #[test]
    fn inequalities() {
        assert!(check("<", json!(1), json!(2)));
        assert!(!check("<", json!(2), json!(2)));
        assert!(check("<=", json!(2), json!(2.0)));
        assert!(check(">", json!("b"), json!("a")));
        assert!(check(">=", json!(3), json!(2)));
    }

    #[test]
    fn inequalities_across_types_are_false() {
        assert!(!check("<", json!(1), json!("2")));
        assert!(!check(">", json!("2"), json!(1)));
        assert!(!check(">=", json!(null), json!(0)));
    }

    #[test]
    fn equality_is_deep() {
        assert!(check("==", json!({"a": [1, 2]}), json!({"a": [1, 2]})));
        assert!(!check("==", json!({"a": [1, 2]}), json!({"a": [2, 1]})));
        assert!(check("!=", json!("x"), json!("y")));
    }

    #[test]
    fn membership_operators() {
        assert!(check("in", json!("b"), json!(["a", "b"])));
        assert!(!check("in", json!("c"), json!(["a", "b"])));
        assert!(check("not-in", json!("c"), json!(["a", "b"])));
        assert!(!check("not-in", json!("a"), json!(["a", "b"])));
        assert!(check("array-contains", json!(["a", "b"]), json!("a")));
        assert!(!check("array-contains", json!("a"), json!("a")));
        assert!(check("array-contains-any", json!(["a", "b"]), json!(["z", "b"])));
        assert!(!check("array-contains-any", json!(["a"]), json!(["z"])));
    }

    #[test]
    fn unknown_operator_is_permissive() {
        let op = Operator::parse("~=");
        assert_eq!(op, Operator::Unknown("~=".to_string()));
        assert!(compare(&op, Some(&json!(1)), &json!(2)));
        assert!(compare(&op, None, &json!(2)));
    }

    #[test]
    fn missing_field_semantics() {
        for op in ["<", "<=", "==", ">=", ">", "in", "array-contains", "array-contains-any"] {
            assert!(!compare(&Operator::parse(op), None, &json!([1])), "{op}");
        }
        assert!(compare(&Operator::NotEq, None, &json!(1)));
        assert!(compare(&Operator::NotIn, None, &json!([1])));
    }

    #[test]
    fn type_ordering() {
        let ordered = [
            json!(null),
            json!(false),
            json!(true),
            json!(-1),
            json!(2.5),
            json!({"seconds": 1, "nanoseconds": 0}),
            json!({"seconds": 1, "nanoseconds": 5}),
            json!("a"),
            json!([1]),
            json!({"a": 1}),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(total_cmp(&pair[0], &pair[1]), Ordering::Less, "{pair:?}");
        }
    }

    #[test]
    fn operator_round_trips_through_serde() {
        let op: Operator = serde_json::from_value(json!("array-contains-any")).unwrap();
        assert_eq!(op, Operator::ArrayContainsAny);
        assert_eq!(serde_json::to_value(&op).unwrap(), json!("array-contains-any"));
    }
}
