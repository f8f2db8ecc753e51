//! Field value helpers.
//!
//! Field values are `serde_json::Value`s. JSON `null` stands for an absent
//! value ("nil") everywhere in concord: resolvers filter it out, and a record
//! never stores a field whose value is `null`.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The runtime type of a field value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// JSON `null` (absent).
    Null,
    /// `true` / `false`.
    Bool,
    /// Any JSON number.
    Number,
    /// A UTF-8 string.
    String,
    /// An ordered list; set-valued fields use this kind.
    Array,
    /// A string-keyed mapping.
    Object,
}

impl ValueKind {
    /// Kind of `value`.
    #[must_use]
    pub const fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}

/// Total order over JSON values.
///
/// Values of different kinds order by [`ValueKind`]. Numbers compare
/// numerically, strings by bytes, arrays lexicographically, objects by their
/// (sorted) entries. Set resolvers use this order to produce canonical,
/// order-independent output.
#[must_use]
pub fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                x.cmp(&y)
            } else if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                x.cmp(&y)
            } else {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.total_cmp(&y)
            }
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y) {
                let ord = lk.cmp(rk).then_with(|| compare(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => ValueKind::of(a).cmp(&ValueKind::of(b)),
    }
}

/// Sort `values` by [`compare`] and drop duplicates.
pub fn canonicalize(values: &mut Vec<Value>) {
    values.sort_by(compare);
    values.dedup_by(|a, b| compare(a, b) == Ordering::Equal);
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kinds() {
        assert_eq!(ValueKind::of(&json!(null)), ValueKind::Null);
        assert_eq!(ValueKind::of(&json!([1])), ValueKind::Array);
        assert_eq!(ValueKind::of(&json!({"a": 1})).to_string(), "object");
    }

    #[test]
    fn numbers_compare_numerically() {
        assert_eq!(compare(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare(&json!(-1), &json!(0.5)), Ordering::Less);
        assert_eq!(compare(&json!(u64::MAX), &json!(1)), Ordering::Greater);
    }

    #[test]
    fn arrays_compare_lexicographically() {
        assert_eq!(compare(&json!([1, 2]), &json!([1, 3])), Ordering::Less);
        assert_eq!(compare(&json!([1]), &json!([1, 0])), Ordering::Less);
        assert_eq!(compare(&json!([]), &json!([])), Ordering::Equal);
    }

    #[test]
    fn mixed_kinds_order_by_kind() {
        assert_eq!(compare(&json!(true), &json!(0)), Ordering::Less);
        assert_eq!(compare(&json!("a"), &json!([])), Ordering::Less);
    }

    #[test]
    fn canonicalize_sorts_and_dedups() {
        let mut v = vec![json!(4), json!(1), json!(4), json!("x"), json!(1)];
        canonicalize(&mut v);
        assert_eq!(v, vec![json!(1), json!(4), json!("x")]);
    }
}
