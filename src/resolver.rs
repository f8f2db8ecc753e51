//! Conflict resolvers.
//!
//! A [`Resolver`] reduces the values one field holds across N sibling
//! versions to a single value. Every resolver drops `null` (absent) inputs
//! before reducing.
//!
//! | Resolver        | Input kind          | Result                                   | All-null |
//! |-----------------|---------------------|------------------------------------------|----------|
//! | `Union`         | arrays              | sorted, de-duplicated union              | `[]`     |
//! | `Intersection`  | arrays              | sorted, de-duplicated intersection       | `[]`     |
//! | `Min` / `Max`   | numbers, strings, arrays (one kind) | smallest / largest       | `null`   |
//! | `Merge`         | objects             | key-wise merge, greater value wins       | `null`   |
//! | `Custom`        | anything            | caller-defined                           | caller   |
//!
//! Set results are canonical (sorted by [`value::compare`](crate::value::compare)),
//! which makes `Union` and `Intersection` commutative, associative and
//! idempotent over sibling lists, not just over the sets they denote.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::value::{self, ValueKind};

// ---------------------------------------------------------------------------
// ResolveError
// ---------------------------------------------------------------------------

/// A resolver was applied to a value it cannot combine.
///
/// This is a policy configuration fault, not a data problem: the schema
/// declared a resolver that does not fit the field's values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolveError {
    /// The value kind does not support this resolver.
    TypeMismatch {
        /// Resolver name.
        resolver: String,
        /// What the resolver accepts.
        expected: &'static str,
        /// What it was given.
        found: ValueKind,
    },
    /// A custom resolver reported failure.
    Custom {
        /// Resolver name.
        resolver: String,
        /// The resolver's message.
        message: String,
    },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeMismatch {
                resolver,
                expected,
                found,
            } => {
                write!(
                    f,
                    "resolver '{resolver}' expects {expected}, got {found}.\n  To fix: declare a resolver that matches the field's type, or correct the stored values."
                )
            }
            Self::Custom { resolver, message } => {
                write!(f, "custom resolver '{resolver}' failed: {message}")
            }
        }
    }
}

impl std::error::Error for ResolveError {}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Signature of a caller-supplied resolver. Receives the non-null values.
pub type ResolveFn = dyn Fn(&[Value]) -> Result<Value, ResolveError> + Send + Sync;

/// How a field's sibling values are reduced to one.
#[derive(Clone)]
pub enum Resolver {
    /// Set union of array values.
    Union,
    /// Set intersection of array values.
    Intersection,
    /// Smallest value.
    Min,
    /// Largest value.
    Max,
    /// Shallow merge of object values; on a shared key the greater value
    /// (by [`value::compare`](crate::value::compare)) wins.
    Merge,
    /// Caller-defined reduction.
    Custom(CustomResolver),
}

/// A named, caller-supplied resolver.
#[derive(Clone)]
pub struct CustomResolver {
    name: String,
    func: Arc<ResolveFn>,
}

impl CustomResolver {
    /// Name used in error messages and `Debug` output.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Resolver {
    /// Wrap a closure as a [`Resolver::Custom`].
    ///
    /// The closure receives only the non-null sibling values and must be
    /// safe to call from several threads at once.
    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, ResolveError> + Send + Sync + 'static,
    {
        Self::Custom(CustomResolver {
            name: name.into(),
            func: Arc::new(func),
        })
    }

    /// Short name of the resolver.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Union => "union",
            Self::Intersection => "intersection",
            Self::Min => "min",
            Self::Max => "max",
            Self::Merge => "merge",
            Self::Custom(c) => c.name(),
        }
    }

    /// Reduce sibling values to one.
    ///
    /// # Errors
    /// Returns [`ResolveError`] when a value has a kind the resolver cannot
    /// handle, or when a custom resolver fails.
    pub fn resolve(&self, values: &[Value]) -> Result<Value, ResolveError> {
        let present: Vec<Value> = values.iter().filter(|v| !v.is_null()).cloned().collect();
        match self {
            Self::Union => union(present),
            Self::Intersection => intersection(present),
            Self::Min => extreme("min", present, std::cmp::Ordering::Less),
            Self::Max => extreme("max", present, std::cmp::Ordering::Greater),
            Self::Merge => merge(present),
            Self::Custom(c) => (c.func)(&present),
        }
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(c) => write!(f, "Custom({:?})", c.name),
            _ => f.write_str(self.name()),
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in reducers
// ---------------------------------------------------------------------------

fn arrays(resolver: &str, values: Vec<Value>) -> Result<Vec<Vec<Value>>, ResolveError> {
    values
        .into_iter()
        .map(|v| match v {
            Value::Array(items) => Ok(items),
            other => Err(mismatch(resolver, "arrays", &other)),
        })
        .collect()
}

fn union(values: Vec<Value>) -> Result<Value, ResolveError> {
    let mut out: Vec<Value> = arrays("union", values)?.into_iter().flatten().collect();
    value::canonicalize(&mut out);
    Ok(Value::Array(out))
}

fn intersection(values: Vec<Value>) -> Result<Value, ResolveError> {
    let mut sets = arrays("intersection", values)?.into_iter();
    let Some(mut acc) = sets.next() else {
        return Ok(Value::Array(Vec::new()));
    };
    for set in sets {
        acc.retain(|v| set.iter().any(|w| value::compare(v, w).is_eq()));
    }
    value::canonicalize(&mut acc);
    Ok(Value::Array(acc))
}

fn extreme(
    resolver: &str,
    values: Vec<Value>,
    wanted: std::cmp::Ordering,
) -> Result<Value, ResolveError> {
    let mut iter = values.into_iter();
    let Some(mut best) = iter.next() else {
        return Ok(Value::Null);
    };
    let kind = ValueKind::of(&best);
    if !matches!(kind, ValueKind::Number | ValueKind::String | ValueKind::Array) {
        return Err(mismatch(resolver, "numbers, strings or arrays", &best));
    }
    for v in iter {
        if ValueKind::of(&v) != kind {
            return Err(ResolveError::TypeMismatch {
                resolver: resolver.to_owned(),
                expected: kind_plural(kind),
                found: ValueKind::of(&v),
            });
        }
        if value::compare(&v, &best) == wanted {
            best = v;
        }
    }
    Ok(best)
}

fn merge(values: Vec<Value>) -> Result<Value, ResolveError> {
    let mut acc: Option<Map<String, Value>> = None;
    for v in values {
        let Value::Object(entries) = v else {
            return Err(mismatch("merge", "objects", &v));
        };
        match acc.as_mut() {
            None => acc = Some(entries),
            Some(m) => {
                for (key, v) in entries {
                    match m.get(&key) {
                        Some(held) if !value::compare(&v, held).is_gt() => {}
                        _ => {
                            m.insert(key, v);
                        }
                    }
                }
            }
        }
    }
    Ok(acc.map_or(Value::Null, Value::Object))
}

fn mismatch(resolver: &str, expected: &'static str, found: &Value) -> ResolveError {
    ResolveError::TypeMismatch {
        resolver: resolver.to_owned(),
        expected,
        found: ValueKind::of(found),
    }
}

const fn kind_plural(kind: ValueKind) -> &'static str {
    match kind {
        ValueKind::Number => "numbers",
        ValueKind::String => "strings",
        _ => "arrays",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(r: Resolver, xs: Value) -> Value {
        let Value::Array(xs) = xs else { panic!("test input must be a list") };
        r.resolve(&xs).unwrap()
    }

    #[test]
    fn union_cases() {
        assert_eq!(run(Resolver::Union, json!([[1], [2]])), json!([1, 2]));
        assert_eq!(run(Resolver::Union, json!([[1], null])), json!([1]));
        assert_eq!(
            run(Resolver::Union, json!([[1, 4, 1], [2, 3], [4, 4]])),
            json!([1, 2, 3, 4])
        );
        assert_eq!(run(Resolver::Union, json!([])), json!([]));
        assert_eq!(run(Resolver::Union, json!([null, null])), json!([]));
    }

    #[test]
    fn intersection_cases() {
        assert_eq!(run(Resolver::Intersection, json!([[1, 2], []])), json!([]));
        assert_eq!(
            run(Resolver::Intersection, json!([[1, 2, 3, 4], [1, 2, 3], [2, 3, 4]])),
            json!([2, 3])
        );
        assert_eq!(run(Resolver::Intersection, json!([[3, 1], null])), json!([1, 3]));
    }

    #[test]
    fn intersection_of_nothing_is_empty() {
        assert_eq!(run(Resolver::Intersection, json!([null, null])), json!([]));
        assert_eq!(run(Resolver::Intersection, json!([])), json!([]));
    }

    #[test]
    fn min_max_cases() {
        assert_eq!(run(Resolver::Min, json!([0, 1, 2, 3])), json!(0));
        assert_eq!(run(Resolver::Max, json!([0, 2, 4, 2])), json!(4));
        assert_eq!(run(Resolver::Max, json!([null, null])), json!(null));
        assert_eq!(run(Resolver::Max, json!([null, 4])), json!(4));
        assert_eq!(run(Resolver::Min, json!(["b", "a"])), json!("a"));
        assert_eq!(run(Resolver::Min, json!([[2], [1, 9]])), json!([1, 9]));
    }

    #[test]
    fn min_rejects_mixed_kinds() {
        let err = Resolver::Min.resolve(&[json!(1), json!("1")]).unwrap_err();
        assert_eq!(
            err,
            ResolveError::TypeMismatch {
                resolver: "min".into(),
                expected: "numbers",
                found: ValueKind::String,
            }
        );
        assert!(Resolver::Max.resolve(&[json!({"a": 1})]).is_err());
    }

    #[test]
    fn merge_collision_keeps_greater() {
        assert_eq!(
            run(Resolver::Merge, json!([{"a": 1, "b": 1}, null, {"b": 2, "c": 3}])),
            json!({"a": 1, "b": 2, "c": 3})
        );
        assert_eq!(
            run(Resolver::Merge, json!([{"b": 2, "c": 3}, {"a": 1, "b": 1}])),
            json!({"a": 1, "b": 2, "c": 3})
        );
        assert_eq!(run(Resolver::Merge, json!([null])), json!(null));
    }

    #[test]
    fn merge_rejects_non_objects() {
        let err = Resolver::Merge.resolve(&[json!({}), json!([1])]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("merge"));
        assert!(msg.contains("objects"));
        assert!(msg.contains("array"));
    }

    #[test]
    fn union_rejects_scalars() {
        assert!(matches!(
            Resolver::Union.resolve(&[json!(1)]),
            Err(ResolveError::TypeMismatch { found: ValueKind::Number, .. })
        ));
    }

    #[test]
    fn custom_sees_only_present_values() {
        let r = Resolver::custom("count", |xs| Ok(json!(xs.len())));
        assert_eq!(run(r.clone(), json!(["a", null, "c"])), json!(2));
        assert_eq!(r.name(), "count");
        assert_eq!(format!("{r:?}"), "Custom(\"count\")");
    }

    #[test]
    fn custom_constant() {
        let r = Resolver::custom("constant", |_| Ok(json!("custom")));
        assert_eq!(run(r, json!(["a", "b", "c"])), json!("custom"));
    }
}
