//! The merge engine: N sibling records in, one record out.
//!
//! # Algorithm
//!
//! 1. The first sibling is the *base*. Its key and every field without a
//!    resolver are carried over verbatim.
//! 2. For each field with a resolver, the field's value is collected from
//!    every sibling (`null` where a sibling lacks it) and reduced.
//! 3. A `null` result removes the field from the base.
//!
//! A schema may replace the whole step with [`SchemaBuilder::merge_with`];
//! the override can still call [`Schema::merge_fields`] first.
//!
//! A single sibling is returned unchanged, so `merge([r]) == r`.
//!
//! [`SchemaBuilder::merge_with`]: crate::SchemaBuilder::merge_with

use std::fmt;

use serde_json::Value;

use crate::record::Record;
use crate::resolver::ResolveError;
use crate::schema::Schema;

// ---------------------------------------------------------------------------
// MergeError
// ---------------------------------------------------------------------------

/// Siblings could not be reconciled.
///
/// Merging is deterministic, so retrying the same siblings fails the same
/// way; the fault is in the schema or in a custom override.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeError {
    /// `merge` was called with no siblings.
    EmptySiblingSet,
    /// A field resolver rejected the sibling values.
    Resolve {
        /// Field being merged.
        field: String,
        /// The resolver's error.
        source: ResolveError,
    },
    /// A merge override could not interpret a sibling.
    Decode {
        /// What failed to decode.
        message: String,
    },
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptySiblingSet => {
                write!(
                    f,
                    "merge called with no siblings.\n  To fix: only merge the versions returned by a read; a read with no versions is an absent key."
                )
            }
            Self::Resolve { field, source } => {
                write!(f, "could not merge field '{field}': {source}")
            }
            Self::Decode { message } => {
                write!(
                    f,
                    "could not interpret sibling during merge: {message}\n  To fix: the stored record does not match the record type's shape; inspect and rewrite it."
                )
            }
        }
    }
}

impl std::error::Error for MergeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Resolve { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

impl Schema {
    /// Reduce sibling records to one, using the override if one is set.
    ///
    /// # Errors
    /// Returns [`MergeError::EmptySiblingSet`] for an empty list, or whatever
    /// the resolvers / override report.
    pub fn merge(&self, siblings: Vec<Record>) -> Result<Record, MergeError> {
        if siblings.is_empty() {
            return Err(MergeError::EmptySiblingSet);
        }
        match self.merge_override() {
            Some(merge) => merge(self, siblings),
            None => self.merge_fields(siblings),
        }
    }

    /// The generic field-by-field merge (steps 1-3 above).
    ///
    /// # Errors
    /// Same as [`merge`](Self::merge), without consulting the override.
    pub fn merge_fields(&self, siblings: Vec<Record>) -> Result<Record, MergeError> {
        if siblings.len() <= 1 {
            return siblings
                .into_iter()
                .next()
                .ok_or(MergeError::EmptySiblingSet);
        }

        let mut resolved: Vec<(String, Value)> = Vec::new();
        for (name, spec) in self.fields() {
            let Some(resolver) = &spec.resolver else {
                continue;
            };
            let values: Vec<Value> = siblings
                .iter()
                .map(|s| s.get(name).cloned().unwrap_or(Value::Null))
                .collect();
            // Nothing to resolve: the field stays absent, so a later merge
            // with a sibling that has it sees that value alone.
            if values.iter().all(Value::is_null) {
                continue;
            }
            let value = resolver
                .resolve(&values)
                .map_err(|source| MergeError::Resolve {
                    field: name.to_owned(),
                    source,
                })?;
            resolved.push((name.to_owned(), value));
        }

        let mut base = siblings
            .into_iter()
            .next()
            .ok_or(MergeError::EmptySiblingSet)?;
        for (name, value) in resolved {
            base.set(name, value);
        }
        Ok(base)
    }
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use crate::resolver::Resolver;
    use crate::schema::FieldSpec;
    use serde_json::json;

    fn multi() -> Schema {
        Schema::builder("mult")
            .allow_mult(true)
            .value("users", FieldSpec::new().default_value(json!([])))
            .value("union", FieldSpec::new().resolve_with(Resolver::Union))
            .value("intersection", FieldSpec::new().resolve_with(Resolver::Intersection))
            .value("max", FieldSpec::new().resolve_with(Resolver::Max))
            .value("min", FieldSpec::new().resolve_with(Resolver::Min))
            .value("merge", FieldSpec::new().resolve_with(Resolver::Merge))
            .value(
                "custom",
                FieldSpec::new().resolve_with(Resolver::custom("constant", |_| Ok(json!("custom")))),
            )
            .build()
    }

    fn rec(fields: serde_json::Value) -> Record {
        let mut r = Record::with_key("k");
        for (k, v) in fields.as_object().unwrap() {
            r.set(k.clone(), v.clone());
        }
        r
    }

    #[test]
    fn empty_is_an_error() {
        assert_eq!(multi().merge(vec![]), Err(MergeError::EmptySiblingSet));
    }

    #[test]
    fn single_sibling_is_returned_unchanged() {
        let r = rec(json!({"union": [3, 1, 3], "note": "x"}));
        assert_eq!(multi().merge(vec![r.clone()]).unwrap(), r);
    }

    #[test]
    fn resolves_each_policy_field() {
        let merged = multi()
            .merge(vec![
                rec(json!({"union": [1], "max": 2, "min": 2, "merge": {"a": 1}, "custom": "a"})),
                rec(json!({"union": [2], "max": 7, "merge": {"b": 2}, "custom": "b"})),
            ])
            .unwrap();
        assert_eq!(merged.get("union"), Some(&json!([1, 2])));
        assert_eq!(merged.get("max"), Some(&json!(7)));
        assert_eq!(merged.get("min"), Some(&json!(2)));
        assert_eq!(merged.get("merge"), Some(&json!({"a": 1, "b": 2})));
        assert_eq!(merged.get("custom"), Some(&json!("custom")));
        assert!(merged.get("intersection").is_none());
    }

    #[test]
    fn absent_field_does_not_poison_later_merges() {
        let s = multi();
        let a = rec(json!({"union": [1]}));
        let b = rec(json!({"union": [2]}));
        let c = rec(json!({"intersection": [1], "merge": {"x": 1}}));
        let ab = s.merge(vec![a.clone(), b.clone()]).unwrap();
        assert!(ab.get("intersection").is_none());
        assert!(ab.get("merge").is_none());
        let grouped = s.merge(vec![ab, c.clone()]).unwrap();
        let flat = s.merge(vec![a, b, c]).unwrap();
        assert_eq!(grouped.get("intersection"), Some(&json!([1])));
        assert_eq!(grouped.values(), flat.values());
    }

    #[test]
    fn unmanaged_fields_come_from_base() {
        let merged = multi()
            .merge(vec![
                rec(json!({"users": ["b"], "note": "first"})),
                rec(json!({"users": ["a"], "note": "second"})),
            ])
            .unwrap();
        assert_eq!(merged.get("note"), Some(&json!("first")));
        assert_eq!(merged.get("users"), Some(&json!(["b"])));
    }

    #[test]
    fn null_result_removes_field() {
        let merged = multi()
            .merge(vec![rec(json!({"max": null})), rec(json!({}))])
            .unwrap();
        assert!(merged.get("max").is_none());
    }

    #[test]
    fn type_fault_names_the_field() {
        let err = multi()
            .merge(vec![rec(json!({"merge": [1]})), rec(json!({"merge": {}}))])
            .unwrap_err();
        assert!(matches!(err, MergeError::Resolve { ref field, .. } if field == "merge"));
        assert!(err.to_string().contains("'merge'"));
    }

    #[test]
    fn override_can_extend_generic_merge() {
        let schema = Schema::builder("mult")
            .value("users", FieldSpec::new().default_value(json!([])))
            .value("union", FieldSpec::new().resolve_with(Resolver::Union))
            .merge_with(|schema, siblings| {
                let users: Vec<Value> = siblings
                    .iter()
                    .filter_map(|s| s.get("users").cloned())
                    .collect();
                let mut merged = schema.merge_fields(siblings)?;
                let min = Resolver::Min
                    .resolve(&users)
                    .map_err(|source| MergeError::Resolve {
                        field: "users".into(),
                        source,
                    })?;
                merged.set("users", min);
                Ok(merged)
            })
            .build();

        let merged = schema
            .merge(vec![
                rec(json!({"users": ["b", "c"], "union": [1]})),
                rec(json!({"users": ["a"], "union": [2]})),
            ])
            .unwrap();
        assert_eq!(merged.get("users"), Some(&json!(["a"])));
        assert_eq!(merged.get("union"), Some(&json!([1, 2])));
    }
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod proptests {
    use super::*;
    use crate::resolver::Resolver;
    use crate::schema::FieldSpec;
    use proptest::prelude::*;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::builder("p")
            .value("u", FieldSpec::new().resolve_with(Resolver::Union))
            .value("lo", FieldSpec::new().resolve_with(Resolver::Min))
            .value("hi", FieldSpec::new().resolve_with(Resolver::Max))
            .value("i", FieldSpec::new().resolve_with(Resolver::Intersection))
            .value("m", FieldSpec::new().resolve_with(Resolver::Merge))
            .build()
    }

    fn record() -> impl Strategy<Value = Record> {
        (
            prop::option::of(prop::collection::btree_set(0u8..10, 0..4)),
            prop::option::of(0i32..20),
            prop::option::of(0i32..20),
            prop::option::of(prop::collection::btree_set(0u8..6, 0..5)),
            prop::option::of(prop::collection::btree_map("[a-d]", 0i32..4, 0..3)),
        )
            .prop_map(|(u, lo, hi, i, m)| {
                let mut r = Record::with_key("k");
                if let Some(i) = i {
                    r.set("i", json!(i.into_iter().collect::<Vec<_>>()));
                }
                if let Some(m) = m {
                    r.set("m", json!(m));
                }
                if let Some(u) = u {
                    r.set("u", json!(u.into_iter().collect::<Vec<_>>()));
                }
                if let Some(lo) = lo {
                    r.set("lo", json!(lo));
                }
                if let Some(hi) = hi {
                    r.set("hi", json!(hi));
                }
                r
            })
    }

    fn merge2(s: &Schema, a: Record, b: Record) -> Record {
        s.merge(vec![a, b]).unwrap()
    }

    proptest! {
        #[test]
        fn merge_is_idempotent_on_one(r in record()) {
            prop_assert_eq!(schema().merge(vec![r.clone()]).unwrap(), r);
        }

        #[test]
        fn merge_is_order_independent(mut rs in prop::collection::vec(record(), 2..5)) {
            let s = schema();
            let forward = s.merge(rs.clone()).unwrap();
            rs.reverse();
            let backward = s.merge(rs).unwrap();
            prop_assert_eq!(forward.values(), backward.values());
        }

        #[test]
        fn merge_is_associative(a in record(), b in record(), c in record()) {
            let s = schema();
            let left = merge2(&s, merge2(&s, a.clone(), b.clone()), c.clone());
            let right = merge2(&s, a.clone(), merge2(&s, b.clone(), c.clone()));
            let flat = s.merge(vec![a, b, c]).unwrap();
            prop_assert_eq!(left.values(), right.values());
            prop_assert_eq!(left.values(), flat.values());
        }
    }
}
