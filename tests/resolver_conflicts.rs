//! Conflict resolution through a sibling-keeping store.
//!
//! Each case induces real siblings (one client per value, all descending
//! from the same version) and checks what a merging load returns.

mod common;

use std::sync::Arc;

use concord::{FieldSpec, LoadOptions, Loaded, MergeError, Resolver, Schema};
use concord_store::MemoryStore;
use serde_json::{Value, json};

use common::{bucket_as, conflict};

fn multi() -> Arc<Schema> {
    Arc::new(
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
            .build(),
    )
}

/// Induce a conflict on `field`, check the raw siblings, and return the
/// merged value.
fn resolve(field: &str, values: &[Value]) -> Option<Value> {
    let store = MemoryStore::new();
    let schema = multi();
    conflict(&store, &schema, "k", field, values);

    let bucket = bucket_as(&store, "reader", &schema);
    match bucket.get_with("k", LoadOptions::raw()).unwrap() {
        Some(Loaded::Siblings(siblings)) => assert_eq!(siblings.len(), values.len()),
        other => panic!("expected siblings, got {other:?}"),
    }

    bucket.get("k").unwrap().unwrap().get(field).cloned()
}

#[test]
fn union_of_disjoint_sets() {
    assert_eq!(resolve("union", &[json!([1]), json!([2])]), Some(json!([1, 2])));
}

#[test]
fn union_skips_missing() {
    assert_eq!(resolve("union", &[json!([1]), Value::Null]), Some(json!([1])));
}

#[test]
fn union_dedups() {
    assert_eq!(
        resolve("union", &[json!([1, 4, 1]), json!([2, 3]), json!([4, 4])]),
        Some(json!([1, 2, 3, 4]))
    );
}

#[test]
fn intersection_with_empty_is_empty() {
    assert_eq!(resolve("intersection", &[json!([1, 2]), json!([])]), Some(json!([])));
}

#[test]
fn intersection_of_three() {
    assert_eq!(
        resolve(
            "intersection",
            &[json!([1, 2, 3, 4]), json!([1, 2, 3]), json!([2, 3, 4])]
        ),
        Some(json!([2, 3]))
    );
}

#[test]
fn min_and_max() {
    assert_eq!(resolve("min", &[json!(0), json!(1), json!(2), json!(3)]), Some(json!(0)));
    assert_eq!(resolve("max", &[json!(0), json!(2), json!(4), json!(2)]), Some(json!(4)));
}

#[test]
fn max_of_nothing_is_absent() {
    assert_eq!(resolve("max", &[Value::Null, Value::Null]), None);
}

#[test]
fn max_ignores_missing() {
    assert_eq!(resolve("max", &[Value::Null, json!(4)]), Some(json!(4)));
}

#[test]
fn merge_objects() {
    assert_eq!(
        resolve("merge", &[json!({"a": 1}), json!({"b": 2})]),
        Some(json!({"a": 1, "b": 2}))
    );
}

#[test]
fn custom_resolver() {
    assert_eq!(
        resolve("custom", &[json!("a"), json!("b"), json!("c")]),
        Some(json!("custom"))
    );
}

#[test]
fn override_takes_min_users() {
    assert_eq!(
        resolve("users", &[json!(["b", "c"]), json!(["a"]), json!(["b"])]),
        Some(json!(["a"]))
    );
}

#[test]
fn type_fault_surfaces_as_merge_error() {
    let store = MemoryStore::new();
    let schema = multi();
    conflict(&store, &schema, "k", "max", &[json!(1), json!("one")]);
    let err = bucket_as(&store, "reader", &schema).get("k").unwrap_err();
    assert!(err.to_string().contains("'max'"), "{err}");
}

#[test]
fn read_repair_collapses_siblings() {
    let store = MemoryStore::new();
    let schema = multi();
    conflict(&store, &schema, "k", "union", &[json!([1]), json!([2])]);
    assert_eq!(store.sibling_count("mult", "k").unwrap(), 2);

    let bucket = bucket_as(&store, "reader", &schema);
    let Some(Loaded::Resolved(record)) = bucket.get_with("k", LoadOptions::repairing()).unwrap()
    else {
        panic!("expected a resolved record");
    };
    assert!(record.is_merged());
    assert_eq!(store.sibling_count("mult", "k").unwrap(), 1);
    assert_eq!(bucket.get("k").unwrap().unwrap().get("union"), Some(&json!([1, 2])));
}
