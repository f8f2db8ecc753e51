//! Concurrent read-modify-write from many clients loses nothing.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use concord::{FieldSpec, Resolver, Schema};
use concord_store::{DirStore, MemoryStore, ObjectStore};
use rand::Rng;
use serde_json::{Value, json};

use common::bucket_as;

const WORKERS: u64 = 10;

fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::builder("concurrent")
            .allow_mult(true)
            .value("v", FieldSpec::new().default_value(json!([])).resolve_with(Resolver::Union))
            .build(),
    )
}

fn append(bucket: &concord::Bucket, i: u64) {
    let mut record = bucket.get_or_new("c").unwrap();
    let mut v: Vec<Value> = record.get_as("v").unwrap().unwrap_or_default();
    v.push(json!(i));
    record.set("v", Value::Array(v));
    assert!(bucket.save(&mut record).unwrap().is_stored());
}

fn final_values(bucket: &concord::Bucket) -> Vec<u64> {
    let record = bucket.get("c").unwrap().unwrap();
    let mut v: Vec<u64> = record.get_as("v").unwrap().unwrap();
    v.sort_unstable();
    v
}

#[test]
fn memory_store_keeps_every_write() {
    let store = MemoryStore::new();
    let schema = schema();
    let seed = bucket_as(&store, "seed", &schema);
    seed.ensure_allow_mult().unwrap();
    let mut c = seed.get_or_new("c").unwrap();
    seed.save(&mut c).unwrap();

    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let bucket = bucket_as(&store, &format!("worker-{i}"), &schema);
            thread::spawn(move || {
                let jitter = rand::rng().random_range(0..40);
                thread::sleep(Duration::from_millis(jitter));
                append(&bucket, i);
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(final_values(&seed), (0..WORKERS).collect::<Vec<_>>());
}

#[test]
fn dir_store_keeps_every_write() {
    let dir = tempfile::tempdir().unwrap();
    let schema = schema();
    let open = |client: &str| {
        let store = DirStore::open(dir.path(), client).unwrap();
        concord::Bucket::new(Arc::new(store) as Arc<dyn ObjectStore>, Arc::clone(&schema))
    };
    let seed = open("seed");
    seed.ensure_allow_mult().unwrap();
    let mut c = seed.get_or_new("c").unwrap();
    seed.save(&mut c).unwrap();

    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let bucket = open(&format!("worker-{i}"));
            thread::spawn(move || append(&bucket, i))
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(final_values(&seed), (0..WORKERS).collect::<Vec<_>>());
}
