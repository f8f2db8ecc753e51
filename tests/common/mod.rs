//! Shared test helpers for concord integration tests.
//!
//! Everything runs against an in-memory store unless a test opts into a
//! temp directory, so tests have no side effects outside their own state.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use concord::membership::{Membership, ParticipantId, Timing};
use concord::{Bucket, Clock, ManualClock, Record, Schema};
use concord_store::{MemoryStore, ObjectStore};
use serde_json::Value;

/// A fresh in-memory store.
pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

/// A bucket handle on `store` writing as `client`.
pub fn bucket_as(store: &MemoryStore, client: &str, schema: &Arc<Schema>) -> Bucket {
    let handle = store.with_client_id(client).expect("valid client id");
    Bucket::new(Arc::new(handle), Arc::clone(schema))
}

/// Save `key`, then have one client per entry in `values` load it and
/// write `field = value` with the token it loaded. Every write descends from
/// the same version, so the store keeps one sibling per client.
pub fn conflict(store: &MemoryStore, schema: &Arc<Schema>, key: &str, field: &str, values: &[Value]) {
    let base = bucket_as(store, "writer-base", schema);
    base.ensure_allow_mult().expect("enable allow_mult");
    let mut record = base.new_record(key);
    base.save_unchecked(&mut record).expect("write base");

    let loaded: Vec<(Bucket, Record)> = values
        .iter()
        .enumerate()
        .map(|(i, _)| {
            let bucket = bucket_as(store, &format!("writer-{}", i + 1), schema);
            let record = bucket.get(key).expect("load").expect("base exists");
            (bucket, record)
        })
        .collect();
    for ((bucket, mut record), value) in loaded.into_iter().zip(values) {
        record.set(field, value.clone());
        bucket.save_unchecked(&mut record).expect("write sibling");
    }
}

/// Intervals small enough for tests on a real clock.
pub const fn quick_timing() -> Timing {
    Timing {
        join_interval: Duration::from_millis(200),
        part_interval: Duration::from_millis(200),
        run_interval: Duration::from_millis(10),
    }
}

/// Open the `group` record as `id` on a manual clock.
pub fn participant(store: &MemoryStore, id: &str, clock: &ManualClock) -> Membership {
    let handle = store.with_client_id(id).expect("valid client id");
    Membership::open(
        Arc::new(handle) as Arc<dyn ObjectStore>,
        "membership",
        "group",
        ParticipantId::new(id).expect("valid participant id"),
    )
    .expect("open membership")
    .with_clock(Arc::new(clock.clone()) as Arc<dyn Clock>)
}

/// Open the `group` record as `id` on the system clock with
/// [`quick_timing`].
pub fn live_participant(store: &Arc<dyn ObjectStore>, id: &str) -> Membership {
    Membership::open(
        Arc::clone(store),
        "membership",
        "group",
        ParticipantId::new(id).expect("valid participant id"),
    )
    .expect("open membership")
    .with_timing(quick_timing())
}
