//! Membership driven by background loops on the system clock.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use concord::membership::MembershipDriver;
use concord_store::{MemoryStore, ObjectStore};
use rand::Rng;

use common::live_participant;

fn handle(store: &MemoryStore, id: &str) -> Arc<dyn ObjectStore> {
    Arc::new(store.with_client_id(id).unwrap())
}

/// Poll `driver` until `done` holds or a few seconds pass.
fn settle(driver: &MembershipDriver, done: impl Fn(&concord::Membership) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if driver.with(|m| done(m)).unwrap() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

#[test]
fn second_member_joins_while_first_runs() {
    let store = MemoryStore::new();
    let (a, outcome) = MembershipDriver::start(live_participant(&handle(&store, "a"), "a")).unwrap();
    assert!(outcome.is_joined());

    let (b, outcome) = MembershipDriver::start(live_participant(&handle(&store, "b"), "b")).unwrap();
    assert!(outcome.is_joined());

    for d in [&a, &b] {
        assert!(settle(d, |m| m.members() == ["a", "b"] && m.stable()));
    }
    a.stop().unwrap();
    b.stop().unwrap();
}

#[test]
fn concurrent_joins_all_complete() {
    let store = MemoryStore::new();
    let (first, _) = MembershipDriver::start(live_participant(&handle(&store, "n0"), "n0")).unwrap();

    let joiners: Vec<_> = (1..4)
        .map(|i| {
            let id = format!("n{i}");
            let participant = live_participant(&handle(&store, &id), &id);
            thread::spawn(move || {
                let jitter = rand::rng().random_range(0..30);
                thread::sleep(Duration::from_millis(jitter));
                MembershipDriver::start(participant).unwrap()
            })
        })
        .collect();
    let drivers: Vec<_> = joiners.into_iter().map(|h| h.join().unwrap()).collect();

    // A joiner can miss an acknowledgment from a peer that became a member
    // mid-wait; it withdraws and may simply try again.
    for (driver, outcome) in &drivers {
        if !outcome.is_joined() {
            assert!(driver.join().unwrap().is_joined());
        }
    }

    let all = ["n0", "n1", "n2", "n3"];
    assert!(settle(&first, |m| m.members() == all && m.stable()));
    for (driver, _) in drivers {
        assert!(settle(&driver, |m| m.members() == all));
        driver.stop().unwrap();
    }
    first.stop().unwrap();
}

#[test]
fn leaving_member_is_removed_everywhere() {
    let store = MemoryStore::new();
    let (a, _) = MembershipDriver::start(live_participant(&handle(&store, "a"), "a")).unwrap();
    let (b, _) = MembershipDriver::start(live_participant(&handle(&store, "b"), "b")).unwrap();
    assert!(settle(&a, |m| m.members() == ["a", "b"]));

    let b = b.leave().unwrap();
    assert!(!b.is_member());
    assert!(settle(&a, |m| m.members() == ["a"] && m.stable()));
    a.stop().unwrap();
}
