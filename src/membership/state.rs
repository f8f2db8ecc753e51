//! Shared membership state and the pure protocol transitions on it.
//!
//! Every operation here is a plain function of `(state, participant, now)`;
//! nothing touches the store. [`Membership`](super::Membership) wraps these
//! with load/save, and the `assurance` model drives the very same methods.
//!
//! # Merge rules
//!
//! | Field     | Collision rule                                  |
//! |-----------|--------------------------------------------------|
//! | `members` | keep the later join time                         |
//! | `joins`   | union the ack sets, keep the later request time  |
//! | `parts`   | union the ack sets, keep the later request time  |
//! | `free`    | keep the larger payload (canonical order)        |
//! | `taken`   | keep the claim of the lowest owner id            |
//!
//! Each rule is commutative, associative and idempotent, so siblings can be
//! merged pairwise or all at once with the same result. Acknowledgments are
//! never dropped by a merge.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::merge::MergeError;
use crate::record::Record;
use crate::resolver::Resolver;
use crate::schema::{FieldSpec, Schema};
use crate::value;

use super::Timing;

/// Record fields that hold membership state.
pub const FIELDS: [&str; 5] = ["members", "joins", "parts", "free", "taken"];

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// A current member.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberEntry {
    /// When the member completed its join (ms).
    pub time: u64,
}

/// A pending join or part request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingEntry {
    /// When the request was made (ms).
    pub time: u64,
    /// Participants that have observed the request.
    #[serde(default)]
    pub ack: BTreeSet<String>,
}

impl PendingEntry {
    fn new(requester: &str, now: u64) -> Self {
        Self {
            time: now,
            ack: BTreeSet::from([requester.to_owned()]),
        }
    }

    fn absorb(&mut self, other: Self) {
        self.time = self.time.max(other.time);
        self.ack.extend(other.ack);
    }
}

/// A work item held by one participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Participant holding the item.
    pub owner: String,
    /// The item's payload.
    pub payload: Value,
}

// ---------------------------------------------------------------------------
// HandleReport
// ---------------------------------------------------------------------------

/// What one [`MembershipState::handle`] pass changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HandleReport {
    /// Join requests dropped because the requester is already a member.
    pub joins_settled: Vec<String>,
    /// Join requests dropped for being older than twice the join interval.
    pub joins_expired: Vec<String>,
    /// Join requests this participant acknowledged for the first time.
    pub joins_acked: Vec<String>,
    /// Part requests this participant acknowledged for the first time.
    pub parts_acked: Vec<String>,
    /// Departing ids removed from `members`.
    pub members_evicted: Vec<String>,
    /// Part requests removed after full acknowledgment.
    pub parts_completed: Vec<String>,
    /// Part requests removed for being older than twice the part interval.
    pub parts_expired: Vec<String>,
    /// Free queue items dropped because they are already claimed.
    pub claims_settled: Vec<String>,
}

impl HandleReport {
    /// Returns `true` if the pass changed nothing.
    #[must_use]
    pub fn is_quiet(&self) -> bool {
        self.joins_settled.is_empty()
            && self.joins_expired.is_empty()
            && self.joins_acked.is_empty()
            && self.parts_acked.is_empty()
            && self.members_evicted.is_empty()
            && self.parts_completed.is_empty()
            && self.parts_expired.is_empty()
            && self.claims_settled.is_empty()
    }
}

// ---------------------------------------------------------------------------
// MembershipState
// ---------------------------------------------------------------------------

/// The cooperatively maintained membership record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipState {
    /// Current members by id.
    #[serde(default)]
    pub members: BTreeMap<String, MemberEntry>,
    /// Pending join requests by requester.
    #[serde(default)]
    pub joins: BTreeMap<String, PendingEntry>,
    /// Pending part requests by requester.
    #[serde(default)]
    pub parts: BTreeMap<String, PendingEntry>,
    /// Unclaimed work items.
    #[serde(default)]
    pub free: BTreeMap<String, Value>,
    /// Claimed work items.
    #[serde(default)]
    pub taken: BTreeMap<String, Claim>,
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn expired(time: u64, now: u64, interval: Duration) -> bool {
    now.saturating_sub(time) > millis(interval).saturating_mul(2)
}

impl MembershipState {
    // -- queries --

    /// Returns `true` if `id` is a member.
    #[must_use]
    pub fn is_member(&self, id: &str) -> bool {
        self.members.contains_key(id)
    }

    /// Member ids in sorted order.
    pub fn member_ids(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    /// Returns `true` while any join is pending.
    #[must_use]
    pub fn joining(&self) -> bool {
        !self.joins.is_empty()
    }

    /// Returns `true` when no join or part is pending.
    #[must_use]
    pub fn stable(&self) -> bool {
        self.joins.is_empty() && self.parts.is_empty()
    }

    /// `me`'s join request exists and every current member has acked it.
    #[must_use]
    pub fn join_acknowledged(&self, me: &str) -> bool {
        self.joins
            .get(me)
            .is_some_and(|entry| self.members.keys().all(|m| entry.ack.contains(m)))
    }

    /// `id`'s part request exists and every member that is not itself
    /// departing has acked it.
    #[must_use]
    pub fn part_acknowledged(&self, id: &str) -> bool {
        self.parts.get(id).is_some_and(|entry| {
            self.members
                .keys()
                .filter(|m| !self.parts.contains_key(*m))
                .all(|m| entry.ack.contains(m))
        })
    }

    // -- transitions --

    /// Request to join: `joins[me] = {now, {me}}`.
    pub fn join_start(&mut self, me: &str, now: u64) {
        self.joins.insert(me.to_owned(), PendingEntry::new(me, now));
    }

    /// Promote `me` from `joins` to `members`.
    pub fn join_complete(&mut self, me: &str, now: u64) {
        self.joins.remove(me);
        self.members
            .insert(me.to_owned(), MemberEntry { time: now });
    }

    /// Withdraw `me`'s join request.
    pub fn join_cancel(&mut self, me: &str) {
        self.joins.remove(me);
    }

    /// Request to leave. `me` stops being a member immediately.
    pub fn part_start(&mut self, me: &str, now: u64) {
        self.members.remove(me);
        self.parts.insert(me.to_owned(), PendingEntry::new(me, now));
    }

    /// One bookkeeping pass on behalf of `me`.
    ///
    /// In order: drop joins of existing members and expired joins; ack every
    /// remaining join; ack every part and evict its requester from
    /// `members`; drop parts that are acknowledged or expired; drop free
    /// items that are claimed. Running it twice in a row changes nothing the
    /// second time.
    pub fn handle(&mut self, me: &str, now: u64, timing: &Timing) -> HandleReport {
        let mut report = HandleReport::default();

        let settled: Vec<String> = self
            .joins
            .keys()
            .filter(|id| self.members.contains_key(*id))
            .cloned()
            .collect();
        for id in settled {
            self.joins.remove(&id);
            report.joins_settled.push(id);
        }

        let stale: Vec<String> = self
            .joins
            .iter()
            .filter(|(_, e)| expired(e.time, now, timing.join_interval))
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            self.joins.remove(&id);
            report.joins_expired.push(id);
        }

        for (id, entry) in &mut self.joins {
            if entry.ack.insert(me.to_owned()) {
                report.joins_acked.push(id.clone());
            }
        }

        for (id, entry) in &mut self.parts {
            if entry.ack.insert(me.to_owned()) {
                report.parts_acked.push(id.clone());
            }
            if self.members.remove(id).is_some() {
                report.members_evicted.push(id.clone());
            }
        }

        let finished: Vec<(String, bool)> = self
            .parts
            .iter()
            .filter_map(|(id, e)| {
                if self.part_acknowledged(id) {
                    Some((id.clone(), true))
                } else if expired(e.time, now, timing.part_interval) {
                    Some((id.clone(), false))
                } else {
                    None
                }
            })
            .collect();
        for (id, acknowledged) in finished {
            self.parts.remove(&id);
            if acknowledged {
                report.parts_completed.push(id);
            } else {
                report.parts_expired.push(id);
            }
        }

        let claimed: Vec<String> = self
            .free
            .keys()
            .filter(|item| self.taken.contains_key(*item))
            .cloned()
            .collect();
        for item in claimed {
            self.free.remove(&item);
            report.claims_settled.push(item);
        }

        report
    }

    // -- merge --

    /// Fold `other` into `self` using the per-field collision rules.
    pub fn absorb(&mut self, other: Self) {
        for (id, entry) in other.members {
            let slot = self.members.entry(id).or_default();
            slot.time = slot.time.max(entry.time);
        }
        for (id, entry) in other.joins {
            match self.joins.get_mut(&id) {
                Some(slot) => slot.absorb(entry),
                None => {
                    self.joins.insert(id, entry);
                }
            }
        }
        for (id, entry) in other.parts {
            match self.parts.get_mut(&id) {
                Some(slot) => slot.absorb(entry),
                None => {
                    self.parts.insert(id, entry);
                }
            }
        }
        for (item, payload) in other.free {
            match self.free.get_mut(&item) {
                Some(slot) => {
                    if value::compare(&payload, slot).is_gt() {
                        *slot = payload;
                    }
                }
                None => {
                    self.free.insert(item, payload);
                }
            }
        }
        for (item, claim) in other.taken {
            match self.taken.get_mut(&item) {
                Some(slot) => {
                    let wins = claim
                        .owner
                        .cmp(&slot.owner)
                        .then_with(|| value::compare(&slot.payload, &claim.payload))
                        .is_lt();
                    if wins {
                        *slot = claim;
                    }
                }
                None => {
                    self.taken.insert(item, claim);
                }
            }
        }
    }

    /// Merge any number of sibling states. An empty input is the empty state.
    #[must_use]
    pub fn merge_all(states: impl IntoIterator<Item = Self>) -> Self {
        let mut merged = Self::default();
        for state in states {
            merged.absorb(state);
        }
        merged
    }

    // -- record mapping --

    /// Read the membership fields of `record`.
    ///
    /// # Errors
    /// Returns [`MergeError::Decode`] if a field has the wrong shape.
    pub fn from_record(record: &Record) -> Result<Self, MergeError> {
        let mut map = Map::new();
        for field in FIELDS {
            if let Some(v) = record.get(field) {
                map.insert(field.to_owned(), v.clone());
            }
        }
        serde_json::from_value(Value::Object(map)).map_err(|e| MergeError::Decode {
            message: format!("membership state: {e}"),
        })
    }

    /// Write the membership fields into `record`.
    ///
    /// # Errors
    /// Returns [`MergeError::Decode`] if the state cannot be represented as
    /// a JSON object.
    pub fn write_to(&self, record: &mut Record) -> Result<(), MergeError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => {
                for (field, v) in map {
                    record.set(field, v);
                }
                Ok(())
            }
            Ok(other) => Err(MergeError::Decode {
                message: format!("membership state encoded as {other}"),
            }),
            Err(e) => Err(MergeError::Decode {
                message: e.to_string(),
            }),
        }
    }

    /// Record schema for membership records in `bucket`: every field
    /// defaults to `{}` and siblings merge with [`merge_all`](Self::merge_all).
    #[must_use]
    pub fn schema(bucket: impl Into<String>) -> Schema {
        let mut builder = Schema::builder(bucket).allow_mult(true);
        for field in FIELDS {
            builder = builder.value(
                field,
                FieldSpec::new()
                    .default_value(json!({}))
                    .resolve_with(Resolver::Merge),
            );
        }
        builder.merge_with(merge_records).build()
    }
}

/// Merge override for membership records.
fn merge_records(_schema: &Schema, siblings: Vec<Record>) -> Result<Record, MergeError> {
    let states = siblings
        .iter()
        .map(MembershipState::from_record)
        .collect::<Result<Vec<_>, _>>()?;
    let merged = MembershipState::merge_all(states);
    let mut base = siblings
        .into_iter()
        .next()
        .ok_or(MergeError::EmptySiblingSet)?;
    merged.write_to(&mut base)?;
    Ok(base)
}
