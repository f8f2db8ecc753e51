//! Free/taken work queue carried in the membership record.
//!
//! Items move `free -> taken` when claimed and leave `taken` when finished.
//! Two participants may claim the same item concurrently; the merge keeps
//! the claim with the lowest owner id, and the loser notices on its next
//! load.

use serde_json::Value;

use super::state::{Claim, MembershipState};

impl MembershipState {
    /// Add `item` to the free set. No-op (returns `false`) if it is taken.
    pub fn offer(&mut self, item: impl Into<String>, payload: Value) -> bool {
        let item = item.into();
        if self.taken.contains_key(&item) {
            return false;
        }
        self.free.insert(item, payload);
        true
    }

    /// Move `item` from free to taken under `me`. Returns its payload.
    pub fn claim(&mut self, me: &str, item: &str) -> Option<Value> {
        let payload = self.free.remove(item)?;
        self.taken.insert(
            item.to_owned(),
            Claim {
                owner: me.to_owned(),
                payload: payload.clone(),
            },
        );
        Some(payload)
    }

    /// Drop `item` from taken if `me` owns it.
    pub fn finish(&mut self, me: &str, item: &str) -> bool {
        if self.owner_of(item) != Some(me) {
            return false;
        }
        self.taken.remove(item);
        true
    }

    /// Return `item` to the free set if `me` owns it.
    pub fn release(&mut self, me: &str, item: &str) -> bool {
        if self.owner_of(item) != Some(me) {
            return false;
        }
        match self.taken.remove(item) {
            Some(claim) => {
                self.free.insert(item.to_owned(), claim.payload);
                true
            }
            None => false,
        }
    }

    /// Owner of a taken item.
    #[must_use]
    pub fn owner_of(&self, item: &str) -> Option<&str> {
        self.taken.get(item).map(|c| c.owner.as_str())
    }

    /// Items currently held by `me`.
    pub fn claimed_by<'a>(&'a self, me: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.taken
            .iter()
            .filter(move |(_, c)| c.owner == me)
            .map(|(item, _)| item.as_str())
    }
}
