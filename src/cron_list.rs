//! Chronological lists of references to other records.
//!
//! A cron list is a record whose `items` field holds keys of records in a
//! second bucket, newest first, optionally capped at a `limit`. Item keys
//! embed their creation time (`k<list>_t<ms><suffix>`), so sorting the keys
//! in descending order sorts the items newest first.
//!
//! Concurrent writers each add items to their own sibling. The merge override
//! installed by [`CronLists::schema`] unions `items` across siblings, re-sorts
//! and trims to the limit; keys that fall off the end are deleted from the
//! item bucket on the next successful save.
//!
//! Saving a list saves the items added through it first and deletes the items
//! removed (or trimmed) from it afterwards, so a crash between the two leaves
//! unreferenced items behind, never dangling references.

use std::collections::BTreeSet;
use std::sync::Arc;

use concord_store::ObjectStore;
use rand::Rng;
use serde_json::Value;

use crate::bucket::{Bucket, SaveOutcome};
use crate::clock::{Clock, SystemClock};
use crate::error::Error;
use crate::merge::MergeError;
use crate::record::Record;
use crate::schema::{FieldSpec, Schema};

/// Field holding the item keys, newest first.
pub const ITEMS: &str = "items";

/// Merge output only: keys trimmed by the limit while merging. Stripped when a
/// [`CronList`] is opened, never written back.
const TRIMMED: &str = "removed_items";

// ---------------------------------------------------------------------------
// CronLists
// ---------------------------------------------------------------------------

/// A kind of cron list: the list bucket, the item bucket and the limit.
#[derive(Clone)]
pub struct CronLists {
    lists: Bucket,
    items: Bucket,
    limit: Option<usize>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CronLists {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronLists")
            .field("lists", &self.lists.name())
            .field("items", &self.items.name())
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl CronLists {
    /// Lists stored in `bucket`, referencing records of `items` stored in the
    /// same store. `limit` caps how many items a list keeps.
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: &str,
        items: Arc<Schema>,
        limit: Option<usize>,
    ) -> Self {
        let schema = Arc::new(Self::schema(bucket, limit));
        Self {
            lists: Bucket::new(Arc::clone(&store), schema),
            items: Bucket::new(store, items),
            limit,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` for item keys.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Record type of a list: `allow_mult`, an `items` array, and a merge
    /// that unions, sorts and trims it.
    #[must_use]
    pub fn schema(bucket: &str, limit: Option<usize>) -> Schema {
        Schema::builder(bucket)
            .allow_mult(true)
            .value(ITEMS, FieldSpec::new().default_value(Value::Array(Vec::new())))
            .merge_with(move |schema, siblings| merge_lists(schema, siblings, limit))
            .build()
    }

    /// Bucket holding the lists.
    #[must_use]
    pub const fn lists(&self) -> &Bucket {
        &self.lists
    }

    /// Bucket holding the items.
    #[must_use]
    pub const fn items(&self) -> &Bucket {
        &self.items
    }

    /// Maximum items per list, if capped.
    #[must_use]
    pub const fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Turn on `allow_mult` for the list bucket.
    ///
    /// # Errors
    /// Returns [`Error::Store`].
    pub fn ensure_allow_mult(&self) -> Result<(), Error> {
        self.lists.ensure_allow_mult()
    }

    /// Load list `key`, or start an empty one.
    ///
    /// # Errors
    /// As [`Bucket::get`].
    pub fn open(&self, key: &str) -> Result<CronList, Error> {
        let record = self.lists.get_or_new(key)?;
        Ok(CronList::from_record(self.clone(), record))
    }

    /// Load list `key`; `Ok(None)` if it does not exist.
    ///
    /// # Errors
    /// As [`Bucket::get`].
    pub fn get(&self, key: &str) -> Result<Option<CronList>, Error> {
        Ok(self
            .lists
            .get(key)?
            .map(|record| CronList::from_record(self.clone(), record)))
    }
}

// ---------------------------------------------------------------------------
// CronList
// ---------------------------------------------------------------------------

/// One loaded list plus the item changes not yet saved.
#[derive(Debug)]
pub struct CronList {
    kind: CronLists,
    record: Record,
    added: Vec<Record>,
    removed: BTreeSet<String>,
}

impl CronList {
    fn from_record(kind: CronLists, mut record: Record) -> Self {
        let removed = take_keys(&mut record, TRIMMED);
        Self {
            kind,
            record,
            added: Vec::new(),
            removed,
        }
    }

    /// Key of the list.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.record.key()
    }

    /// The underlying list record.
    #[must_use]
    pub const fn record(&self) -> &Record {
        &self.record
    }

    /// Item keys, newest first.
    #[must_use]
    pub fn items(&self) -> Vec<String> {
        keys_of(&self.record, ITEMS)
    }

    /// Items added since the last save.
    #[must_use]
    pub fn added_items(&self) -> &[Record] {
        &self.added
    }

    /// Item keys that the next save deletes.
    #[must_use]
    pub const fn removed_items(&self) -> &BTreeSet<String> {
        &self.removed
    }

    /// Add a new item with `fields` as its data; returns its key.
    ///
    /// A numeric `created_at` field (milliseconds) is used as the item's time
    /// instead of the clock.
    pub fn push(&mut self, fields: serde_json::Map<String, Value>) -> String {
        let time = fields
            .get("created_at")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| self.kind.clock.now_ms());
        let key = self.new_item_key(time);
        let mut item = self.kind.items.new_record(key.as_str());
        for (name, value) in fields {
            item.set(name, value);
        }
        self.add_item(item);
        key
    }

    /// Add an existing item record, assigning a key if it has none; returns
    /// its key.
    pub fn push_record(&mut self, mut item: Record) -> String {
        let key = match item.key() {
            Some(key) => key.to_owned(),
            None => {
                let key = self.new_item_key(self.kind.clock.now_ms());
                item.set_key(key.as_str());
                key
            }
        };
        self.add_item(item);
        key
    }

    /// Remove `item_key` from the list. The item is deleted on the next save.
    /// Returns `false` if the list does not hold it.
    pub fn remove(&mut self, item_key: &str) -> bool {
        let mut items = self.items();
        let before = items.len();
        items.retain(|k| k != item_key);
        if items.len() == before {
            return false;
        }
        self.added.retain(|item| item.key() != Some(item_key));
        self.removed.insert(item_key.to_owned());
        set_keys(&mut self.record, &items);
        true
    }

    /// Remove every item. The items are deleted on the next save.
    pub fn clear(&mut self) {
        self.removed.extend(self.items());
        self.added.clear();
        set_keys(&mut self.record, &[]);
    }

    /// Load every referenced item that still exists, newest first.
    ///
    /// # Errors
    /// As [`Bucket::get`].
    pub fn all(&self) -> Result<Vec<Record>, Error> {
        let mut out = Vec::new();
        for key in self.items() {
            if let Some(item) = self.kind.items.get(&key)? {
                out.push(item);
            }
        }
        Ok(out)
    }

    /// Save added items, then the list, then delete removed items.
    ///
    /// If an added item fails validation nothing is written and its errors
    /// are returned.
    ///
    /// # Errors
    /// Returns [`Error::Store`] or [`Error::Encode`].
    pub fn save(&mut self) -> Result<SaveOutcome, Error> {
        let kept: BTreeSet<String> = self.items().into_iter().collect();
        for item in &mut self.added {
            if !item.key().is_some_and(|k| kept.contains(k)) {
                continue;
            }
            if let SaveOutcome::Rejected(errors) = self.kind.items.save(item)? {
                return Ok(SaveOutcome::Rejected(errors));
            }
        }

        let outcome = self.kind.lists.save(&mut self.record)?;
        if outcome.is_stored() {
            self.added.clear();
            let removed = std::mem::take(&mut self.removed);
            self.delete_items(removed.iter().filter(|k| !kept.contains(*k)));
        }
        Ok(outcome)
    }

    /// Re-read the list, dropping unsaved changes.
    ///
    /// # Errors
    /// As [`Bucket::reload`].
    pub fn reload(&mut self) -> Result<(), Error> {
        self.kind.lists.reload(&mut self.record)?;
        self.removed = take_keys(&mut self.record, TRIMMED);
        self.added.clear();
        Ok(())
    }

    /// Delete the list and every item it references or has dropped.
    ///
    /// # Errors
    /// Returns [`Error::MissingKey`] or [`Error::Store`].
    pub fn delete(&mut self) -> Result<(), Error> {
        self.kind.lists.delete(&mut self.record)?;
        let mut doomed = std::mem::take(&mut self.removed);
        doomed.extend(self.items());
        self.delete_items(doomed.iter());
        self.added.clear();
        Ok(())
    }

    // -- internals --

    fn add_item(&mut self, item: Record) {
        let Some(key) = item.key().map(str::to_owned) else {
            return;
        };
        self.removed.remove(&key);
        self.added.retain(|a| a.key() != Some(key.as_str()));
        self.added.push(item);

        let mut items = self.items();
        if !items.contains(&key) {
            items.push(key);
            sort_newest_first(&mut items);
        }
        if let Some(limit) = self.kind.limit
            && items.len() > limit
        {
            self.removed.extend(items.split_off(limit));
        }
        set_keys(&mut self.record, &items);
    }

    fn new_item_key(&self, time_ms: u64) -> String {
        let suffix: u32 = rand::rng().random_range(0..100_000);
        let list = self.record.key().unwrap_or_default();
        format!("k{list}_t{time_ms:013}{suffix:05}")
    }

    fn delete_items<'a>(&self, keys: impl Iterator<Item = &'a String>) {
        for key in keys {
            // Best effort: an item left behind is garbage, not corruption.
            if let Err(err) = self.kind.items.delete_key(key) {
                tracing::warn!(
                    bucket = self.kind.items.name(),
                    item = %key,
                    error = %err,
                    "could not delete dropped list item"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

fn merge_lists(
    schema: &Schema,
    siblings: Vec<Record>,
    limit: Option<usize>,
) -> Result<Record, MergeError> {
    let mut items: BTreeSet<String> = BTreeSet::new();
    let mut trimmed: BTreeSet<String> = BTreeSet::new();
    for sibling in &siblings {
        items.extend(keys_of(sibling, ITEMS));
        trimmed.extend(keys_of(sibling, TRIMMED));
    }

    let mut merged = schema.merge_fields(siblings)?;
    let mut items: Vec<String> = items.into_iter().rev().collect();
    if let Some(limit) = limit
        && items.len() > limit
    {
        trimmed.extend(items.split_off(limit));
    }
    for key in &items {
        trimmed.remove(key);
    }

    set_keys(&mut merged, &items);
    if trimmed.is_empty() {
        merged.remove(TRIMMED);
    } else {
        merged.set(
            TRIMMED,
            Value::Array(trimmed.into_iter().map(Value::String).collect()),
        );
    }
    Ok(merged)
}

fn sort_newest_first(keys: &mut [String]) {
    keys.sort_unstable_by(|a, b| b.cmp(a));
}

fn keys_of(record: &Record, field: &str) -> Vec<String> {
    match record.get(field) {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|v| v.as_str().map(str::to_owned))
            .collect(),
        _ => Vec::new(),
    }
}

fn take_keys(record: &mut Record, field: &str) -> BTreeSet<String> {
    let keys = keys_of(record, field).into_iter().collect();
    record.remove(field);
    keys
}

fn set_keys(record: &mut Record, keys: &[String]) {
    record.set(
        ITEMS,
        Value::Array(keys.iter().cloned().map(Value::String).collect()),
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
