//! Record lifecycle: load → (merge) → mutate → save against an [`ObjectStore`].
//!
//! A [`Bucket`] pairs a store handle with the [`Schema`] of the records it
//! holds. Loading a key that has divergent siblings decodes every sibling on
//! its own, runs the merge engine over them and hands back one record marked
//! [`is_merged`](Record::is_merged), carrying the token that covers all of
//! them. Saving that record writes the merged state as the successor of every
//! sibling (read-repair). A save never re-checks for conflicts created in the
//! meantime; the next load surfaces them.

use std::sync::Arc;

use concord_store::{BucketProps, Deleted, Fetched, ObjectStore, Versions};

use crate::error::Error;
use crate::merge::MergeError;
use crate::record::{Record, ValidationErrors};
use crate::schema::Schema;

// ---------------------------------------------------------------------------
// Options and outcomes
// ---------------------------------------------------------------------------

/// How [`Bucket::get_with`] treats sibling versions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadOptions {
    /// Merge siblings into one record. When `false`, siblings are returned
    /// individually as [`Loaded::Siblings`].
    pub merge: bool,
    /// After merging, write the merged record back immediately.
    pub repair: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            merge: true,
            repair: false,
        }
    }
}

impl LoadOptions {
    /// Merge and write back in one call.
    #[must_use]
    pub const fn repairing() -> Self {
        Self {
            merge: true,
            repair: true,
        }
    }

    /// Return siblings without merging.
    #[must_use]
    pub const fn raw() -> Self {
        Self {
            merge: false,
            repair: false,
        }
    }
}

/// Result of [`Bucket::get_with`].
#[derive(Clone, Debug, PartialEq)]
pub enum Loaded {
    /// One record: the only version, or the merge of all siblings.
    Resolved(Record),
    /// Unmerged siblings, each carrying the combined token.
    Siblings(Vec<Record>),
}

/// Result of [`Bucket::save`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The record was written.
    Stored,
    /// Validation failed; nothing was written.
    Rejected(ValidationErrors),
}

impl SaveOutcome {
    /// Returns `true` if the record was written.
    #[must_use]
    pub const fn is_stored(&self) -> bool {
        matches!(self, Self::Stored)
    }
}

// ---------------------------------------------------------------------------
// Bucket
// ---------------------------------------------------------------------------

/// A schema bound to a store.
#[derive(Clone)]
pub struct Bucket {
    store: Arc<dyn ObjectStore>,
    schema: Arc<Schema>,
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("bucket", &self.schema.bucket())
            .field("client_id", &self.store.client_id())
            .finish_non_exhaustive()
    }
}

impl Bucket {
    /// Bind `schema` to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, schema: Arc<Schema>) -> Self {
        Self { store, schema }
    }

    /// Bucket name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.schema.bucket()
    }

    /// Record type of this bucket.
    #[must_use]
    pub const fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Underlying store handle.
    #[must_use]
    pub const fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Turn on `allow_mult` in the store if the schema requires it.
    ///
    /// # Errors
    /// Returns [`Error::Store`] if the bucket properties cannot be read or set.
    pub fn ensure_allow_mult(&self) -> Result<(), Error> {
        if !self.schema.allow_mult() {
            return Ok(());
        }
        if !self.store.bucket_props(self.name())?.allow_mult {
            self.store
                .set_bucket_props(self.name(), BucketProps { allow_mult: true })?;
            tracing::info!(bucket = self.name(), "enabled allow_mult");
        }
        Ok(())
    }

    /// A new, unsaved record with defaults filled in.
    #[must_use]
    pub fn new_record(&self, key: impl Into<String>) -> Record {
        self.schema.new_record(key)
    }

    /// Load `key`, merging siblings. `Ok(None)` if the key does not exist.
    ///
    /// # Errors
    /// Returns [`Error::Store`], [`Error::Decode`] or [`Error::Merge`].
    pub fn get(&self, key: &str) -> Result<Option<Record>, Error> {
        self.store
            .get(self.name(), key)?
            .map(|fetched| self.resolve(key, fetched))
            .transpose()
    }

    /// Load `key` with explicit merge / repair behavior.
    ///
    /// # Errors
    /// As [`get`](Self::get); with `repair`, also the errors of the write.
    pub fn get_with(&self, key: &str, options: LoadOptions) -> Result<Option<Loaded>, Error> {
        let Some(fetched) = self.store.get(self.name(), key)? else {
            return Ok(None);
        };

        if !options.merge && fetched.versions.is_conflict() {
            let token = fetched.token;
            let mut siblings = self.decode_versions(key, fetched.versions)?;
            for sibling in &mut siblings {
                sibling.mark_loaded(token.clone(), false);
            }
            return Ok(Some(Loaded::Siblings(siblings)));
        }

        let mut record = self.resolve(key, fetched)?;
        if options.repair && record.is_merged() {
            self.write(&mut record)?;
            tracing::info!(bucket = self.name(), key, "read-repair wrote merged record");
        }
        Ok(Some(Loaded::Resolved(record)))
    }

    /// Load `key`, or build a new record if it does not exist.
    ///
    /// # Errors
    /// As [`get`](Self::get).
    pub fn get_or_new(&self, key: &str) -> Result<Record, Error> {
        Ok(self.get(key)?.unwrap_or_else(|| self.new_record(key)))
    }

    /// Re-read `record` from the store, replacing its values and token.
    ///
    /// # Errors
    /// Returns [`Error::MissingKey`] for a keyless record and
    /// [`Error::NotFound`] if the key no longer exists.
    pub fn reload(&self, record: &mut Record) -> Result<(), Error> {
        let key = self.key_of(record)?;
        let fresh = self.get(&key)?.ok_or_else(|| Error::NotFound {
            bucket: self.name().to_owned(),
            key,
        })?;
        record.adopt(fresh);
        Ok(())
    }

    /// Validate and write `record`, passing through its causality token.
    ///
    /// Runs `before_create` (new records only), `before_save`, validation,
    /// the write, then `after_create` / `after_save`.
    ///
    /// # Errors
    /// Returns [`Error::Store`] or [`Error::Encode`]. Validation failures are
    /// reported as [`SaveOutcome::Rejected`], not as errors.
    pub fn save(&self, record: &mut Record) -> Result<SaveOutcome, Error> {
        let hooks = self.schema.hooks();
        let creating = record.is_new();
        if creating {
            hooks.before_create(record);
        }
        hooks.before_save(record);

        let errors = self.schema.validate(record);
        if !errors.is_empty() {
            tracing::debug!(bucket = self.name(), key = record.key(), %errors, "save rejected");
            return Ok(SaveOutcome::Rejected(errors));
        }

        self.write(record)?;
        if creating {
            hooks.after_create(record);
        }
        hooks.after_save(record);
        Ok(SaveOutcome::Stored)
    }

    /// Write `record` without hooks or validation.
    ///
    /// # Errors
    /// Returns [`Error::MissingKey`], [`Error::Encode`] or [`Error::Store`].
    pub fn save_unchecked(&self, record: &mut Record) -> Result<(), Error> {
        self.write(record)
    }

    /// Delete `record` from the store. The handle becomes a fresh record with
    /// the same key and values.
    ///
    /// # Errors
    /// Returns [`Error::MissingKey`] or [`Error::Store`].
    pub fn delete(&self, record: &mut Record) -> Result<Deleted, Error> {
        let key = self.key_of(record)?;
        let hooks = self.schema.hooks();
        hooks.before_delete(record);
        let outcome = self.store.delete(self.name(), &key)?;
        record.mark_deleted();
        hooks.after_delete(record);
        Ok(outcome)
    }

    /// Delete `key` without loading it. No hooks run.
    ///
    /// # Errors
    /// Returns [`Error::Store`].
    pub fn delete_key(&self, key: &str) -> Result<Deleted, Error> {
        Ok(self.store.delete(self.name(), key)?)
    }

    /// Returns `true` if `key` exists.
    ///
    /// # Errors
    /// Returns [`Error::Store`].
    pub fn exists(&self, key: &str) -> Result<bool, Error> {
        Ok(self.store.exists(self.name(), key)?)
    }

    /// Every key in the bucket, sorted.
    ///
    /// # Errors
    /// Returns [`Error::Store`].
    pub fn keys(&self) -> Result<Vec<String>, Error> {
        Ok(self.store.keys(self.name())?)
    }

    /// Load every record in the bucket. Keys deleted during the scan are
    /// skipped.
    ///
    /// # Errors
    /// As [`get`](Self::get).
    pub fn all(&self) -> Result<Vec<Record>, Error> {
        let mut records = Vec::new();
        for key in self.keys()? {
            if let Some(record) = self.get(&key)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Number of keys in the bucket.
    ///
    /// # Errors
    /// Returns [`Error::Store`].
    pub fn count(&self) -> Result<usize, Error> {
        Ok(self.keys()?.len())
    }

    // -- internals --

    fn key_of(&self, record: &Record) -> Result<String, Error> {
        record
            .key()
            .map(str::to_owned)
            .ok_or_else(|| Error::MissingKey {
                bucket: self.name().to_owned(),
            })
    }

    fn write(&self, record: &mut Record) -> Result<(), Error> {
        let key = self.key_of(record)?;
        let blob = record.encode()?;
        let token = self.store.put(self.name(), &key, blob, record.token())?;
        tracing::trace!(bucket = self.name(), key, %token, "saved");
        record.mark_saved(token);
        Ok(())
    }

    /// Decode each version independently, defaults applied, nothing merged.
    fn decode_versions(&self, key: &str, versions: Versions) -> Result<Vec<Record>, Error> {
        let blobs = match versions {
            Versions::Single(blob) => vec![blob],
            Versions::Siblings(blobs) => blobs,
        };
        blobs
            .iter()
            .map(|blob| {
                let mut record = Record::decode(self.name(), key, blob)?;
                self.schema.apply_defaults(&mut record);
                Ok(record)
            })
            .collect()
    }

    fn resolve(&self, key: &str, fetched: Fetched) -> Result<Record, Error> {
        let siblings = self.decode_versions(key, fetched.versions)?;
        let merged = siblings.len() > 1;
        let mut record = if merged {
            tracing::debug!(bucket = self.name(), key, siblings = siblings.len(), "merging siblings");
            self.schema.merge(siblings)?
        } else {
            siblings
                .into_iter()
                .next()
                .ok_or(MergeError::EmptySiblingSet)?
        };
        if record.key() != Some(key) {
            record.set_key(key);
        }
        self.schema.apply_defaults(&mut record);
        record.mark_loaded(fetched.token, merged);
        self.schema.hooks().after_load(&mut record);
        Ok(record)
    }
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use crate::hooks::Hooks;
    use crate::record::RecordState;
    use crate::resolver::Resolver;
    use crate::schema::FieldSpec;
    use concord_store::MemoryStore;
    use serde_json::json;
    use std::sync::Mutex;

    fn schema() -> Schema {
        Schema::builder("items")
            .allow_mult(true)
            .value("tags", FieldSpec::new().default_value(json!([])).resolve_with(Resolver::Union))
            .value("n", FieldSpec::new().kind(crate::ValueKind::Number))
            .build()
    }

    fn bucket_on(store: &MemoryStore, client: &str) -> Bucket {
        let handle = store.with_client_id(client).unwrap();
        let bucket = Bucket::new(Arc::new(handle), Arc::new(schema()));
        bucket.ensure_allow_mult().unwrap();
        bucket
    }

    #[test]
    fn absent_key_is_none() {
        let store = MemoryStore::new();
        let b = bucket_on(&store, "a");
        assert!(b.get("nope").unwrap().is_none());
        let fresh = b.get_or_new("nope").unwrap();
        assert!(fresh.is_new());
        assert_eq!(fresh.get("tags"), Some(&json!([])));
    }

    #[test]
    fn save_then_load_round_trip() {
        let store = MemoryStore::new();
        let b = bucket_on(&store, "a");
        let mut r = b.new_record("k");
        r.set("n", json!(3));
        assert!(b.save(&mut r).unwrap().is_stored());
        assert_eq!(r.state(), RecordState::Saved);

        let loaded = b.get("k").unwrap().unwrap();
        assert_eq!(loaded.get("n"), Some(&json!(3)));
        assert_eq!(loaded.state(), RecordState::Loaded);
        assert!(!loaded.is_merged());
    }

    #[test]
    fn keyless_and_mistyped_records_are_rejected() {
        let store = MemoryStore::new();
        let b = bucket_on(&store, "a");

        let mut r = Record::new();
        match b.save(&mut r).unwrap() {
            SaveOutcome::Rejected(errs) => assert_eq!(errs.get("key"), ["is missing".to_owned()]),
            other => panic!("expected rejection, got {other:?}"),
        }

        let mut r = b.new_record("k");
        r.set("n", json!("three"));
        assert!(!b.save(&mut r).unwrap().is_stored());
        assert!(!b.exists("k").unwrap());
        assert!(b.save_unchecked(&mut r).is_ok());
        assert!(b.exists("k").unwrap());
    }

    #[test]
    fn conflicting_saves_merge_on_load() {
        let store = MemoryStore::new();
        let a = bucket_on(&store, "a");
        let c = bucket_on(&store, "c");

        let mut base = a.new_record("k");
        a.save(&mut base).unwrap();

        let mut ra = a.get("k").unwrap().unwrap();
        let mut rc = c.get("k").unwrap().unwrap();
        ra.set("tags", json!(["a"]));
        rc.set("tags", json!(["c"]));
        a.save(&mut ra).unwrap();
        c.save(&mut rc).unwrap();
        assert_eq!(store.sibling_count("items", "k").unwrap(), 2);

        let mut merged = a.get("k").unwrap().unwrap();
        assert!(merged.is_merged());
        assert_eq!(merged.get("tags"), Some(&json!(["a", "c"])));

        // Saving with the combined token collapses the siblings.
        a.save(&mut merged).unwrap();
        assert_eq!(store.sibling_count("items", "k").unwrap(), 1);
        assert!(!a.get("k").unwrap().unwrap().is_merged());
    }

    #[test]
    fn raw_load_returns_each_sibling() {
        let store = MemoryStore::new();
        let a = bucket_on(&store, "a");
        let c = bucket_on(&store, "c");
        let mut ra = a.new_record("k");
        ra.set("n", json!(1));
        let mut rc = c.new_record("k");
        rc.set("n", json!(2));
        a.save(&mut ra).unwrap();
        c.save(&mut rc).unwrap();

        match a.get_with("k", LoadOptions::raw()).unwrap().unwrap() {
            Loaded::Siblings(sibs) => {
                let ns: Vec<_> = sibs.iter().map(|s| s.get("n").cloned()).collect();
                assert_eq!(ns, vec![Some(json!(1)), Some(json!(2))]);
                assert!(sibs.iter().all(|s| !s.is_merged() && s.token().is_some()));
                assert!(sibs.iter().all(|s| s.get("tags") == Some(&json!([]))));
            }
            other => panic!("expected siblings, got {other:?}"),
        }
    }

    #[test]
    fn repairing_load_writes_back() {
        let store = MemoryStore::new();
        let a = bucket_on(&store, "a");
        let c = bucket_on(&store, "c");
        a.save(&mut a.new_record("k")).unwrap();
        c.save(&mut c.new_record("k")).unwrap();
        assert_eq!(store.sibling_count("items", "k").unwrap(), 2);

        let loaded = a.get_with("k", LoadOptions::repairing()).unwrap().unwrap();
        assert!(matches!(loaded, Loaded::Resolved(ref r) if r.state() == RecordState::Saved));
        assert_eq!(store.sibling_count("items", "k").unwrap(), 1);
    }

    #[test]
    fn saving_twice_does_not_conflict_with_itself() {
        let store = MemoryStore::new();
        let a = bucket_on(&store, "a");
        let mut r = a.new_record("k");
        a.save(&mut r).unwrap();
        r.set("n", json!(2));
        a.save(&mut r).unwrap();
        assert_eq!(store.sibling_count("items", "k").unwrap(), 1);
    }

    #[test]
    fn undecodable_blob_is_an_error() {
        let store = MemoryStore::new();
        let a = bucket_on(&store, "a");
        store.put("items", "bad", b"not json".to_vec(), None).unwrap();
        assert!(matches!(a.get("bad"), Err(Error::Decode { .. })));
    }

    #[test]
    fn reload_delete_and_listing() {
        let store = MemoryStore::new();
        let a = bucket_on(&store, "a");
        for k in ["x", "y"] {
            a.save(&mut a.new_record(k)).unwrap();
        }
        assert_eq!(a.keys().unwrap(), vec!["x", "y"]);
        assert_eq!(a.count().unwrap(), 2);
        assert_eq!(a.all().unwrap().len(), 2);

        let mut x = a.get("x").unwrap().unwrap();
        let mut stale = x.clone();
        x.set("n", json!(9));
        a.save(&mut x).unwrap();
        a.reload(&mut stale).unwrap();
        assert_eq!(stale.get("n"), Some(&json!(9)));

        assert_eq!(a.delete(&mut x).unwrap(), Deleted::Removed);
        assert!(x.is_new());
        assert!(matches!(a.reload(&mut stale), Err(Error::NotFound { .. })));
        assert_eq!(a.delete_key("x").unwrap(), Deleted::AlreadyAbsent);
        assert!(matches!(a.reload(&mut Record::new()), Err(Error::MissingKey { .. })));
    }

    #[derive(Debug, Default)]
    struct Recorder(Mutex<Vec<&'static str>>);

    impl Recorder {
        fn push(&self, s: &'static str) {
            self.0.lock().unwrap().push(s);
        }
    }

    #[derive(Debug, Clone, Default)]
    struct Log(Arc<Recorder>);

    impl Hooks for Log {
        fn after_load(&self, _: &mut Record) {
            self.0.push("after_load");
        }
        fn before_create(&self, _: &mut Record) {
            self.0.push("before_create");
        }
        fn before_save(&self, _: &mut Record) {
            self.0.push("before_save");
        }
        fn after_create(&self, _: &Record) {
            self.0.push("after_create");
        }
        fn after_save(&self, _: &Record) {
            self.0.push("after_save");
        }
        fn before_delete(&self, _: &Record) {
            self.0.push("before_delete");
        }
        fn after_delete(&self, _: &Record) {
            self.0.push("after_delete");
        }
    }

    #[test]
    fn hooks_run_in_order() {
        let log = Log::default();
        let schema = Schema::builder("h").hooks(log.clone()).build();
        let b = Bucket::new(Arc::new(MemoryStore::new()), Arc::new(schema));

        let mut r = b.new_record("k");
        b.save(&mut r).unwrap();
        let mut r = b.get("k").unwrap().unwrap();
        b.save(&mut r).unwrap();
        b.delete(&mut r).unwrap();

        assert_eq!(
            *log.0 .0.lock().unwrap(),
            vec![
                "before_create",
                "before_save",
                "after_create",
                "after_save",
                "after_load",
                "before_save",
                "after_save",
                "before_delete",
                "after_delete",
            ]
        );
    }

    #[test]
    fn store_outage_propagates() {
        let store = MemoryStore::new();
        let a = bucket_on(&store, "a");
        store.set_available(false);
        assert!(matches!(a.get("k"), Err(Error::Store(_))));
        assert!(matches!(a.save(&mut a.new_record("k")), Err(Error::Store(_))));
    }
}
