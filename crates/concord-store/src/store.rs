//! The [`ObjectStore`] trait: the boundary between concord and whatever
//! replicated key/value store holds the records.
//!
//! The contract mirrors a Riak-style bucket with `allow_mult`:
//!
//! | Operation          | Contract                                                     |
//! |--------------------|--------------------------------------------------------------|
//! | `get`              | all live versions plus one token summarising them            |
//! | `put`              | supersedes the versions the token covers, keeps the rest     |
//! | `delete`           | removes every version; reports whether anything was there    |
//! | `keys`             | sorted key listing for a bucket                              |
//! | `bucket_props`     | `allow_mult` must be on for siblings to ever be retained      |
//!
//! A store never silently picks a winner among concurrent writes when
//! `allow_mult` is set.

use crate::error::StoreError;
use crate::types::{BucketProps, CausalityToken, Deleted, Fetched};

/// A sibling-preserving, multi-version key/value store.
///
/// # Object safety
///
/// The trait is object-safe; the record layer holds an
/// `Arc<dyn ObjectStore>` so backends can be swapped at runtime.
pub trait ObjectStore: Send + Sync {
    /// Actor name this handle stamps on its writes.
    fn client_id(&self) -> &str;

    /// Read every live version of `key`.
    ///
    /// Returns `Ok(None)` when the key does not exist.
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Fetched>, StoreError>;

    /// Write `value` under `key`.
    ///
    /// `token` should be the token from the most recent [`get`](Self::get) of
    /// this key, or `None` for a brand-new record. Omitting it (or passing a
    /// stale one) on an existing key leaves the unseen versions as siblings.
    ///
    /// Returns the token to replay on the next write: the input token plus
    /// the new write, and nothing the caller has not observed.
    fn put(
        &self,
        bucket: &str,
        key: &str,
        value: Vec<u8>,
        token: Option<&CausalityToken>,
    ) -> Result<CausalityToken, StoreError>;

    /// Remove `key` and all its versions.
    fn delete(&self, bucket: &str, key: &str) -> Result<Deleted, StoreError>;

    /// List the keys of a bucket in sorted order.
    fn keys(&self, bucket: &str) -> Result<Vec<String>, StoreError>;

    /// Read bucket settings. Unknown buckets report the defaults.
    fn bucket_props(&self, bucket: &str) -> Result<BucketProps, StoreError>;

    /// Replace bucket settings.
    fn set_bucket_props(&self, bucket: &str, props: BucketProps) -> Result<(), StoreError>;

    /// Returns `true` if `key` has at least one live version.
    fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(bucket, key)?.is_some())
    }
}
