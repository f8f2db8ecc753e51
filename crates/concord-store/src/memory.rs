//! In-process [`ObjectStore`] backend.
//!
//! All clones of a [`MemoryStore`] share the same data; each clone may carry
//! its own client id, which is how tests stand up several "nodes" writing to
//! one store. Outages can be injected with [`MemoryStore::set_available`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{StoreError, check_name};
use crate::object::{StoredObject, successor};
use crate::store::ObjectStore;
use crate::types::{BucketProps, CausalityToken, Deleted, Fetched};

#[derive(Debug, Default)]
struct Bucket {
    props: BucketProps,
    objects: BTreeMap<String, StoredObject>,
}

#[derive(Debug, Default)]
struct Shared {
    buckets: Mutex<BTreeMap<String, Bucket>>,
    unavailable: AtomicBool,
}

/// Shared in-memory store.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    client_id: String,
}

impl MemoryStore {
    /// Create an empty store whose handle writes as `"client-0"`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            client_id: "client-0".to_owned(),
        }
    }

    /// Another handle onto the same data, writing as `client_id`.
    ///
    /// # Errors
    /// Returns [`StoreError::InvalidName`] for an unusable client id.
    pub fn with_client_id(&self, client_id: &str) -> Result<Self, StoreError> {
        check_name("client id", client_id)?;
        Ok(Self {
            shared: Arc::clone(&self.shared),
            client_id: client_id.to_owned(),
        })
    }

    /// Simulate an outage (`false`) or recovery (`true`) for every handle.
    pub fn set_available(&self, available: bool) {
        self.shared
            .unavailable
            .store(!available, Ordering::SeqCst);
    }

    /// Number of live versions currently held under `key`.
    ///
    /// # Errors
    /// Fails only when the store is marked unavailable.
    pub fn sibling_count(&self, bucket: &str, key: &str) -> Result<usize, StoreError> {
        let buckets = self.lock()?;
        Ok(buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .map_or(0, |o| o.siblings.len()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Bucket>>, StoreError> {
        if self.shared.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("memory store marked unavailable"));
        }
        self.shared
            .buckets
            .lock()
            .map_err(|_| StoreError::unavailable("memory store lock poisoned"))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for MemoryStore {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Option<Fetched>, StoreError> {
        check_name("key", key)?;
        let buckets = self.lock()?;
        Ok(buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .and_then(StoredObject::fetch))
    }

    fn put(
        &self,
        bucket: &str,
        key: &str,
        value: Vec<u8>,
        token: Option<&CausalityToken>,
    ) -> Result<CausalityToken, StoreError> {
        check_name("bucket", bucket)?;
        check_name("key", key)?;
        let mut buckets = self.lock()?;
        let entry = buckets.entry(bucket.to_owned()).or_default();
        let allow_mult = entry.props.allow_mult;
        let object = entry.objects.entry(key.to_owned()).or_default();
        let dot = object.write(&self.client_id, value, token, allow_mult);
        tracing::trace!(bucket, key, %dot, siblings = object.siblings.len(), "memory put");
        Ok(successor(token, &dot))
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<Deleted, StoreError> {
        check_name("key", key)?;
        let mut buckets = self.lock()?;
        let removed = buckets
            .get_mut(bucket)
            .and_then(|b| b.objects.remove(key))
            .is_some();
        Ok(if removed {
            Deleted::Removed
        } else {
            Deleted::AlreadyAbsent
        })
    }

    fn keys(&self, bucket: &str) -> Result<Vec<String>, StoreError> {
        let buckets = self.lock()?;
        Ok(buckets
            .get(bucket)
            .map(|b| b.objects.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn bucket_props(&self, bucket: &str) -> Result<BucketProps, StoreError> {
        let buckets = self.lock()?;
        Ok(buckets.get(bucket).map(|b| b.props).unwrap_or_default())
    }

    fn set_bucket_props(&self, bucket: &str, props: BucketProps) -> Result<(), StoreError> {
        check_name("bucket", bucket)?;
        let mut buckets = self.lock()?;
        buckets.entry(bucket.to_owned()).or_default().props = props;
        Ok(())
    }
}
