//! File-backed [`ObjectStore`] for several OS processes on one machine.
//!
//! # Layout
//!
//! ```text
//! <root>/<bucket>/.lock                 ← exclusive fs4 lock, held per operation
//! <root>/<bucket>/.props.json           ← BucketProps
//! <root>/<bucket>/<key>/object.json     ← clock + sibling dots
//! <root>/<bucket>/<key>/<actor>.<n>.blob ← raw sibling payload
//! ```
//!
//! Every operation takes the bucket lock, so read-modify-write of a key is
//! atomic across processes. Metadata is replaced via write-to-temp + rename.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt as _;

use crate::error::{StoreError, check_name};
use crate::object::{StoredObject, successor};
use crate::store::ObjectStore;
use crate::types::{BucketProps, CausalityToken, Deleted, Dot, Fetched};

const OBJECT_FILE: &str = "object.json";
const PROPS_FILE: &str = ".props.json";
const LOCK_FILE: &str = ".lock";

/// Directory-backed store.
#[derive(Clone, Debug)]
pub struct DirStore {
    root: PathBuf,
    client_id: String,
}

/// Held for the duration of one operation; the OS lock is released when the
/// file handle is closed.
struct BucketLock {
    _file: File,
}

impl DirStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or `client_id` is
    /// not a valid name.
    pub fn open(root: impl Into<PathBuf>, client_id: &str) -> Result<Self, StoreError> {
        check_name("client id", client_id)?;
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            client_id: client_id.to_owned(),
        })
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, StoreError> {
        check_name("bucket", bucket)?;
        Ok(self.root.join(bucket))
    }

    fn lock_bucket(&self, bucket: &str) -> Result<(PathBuf, BucketLock), StoreError> {
        let dir = self.bucket_dir(bucket)?;
        fs::create_dir_all(&dir)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(LOCK_FILE))?;
        file.lock_exclusive()?;
        Ok((dir, BucketLock { _file: file }))
    }

    fn read_props(dir: &Path) -> Result<BucketProps, StoreError> {
        let path = dir.join(PROPS_FILE);
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
                path,
                message: e.to_string(),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BucketProps::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn read_object(key_dir: &Path) -> Result<Option<StoredObject>, StoreError> {
        let path = key_dir.join(OBJECT_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut object: StoredObject =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
                path: path.clone(),
                message: e.to_string(),
            })?;
        for sibling in &mut object.siblings {
            sibling.value = fs::read(key_dir.join(blob_name(&sibling.dot)))?;
        }
        Ok(Some(object))
    }

    fn write_object(key_dir: &Path, object: &StoredObject) -> Result<(), StoreError> {
        fs::create_dir_all(key_dir)?;
        for sibling in &object.siblings {
            let path = key_dir.join(blob_name(&sibling.dot));
            if !path.exists() {
                write_atomic(&path, &sibling.value)?;
            }
        }
        let json = serde_json::to_vec_pretty(object).map_err(|e| StoreError::Corrupt {
            path: key_dir.join(OBJECT_FILE),
            message: e.to_string(),
        })?;
        write_atomic(&key_dir.join(OBJECT_FILE), &json)?;

        // Drop blobs of superseded siblings.
        let live: Vec<String> = object.siblings.iter().map(|s| blob_name(&s.dot)).collect();
        for entry in fs::read_dir(key_dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if name.ends_with(".blob") && !live.contains(&name) {
                fs::remove_file(key_dir.join(&name))?;
            }
        }
        Ok(())
    }
}

impl ObjectStore for DirStore {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Option<Fetched>, StoreError> {
        check_name("key", key)?;
        let (dir, _lock) = self.lock_bucket(bucket)?;
        Ok(Self::read_object(&dir.join(key))?.and_then(|o| o.fetch()))
    }

    fn put(
        &self,
        bucket: &str,
        key: &str,
        value: Vec<u8>,
        token: Option<&CausalityToken>,
    ) -> Result<CausalityToken, StoreError> {
        check_name("key", key)?;
        let (dir, _lock) = self.lock_bucket(bucket)?;
        let props = Self::read_props(&dir)?;
        let key_dir = dir.join(key);
        let mut object = Self::read_object(&key_dir)?.unwrap_or_default();
        let dot = object.write(&self.client_id, value, token, props.allow_mult);
        Self::write_object(&key_dir, &object)?;
        tracing::trace!(bucket, key, %dot, siblings = object.siblings.len(), "dir put");
        Ok(successor(token, &dot))
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<Deleted, StoreError> {
        check_name("key", key)?;
        let (dir, _lock) = self.lock_bucket(bucket)?;
        match fs::remove_dir_all(dir.join(key)) {
            Ok(()) => Ok(Deleted::Removed),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Deleted::AlreadyAbsent),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self, bucket: &str) -> Result<Vec<String>, StoreError> {
        let (dir, _lock) = self.lock_bucket(bucket)?;
        let mut keys = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') && entry.path().join(OBJECT_FILE).exists() {
                keys.push(name);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn bucket_props(&self, bucket: &str) -> Result<BucketProps, StoreError> {
        let (dir, _lock) = self.lock_bucket(bucket)?;
        Self::read_props(&dir)
    }

    fn set_bucket_props(&self, bucket: &str, props: BucketProps) -> Result<(), StoreError> {
        let (dir, _lock) = self.lock_bucket(bucket)?;
        let path = dir.join(PROPS_FILE);
        let json = serde_json::to_vec_pretty(&props).map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            message: e.to_string(),
        })?;
        write_atomic(&path, &json)
    }
}

fn blob_name(dot: &Dot) -> String {
    format!("{}.{}.blob", dot.actor, dot.counter)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)?;
    Ok(())
}
