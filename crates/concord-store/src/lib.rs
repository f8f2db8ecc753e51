//! Sibling-preserving key/value storage for concord.
//!
//! This crate defines the [`ObjectStore`] trait that the record layer talks
//! to, the causality types it exchanges ([`CausalityToken`], [`Versions`]),
//! and two backends:
//!
//! - [`MemoryStore`]: shared in-process state, used by tests and simulations.
//! - [`DirStore`]: one directory per bucket, safe across processes on one
//!   host via an exclusive file lock.
//!
//! Both backends use the same dotted-version-vector bookkeeping
//! ([`StoredObject`]), so conflicts surface identically.

pub mod error;
pub mod object;
pub mod store;
pub mod types;

mod dir;
mod memory;

pub use dir::DirStore;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use object::{StoredObject, StoredSibling, successor};
pub use store::ObjectStore;
pub use types::{BucketProps, CausalityToken, Deleted, Dot, Fetched, VersionVector, Versions};
