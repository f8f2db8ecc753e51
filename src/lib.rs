//! concord: records with pluggable conflict resolution and cooperative group
//! membership on top of an eventually consistent object store.
//!
//! The store (see [`concord_store`]) keeps concurrent writes as siblings.
//! This crate turns siblings back into one record:
//!
//! - [`Resolver`]: per-field reduction (union, intersection, min, max,
//!   object merge, or a custom function).
//! - [`Schema`]: field table, defaults, validation, and the merge engine.
//! - [`Bucket`]: load / save / delete with causality tokens, read-repair,
//!   and lifecycle [`Hooks`].
//! - [`cron_list`]: newest-first lists of item keys, capped and trimmed on
//!   merge.
//! - [`membership`]: the join/part protocol and its work queue, built on
//!   the pieces above.

pub mod bucket;
pub mod clock;
pub mod config;
pub mod cron_list;
pub mod error;
pub mod hooks;
pub mod membership;
pub mod merge;
pub mod record;
pub mod resolver;
pub mod schema;
pub mod value;

#[cfg(feature = "assurance")]
pub mod assurance;

pub use bucket::{Bucket, LoadOptions, Loaded, SaveOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConcordConfig, ConfigError};
pub use cron_list::{CronList, CronLists};
pub use error::Error;
pub use hooks::{Hooks, NoHooks};
pub use membership::{JoinOutcome, Membership, MembershipDriver, MembershipState, ParticipantId, Timing};
pub use merge::MergeError;
pub use record::{Record, RecordState, ValidationErrors};
pub use resolver::{CustomResolver, ResolveError, Resolver};
pub use schema::{FieldSpec, Schema, SchemaBuilder};
pub use value::ValueKind;
