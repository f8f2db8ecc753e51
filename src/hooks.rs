//! Lifecycle callbacks around load, save and delete.

use std::fmt;

use crate::record::{Record, ValidationErrors};

/// Per-record-type lifecycle callbacks.
///
/// Every method has a no-op default. `before_create` runs only for records
/// that have never been loaded or saved; `before_save` runs for every save.
/// Hooks run on the caller's thread, between the store round-trips.
pub trait Hooks: Send + Sync + fmt::Debug {
    /// After a record is decoded (and merged, if siblings were found).
    fn after_load(&self, _record: &mut Record) {}

    /// Before the first save of a new record.
    fn before_create(&self, _record: &mut Record) {}

    /// Before every save, after `before_create`.
    fn before_save(&self, _record: &mut Record) {}

    /// Add field errors to veto a save.
    fn validate(&self, _record: &Record, _errors: &mut ValidationErrors) {}

    /// After the first successful save of a new record.
    fn after_create(&self, _record: &Record) {}

    /// After every successful save.
    fn after_save(&self, _record: &Record) {}

    /// Before a record is deleted.
    fn before_delete(&self, _record: &Record) {}

    /// After a record is deleted.
    fn after_delete(&self, _record: &Record) {}
}

/// Hooks that do nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl Hooks for NoHooks {}
