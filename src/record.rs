//! In-memory record handles.
//!
//! A [`Record`] is a key plus a table of JSON field values, together with the
//! causality token from the last load and a small lifecycle state:
//!
//! ```text
//! Fresh ──load──▶ Loaded ──set──▶ Dirty ──save──▶ Saved
//!                   │ (merged = true when siblings were reconciled)
//! ```
//!
//! A record is owned by the caller that loaded or created it; it is never
//! shared between threads by the library.

use std::collections::BTreeMap;
use std::fmt;

use concord_store::CausalityToken;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::Error;

/// Where a record handle is in its load → mutate → save cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RecordState {
    /// Built in memory, never loaded or saved.
    #[default]
    Fresh,
    /// Freshly read from the store and not modified since.
    Loaded,
    /// Modified since the last load or save.
    Dirty,
    /// Written to the store and not modified since.
    Saved,
}

/// A keyed set of field values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    key: Option<String>,
    values: BTreeMap<String, Value>,
    token: Option<CausalityToken>,
    state: RecordState,
    merged: bool,
}

impl Record {
    /// A fresh record with no key.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh record with `key`.
    #[must_use]
    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::default()
        }
    }

    /// Key under which the record is stored.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Set or replace the key.
    pub fn set_key(&mut self, key: impl Into<String>) {
        self.key = Some(key.into());
        self.touch();
    }

    /// Value of `field`, or `None` if absent.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Set `field`. Setting `null` removes the field.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        if value.is_null() {
            self.values.remove(&field);
        } else {
            self.values.insert(field, value);
        }
        self.touch();
    }

    /// Remove `field`, returning its old value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        let old = self.values.remove(field);
        if old.is_some() {
            self.touch();
        }
        old
    }

    /// Deserialize `field` into `T`. Absent fields are `Ok(None)`.
    ///
    /// # Errors
    /// Returns [`Error::Encode`] if the stored value does not fit `T`.
    pub fn get_as<T: DeserializeOwned>(&self, field: &str) -> Result<Option<T>, Error> {
        self.values
            .get(field)
            .map(|v| {
                serde_json::from_value(v.clone()).map_err(|e| Error::Encode {
                    field: field.to_owned(),
                    message: e.to_string(),
                })
            })
            .transpose()
    }

    /// Serialize `value` into `field`.
    ///
    /// # Errors
    /// Returns [`Error::Encode`] if `value` cannot be represented as JSON.
    pub fn set_as<T: Serialize>(&mut self, field: impl Into<String>, value: &T) -> Result<(), Error> {
        let field = field.into();
        let json = serde_json::to_value(value).map_err(|e| Error::Encode {
            field: field.clone(),
            message: e.to_string(),
        })?;
        self.set(field, json);
        Ok(())
    }

    /// All present field values, sorted by name.
    #[must_use]
    pub const fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Token from the most recent load or save.
    #[must_use]
    pub const fn token(&self) -> Option<&CausalityToken> {
        self.token.as_ref()
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> RecordState {
        self.state
    }

    /// `true` if the last load reconciled sibling versions.
    #[must_use]
    pub const fn is_merged(&self) -> bool {
        self.merged
    }

    /// `true` until the record has been loaded from or written to the store.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.token.is_none()
    }

    /// `true` if there are unsaved modifications (or it was never saved).
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        matches!(self.state, RecordState::Fresh | RecordState::Dirty)
    }

    fn touch(&mut self) {
        if matches!(self.state, RecordState::Loaded | RecordState::Saved) {
            self.state = RecordState::Dirty;
        }
    }

    // -- lifecycle plumbing used by Bucket and the merge engine --

    pub(crate) fn mark_loaded(&mut self, token: CausalityToken, merged: bool) {
        self.token = Some(token);
        self.state = RecordState::Loaded;
        self.merged = merged;
    }

    pub(crate) fn mark_saved(&mut self, token: CausalityToken) {
        self.token = Some(token);
        self.state = RecordState::Saved;
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.token = None;
        self.state = RecordState::Fresh;
        self.merged = false;
    }

    /// Replace everything but the key with `other`'s contents.
    pub(crate) fn adopt(&mut self, other: Self) {
        self.values = other.values;
        self.token = other.token;
        self.state = other.state;
        self.merged = other.merged;
    }

    pub(crate) fn values_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.values
    }

    /// JSON object encoding of the field values.
    pub(crate) fn encode(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(&self.values).map_err(|e| Error::Encode {
            field: self.key.clone().unwrap_or_default(),
            message: e.to_string(),
        })
    }

    /// Decode a stored blob. Only JSON objects are records; `null` fields are
    /// dropped on the way in.
    pub(crate) fn decode(bucket: &str, key: &str, blob: &[u8]) -> Result<Self, Error> {
        let decode_err = |message: String| Error::Decode {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            message,
        };
        let map: Map<String, Value> =
            serde_json::from_slice(blob).map_err(|e| decode_err(e.to_string()))?;
        Ok(Self {
            key: Some(key.to_owned()),
            values: map.into_iter().filter(|(_, v)| !v.is_null()).collect(),
            ..Self::default()
        })
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = self.key.as_deref().unwrap_or("<no key>");
        let body = serde_json::to_string(&self.values).map_err(|_| fmt::Error)?;
        write!(f, "{key} {body}")
    }
}

// ---------------------------------------------------------------------------
// ValidationErrors
// ---------------------------------------------------------------------------

/// Field-level validation messages collected before a save.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    /// An empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `field` is invalid.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    /// Messages for `field`.
    #[must_use]
    pub fn get(&self, field: &str) -> &[String] {
        self.errors.get(field).map_or(&[][..], Vec::as_slice)
    }

    /// Returns `true` if no field is invalid.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Iterate `(field, message)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.errors
            .iter()
            .flat_map(|(f, ms)| ms.iter().map(move |m| (f.as_str(), m.as_str())))
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (field, message)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{field} {message}")?;
        }
        Ok(())
    }
}
