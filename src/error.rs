//! Error types for concord record and membership operations.
//!
//! Defines [`Error`], the unified error type returned by the record
//! lifecycle ([`Bucket`](crate::Bucket)) and the membership protocol.
//! Messages are written for an operator (or agent) reading a log: each
//! variant says what went wrong and what to do about it.
//!
//! Expected outcomes are *not* errors. A failed validation is a
//! [`SaveOutcome::Rejected`](crate::SaveOutcome::Rejected), an absent key is
//! `Ok(None)`, and a join that was not acknowledged in time is a
//! [`JoinOutcome`](crate::membership::JoinOutcome).

use std::fmt;

use concord_store::StoreError;

use crate::merge::MergeError;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Unified error type for concord operations.
#[derive(Debug)]
pub enum Error {
    /// The object store failed or refused the operation.
    Store(StoreError),

    /// Sibling versions could not be reconciled (merge policy fault).
    Merge(MergeError),

    /// A stored blob is not a valid record.
    Decode {
        /// Bucket of the record.
        bucket: String,
        /// Key of the record.
        key: String,
        /// Decoder message.
        message: String,
    },

    /// A field value could not be converted to or from JSON.
    Encode {
        /// Field (or record) being converted.
        field: String,
        /// Serializer message.
        message: String,
    },

    /// A record that was expected to exist is gone.
    NotFound {
        /// Bucket searched.
        bucket: String,
        /// Key that was not found.
        key: String,
    },

    /// A store operation needed a key but the record has none.
    MissingKey {
        /// Bucket of the keyless record.
        bucket: String,
    },

    /// A thread panicked while holding the membership lock.
    LockPoisoned,

    /// A participant id failed validation.
    InvalidId {
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(err) => {
                write!(
                    f,
                    "object store error: {err}\n  To fix: check that the store is reachable and retry; nothing was merged or written."
                )
            }
            Self::Merge(err) => write!(f, "{err}"),
            Self::Decode {
                bucket,
                key,
                message,
            } => {
                write!(
                    f,
                    "record '{bucket}/{key}' could not be decoded: {message}\n  To fix: the stored blob must be a JSON object; delete or rewrite the key."
                )
            }
            Self::Encode { field, message } => {
                write!(
                    f,
                    "field '{field}' could not be converted: {message}\n  To fix: store a JSON-representable value in this field."
                )
            }
            Self::NotFound { bucket, key } => {
                write!(
                    f,
                    "record '{bucket}/{key}' not found.\n  To fix: it was deleted by another participant; create it again or load a different key."
                )
            }
            Self::MissingKey { bucket } => {
                write!(
                    f,
                    "record in bucket '{bucket}' has no key.\n  To fix: set a key on the record before reloading or deleting it."
                )
            }
            Self::LockPoisoned => {
                write!(
                    f,
                    "membership lock poisoned by a panicked thread.\n  To fix: restart the process; in-memory membership state may be inconsistent."
                )
            }
            Self::InvalidId { value, reason } => {
                write!(
                    f,
                    "invalid participant id '{value}': {reason}\n  Participant ids are 1-200 bytes with no whitespace or path separators.\n  Examples: node-a, web-3.internal-4411"
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// std::error::Error
// ---------------------------------------------------------------------------

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Merge(err) => Some(err),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// From impls
// ---------------------------------------------------------------------------

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<MergeError> for Error {
    fn from(err: MergeError) -> Self {
        Self::Merge(err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
