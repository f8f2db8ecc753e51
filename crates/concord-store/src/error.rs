//! Error types for object store operations.
//!
//! [`StoreError`] is the single error type returned by every
//! [`ObjectStore`](crate::ObjectStore) method. A missing key is *not* an
//! error: reads report it as `Ok(None)` and deletes as
//! [`Deleted::AlreadyAbsent`](crate::Deleted::AlreadyAbsent).

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by [`ObjectStore`](crate::ObjectStore) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached (node down, injected outage, ...).
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Human-readable description of the outage.
        message: String,
    },

    /// The store was reachable but refused the write.
    #[error("write to `{bucket}/{key}` rejected: {message}")]
    Rejected {
        /// Bucket of the refused write.
        bucket: String,
        /// Key of the refused write.
        key: String,
        /// Why the write was refused.
        message: String,
    },

    /// A bucket name, key, or client id cannot be used by this backend.
    #[error("invalid {what} `{value}`: {reason}")]
    InvalidName {
        /// Which kind of name was rejected (`"bucket"`, `"key"`, `"client id"`).
        what: &'static str,
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Persisted store metadata could not be decoded.
    #[error("corrupt store data at {}: {message}", path.display())]
    Corrupt {
        /// File holding the unreadable data.
        path: PathBuf,
        /// Decoder message.
        message: String,
    },

    /// An I/O error occurred in a file-backed store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Convenience constructor for [`StoreError::Unavailable`].
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Validate a bucket name, key, or client id.
///
/// Names are used verbatim as directory names by [`DirStore`](crate::DirStore),
/// so every backend applies the same rules: non-empty, at most 255 bytes, no
/// path separators, no NUL, and not `.`/`..` or dot-prefixed.
pub(crate) fn check_name(what: &'static str, value: &str) -> Result<(), StoreError> {
    let reason = if value.is_empty() {
        Some("must not be empty")
    } else if value.len() > 255 {
        Some("must be at most 255 bytes")
    } else if value.contains(['/', '\\', '\0']) {
        Some("must not contain path separators or NUL")
    } else if value.starts_with('.') {
        Some("must not start with '.'")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StoreError::InvalidName {
            what,
            value: value.to_owned(),
            reason: reason.to_owned(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        assert!(check_name("key", "users").is_ok());
        assert!(check_name("key", "node-1:42").is_ok());
    }

    #[test]
    fn rejects_bad_names() {
        for bad in ["", ".", "..", ".hidden", "a/b", "a\\b"] {
            let err = check_name("key", bad).unwrap_err();
            assert!(matches!(err, StoreError::InvalidName { what: "key", .. }), "{bad:?}");
        }
    }

    #[test]
    fn display_mentions_location() {
        let err = StoreError::Rejected {
            bucket: "users".into(),
            key: "bob".into(),
            message: "quota".into(),
        };
        assert_eq!(err.to_string(), "write to `users/bob` rejected: quota");
    }
}
