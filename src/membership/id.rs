//! Participant identity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Identity of one process taking part in a membership group.
///
/// Ids are 1-200 bytes of UTF-8 with no whitespace, no path separators and no
/// leading `.`, so an id can double as an object-store client id. The byte cap leaves
/// room for the sibling file name `<id>.<counter>.blob` a directory store
/// derives from it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParticipantId(String);

impl ParticipantId {
    /// The maximum length of an id, in bytes.
    pub const MAX_LEN: usize = 200;

    /// Validate and wrap `s`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidId`] if `s` is not a usable id.
    pub fn new(s: &str) -> Result<Self, Error> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// A fresh id of the form `<host>-<pid>-<8 hex digits>`.
    #[must_use]
    pub fn generate() -> Self {
        let host = std::env::var("HOSTNAME").unwrap_or_default();
        let mut host: String = host
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '-'
                }
            })
            .take(64)
            .collect();
        host = host.trim_start_matches('.').to_owned();
        if host.is_empty() {
            host = "localhost".to_owned();
        }
        let suffix: u32 = rand::random();
        Self(format!("{host}-{}-{suffix:08x}", std::process::id()))
    }

    /// The id as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), Error> {
        let reason = if s.is_empty() {
            Some("must not be empty".to_owned())
        } else if s.len() > Self::MAX_LEN {
            Some(format!("must be at most {} bytes", Self::MAX_LEN))
        } else if s.chars().any(char::is_whitespace) {
            Some("must not contain whitespace".to_owned())
        } else if s.contains(['/', '\\', '\0']) {
            Some("must not contain path separators or NUL".to_owned())
        } else if s.starts_with('.') {
            Some("must not start with '.'".to_owned())
        } else {
            None
        };
        match reason {
            Some(reason) => Err(Error::InvalidId {
                value: s.to_owned(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ParticipantId {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ParticipantId {
    type Error = Error;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<ParticipantId> for String {
    fn from(id: ParticipantId) -> Self {
        id.0
    }
}

impl AsRef<str> for ParticipantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use concord_store::ObjectStore;
    use super::*;

    #[test]
    fn accepts_typical_ids() {
        for ok in ["node-a", "web-3.internal-4411", "A_1", "x"] {
            assert!(ParticipantId::new(ok).is_ok(), "{ok}");
        }
    }

    #[test]
    fn length_is_counted_in_bytes() {
        let wide = "é".repeat(100);
        assert_eq!(wide.len(), 200);
        let id = ParticipantId::new(&wide).unwrap();
        assert!(concord_store::MemoryStore::new().with_client_id(id.as_str()).is_ok());

        let dir = tempfile::tempdir().unwrap();
        let store = concord_store::DirStore::open(dir.path(), id.as_str()).unwrap();
        store.set_bucket_props("b", concord_store::BucketProps { allow_mult: true }).unwrap();
        concord_store::ObjectStore::put(&store, "b", "k", b"{}".to_vec(), None).unwrap();

        let too_wide = "é".repeat(101);
        let err = ParticipantId::new(&too_wide).unwrap_err();
        assert!(err.to_string().contains("200 bytes"), "{err}");
    }

    #[test]
    fn rejects_bad_ids() {
        let long = "a".repeat(201);
        for bad in ["", "a b", "a/b", ".x", "tab\there", long.as_str()] {
            assert!(
                matches!(ParticipantId::new(bad), Err(Error::InvalidId { .. })),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn generated_ids_are_valid_and_distinct() {
        let a = ParticipantId::generate();
        let b = ParticipantId::generate();
        assert!(ParticipantId::new(a.as_str()).is_ok());
        assert_ne!(a, b);
        assert!(a.as_str().contains(&std::process::id().to_string()));
    }

    #[test]
    fn serde_validates() {
        let id: ParticipantId = serde_json::from_str("\"node-a\"").unwrap();
        assert_eq!(id.as_str(), "node-a");
        assert!(serde_json::from_str::<ParticipantId>("\"a b\"").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"node-a\"");
    }
}
