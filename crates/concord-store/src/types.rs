//! Value types shared by the [`ObjectStore`](crate::ObjectStore) trait and
//! its backends.
//!
//! The causality machinery is a dotted version vector: every stored sibling
//! is identified by a [`Dot`], and a [`CausalityToken`] handed out by a read
//! is the [`VersionVector`] summarising every dot the reader observed.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// VersionVector
// ---------------------------------------------------------------------------

/// Map from actor (client id) to the highest write counter seen for it.
///
/// Absent actors count as zero.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionVector(BTreeMap<String, u64>);

impl VersionVector {
    /// An empty vector (descends from nothing but itself).
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Counter recorded for `actor`, zero when unseen.
    #[must_use]
    pub fn get(&self, actor: &str) -> u64 {
        self.0.get(actor).copied().unwrap_or(0)
    }

    /// Record that `dot` has been observed.
    pub fn witness(&mut self, dot: &Dot) {
        let slot = self.0.entry(dot.actor.clone()).or_insert(0);
        *slot = (*slot).max(dot.counter);
    }

    /// Pointwise maximum with `other`.
    pub fn join(&mut self, other: &Self) {
        for (actor, &counter) in &other.0 {
            let slot = self.0.entry(actor.clone()).or_insert(0);
            *slot = (*slot).max(counter);
        }
    }

    /// `true` if the write identified by `dot` is already summarised here.
    #[must_use]
    pub fn covers(&self, dot: &Dot) -> bool {
        self.get(&dot.actor) >= dot.counter
    }

    /// `true` if every event in `other` is also in `self`.
    #[must_use]
    pub fn descends(&self, other: &Self) -> bool {
        other
            .0
            .iter()
            .all(|(actor, &counter)| self.get(actor) >= counter)
    }

    /// `true` when neither vector descends from the other.
    #[must_use]
    pub fn concurrent(&self, other: &Self) -> bool {
        !self.descends(other) && !other.descends(self)
    }

    /// Returns `true` if no actor has been seen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for VersionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (actor, counter)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{actor}:{counter}")?;
        }
        f.write_str("}")
    }
}

// ---------------------------------------------------------------------------
// Dot
// ---------------------------------------------------------------------------

/// Identity of a single write: the writing actor and its per-key counter.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dot {
    /// Client id of the writer.
    pub actor: String,
    /// Counter for this actor at this key, starting at 1.
    pub counter: u64,
}

impl fmt::Display for Dot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.actor, self.counter)
    }
}

// ---------------------------------------------------------------------------
// CausalityToken
// ---------------------------------------------------------------------------

/// Opaque marker returned by a read and replayed on the following write.
///
/// Passing the token tells the store which sibling versions the write
/// supersedes. Callers must not inspect it; it is only cloned, stored and
/// handed back.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CausalityToken(VersionVector);

impl CausalityToken {
    /// Wrap a version vector. Backends use this; callers receive tokens from
    /// [`ObjectStore::get`](crate::ObjectStore::get).
    #[must_use]
    pub const fn from_vector(vector: VersionVector) -> Self {
        Self(vector)
    }

    /// The version vector this token summarises.
    #[must_use]
    pub const fn vector(&self) -> &VersionVector {
        &self.0
    }
}

impl fmt::Display for CausalityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// ---------------------------------------------------------------------------
// Versions / Fetched
// ---------------------------------------------------------------------------

/// What a read found under a key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Versions {
    /// Exactly one live version.
    Single(Vec<u8>),
    /// Two or more divergent versions, written without observing each other.
    /// Order is by dot and carries no meaning.
    Siblings(Vec<Vec<u8>>),
}

impl Versions {
    /// Returns `true` if the store reported divergence.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Siblings(_))
    }

    /// Number of live versions.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Siblings(values) => values.len(),
        }
    }

    /// Always `false`; a key with no live version is reported as absent.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Build from raw sibling payloads. Returns `None` for an empty list.
    #[must_use]
    pub fn from_values(mut values: Vec<Vec<u8>>) -> Option<Self> {
        match values.len() {
            0 => None,
            1 => values.pop().map(Self::Single),
            _ => Some(Self::Siblings(values)),
        }
    }
}

/// Result of a successful read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fetched {
    /// The live version(s).
    pub versions: Versions,
    /// Token summarising every version in `versions`.
    pub token: CausalityToken,
}

// ---------------------------------------------------------------------------
// Bucket properties / delete outcome
// ---------------------------------------------------------------------------

/// Per-bucket settings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketProps {
    /// Retain concurrent writes as siblings instead of letting the last
    /// writer win.
    #[serde(default)]
    pub allow_mult: bool,
}

/// Outcome of [`ObjectStore::delete`](crate::ObjectStore::delete).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Deleted {
    /// The key existed and was removed.
    Removed,
    /// There was nothing to remove.
    AlreadyAbsent,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(actor: &str, counter: u64) -> Dot {
        Dot {
            actor: actor.into(),
            counter,
        }
    }

    #[test]
    fn witness_keeps_maximum() {
        let mut vv = VersionVector::new();
        vv.witness(&dot("a", 3));
        vv.witness(&dot("a", 1));
        assert_eq!(vv.get("a"), 3);
        assert_eq!(vv.get("b"), 0);
    }

    #[test]
    fn descends_and_concurrent() {
        let mut a = VersionVector::new();
        a.witness(&dot("a", 2));
        let mut b = VersionVector::new();
        b.witness(&dot("b", 1));
        assert!(a.concurrent(&b));

        let mut ab = a.clone();
        ab.join(&b);
        assert!(ab.descends(&a));
        assert!(ab.descends(&b));
        assert!(!a.descends(&ab));
        assert!(ab.covers(&dot("a", 2)));
        assert!(!ab.covers(&dot("a", 3)));
    }

    #[test]
    fn versions_from_values() {
        assert_eq!(Versions::from_values(vec![]), None);
        assert_eq!(
            Versions::from_values(vec![b"x".to_vec()]),
            Some(Versions::Single(b"x".to_vec()))
        );
        let v = Versions::from_values(vec![b"x".to_vec(), b"y".to_vec()]).unwrap();
        assert!(v.is_conflict());
        assert_eq!(v.len(), 2);
    }

    #[test]
    fn display_is_compact() {
        let mut vv = VersionVector::new();
        vv.witness(&dot("b", 1));
        vv.witness(&dot("a", 4));
        assert_eq!(vv.to_string(), "{a:4, b:1}");
        assert_eq!(CausalityToken::from_vector(vv).to_string(), "{a:4, b:1}");
    }
}
