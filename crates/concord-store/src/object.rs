//! Per-key version bookkeeping shared by every backend.
//!
//! A [`StoredObject`] is the full replicated state of one key: the live
//! siblings, each tagged with the [`Dot`] of the write that produced it, and
//! a version vector summarising every write ever applied to the key.
//!
//! # Write rule
//!
//! A write by actor `A` with context `C`:
//!
//! 1. joins `C` into the key clock (so stale contexts never reuse dots),
//! 2. takes the dot `(A, clock[A] + 1)`,
//! 3. drops every sibling whose dot `C` covers (with `allow_mult`), or every
//!    sibling (without it),
//! 4. appends the new sibling.
//!
//! Two writes that did not observe each other therefore both survive, while
//! a write carrying the token of a read supersedes exactly what that read saw.

use serde::{Deserialize, Serialize};

use crate::types::{CausalityToken, Dot, Fetched, VersionVector, Versions};

/// One live version of a key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSibling {
    /// Identity of the write that produced this version.
    pub dot: Dot,
    /// Raw payload. File-backed stores keep this out of the metadata file.
    #[serde(skip)]
    pub value: Vec<u8>,
}

/// Replicated state of a single key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    /// Every write applied to this key.
    pub clock: VersionVector,
    /// Live versions, ordered by dot.
    pub siblings: Vec<StoredSibling>,
}

impl StoredObject {
    /// Apply a write and return the dot assigned to it.
    pub fn write(
        &mut self,
        actor: &str,
        value: Vec<u8>,
        token: Option<&CausalityToken>,
        allow_mult: bool,
    ) -> Dot {
        if let Some(token) = token {
            self.clock.join(token.vector());
        }

        let dot = Dot {
            actor: actor.to_owned(),
            counter: self.clock.get(actor) + 1,
        };

        if allow_mult {
            if let Some(token) = token {
                let seen = token.vector();
                self.siblings.retain(|s| !seen.covers(&s.dot));
            }
        } else {
            self.siblings.clear();
        }

        self.clock.witness(&dot);
        self.siblings.push(StoredSibling {
            dot: dot.clone(),
            value,
        });
        self.siblings.sort_by(|a, b| a.dot.cmp(&b.dot));
        dot
    }

    /// Snapshot for a read; `None` when nothing is live.
    #[must_use]
    pub fn fetch(&self) -> Option<Fetched> {
        let values = self.siblings.iter().map(|s| s.value.clone()).collect();
        Versions::from_values(values).map(|versions| Fetched {
            versions,
            token: CausalityToken::from_vector(self.clock.clone()),
        })
    }

    /// Returns `true` if no sibling is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.siblings.is_empty()
    }
}

/// Token a writer holds after its write: what it read plus what it wrote.
#[must_use]
pub fn successor(token: Option<&CausalityToken>, dot: &Dot) -> CausalityToken {
    let mut seen = token.map(|t| t.vector().clone()).unwrap_or_default();
    seen.witness(dot);
    CausalityToken::from_vector(seen)
}
