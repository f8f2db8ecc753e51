//! Group membership over an eventually consistent store.
//!
//! Participants share one record holding `members`, pending `joins` and
//! `parts`, and a small work queue. Nobody coordinates: each participant
//! periodically saves its view, reloads (merging siblings), and runs
//! [`MembershipState::handle`] to acknowledge and evict requests. A join
//! completes once every current member has acknowledged it.
//!
//! - [`MembershipState`]: the pure state and transitions.
//! - [`Membership`]: a participant's handle bound to a store.
//! - [`MembershipDriver`]: background thread running the save/load/handle loop.

mod driver;
mod id;
mod protocol;
mod queue;
mod state;

use std::time::Duration;

pub use driver::MembershipDriver;
pub use id::ParticipantId;
pub use protocol::{JoinOutcome, Membership};
pub use state::{Claim, FIELDS, HandleReport, MemberEntry, MembershipState, PendingEntry};

/// Protocol intervals.
///
/// A join or part request older than twice its interval is evicted by
/// [`MembershipState::handle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timing {
    /// How long a joiner waits for acknowledgments.
    pub join_interval: Duration,
    /// Expiry basis for part requests.
    pub part_interval: Duration,
    /// Period of the driver's save/load/handle pass.
    pub run_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            join_interval: Duration::from_millis(2_000),
            part_interval: Duration::from_millis(2_000),
            run_interval: Duration::from_millis(500),
        }
    }
}
