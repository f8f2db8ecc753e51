//! A participant's handle on the shared membership record.

use std::sync::Arc;

use concord_store::ObjectStore;
use serde_json::Value;

use crate::bucket::Bucket;
use crate::clock::{Clock, SystemClock};
use crate::error::Error;
use crate::record::Record;

use super::id::ParticipantId;
use super::state::{HandleReport, MembershipState};
use super::Timing;

/// How a join attempt ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Every member acknowledged; this participant is now a member.
    Joined,
    /// Some member did not acknowledge in time; the request was withdrawn.
    NotAcknowledged,
    /// The request was evicted (expired) before the joiner came back.
    Expired,
}

impl JoinOutcome {
    /// `true` for [`JoinOutcome::Joined`].
    #[must_use]
    pub const fn is_joined(self) -> bool {
        matches!(self, Self::Joined)
    }
}

/// One participant's view of a membership group.
///
/// Every public protocol step loads the latest record first and saves
/// afterwards, passing the causality token through so concurrent writers
/// become siblings instead of overwriting each other.
#[derive(Clone, Debug)]
pub struct Membership {
    bucket: Bucket,
    key: String,
    id: ParticipantId,
    timing: Timing,
    clock: Arc<dyn Clock>,
    record: Record,
    state: MembershipState,
}

impl Membership {
    /// Open the group stored at `bucket/key` as participant `id`.
    ///
    /// Enables `allow_mult` on the bucket and loads the current record (a
    /// missing record is an empty group). Uses [`Timing::default`] and the
    /// system clock until overridden.
    ///
    /// # Errors
    /// Returns [`Error::Store`] or [`Error::Decode`].
    pub fn open(
        store: Arc<dyn ObjectStore>,
        bucket: &str,
        key: &str,
        id: ParticipantId,
    ) -> Result<Self, Error> {
        let bucket = Bucket::new(store, Arc::new(MembershipState::schema(bucket)));
        bucket.ensure_allow_mult()?;
        let mut membership = Self {
            record: bucket.new_record(key),
            bucket,
            key: key.to_owned(),
            id,
            timing: Timing::default(),
            clock: Arc::new(SystemClock),
            state: MembershipState::default(),
        };
        membership.reload()?;
        Ok(membership)
    }

    /// Use `timing` instead of the defaults.
    #[must_use]
    pub const fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Use `clock` for timestamps and waits.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    // -- accessors --

    /// This participant.
    #[must_use]
    pub const fn id(&self) -> &ParticipantId {
        &self.id
    }

    /// Record key of the group.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Protocol intervals.
    #[must_use]
    pub const fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Clock used for timestamps and waits.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The state as of the last load, plus local changes.
    #[must_use]
    pub const fn state(&self) -> &MembershipState {
        &self.state
    }

    /// Member ids in sorted order.
    #[must_use]
    pub fn members(&self) -> Vec<String> {
        self.state.member_ids().map(str::to_owned).collect()
    }

    /// Whether this participant is a member in the local view.
    #[must_use]
    pub fn is_member(&self) -> bool {
        self.state.is_member(self.id.as_str())
    }

    /// Whether any join is pending in the local view.
    #[must_use]
    pub fn joining(&self) -> bool {
        self.state.joining()
    }

    /// Whether no join or part is pending in the local view.
    #[must_use]
    pub fn stable(&self) -> bool {
        self.state.stable()
    }

    // -- storage --

    /// Replace the local view with the stored record, merging siblings.
    ///
    /// # Errors
    /// Returns [`Error::Store`], [`Error::Merge`] or [`Error::Decode`].
    pub fn reload(&mut self) -> Result<(), Error> {
        let record = self
            .bucket
            .get(&self.key)?
            .unwrap_or_else(|| self.bucket.new_record(self.key.as_str()));
        self.state = MembershipState::from_record(&record).map_err(|e| Error::Decode {
            bucket: self.bucket.name().to_owned(),
            key: self.key.clone(),
            message: e.to_string(),
        })?;
        self.record = record;
        Ok(())
    }

    /// Write the local view, passing through the last loaded token.
    ///
    /// # Errors
    /// Returns [`Error::Store`] or [`Error::Encode`].
    pub fn save(&mut self) -> Result<(), Error> {
        self.state
            .write_to(&mut self.record)
            .map_err(|e| Error::Encode {
                field: self.key.clone(),
                message: e.to_string(),
            })?;
        self.bucket.save_unchecked(&mut self.record)
    }

    /// Run one bookkeeping pass on the local view.
    pub fn handle(&mut self) -> HandleReport {
        let now = self.clock.now_ms();
        let report = self.state.handle(self.id.as_str(), now, &self.timing);
        let id = self.id.as_str();
        for joiner in &report.joins_expired {
            tracing::info!(participant = id, joiner = %joiner, "join request expired");
        }
        for member in &report.members_evicted {
            tracing::info!(participant = id, member = %member, "evicted departing member");
        }
        for parted in &report.parts_expired {
            tracing::info!(participant = id, parted = %parted, "part request expired");
        }
        if !report.is_quiet() {
            tracing::debug!(participant = id, ?report, "membership handled");
        }
        report
    }

    // -- primitive transitions (local view only) --

    /// Record a join request for this participant.
    pub fn join_start(&mut self) {
        let now = self.clock.now_ms();
        self.state.join_start(self.id.as_str(), now);
    }

    /// Whether every current member has acknowledged this participant.
    #[must_use]
    pub fn join_acknowledged(&self) -> bool {
        self.state.join_acknowledged(self.id.as_str())
    }

    /// Promote this participant to member.
    pub fn join_complete(&mut self) {
        let now = self.clock.now_ms();
        self.state.join_complete(self.id.as_str(), now);
    }

    /// Withdraw this participant's join request.
    pub fn join_cancel(&mut self) {
        self.state.join_cancel(self.id.as_str());
    }

    /// Record a part request; this participant stops being a member.
    pub fn part_start(&mut self) {
        let now = self.clock.now_ms();
        self.state.part_start(self.id.as_str(), now);
    }

    // -- protocol --

    /// Load, handle, write a join request.
    ///
    /// # Errors
    /// Any error of [`reload`](Self::reload) or [`save`](Self::save).
    pub fn join_begin(&mut self) -> Result<(), Error> {
        self.reload()?;
        self.handle();
        self.join_start();
        self.save()?;
        tracing::info!(participant = self.id.as_str(), key = %self.key, "join requested");
        Ok(())
    }

    /// Load, handle, then complete or withdraw the join request and save.
    ///
    /// # Errors
    /// Any error of [`reload`](Self::reload) or [`save`](Self::save).
    pub fn join_finish(&mut self) -> Result<JoinOutcome, Error> {
        self.reload()?;
        self.handle();
        let me = self.id.as_str();
        let outcome = if !self.state.joins.contains_key(me) {
            if self.state.is_member(me) {
                JoinOutcome::Joined
            } else {
                JoinOutcome::Expired
            }
        } else if self.join_acknowledged() {
            self.join_complete();
            JoinOutcome::Joined
        } else {
            self.join_cancel();
            JoinOutcome::NotAcknowledged
        };
        self.save()?;
        match outcome {
            JoinOutcome::Joined => {
                tracing::info!(participant = self.id.as_str(), key = %self.key, "joined");
            }
            JoinOutcome::NotAcknowledged | JoinOutcome::Expired => {
                tracing::warn!(
                    participant = self.id.as_str(),
                    key = %self.key,
                    ?outcome,
                    "join did not complete"
                );
            }
        }
        Ok(outcome)
    }

    /// Request to join, wait one join interval, then finish.
    ///
    /// Other participants must run their handle loop during the wait for
    /// the join to be acknowledged.
    ///
    /// # Errors
    /// Any error of [`join_begin`](Self::join_begin) or
    /// [`join_finish`](Self::join_finish).
    pub fn join(&mut self) -> Result<JoinOutcome, Error> {
        self.join_begin()?;
        self.clock.sleep(self.timing.join_interval);
        self.join_finish()
    }

    /// Load, handle, write a part request.
    ///
    /// # Errors
    /// Any error of [`reload`](Self::reload) or [`save`](Self::save).
    pub fn part(&mut self) -> Result<(), Error> {
        self.reload()?;
        self.handle();
        self.part_start();
        self.save()?;
        tracing::info!(participant = self.id.as_str(), key = %self.key, "part requested");
        Ok(())
    }

    // -- queue --

    /// Offer a work item. Returns `false` if it is already taken.
    ///
    /// # Errors
    /// Any error of [`reload`](Self::reload) or [`save`](Self::save).
    pub fn offer(&mut self, item: &str, payload: Value) -> Result<bool, Error> {
        self.reload()?;
        self.handle();
        let offered = self.state.offer(item, payload);
        if offered {
            self.save()?;
        }
        Ok(offered)
    }

    /// Claim a work item.
    ///
    /// Writes the claim, waits one join interval for competing claims to
    /// surface, then reloads. Returns the payload only if this participant
    /// still owns the item.
    ///
    /// # Errors
    /// Any error of [`reload`](Self::reload) or [`save`](Self::save).
    pub fn claim(&mut self, item: &str) -> Result<Option<Value>, Error> {
        self.reload()?;
        self.handle();
        let Some(payload) = self.state.claim(self.id.as_str(), item) else {
            return Ok(None);
        };
        self.save()?;
        self.clock.sleep(self.timing.join_interval);
        self.reload()?;
        self.handle();
        if self.state.owner_of(item) == Some(self.id.as_str()) {
            tracing::debug!(participant = self.id.as_str(), item, "claimed");
            Ok(Some(payload))
        } else {
            tracing::debug!(participant = self.id.as_str(), item, "lost claim");
            Ok(None)
        }
    }

    /// Mark an owned item finished. Returns `false` if not owned.
    ///
    /// # Errors
    /// Any error of [`reload`](Self::reload) or [`save`](Self::save).
    pub fn finish(&mut self, item: &str) -> Result<bool, Error> {
        self.reload()?;
        self.handle();
        let finished = self.state.finish(self.id.as_str(), item);
        if finished {
            self.save()?;
        }
        Ok(finished)
    }

    /// Return an owned item to the free set. Returns `false` if not owned.
    ///
    /// # Errors
    /// Any error of [`reload`](Self::reload) or [`save`](Self::save).
    pub fn release(&mut self, item: &str) -> Result<bool, Error> {
        self.reload()?;
        self.handle();
        let released = self.state.release(self.id.as_str(), item);
        if released {
            self.save()?;
        }
        Ok(released)
    }
}
