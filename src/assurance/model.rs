//! Stateright model of the join/part membership protocol.
//!
//! Each participant keeps a local view and the set of stored siblings it
//! last observed. The store is a set of sibling views: a save replaces the
//! siblings the writer observed with its view and keeps everything else,
//! which is exactly what passing a causality token through does. A load
//! merges all siblings and runs `handle`.
//!
//! The model calls the real [`MembershipState`] transitions, so it checks
//! the shipped merge and handle rules rather than a re-statement of them.
//! Time is frozen at zero: nothing expires, and joins finish only when the
//! local view shows every member's acknowledgment.
//!
//! # Checked properties
//!
//! - No view or stored sibling lists an id as both member and departing.
//! - No view or stored sibling lists a member as still joining.
//! - Every member in any view completed an acknowledged join.
//! - All participants can end up as members with identical views.
//! - A part can complete (the id vanishes from a view's members and parts).

#![allow(
    clippy::missing_docs_in_private_items,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::too_many_lines
)]

use stateright::*;
use std::collections::BTreeSet;

use crate::membership::{MembershipState, Timing};

// ---------------------------------------------------------------------------
// State types
// ---------------------------------------------------------------------------

/// Canonical JSON of a [`MembershipState`]. `MembershipState` carries JSON
/// payloads that are not `Hash`, so the model stores the encoding.
type View = String;

// Views only come from `encode`; failing either way is a model bug.
fn encode(state: &MembershipState) -> View {
    serde_json::to_string(state).expect("membership state encodes to JSON")
}

fn decode(view: &str) -> MembershipState {
    serde_json::from_str(view).expect("model views are produced by encode")
}

/// Where a participant is in its lifecycle.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Phase {
    /// Has not asked to join.
    Idle,
    /// Join requested, not yet complete.
    Joining,
    /// Completed its join.
    Member,
    /// Requested to leave.
    Parted,
}

/// One participant.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Participant {
    /// Local view.
    pub view: View,
    /// Siblings seen at the last load (what a save's token covers).
    pub observed: BTreeSet<View>,
    /// Lifecycle phase.
    pub phase: Phase,
}

/// Whole-system state.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct GroupState {
    /// Stored sibling views.
    pub store: BTreeSet<View>,
    /// Participants, indexed like [`GroupModel::ids`].
    pub participants: Vec<Participant>,
    /// Ids whose join completed with every member's acknowledgment.
    pub admitted: BTreeSet<String>,
}

impl GroupState {
    fn views(&self) -> impl Iterator<Item = MembershipState> + '_ {
        self.participants
            .iter()
            .map(|p| decode(&p.view))
            .chain(self.store.iter().map(|v| decode(v)))
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Steps a participant can take.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Action {
    /// Merge the stored siblings into the local view and handle.
    Load(usize),
    /// Write the local view over the observed siblings.
    Save(usize),
    /// Record a join request locally.
    JoinStart(usize),
    /// Complete an acknowledged join locally.
    JoinFinish(usize),
    /// Record a part request locally.
    PartStart(usize),
}

// ---------------------------------------------------------------------------
// Model definition
// ---------------------------------------------------------------------------

/// The membership protocol model.
#[derive(Clone, Debug)]
pub struct GroupModel {
    /// Participant ids.
    pub ids: Vec<String>,
    /// Whether members may part.
    pub allow_part: bool,
}

impl GroupModel {
    /// A model where every participant joins once and may part once.
    pub fn new(ids: Vec<String>) -> Self {
        Self {
            ids,
            allow_part: true,
        }
    }

    /// A model without parts.
    pub fn joins_only(ids: Vec<String>) -> Self {
        Self {
            ids,
            allow_part: false,
        }
    }
}

impl Model for GroupModel {
    type State = GroupState;
    type Action = Action;

    fn init_states(&self) -> Vec<Self::State> {
        let empty = encode(&MembershipState::default());
        vec![GroupState {
            store: BTreeSet::new(),
            participants: self
                .ids
                .iter()
                .map(|_| Participant {
                    view: empty.clone(),
                    observed: BTreeSet::new(),
                    phase: Phase::Idle,
                })
                .collect(),
            admitted: BTreeSet::new(),
        }]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        for (i, p) in state.participants.iter().enumerate() {
            if p.observed != state.store {
                actions.push(Action::Load(i));
            }
            if !(state.store.len() == 1 && state.store.contains(&p.view)) {
                actions.push(Action::Save(i));
            }
            match p.phase {
                Phase::Idle => actions.push(Action::JoinStart(i)),
                Phase::Joining => {
                    if decode(&p.view).join_acknowledged(&self.ids[i]) {
                        actions.push(Action::JoinFinish(i));
                    }
                }
                Phase::Member if self.allow_part => actions.push(Action::PartStart(i)),
                Phase::Member | Phase::Parted => {}
            }
        }
    }

    fn next_state(&self, last: &Self::State, action: Self::Action) -> Option<Self::State> {
        let mut s = last.clone();
        let timing = Timing::default();
        match action {
            Action::Load(i) => {
                let mut merged = MembershipState::merge_all(s.store.iter().map(|v| decode(v)));
                merged.handle(&self.ids[i], 0, &timing);
                let p = &mut s.participants[i];
                p.view = encode(&merged);
                p.observed = s.store.clone();
            }
            Action::Save(i) => {
                let p = &mut s.participants[i];
                for seen in &p.observed {
                    s.store.remove(seen);
                }
                s.store.insert(p.view.clone());
                p.observed = BTreeSet::from([p.view.clone()]);
            }
            Action::JoinStart(i) => {
                let p = &mut s.participants[i];
                let mut view = decode(&p.view);
                view.join_start(&self.ids[i], 0);
                p.view = encode(&view);
                p.phase = Phase::Joining;
            }
            Action::JoinFinish(i) => {
                let p = &mut s.participants[i];
                let mut view = decode(&p.view);
                view.join_complete(&self.ids[i], 0);
                p.view = encode(&view);
                p.phase = Phase::Member;
                s.admitted.insert(self.ids[i].clone());
            }
            Action::PartStart(i) => {
                let p = &mut s.participants[i];
                let mut view = decode(&p.view);
                view.part_start(&self.ids[i], 0);
                p.view = encode(&view);
                p.phase = Phase::Parted;
            }
        }
        Some(s)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            Property::<Self>::always("departing ids are not members", |_, state| {
                state
                    .views()
                    .all(|v| v.parts.keys().all(|id| !v.members.contains_key(id)))
            }),
            Property::<Self>::always("members are not joining", |_, state| {
                state
                    .views()
                    .all(|v| v.joins.keys().all(|id| !v.members.contains_key(id)))
            }),
            Property::<Self>::always("members were admitted", |_, state| {
                state
                    .views()
                    .all(|v| v.members.keys().all(|id| state.admitted.contains(id)))
            }),
            Property::<Self>::sometimes("all joined and converged", |model, state| {
                let all: BTreeSet<&str> = model.ids.iter().map(String::as_str).collect();
                let first = &state.participants[0].view;
                state.participants.iter().all(|p| {
                    p.phase == Phase::Member
                        && &p.view == first
                        && decode(&p.view).member_ids().collect::<BTreeSet<_>>() == all
                })
            }),
            Property::<Self>::sometimes("part completes", |model, state| {
                state.participants.iter().enumerate().any(|(i, p)| {
                    p.phase == Phase::Parted
                        && state.participants.iter().any(|q| {
                            let v = decode(&q.view);
                            !v.members.contains_key(&model.ids[i])
                                && !v.parts.contains_key(&model.ids[i])
                                && !v.members.is_empty()
                        })
                })
            }),
        ]
    }
}
