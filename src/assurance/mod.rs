//! Assurance module: model checking of the membership protocol.
//!
//! This module is feature-gated behind `assurance` and has zero overhead in
//! normal builds. It provides:
//!
//! - [`model::GroupModel`]: a stateright model driving the real
//!   [`MembershipState`](crate::membership::MembershipState) transitions
//!   over a sibling-keeping store.
//!
//! # Usage
//!
//! ```rust,ignore
//! use concord::assurance::model::GroupModel;
//! use stateright::{Checker, Model};
//!
//! GroupModel::new(vec!["a".into(), "b".into()])
//!     .checker()
//!     .spawn_dfs()
//!     .join()
//!     .assert_properties();
//! ```

pub mod model;

pub use model::{GroupModel, GroupState};
