//! # cb-engine
//!
//! The issue lifecycle and governance engine. `CivicEngine` exposes the
//! full action catalog; each operation runs the authorization gate, validates
//! its input, applies one targeted store mutation and then records the
//! matching timeline entry.

pub mod assignment;
pub mod gate;
pub mod governance;
pub mod lifecycle;
pub mod stats;
pub mod timeline;
pub mod upvote;

use std::sync::Arc;

use cb_core::{CitizenDirectory, IssueStore, StaffRoster, TimelineLedger};

pub use gate::{Action, Capability, Decision, DenyReason, Rule, Target};

/// Shared, cheaply clonable handle over the store ports.
#[derive(Clone)]
pub struct CivicEngine {
    pub(crate) issues: Arc<dyn IssueStore>,
    pub(crate) timeline: Arc<dyn TimelineLedger>,
    pub(crate) citizens: Arc<dyn CitizenDirectory>,
    pub(crate) staff: Arc<dyn StaffRoster>,
}

impl CivicEngine {
    pub fn new(
        issues: Arc<dyn IssueStore>,
        timeline: Arc<dyn TimelineLedger>,
        citizens: Arc<dyn CitizenDirectory>,
        staff: Arc<dyn StaffRoster>,
    ) -> Self {
        Self {
            issues,
            timeline,
            citizens,
            staff,
        }
    }

    /// Wires every port to one backing store.
    pub fn with_store<S>(store: Arc<S>) -> Self
    where
        S: IssueStore + TimelineLedger + CitizenDirectory + StaffRoster + 'static,
    {
        Self::new(store.clone(), store.clone(), store.clone(), store)
    }
}
