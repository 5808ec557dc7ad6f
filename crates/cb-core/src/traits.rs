//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the binary.
//! Store ports report infrastructure failures through `anyhow`; domain
//! outcomes (missing rows, failed preconditions) are part of the return value.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AssignedStaff, Citizen, Issue, IssueFilter, IssuePatch, IssueStatus, Principal,
    ReviewDecision, Role, StaffApplication, TimelineEntry,
};

/// A conditional status update, applied only if the preconditions still hold
/// at write time.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub to: IssueStatus,
    /// The update is applied only when the current status is one of these.
    pub allowed_from: Vec<IssueStatus>,
    /// When set, the issue must still be assigned to this staff email.
    pub assignee: Option<String>,
    /// Becomes `resolved_at` when `to` is `Resolved`.
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied(Issue),
    /// Current status was not in `allowed_from`; nothing changed.
    StatusMismatch(IssueStatus),
    /// Issue is not assigned to the required staff member; nothing changed.
    AssigneeMismatch,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpvoteOutcome {
    /// Vote recorded; carries the new count.
    Added(u64),
    AlreadyVoted,
    Missing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReviewOutcome {
    Reviewed(StaffApplication),
    /// No citizen record matches the applicant; nothing changed.
    CitizenMissing,
    Missing,
}

/// Data persistence contract for issues.
///
/// Every mutation is a targeted update of the named fields; implementations
/// must never overwrite a whole stored issue with a stale copy.
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait IssueStore: Send + Sync {
    async fn insert(&self, issue: Issue) -> anyhow::Result<()>;
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Issue>>;

    /// Newest first. `limit: None` returns everything after `offset`.
    async fn list(
        &self,
        filter: &IssueFilter,
        offset: u64,
        limit: Option<u64>,
    ) -> anyhow::Result<Vec<Issue>>;
    async fn count(&self, filter: &IssueFilter) -> anyhow::Result<u64>;

    /// Merges free-form fields. Returns `None` when the issue is absent.
    async fn update_fields(&self, id: Uuid, patch: &IssuePatch) -> anyhow::Result<Option<Issue>>;

    /// Compare-and-set on the current status (and assignee, if requested).
    /// Stamps `resolved_at` when entering `Resolved`, clears it otherwise.
    async fn transition(&self, id: Uuid, change: &StatusChange)
        -> anyhow::Result<TransitionOutcome>;

    /// Binds the staff member and forces `Pending`, clearing `resolved_at`.
    async fn assign(&self, id: Uuid, staff: &AssignedStaff) -> anyhow::Result<Option<Issue>>;

    /// Adds `email` to the upvote set and bumps the counter as one atomic step.
    async fn add_upvote(&self, id: Uuid, email: &str) -> anyhow::Result<UpvoteOutcome>;

    /// Hard delete. Returns whether a row was removed.
    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;
}

/// Append-only audit log. There is intentionally no update or delete.
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait TimelineLedger: Send + Sync {
    async fn append(&self, entry: TimelineEntry) -> anyhow::Result<()>;

    /// All entries of an issue, newest first.
    async fn query(&self, issue_id: Uuid) -> anyhow::Result<Vec<TimelineEntry>>;
}

/// The role directory: citizens keyed by email.
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait CitizenDirectory: Send + Sync {
    /// Inserts unless the email is already registered. Returns whether it inserted.
    async fn insert_if_absent(&self, citizen: Citizen) -> anyhow::Result<bool>;
    async fn find(&self, id: Uuid) -> anyhow::Result<Option<Citizen>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<Citizen>>;

    /// Newest first. An empty `search` matches everyone; otherwise a
    /// case-insensitive substring match on display name or email.
    async fn list(&self, search: &str, limit: Option<u64>) -> anyhow::Result<Vec<Citizen>>;

    async fn set_role(&self, id: Uuid, role: Role) -> anyhow::Result<Option<Citizen>>;
    async fn set_blocked(&self, id: Uuid, blocked: bool) -> anyhow::Result<Option<Citizen>>;
    async fn set_premium(&self, email: &str, premium: bool) -> anyhow::Result<Option<Citizen>>;
}

/// Staff applications and their review.
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait StaffRoster: Send + Sync {
    /// Inserts unless the staff email already applied. Returns whether it inserted.
    async fn insert_if_absent(&self, application: StaffApplication) -> anyhow::Result<bool>;
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<StaffApplication>>;

    /// Newest first.
    async fn list(&self) -> anyhow::Result<Vec<StaffApplication>>;

    /// Records the decision. On approval the applicant is marked available and
    /// the citizen with the applicant's email is promoted to `Role::Staff` in
    /// the same atomic step; if that citizen does not exist nothing is written.
    async fn review(&self, id: Uuid, decision: ReviewDecision) -> anyhow::Result<ReviewOutcome>;

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;
}

/// Identity contract: resolves a request credential to a principal.
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Fails with `AppError::Unauthenticated` for any credential it cannot verify.
    async fn authenticate(&self, credential: &str) -> Result<Principal>;
}
