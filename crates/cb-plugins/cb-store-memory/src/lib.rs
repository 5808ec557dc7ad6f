//! # cb-store-memory
//!
//! In-process implementation of every store port, backed by `DashMap`.
//! Each conditional update runs while holding the entry's shard lock, which
//! makes check-and-set operations atomic without a global mutex.

use async_trait::async_trait;
use cb_core::models::{
    ApplicationStatus, AssignedStaff, Citizen, Issue, IssueFilter, IssuePatch, IssueStatus,
    ReviewDecision, Role, StaffApplication, TimelineEntry, WorkStatus,
};
use cb_core::traits::{
    CitizenDirectory, IssueStore, ReviewOutcome, StaffRoster, StatusChange, TimelineLedger,
    TransitionOutcome, UpvoteOutcome,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    issues: DashMap<Uuid, Issue>,
    /// Timeline entries grouped by issue id, in append order.
    timeline: DashMap<Uuid, Vec<TimelineEntry>>,
    citizens: DashMap<Uuid, Citizen>,
    /// Unique index: email -> citizen id.
    citizen_emails: DashMap<String, Uuid>,
    staff: DashMap<Uuid, StaffApplication>,
    /// Unique index: staff email -> application id.
    staff_emails: DashMap<String, Uuid>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn page<T>(mut rows: Vec<T>, offset: u64, limit: Option<u64>) -> Vec<T> {
    let offset = usize::try_from(offset).unwrap_or(usize::MAX).min(rows.len());
    rows.drain(..offset);
    if let Some(limit) = limit {
        rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
    }
    rows
}

#[async_trait]
impl IssueStore for MemoryStore {
    async fn insert(&self, issue: Issue) -> anyhow::Result<()> {
        self.issues.insert(issue.id, issue);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Issue>> {
        Ok(self.issues.get(&id).map(|issue| issue.clone()))
    }

    async fn list(
        &self,
        filter: &IssueFilter,
        offset: u64,
        limit: Option<u64>,
    ) -> anyhow::Result<Vec<Issue>> {
        let mut rows: Vec<Issue> = self
            .issues
            .iter()
            .filter(|issue| filter.matches(issue))
            .map(|issue| issue.clone())
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(page(rows, offset, limit))
    }

    async fn count(&self, filter: &IssueFilter) -> anyhow::Result<u64> {
        let matching = self.issues.iter().filter(|issue| filter.matches(issue)).count();
        Ok(matching as u64)
    }

    async fn update_fields(&self, id: Uuid, patch: &IssuePatch) -> anyhow::Result<Option<Issue>> {
        Ok(self.issues.get_mut(&id).map(|mut issue| {
            patch.apply_to(&mut issue);
            issue.clone()
        }))
    }

    async fn transition(
        &self,
        id: Uuid,
        change: &StatusChange,
    ) -> anyhow::Result<TransitionOutcome> {
        let Some(mut issue) = self.issues.get_mut(&id) else {
            return Ok(TransitionOutcome::Missing);
        };
        if !change.allowed_from.contains(&issue.status) {
            return Ok(TransitionOutcome::StatusMismatch(issue.status));
        }
        if let Some(assignee) = &change.assignee {
            if !issue.is_assigned_to(assignee) {
                return Ok(TransitionOutcome::AssigneeMismatch);
            }
        }

        issue.status = change.to;
        issue.resolved_at = (change.to == IssueStatus::Resolved).then_some(change.at);
        Ok(TransitionOutcome::Applied(issue.clone()))
    }

    async fn assign(&self, id: Uuid, staff: &AssignedStaff) -> anyhow::Result<Option<Issue>> {
        Ok(self.issues.get_mut(&id).map(|mut issue| {
            issue.assigned_staff = Some(staff.clone());
            issue.status = IssueStatus::Pending;
            issue.resolved_at = None;
            issue.clone()
        }))
    }

    async fn add_upvote(&self, id: Uuid, email: &str) -> anyhow::Result<UpvoteOutcome> {
        let Some(mut issue) = self.issues.get_mut(&id) else {
            return Ok(UpvoteOutcome::Missing);
        };
        if !issue.upvotes.insert(email.to_string()) {
            return Ok(UpvoteOutcome::AlreadyVoted);
        }
        issue.upvote_count = issue.upvotes.len() as u64;
        Ok(UpvoteOutcome::Added(issue.upvote_count))
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self.issues.remove(&id).is_some())
    }
}

#[async_trait]
impl TimelineLedger for MemoryStore {
    async fn append(&self, entry: TimelineEntry) -> anyhow::Result<()> {
        self.timeline.entry(entry.issue_id).or_default().push(entry);
        Ok(())
    }

    async fn query(&self, issue_id: Uuid) -> anyhow::Result<Vec<TimelineEntry>> {
        let mut entries = self
            .timeline
            .get(&issue_id)
            .map(|entries| entries.clone())
            .unwrap_or_default();
        entries.sort_by(|a, b| (b.timestamp, b.id).cmp(&(a.timestamp, a.id)));
        Ok(entries)
    }
}

#[async_trait]
impl CitizenDirectory for MemoryStore {
    async fn insert_if_absent(&self, citizen: Citizen) -> anyhow::Result<bool> {
        match self.citizen_emails.entry(citizen.email.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                // Insert the record before publishing it through the index.
                let id = citizen.id;
                self.citizens.insert(id, citizen);
                slot.insert(id);
                Ok(true)
            }
        }
    }

    async fn find(&self, id: Uuid) -> anyhow::Result<Option<Citizen>> {
        Ok(self.citizens.get(&id).map(|citizen| citizen.clone()))
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<Citizen>> {
        let id = self.citizen_emails.get(email).map(|id| *id);
        Ok(id.and_then(|id| self.citizens.get(&id).map(|citizen| citizen.clone())))
    }

    async fn list(&self, search: &str, limit: Option<u64>) -> anyhow::Result<Vec<Citizen>> {
        let needle = search.to_lowercase();
        let mut rows: Vec<Citizen> = self
            .citizens
            .iter()
            .filter(|citizen| {
                needle.is_empty()
                    || citizen.display_name.to_lowercase().contains(&needle)
                    || citizen.email.to_lowercase().contains(&needle)
            })
            .map(|citizen| citizen.clone())
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(page(rows, 0, limit))
    }

    async fn set_role(&self, id: Uuid, role: Role) -> anyhow::Result<Option<Citizen>> {
        Ok(self.citizens.get_mut(&id).map(|mut citizen| {
            citizen.role = role;
            citizen.clone()
        }))
    }

    async fn set_blocked(&self, id: Uuid, blocked: bool) -> anyhow::Result<Option<Citizen>> {
        Ok(self.citizens.get_mut(&id).map(|mut citizen| {
            citizen.blocked = blocked;
            citizen.clone()
        }))
    }

    async fn set_premium(&self, email: &str, premium: bool) -> anyhow::Result<Option<Citizen>> {
        let Some(id) = self.citizen_emails.get(email).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.citizens.get_mut(&id).map(|mut citizen| {
            citizen.premium = premium;
            citizen.clone()
        }))
    }
}

#[async_trait]
impl StaffRoster for MemoryStore {
    async fn insert_if_absent(&self, application: StaffApplication) -> anyhow::Result<bool> {
        match self.staff_emails.entry(application.staff_email.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                let id = application.id;
                self.staff.insert(id, application);
                slot.insert(id);
                Ok(true)
            }
        }
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<StaffApplication>> {
        Ok(self.staff.get(&id).map(|application| application.clone()))
    }

    async fn list(&self) -> anyhow::Result<Vec<StaffApplication>> {
        let mut rows: Vec<StaffApplication> = self
            .staff
            .iter()
            .map(|application| application.clone())
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(rows)
    }

    /// Lock order is staff entry, then citizen entry. No other operation holds
    /// a citizen lock while waiting on a staff lock.
    async fn review(&self, id: Uuid, decision: ReviewDecision) -> anyhow::Result<ReviewOutcome> {
        let Some(mut application) = self.staff.get_mut(&id) else {
            return Ok(ReviewOutcome::Missing);
        };

        if decision == ReviewDecision::Approved {
            let citizen_id = self
                .citizen_emails
                .get(&application.staff_email)
                .map(|id| *id);
            let Some(mut citizen) = citizen_id.and_then(|id| self.citizens.get_mut(&id)) else {
                return Ok(ReviewOutcome::CitizenMissing);
            };
            // Both guards are held, so readers never observe half of the update.
            citizen.role = Role::Staff;
            application.status = ApplicationStatus::Approved;
            application.work_status = Some(WorkStatus::Available);
        } else {
            application.status = decision.status();
        }

        Ok(ReviewOutcome::Reviewed(application.clone()))
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let Some((_, application)) = self.staff.remove(&id) else {
            return Ok(false);
        };
        self.staff_emails.remove(&application.staff_email);
        Ok(true)
    }
}
