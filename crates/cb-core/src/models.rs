//! # Domain Models
//!
//! These structs represent the core entities of Civic-Board.
//! We use UUID v7 for time-ordered, globally unique identification.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Lifecycle state of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    Reported,
    Pending,
    Resolved,
    Rejected,
}

impl IssueStatus {
    pub const ALL: [IssueStatus; 4] = [
        IssueStatus::Reported,
        IssueStatus::Pending,
        IssueStatus::Resolved,
        IssueStatus::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IssueStatus::Reported => "reported",
            IssueStatus::Pending => "pending",
            IssueStatus::Resolved => "resolved",
            IssueStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IssueStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| AppError::InvalidState(format!("unknown issue status `{s}`")))
    }
}

/// The staff member an issue is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedStaff {
    pub staff_email: String,
    pub staff_name: String,
}

/// A civic complaint filed by a citizen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: Uuid,
    /// Email of the citizen who filed the issue. Never changes.
    pub reporter_email: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub location: Option<String>,
    pub image_url: Option<String>,
    pub status: IssueStatus,
    pub assigned_staff: Option<AssignedStaff>,
    /// Distinct principals that upvoted. `upvote_count` always equals its length.
    pub upvotes: BTreeSet<String>,
    pub upvote_count: u64,
    pub created_at: DateTime<Utc>,
    /// Present exactly while `status == Resolved`.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Issue {
    /// Builds a freshly reported issue from a submission.
    pub fn reported(reporter_email: &str, new: NewIssue, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            reporter_email: reporter_email.to_string(),
            title: new.title.trim().to_string(),
            description: new.description.trim().to_string(),
            category: new.category.trim().to_string(),
            location: new.location,
            image_url: new.image_url,
            status: IssueStatus::Reported,
            assigned_staff: None,
            upvotes: BTreeSet::new(),
            upvote_count: 0,
            created_at: now,
            resolved_at: None,
        }
    }

    pub fn is_assigned_to(&self, staff_email: &str) -> bool {
        self.assigned_staff
            .as_ref()
            .is_some_and(|staff| staff.staff_email == staff_email)
    }
}

/// Payload for filing an issue. Missing text fields deserialize as empty
/// strings so they are reported as validation failures, not parse errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewIssue {
    pub title: String,
    pub description: String,
    pub category: String,
    pub location: Option<String>,
    pub image_url: Option<String>,
}

/// Partial update of the free-form issue fields.
///
/// Lifecycle fields (status, assignment, upvotes) are deliberately absent:
/// they only change through their dedicated operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IssuePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
    pub image_url: Option<String>,
}

impl IssuePatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.location.is_none()
            && self.image_url.is_none()
    }

    /// Merges the present fields into `issue`.
    pub fn apply_to(&self, issue: &mut Issue) {
        if let Some(title) = &self.title {
            issue.title = title.trim().to_string();
        }
        if let Some(description) = &self.description {
            issue.description = description.trim().to_string();
        }
        if let Some(category) = &self.category {
            issue.category = category.trim().to_string();
        }
        if let Some(location) = &self.location {
            issue.location = Some(location.clone());
        }
        if let Some(image_url) = &self.image_url {
            issue.image_url = Some(image_url.clone());
        }
    }
}

/// Filter used for listing and counting issues. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssueFilter {
    pub reporter_email: Option<String>,
    pub assigned_to: Option<String>,
    pub status: Option<IssueStatus>,
    /// Inclusive lower bound on `created_at`.
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub created_until: Option<DateTime<Utc>>,
}

impl IssueFilter {
    pub fn reporter(email: &str) -> Self {
        Self {
            reporter_email: Some(email.to_string()),
            ..Self::default()
        }
    }

    pub fn assigned_to(email: &str) -> Self {
        Self {
            assigned_to: Some(email.to_string()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: IssueStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn created_within(mut self, from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.created_from = Some(from);
        self.created_until = Some(until);
        self
    }

    pub fn matches(&self, issue: &Issue) -> bool {
        self.reporter_email
            .as_deref()
            .is_none_or(|email| issue.reporter_email == email)
            && self
                .assigned_to
                .as_deref()
                .is_none_or(|email| issue.is_assigned_to(email))
            && self.status.is_none_or(|status| issue.status == status)
            && self.created_from.is_none_or(|from| issue.created_at >= from)
            && self.created_until.is_none_or(|until| issue.created_at < until)
    }
}

/// 1-based page of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub const DEFAULT_PER_PAGE: u32 = 10;

    /// Pages below 1 are clamped to the first page.
    pub fn new(page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: Self::DEFAULT_PER_PAGE,
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.per_page)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.per_page)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1)
    }
}

/// One immutable record in an issue's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub id: Uuid,
    pub issue_id: Uuid,
    /// Display label of the event (e.g. "Assigned"), not limited to `IssueStatus`.
    pub status: String,
    pub message: String,
    /// Principal email or role label responsible for the event.
    pub updated_by: String,
    pub timestamp: DateTime<Utc>,
}

/// Governance role of a principal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Citizen,
    Staff,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Citizen => "citizen",
            Role::Staff => "staff",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "citizen" => Ok(Role::Citizen),
            "staff" => Ok(Role::Staff),
            "admin" => Ok(Role::Admin),
            other => Err(AppError::ValidationError(format!("unknown role `{other}`"))),
        }
    }
}

/// A registered user and their governance record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citizen {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub photo_url: Option<String>,
    pub role: Role,
    /// Blocked citizens may still read but never mutate.
    pub blocked: bool,
    /// Orthogonal to `role`.
    pub premium: bool,
    pub created_at: DateTime<Utc>,
}

impl Citizen {
    pub fn registered(new: NewCitizen, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            email: new.email,
            display_name: new.display_name,
            photo_url: new.photo_url,
            role: Role::Citizen,
            blocked: false,
            premium: false,
            created_at: now,
        }
    }

    pub fn standing(&self) -> Standing {
        Standing {
            role: self.role,
            blocked: self.blocked,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewCitizen {
    pub email: String,
    pub display_name: String,
    pub photo_url: Option<String>,
}

/// The slice of a citizen record the authorization gate decides on.
///
/// Principals without a record are plain, unblocked citizens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Standing {
    pub role: Role,
    pub blocked: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkStatus {
    Available,
}

/// A request to join the staff, reviewed by an administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffApplication {
    pub id: Uuid,
    pub staff_email: String,
    pub staff_name: String,
    pub phone: Option<String>,
    pub status: ApplicationStatus,
    pub work_status: Option<WorkStatus>,
    pub created_at: DateTime<Utc>,
}

impl StaffApplication {
    pub fn submitted(new: NewStaffApplication, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            staff_email: new.staff_email,
            staff_name: new.staff_name,
            phone: new.phone,
            status: ApplicationStatus::Pending,
            work_status: None,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewStaffApplication {
    pub staff_email: String,
    pub staff_name: String,
    pub phone: Option<String>,
}

/// Outcome an administrator picks for a staff application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Approved,
    Rejected,
}

impl ReviewDecision {
    pub fn status(self) -> ApplicationStatus {
        match self {
            ReviewDecision::Approved => ApplicationStatus::Approved,
            ReviewDecision::Rejected => ApplicationStatus::Rejected,
        }
    }
}

/// An authenticated caller as resolved by the identity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub email: String,
    /// Raw claims from the credential, kept for adapters and auditing.
    pub claims: serde_json::Value,
}

impl Principal {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            claims: serde_json::Value::Null,
        }
    }
}

/// Issue counts for a reporter, or for the whole board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueTally {
    pub total_issues: u64,
    pub pending: u64,
    pub resolved: u64,
}

/// Workload counters for one staff member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffStats {
    pub assigned: u64,
    pub resolved: u64,
    /// Assigned issues created during the current UTC day.
    pub today: u64,
}
