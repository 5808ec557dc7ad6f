//! # Issue State Machine
//!
//! `reported` is set at creation, `pending` is entered through assignment or a
//! status edit, `resolved` and `rejected` end the normal flow. Re-opening to
//! `pending` is always allowed.

use cb_core::{
    AppError, Issue, IssueFilter, IssuePatch, IssueStatus, IssueTally, NewIssue, PageRequest,
    Principal, Result, Role, StatusChange, TransitionOutcome,
};
use chrono::Utc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::gate::{authenticated, Action, Target};
use crate::timeline::TimelineEvent;
use crate::CivicEngine;

/// Default size of the "latest issues" listing.
pub const LATEST_ISSUES: u64 = 6;

/// Largest "latest issues" listing a caller may ask for.
pub const MAX_LATEST_ISSUES: u64 = 100;

/// Resolves the requested listing size, refusing values outside `1..=MAX_LATEST_ISSUES`.
pub fn latest_limit(requested: Option<u64>) -> Result<u64> {
    match requested {
        None => Ok(LATEST_ISSUES),
        Some(limit) if (1..=MAX_LATEST_ISSUES).contains(&limit) => Ok(limit),
        Some(limit) => Err(AppError::ValidationError(format!(
            "limit must be between 1 and {MAX_LATEST_ISSUES}, got {limit}"
        ))),
    }
}

/// Statuses from which `to` may be entered.
pub fn allowed_sources(to: IssueStatus) -> &'static [IssueStatus] {
    match to {
        IssueStatus::Pending => &IssueStatus::ALL,
        IssueStatus::Resolved => &[IssueStatus::Reported, IssueStatus::Pending],
        IssueStatus::Rejected => &[IssueStatus::Pending],
        IssueStatus::Reported => &[],
    }
}

pub fn can_transition(from: IssueStatus, to: IssueStatus) -> bool {
    allowed_sources(to).contains(&from)
}

/// Parses a requested status. `reported` is only ever set by creation.
pub fn parse_target_status(raw: &str) -> Result<IssueStatus> {
    match raw.trim().parse::<IssueStatus>()? {
        IssueStatus::Reported => Err(AppError::InvalidState(
            "issues cannot be moved back to reported".to_string(),
        )),
        status => Ok(status),
    }
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::ValidationError(format!("{field} is required")));
    }
    Ok(())
}

fn validate_new_issue(new: &NewIssue) -> Result<()> {
    require_text("title", &new.title)?;
    require_text("description", &new.description)?;
    require_text("category", &new.category)
}

fn validate_patch(patch: &IssuePatch) -> Result<()> {
    if patch.is_empty() {
        return Err(AppError::ValidationError("nothing to update".to_string()));
    }
    let required = [
        ("title", &patch.title),
        ("description", &patch.description),
        ("category", &patch.category),
    ];
    for (field, value) in required {
        if let Some(value) = value {
            require_text(field, value)?;
        }
    }
    Ok(())
}

pub(crate) fn role_label(role: Role) -> &'static str {
    match role {
        Role::Citizen => "Citizen",
        Role::Staff => "Staff",
        Role::Admin => "Admin",
    }
}

impl CivicEngine {
    pub(crate) async fn load_issue(&self, id: Uuid) -> Result<Issue> {
        self.issues
            .get(id)
            .await?
            .ok_or_else(|| AppError::not_found("Issue", id))
    }

    /// Files a new issue for the calling citizen.
    #[instrument(skip_all)]
    pub async fn create_issue(&self, principal: Option<&Principal>, new: NewIssue) -> Result<Issue> {
        self.authorize(principal, Action::CreateIssue, Target::None)
            .await?;
        let reporter = authenticated(principal)?;
        validate_new_issue(&new)?;

        let issue = Issue::reported(&reporter.email, new, Utc::now());
        self.issues.insert(issue.clone()).await?;
        info!(issue_id = %issue.id, category = %issue.category, "issue reported");

        self.record(issue.id, TimelineEvent::Reported, "Citizen")
            .await?;
        Ok(issue)
    }

    pub async fn get_issue(&self, principal: Option<&Principal>, id: Uuid) -> Result<Issue> {
        self.authorize(principal, Action::GetIssue, Target::None)
            .await?;
        self.load_issue(id).await
    }

    /// One page of all issues, newest first.
    pub async fn list_issues(
        &self,
        principal: Option<&Principal>,
        page: PageRequest,
    ) -> Result<Vec<Issue>> {
        self.authorize(principal, Action::ListIssues, Target::None)
            .await?;
        Ok(self
            .issues
            .list(&IssueFilter::default(), page.offset(), Some(page.limit()))
            .await?)
    }

    pub async fn latest_issues(
        &self,
        principal: Option<&Principal>,
        limit: Option<u64>,
    ) -> Result<Vec<Issue>> {
        let limit = latest_limit(limit)?;
        self.authorize(principal, Action::LatestIssues, Target::None)
            .await?;
        Ok(self
            .issues
            .list(&IssueFilter::default(), 0, Some(limit))
            .await?)
    }

    /// Every issue filed by `reporter_email`, newest first.
    pub async fn list_reporter_issues(
        &self,
        principal: Option<&Principal>,
        reporter_email: &str,
    ) -> Result<Vec<Issue>> {
        self.authorize(
            principal,
            Action::ListReporterIssues,
            Target::Email(reporter_email),
        )
        .await?;
        Ok(self
            .issues
            .list(&IssueFilter::reporter(reporter_email), 0, None)
            .await?)
    }

    /// Board-wide totals.
    pub async fn issue_summary(&self, principal: Option<&Principal>) -> Result<IssueTally> {
        self.authorize(principal, Action::IssueSummary, Target::None)
            .await?;
        self.tally(IssueFilter::default()).await
    }

    /// Merges free-form fields. Field edits are not lifecycle events and
    /// leave the timeline untouched.
    #[instrument(skip_all, fields(issue_id = %id))]
    pub async fn edit_issue(
        &self,
        principal: Option<&Principal>,
        id: Uuid,
        patch: IssuePatch,
    ) -> Result<Issue> {
        authenticated(principal)?;
        validate_patch(&patch)?;
        let issue = self.load_issue(id).await?;
        self.authorize(principal, Action::EditIssue, Target::Issue(&issue))
            .await?;

        self.issues
            .update_fields(id, &patch)
            .await?
            .ok_or_else(|| AppError::not_found("Issue", id))
    }

    /// Hard delete. Timeline entries are kept as orphaned audit history.
    #[instrument(skip_all, fields(issue_id = %id))]
    pub async fn delete_issue(&self, principal: Option<&Principal>, id: Uuid) -> Result<()> {
        authenticated(principal)?;
        let issue = self.load_issue(id).await?;
        self.authorize(principal, Action::DeleteIssue, Target::Issue(&issue))
            .await?;

        if !self.issues.delete(id).await? {
            return Err(AppError::not_found("Issue", id));
        }
        info!("issue deleted, timeline retained");
        Ok(())
    }

    /// Status edit by an administrator or the assigned staff member. The
    /// timeline entry is attributed to the actor's role.
    #[instrument(skip_all, fields(issue_id = %id, status = %status))]
    pub async fn set_issue_status(
        &self,
        principal: Option<&Principal>,
        id: Uuid,
        status: &str,
    ) -> Result<Issue> {
        let actor = authenticated(principal)?;
        let to = parse_target_status(status)?;
        let issue = self.load_issue(id).await?;
        let standing = self
            .authorize(principal, Action::SetIssueStatus, Target::Issue(&issue))
            .await?;

        // Non-admins passed the gate as the assignee and must still be it at write time.
        let assignee = (standing.role != Role::Admin).then_some(actor.email.as_str());
        self.apply_status(id, to, assignee, role_label(standing.role))
            .await
    }

    /// Admin shortcut to `resolved`, bypassing the assignment check.
    #[instrument(skip_all, fields(issue_id = %id))]
    pub async fn resolve_issue(&self, principal: Option<&Principal>, id: Uuid) -> Result<Issue> {
        self.authorize(principal, Action::ResolveIssue, Target::None)
            .await?;
        let change = StatusChange {
            to: IssueStatus::Resolved,
            allowed_from: allowed_sources(IssueStatus::Resolved).to_vec(),
            assignee: None,
            at: Utc::now(),
        };
        let issue = self.commit_transition(id, &change).await?;
        self.record(id, TimelineEvent::Resolved, "Admin").await?;
        Ok(issue)
    }

    /// Rejects a `pending` issue. Any other current status makes this a no-op
    /// and `None` is returned.
    #[instrument(skip_all, fields(issue_id = %id))]
    pub async fn reject_issue(
        &self,
        principal: Option<&Principal>,
        id: Uuid,
    ) -> Result<Option<Issue>> {
        self.authorize(principal, Action::RejectIssue, Target::None)
            .await?;
        let change = StatusChange {
            to: IssueStatus::Rejected,
            allowed_from: allowed_sources(IssueStatus::Rejected).to_vec(),
            assignee: None,
            at: Utc::now(),
        };

        match self.issues.transition(id, &change).await? {
            TransitionOutcome::Applied(issue) => {
                self.record(id, TimelineEvent::Rejected, "Admin").await?;
                Ok(Some(issue))
            }
            TransitionOutcome::StatusMismatch(current) => {
                debug!(%current, "reject skipped, issue is not pending");
                Ok(None)
            }
            TransitionOutcome::AssigneeMismatch => Err(AppError::Forbidden(
                "issue is not assigned to you".to_string(),
            )),
            TransitionOutcome::Missing => Err(AppError::not_found("Issue", id)),
        }
    }

    /// The shared status path: conditional write, then the timeline entry.
    pub(crate) async fn apply_status(
        &self,
        id: Uuid,
        to: IssueStatus,
        assignee: Option<&str>,
        updated_by: &str,
    ) -> Result<Issue> {
        let change = StatusChange {
            to,
            allowed_from: allowed_sources(to).to_vec(),
            assignee: assignee.map(str::to_string),
            at: Utc::now(),
        };
        let issue = self.commit_transition(id, &change).await?;
        self.record(id, TimelineEvent::StatusChanged(to), updated_by)
            .await?;
        Ok(issue)
    }

    async fn commit_transition(&self, id: Uuid, change: &StatusChange) -> Result<Issue> {
        match self.issues.transition(id, change).await? {
            TransitionOutcome::Applied(issue) => {
                debug!(to = %change.to, "status transition applied");
                Ok(issue)
            }
            TransitionOutcome::StatusMismatch(current) => Err(AppError::InvalidState(format!(
                "cannot move issue from {current} to {}",
                change.to
            ))),
            TransitionOutcome::AssigneeMismatch => Err(AppError::Forbidden(
                "issue is not assigned to you".to_string(),
            )),
            TransitionOutcome::Missing => Err(AppError::not_found("Issue", id)),
        }
    }

    pub(crate) async fn tally(&self, filter: IssueFilter) -> Result<IssueTally> {
        let total_issues = self.issues.count(&filter).await?;
        let pending = self
            .issues
            .count(&filter.clone().with_status(IssueStatus::Pending))
            .await?;
        let resolved = self
            .issues
            .count(&filter.with_status(IssueStatus::Resolved))
            .await?;
        Ok(IssueTally {
            total_issues,
            pending,
            resolved,
        })
    }
}
