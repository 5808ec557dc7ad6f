//! # Assignment Coordinator
//!
//! Binds issues to staff members and handles the assignee's own status
//! updates.

use cb_core::{AppError, AssignedStaff, Issue, IssueFilter, Principal, Result};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::gate::{authenticated, Action, Target};
use crate::lifecycle::parse_target_status;
use crate::timeline::TimelineEvent;
use crate::CivicEngine;

impl CivicEngine {
    /// Assigns `staff` and forces the issue to `pending`, whatever its current
    /// status. Re-assigning a resolved or rejected issue re-opens it.
    #[instrument(skip_all, fields(issue_id = %id, staff = %staff.staff_email))]
    pub async fn assign_issue(
        &self,
        principal: Option<&Principal>,
        id: Uuid,
        staff: AssignedStaff,
    ) -> Result<Issue> {
        self.authorize(principal, Action::AssignIssue, Target::None)
            .await?;
        if staff.staff_email.trim().is_empty() || staff.staff_name.trim().is_empty() {
            return Err(AppError::ValidationError(
                "staff email and name are required".to_string(),
            ));
        }

        let issue = self
            .issues
            .assign(id, &staff)
            .await?
            .ok_or_else(|| AppError::not_found("Issue", id))?;
        info!("issue assigned");

        self.record(
            id,
            TimelineEvent::Assigned {
                staff_name: &staff.staff_name,
            },
            "Admin",
        )
        .await?;
        Ok(issue)
    }

    /// The assigned staff member's own status update, attributed to their email.
    #[instrument(skip_all, fields(issue_id = %id, status = %status))]
    pub async fn staff_set_issue_status(
        &self,
        principal: Option<&Principal>,
        id: Uuid,
        status: &str,
    ) -> Result<Issue> {
        let staff = authenticated(principal)?;
        let to = parse_target_status(status)?;
        let issue = self.load_issue(id).await?;
        self.authorize(principal, Action::StaffSetIssueStatus, Target::Issue(&issue))
            .await?;

        self.apply_status(id, to, Some(&staff.email), &staff.email)
            .await
    }

    /// Issues assigned to the caller, newest first.
    pub async fn list_assigned_issues(&self, principal: Option<&Principal>) -> Result<Vec<Issue>> {
        self.authorize(principal, Action::ListAssignedIssues, Target::None)
            .await?;
        let staff = authenticated(principal)?;
        Ok(self
            .issues
            .list(&IssueFilter::assigned_to(&staff.email), 0, None)
            .await?)
    }
}
