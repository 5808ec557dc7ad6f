//! # Timeline
//!
//! The catalog of lifecycle events and how they are written to the ledger.
//! Entries are appended only after the mutation they describe has committed.

use cb_core::{AppError, IssueStatus, Principal, Result, TimelineEntry};
use chrono::Utc;
use tracing::error;
use uuid::Uuid;

use crate::gate::{Action, Target};
use crate::CivicEngine;

/// A lifecycle event worth an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineEvent<'a> {
    Reported,
    Assigned { staff_name: &'a str },
    StatusChanged(IssueStatus),
    Resolved,
    Rejected,
}

impl TimelineEvent<'_> {
    pub fn label(&self) -> String {
        match self {
            TimelineEvent::Reported => "Issue reported".to_string(),
            TimelineEvent::Assigned { .. } => "Assigned".to_string(),
            TimelineEvent::StatusChanged(status) => status.to_string(),
            TimelineEvent::Resolved => "Resolved".to_string(),
            TimelineEvent::Rejected => "Rejected".to_string(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            TimelineEvent::Reported => "Issue reported by citizen".to_string(),
            TimelineEvent::Assigned { staff_name } => format!("Assigned to staff {staff_name}"),
            TimelineEvent::StatusChanged(status) => format!("Status changed to {status}"),
            TimelineEvent::Resolved => "Issue has been resolved".to_string(),
            TimelineEvent::Rejected => "Issue rejected".to_string(),
        }
    }

    pub fn entry(&self, issue_id: Uuid, updated_by: &str) -> TimelineEntry {
        TimelineEntry {
            id: Uuid::now_v7(),
            issue_id,
            status: self.label(),
            message: self.message(),
            updated_by: updated_by.to_string(),
            timestamp: Utc::now(),
        }
    }
}

impl CivicEngine {
    /// Appends the entry for a mutation that already committed.
    ///
    /// A failure here cannot be rolled back, so it is logged and surfaced as
    /// `AuditGap` instead of being swallowed.
    pub(crate) async fn record(
        &self,
        issue_id: Uuid,
        event: TimelineEvent<'_>,
        updated_by: &str,
    ) -> Result<()> {
        let entry = event.entry(issue_id, updated_by);
        if let Err(source) = self.timeline.append(entry).await {
            error!(
                %issue_id,
                event = %event.label(),
                error = %source,
                "issue changed but timeline append failed"
            );
            return Err(AppError::AuditGap(issue_id, source));
        }
        Ok(())
    }

    /// Full audit trail of an issue, newest first. History outlives the issue.
    pub async fn get_timeline(
        &self,
        principal: Option<&Principal>,
        issue_id: Uuid,
    ) -> Result<Vec<TimelineEntry>> {
        self.authorize(principal, Action::GetTimeline, Target::None)
            .await?;
        Ok(self.timeline.query(issue_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_entry_names_the_staff_member() {
        let issue_id = Uuid::now_v7();
        let entry = TimelineEvent::Assigned { staff_name: "Sam" }.entry(issue_id, "Admin");
        assert_eq!(entry.issue_id, issue_id);
        assert_eq!(entry.status, "Assigned");
        assert_eq!(entry.message, "Assigned to staff Sam");
        assert_eq!(entry.updated_by, "Admin");
    }

    #[test]
    fn test_status_change_uses_the_lowercase_status() {
        let entry = TimelineEvent::StatusChanged(IssueStatus::Resolved)
            .entry(Uuid::now_v7(), "sam@city.gov");
        assert_eq!(entry.status, "resolved");
        assert_eq!(entry.message, "Status changed to resolved");
    }
}
