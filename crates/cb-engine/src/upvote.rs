//! # Upvote Tracker
//!
//! At most one upvote per principal per issue. The membership check and the
//! increment happen in a single store operation.

use cb_core::{AppError, Principal, Result, UpvoteOutcome};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::gate::{authenticated, Action, Target};
use crate::CivicEngine;

impl CivicEngine {
    /// Records the caller's upvote and returns the new count.
    #[instrument(skip_all, fields(issue_id = %id))]
    pub async fn upvote_issue(&self, principal: Option<&Principal>, id: Uuid) -> Result<u64> {
        self.authorize(principal, Action::UpvoteIssue, Target::None)
            .await?;
        let voter = authenticated(principal)?;

        match self.issues.add_upvote(id, &voter.email).await? {
            UpvoteOutcome::Added(count) => {
                debug!(count, "upvote recorded");
                Ok(count)
            }
            UpvoteOutcome::AlreadyVoted => Err(AppError::AlreadyVoted),
            UpvoteOutcome::Missing => Err(AppError::not_found("Issue", id)),
        }
    }
}
