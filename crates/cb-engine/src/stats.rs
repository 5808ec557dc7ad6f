//! # Dashboard statistics

use cb_core::{IssueFilter, IssueStatus, IssueTally, Principal, Result, StaffStats};
use chrono::{DateTime, Duration, NaiveTime, Utc};

use crate::gate::{Action, Target};
use crate::CivicEngine;

/// Start and end of the UTC day containing `now`.
pub fn utc_day(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}

impl CivicEngine {
    /// Totals for the issues one citizen filed.
    pub async fn citizen_stats(&self, principal: Option<&Principal>, email: &str) -> Result<IssueTally> {
        self.authorize(principal, Action::GetCitizenStats, Target::Email(email))
            .await?;
        self.tally(IssueFilter::reporter(email)).await
    }

    /// Workload of one staff member; `today` counts assigned issues filed today.
    pub async fn staff_stats(&self, principal: Option<&Principal>, staff_email: &str) -> Result<StaffStats> {
        self.authorize(principal, Action::GetStaffStats, Target::Email(staff_email))
            .await?;

        let assigned = IssueFilter::assigned_to(staff_email);
        let (day_start, day_end) = utc_day(Utc::now());
        Ok(StaffStats {
            assigned: self.issues.count(&assigned).await?,
            resolved: self
                .issues
                .count(&assigned.clone().with_status(IssueStatus::Resolved))
                .await?,
            today: self
                .issues
                .count(&assigned.created_within(day_start, day_end))
                .await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_utc_day_spans_midnight_to_midnight() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap();
        let (start, end) = utc_day(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 14, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap());
    }
}
