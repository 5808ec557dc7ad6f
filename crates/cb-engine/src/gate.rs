//! # Authorization Gate
//!
//! A single declarative table decides which principal may perform which
//! action. The decision itself is a pure function; the engine feeds it the
//! caller's standing, read fresh from the role directory on every call.

use cb_core::{AppError, Issue, Principal, Result, Role, Standing};
use tracing::warn;

use crate::CivicEngine;

/// Every operation the engine exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    CreateIssue,
    GetIssue,
    ListIssues,
    LatestIssues,
    IssueSummary,
    ListReporterIssues,
    EditIssue,
    DeleteIssue,
    SetIssueStatus,
    ResolveIssue,
    RejectIssue,
    AssignIssue,
    StaffSetIssueStatus,
    ListAssignedIssues,
    UpvoteIssue,
    GetTimeline,
    GetCitizenStats,
    GetStaffStats,
    CreateCitizen,
    GetCitizen,
    GetCitizenRole,
    ListCitizens,
    SetCitizenRole,
    BlockCitizen,
    SetCitizenPremium,
    CreateStaffApplication,
    ListStaff,
    ReviewStaffApplication,
    DeleteStaff,
}

/// Who may perform an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Public,
    Authenticated,
    Admin,
    /// The target email must be the caller's own.
    SelfOnly,
    SelfOrAdmin,
    ReporterOrAdmin,
    /// Identity match against the issue's assignee; the role is irrelevant.
    AssignedStaff,
    AssignedStaffOrAdmin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    pub rule: Rule,
    /// Mutating actions are refused to blocked principals.
    pub mutates: bool,
}

const fn cap(rule: Rule, mutates: bool) -> Capability {
    Capability { rule, mutates }
}

impl Action {
    pub const fn capability(self) -> Capability {
        use Rule::*;
        match self {
            Action::CreateIssue => cap(Authenticated, true),
            Action::GetIssue => cap(Public, false),
            Action::ListIssues => cap(Public, false),
            Action::LatestIssues => cap(Public, false),
            Action::IssueSummary => cap(Public, false),
            Action::ListReporterIssues => cap(SelfOrAdmin, false),
            Action::EditIssue => cap(ReporterOrAdmin, true),
            Action::DeleteIssue => cap(ReporterOrAdmin, true),
            Action::SetIssueStatus => cap(AssignedStaffOrAdmin, true),
            Action::ResolveIssue => cap(Admin, true),
            Action::RejectIssue => cap(Admin, true),
            Action::AssignIssue => cap(Admin, true),
            Action::StaffSetIssueStatus => cap(AssignedStaff, true),
            Action::ListAssignedIssues => cap(Authenticated, false),
            Action::UpvoteIssue => cap(Authenticated, true),
            Action::GetTimeline => cap(Public, false),
            Action::GetCitizenStats => cap(SelfOrAdmin, false),
            Action::GetStaffStats => cap(SelfOrAdmin, false),
            Action::CreateCitizen => cap(SelfOnly, true),
            Action::GetCitizen => cap(SelfOrAdmin, false),
            Action::GetCitizenRole => cap(Public, false),
            Action::ListCitizens => cap(Admin, false),
            Action::SetCitizenRole => cap(Admin, true),
            Action::BlockCitizen => cap(Admin, true),
            Action::SetCitizenPremium => cap(SelfOrAdmin, true),
            Action::CreateStaffApplication => cap(SelfOnly, true),
            Action::ListStaff => cap(Admin, false),
            Action::ReviewStaffApplication => cap(Admin, true),
            Action::DeleteStaff => cap(Admin, true),
        }
    }
}

/// What an identity-match rule is checked against.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    None,
    Email(&'a str),
    Issue(&'a Issue),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Unauthenticated,
    Blocked,
    AdminRequired,
    NotOwner,
    NotAssignee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl DenyReason {
    pub fn into_error(self) -> AppError {
        match self {
            DenyReason::Unauthenticated => AppError::Unauthenticated,
            DenyReason::Blocked => AppError::Forbidden("account is blocked".to_string()),
            DenyReason::AdminRequired => AppError::Forbidden("admin role required".to_string()),
            DenyReason::NotOwner => AppError::Forbidden("not the owner of this resource".to_string()),
            DenyReason::NotAssignee => AppError::Forbidden("issue is not assigned to you".to_string()),
        }
    }
}

/// Decides whether `principal`, holding `standing`, may perform `action` on `target`.
///
/// Order: identity, then block status, then the table rule.
pub fn authorize(
    principal: Option<&Principal>,
    standing: Standing,
    action: Action,
    target: Target<'_>,
) -> Decision {
    let capability = action.capability();
    if capability.rule == Rule::Public {
        return Decision::Allow;
    }
    let Some(principal) = principal else {
        return Decision::Deny(DenyReason::Unauthenticated);
    };
    if capability.mutates && standing.blocked {
        return Decision::Deny(DenyReason::Blocked);
    }

    let is_admin = standing.role == Role::Admin;
    let owns_email = matches!(target, Target::Email(email) if email == principal.email);
    let allowed = match capability.rule {
        Rule::Public | Rule::Authenticated => Ok(()),
        Rule::Admin => is_admin.then_some(()).ok_or(DenyReason::AdminRequired),
        Rule::SelfOnly => owns_email.then_some(()).ok_or(DenyReason::NotOwner),
        Rule::SelfOrAdmin => (owns_email || is_admin)
            .then_some(())
            .ok_or(DenyReason::NotOwner),
        Rule::ReporterOrAdmin => {
            let reporter = matches!(target, Target::Issue(issue) if issue.reporter_email == principal.email);
            (reporter || is_admin).then_some(()).ok_or(DenyReason::NotOwner)
        }
        Rule::AssignedStaff => is_assignee(principal, target)
            .then_some(())
            .ok_or(DenyReason::NotAssignee),
        Rule::AssignedStaffOrAdmin => (is_assignee(principal, target) || is_admin)
            .then_some(())
            .ok_or(DenyReason::NotAssignee),
    };

    match allowed {
        Ok(()) => Decision::Allow,
        Err(reason) => Decision::Deny(reason),
    }
}

fn is_assignee(principal: &Principal, target: Target<'_>) -> bool {
    matches!(target, Target::Issue(issue) if issue.is_assigned_to(&principal.email))
}

impl CivicEngine {
    /// Current standing of the caller. Never cached: a promotion or a block
    /// applies to the very next request.
    pub(crate) async fn standing(&self, principal: Option<&Principal>) -> Result<Standing> {
        let Some(principal) = principal else {
            return Ok(Standing::default());
        };
        let record = self.citizens.find_by_email(&principal.email).await?;
        Ok(record.map(|citizen| citizen.standing()).unwrap_or_default())
    }

    /// Runs the gate for one call and returns the standing it decided on.
    pub(crate) async fn authorize(
        &self,
        principal: Option<&Principal>,
        action: Action,
        target: Target<'_>,
    ) -> Result<Standing> {
        let standing = if action.capability().rule == Rule::Public {
            Standing::default()
        } else {
            self.standing(principal).await?
        };

        match authorize(principal, standing, action, target) {
            Decision::Allow => Ok(standing),
            Decision::Deny(reason) => {
                warn!(
                    ?action,
                    ?reason,
                    principal = principal.map(|p| p.email.as_str()),
                    "request denied"
                );
                Err(reason.into_error())
            }
        }
    }
}

/// Fails fast for identity-requiring actions before any lookup happens.
pub(crate) fn authenticated(principal: Option<&Principal>) -> Result<&Principal> {
    principal.ok_or(AppError::Unauthenticated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cb_core::{AssignedStaff, NewIssue};
    use chrono::Utc;

    fn admin() -> Standing {
        Standing {
            role: Role::Admin,
            blocked: false,
        }
    }

    fn issue_by(reporter: &str, assignee: Option<&str>) -> Issue {
        let mut issue = Issue::reported(reporter, NewIssue::default(), Utc::now());
        issue.assigned_staff = assignee.map(|email| AssignedStaff {
            staff_email: email.to_string(),
            staff_name: "Sam".to_string(),
        });
        issue
    }

    #[test]
    fn test_public_actions_need_no_identity() {
        let decision = authorize(None, Standing::default(), Action::GetTimeline, Target::None);
        assert_eq!(decision, Decision::Allow);
    }

    #[test]
    fn test_anonymous_assignment_is_unauthenticated() {
        let decision = authorize(None, Standing::default(), Action::AssignIssue, Target::None);
        assert_eq!(decision, Decision::Deny(DenyReason::Unauthenticated));
    }

    #[test]
    fn test_citizen_assignment_is_forbidden() {
        let ana = Principal::new("ana@example.org");
        let decision = authorize(Some(&ana), Standing::default(), Action::AssignIssue, Target::None);
        assert_eq!(decision, Decision::Deny(DenyReason::AdminRequired));
        assert!(matches!(
            DenyReason::AdminRequired.into_error(),
            AppError::Forbidden(_)
        ));
    }

    #[test]
    fn test_blocked_admin_cannot_mutate_but_can_read() {
        let boss = Principal::new("boss@city.gov");
        let blocked = Standing {
            role: Role::Admin,
            blocked: true,
        };
        assert_eq!(
            authorize(Some(&boss), blocked, Action::AssignIssue, Target::None),
            Decision::Deny(DenyReason::Blocked)
        );
        assert_eq!(
            authorize(Some(&boss), blocked, Action::ListCitizens, Target::None),
            Decision::Allow
        );
    }

    #[test]
    fn test_staff_self_service_matches_identity_not_role() {
        let issue = issue_by("ana@example.org", Some("sam@city.gov"));
        let sam = Principal::new("sam@city.gov");
        let other = Principal::new("kim@city.gov");
        let staff = Standing {
            role: Role::Staff,
            blocked: false,
        };

        let target = Target::Issue(&issue);
        assert_eq!(
            authorize(Some(&sam), Standing::default(), Action::StaffSetIssueStatus, target),
            Decision::Allow
        );
        assert_eq!(
            authorize(Some(&other), staff, Action::StaffSetIssueStatus, target),
            Decision::Deny(DenyReason::NotAssignee)
        );
        // Admins go through the general status path, not the self-service one.
        assert_eq!(
            authorize(Some(&other), admin(), Action::StaffSetIssueStatus, target),
            Decision::Deny(DenyReason::NotAssignee)
        );
        assert_eq!(
            authorize(Some(&other), admin(), Action::SetIssueStatus, target),
            Decision::Allow
        );
    }

    #[test]
    fn test_reporter_or_admin_may_edit() {
        let issue = issue_by("ana@example.org", None);
        let ana = Principal::new("ana@example.org");
        let bob = Principal::new("bob@example.org");
        let target = Target::Issue(&issue);

        assert_eq!(
            authorize(Some(&ana), Standing::default(), Action::EditIssue, target),
            Decision::Allow
        );
        assert_eq!(
            authorize(Some(&bob), Standing::default(), Action::EditIssue, target),
            Decision::Deny(DenyReason::NotOwner)
        );
        assert_eq!(
            authorize(Some(&bob), admin(), Action::DeleteIssue, target),
            Decision::Allow
        );
    }

    #[test]
    fn test_self_only_rejects_other_emails_even_for_admins() {
        let boss = Principal::new("boss@city.gov");
        assert_eq!(
            authorize(
                Some(&boss),
                admin(),
                Action::CreateCitizen,
                Target::Email("ana@example.org")
            ),
            Decision::Deny(DenyReason::NotOwner)
        );
        assert_eq!(
            authorize(
                Some(&boss),
                admin(),
                Action::GetCitizenStats,
                Target::Email("ana@example.org")
            ),
            Decision::Allow
        );
    }
}
