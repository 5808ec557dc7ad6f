//! # Governance
//!
//! Citizen registration, roles, blocking, and the staff application review
//! that promotes an applicant to staff.

use cb_core::{
    AppError, Citizen, NewCitizen, NewStaffApplication, Principal, Result, ReviewDecision,
    ReviewOutcome, Role, StaffApplication,
};
use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::gate::{Action, Target};
use crate::CivicEngine;

/// Upper bound on citizen search results.
pub const MAX_SEARCH_RESULTS: u64 = 5;

fn require_email(email: &str) -> Result<()> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::ValidationError(format!("invalid email `{email}`")));
    }
    Ok(())
}

impl CivicEngine {
    /// Registers the caller on first sign-in. A second registration with the
    /// same email changes nothing and fails with `Conflict`.
    #[instrument(skip_all)]
    pub async fn create_citizen(&self, principal: Option<&Principal>, new: NewCitizen) -> Result<Citizen> {
        self.authorize(principal, Action::CreateCitizen, Target::Email(&new.email))
            .await?;
        require_email(&new.email)?;

        let citizen = Citizen::registered(new, Utc::now());
        if !self.citizens.insert_if_absent(citizen.clone()).await? {
            return Err(AppError::Conflict("citizen already exists".to_string()));
        }
        info!(citizen_id = %citizen.id, "citizen registered");
        Ok(citizen)
    }

    pub async fn get_citizen(&self, principal: Option<&Principal>, email: &str) -> Result<Citizen> {
        self.authorize(principal, Action::GetCitizen, Target::Email(email))
            .await?;
        self.citizens
            .find_by_email(email)
            .await?
            .ok_or_else(|| AppError::not_found("Citizen", email))
    }

    /// Role of any email; unknown emails are plain citizens.
    pub async fn citizen_role(&self, principal: Option<&Principal>, email: &str) -> Result<Role> {
        self.authorize(principal, Action::GetCitizenRole, Target::None)
            .await?;
        Ok(self
            .citizens
            .find_by_email(email)
            .await?
            .map(|citizen| citizen.role)
            .unwrap_or_default())
    }

    /// All citizens, or at most `MAX_SEARCH_RESULTS` matches for `search`.
    pub async fn list_citizens(&self, principal: Option<&Principal>, search: &str) -> Result<Vec<Citizen>> {
        self.authorize(principal, Action::ListCitizens, Target::None)
            .await?;
        let search = search.trim();
        let limit = (!search.is_empty()).then_some(MAX_SEARCH_RESULTS);
        Ok(self.citizens.list(search, limit).await?)
    }

    #[instrument(skip_all, fields(citizen_id = %id, %role))]
    pub async fn set_citizen_role(
        &self,
        principal: Option<&Principal>,
        id: Uuid,
        role: Role,
    ) -> Result<Citizen> {
        self.authorize(principal, Action::SetCitizenRole, Target::None)
            .await?;
        let citizen = self
            .citizens
            .set_role(id, role)
            .await?
            .ok_or_else(|| AppError::not_found("Citizen", id))?;
        info!("citizen role changed");
        Ok(citizen)
    }

    #[instrument(skip_all, fields(citizen_id = %id, blocked = blocked))]
    pub async fn block_citizen(
        &self,
        principal: Option<&Principal>,
        id: Uuid,
        blocked: bool,
    ) -> Result<Citizen> {
        self.authorize(principal, Action::BlockCitizen, Target::None)
            .await?;
        let citizen = self
            .citizens
            .set_blocked(id, blocked)
            .await?
            .ok_or_else(|| AppError::not_found("Citizen", id))?;
        info!("citizen block status changed");
        Ok(citizen)
    }

    /// Marks a citizen premium, e.g. after a completed payment.
    pub async fn set_citizen_premium(&self, principal: Option<&Principal>, email: &str) -> Result<Citizen> {
        self.authorize(principal, Action::SetCitizenPremium, Target::Email(email))
            .await?;
        self.citizens
            .set_premium(email, true)
            .await?
            .ok_or_else(|| AppError::not_found("Citizen", email))
    }

    /// Files the caller's application to join the staff.
    #[instrument(skip_all)]
    pub async fn create_staff_application(
        &self,
        principal: Option<&Principal>,
        new: NewStaffApplication,
    ) -> Result<StaffApplication> {
        self.authorize(
            principal,
            Action::CreateStaffApplication,
            Target::Email(&new.staff_email),
        )
        .await?;
        require_email(&new.staff_email)?;
        if new.staff_name.trim().is_empty() {
            return Err(AppError::ValidationError("staff name is required".to_string()));
        }

        let application = StaffApplication::submitted(new, Utc::now());
        if !self.staff.insert_if_absent(application.clone()).await? {
            return Err(AppError::Conflict("staff already exists".to_string()));
        }
        info!(application_id = %application.id, "staff application submitted");
        Ok(application)
    }

    pub async fn list_staff(&self, principal: Option<&Principal>) -> Result<Vec<StaffApplication>> {
        self.authorize(principal, Action::ListStaff, Target::None)
            .await?;
        Ok(self.staff.list().await?)
    }

    /// Approves or rejects an application. Approval promotes the applicant's
    /// citizen record to staff in the same atomic store operation.
    #[instrument(skip_all, fields(application_id = %id, ?decision))]
    pub async fn review_staff_application(
        &self,
        principal: Option<&Principal>,
        id: Uuid,
        decision: ReviewDecision,
    ) -> Result<StaffApplication> {
        self.authorize(principal, Action::ReviewStaffApplication, Target::None)
            .await?;

        match self.staff.review(id, decision).await? {
            ReviewOutcome::Reviewed(application) => {
                info!(staff = %application.staff_email, "staff application reviewed");
                Ok(application)
            }
            ReviewOutcome::CitizenMissing => Err(AppError::NotFound(
                "Citizen for staff application".to_string(),
                id.to_string(),
            )),
            ReviewOutcome::Missing => Err(AppError::not_found("Staff application", id)),
        }
    }

    /// Removes a staff record. The citizen's role is left as it is.
    #[instrument(skip_all, fields(application_id = %id))]
    pub async fn delete_staff(&self, principal: Option<&Principal>, id: Uuid) -> Result<()> {
        self.authorize(principal, Action::DeleteStaff, Target::None)
            .await?;
        if !self.staff.delete(id).await? {
            return Err(AppError::not_found("Staff", id));
        }
        info!("staff deleted");
        Ok(())
    }
}
