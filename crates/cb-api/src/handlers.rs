//! # cb-api Handlers
//!
//! This module coordinates the flow between HTTP requests and the engine.
//! Handlers resolve the caller, hand the request to `CivicEngine` and render
//! its answer as JSON; every rule lives in the engine.

use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use cb_core::{
    AppError, AssignedStaff, IdentityProvider, Issue, IssuePatch, NewCitizen, NewIssue,
    NewStaffApplication, PageRequest, Principal, ReviewDecision, Role,
};
use cb_engine::CivicEngine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// State shared across all Actix-web workers.
pub struct AppState {
    pub engine: CivicEngine,
    pub identity: Box<dyn IdentityProvider>,
}

type ApiResult = Result<HttpResponse, ApiError>;

/// Resolves the `Authorization` header. No header means an anonymous caller;
/// a header the identity provider rejects is an error, never anonymous.
async fn caller(data: &AppState, req: &HttpRequest) -> Result<Option<Principal>, ApiError> {
    let Some(value) = req.headers().get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let credential = value.to_str().map_err(|_| AppError::Unauthenticated)?;
    Ok(Some(data.identity.authenticate(credential).await?))
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
}

#[derive(Deserialize)]
pub struct LatestQuery {
    pub limit: Option<u64>,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub search: Option<String>,
}

#[derive(Deserialize)]
pub struct StatusBody {
    pub status: String,
}

#[derive(Deserialize)]
pub struct RoleBody {
    pub role: Role,
}

#[derive(Deserialize)]
pub struct BlockBody {
    pub blocked: bool,
}

#[derive(Deserialize)]
pub struct ReviewBody {
    pub status: ReviewDecision,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpvoteResponse {
    upvote_count: u64,
}

#[derive(Serialize)]
struct RoleResponse {
    role: Role,
}

#[derive(Serialize)]
struct RejectResponse {
    modified: bool,
    issue: Option<Issue>,
}

pub async fn index() -> HttpResponse {
    HttpResponse::Ok().body("Civic-Board issue service is running")
}

// ── Issues ──────────────────────────────────────────────────────────────────

pub async fn create_issue(
    data: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<NewIssue>,
) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let issue = data
        .engine
        .create_issue(principal.as_ref(), body.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(issue))
}

pub async fn get_issue(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let issue = data
        .engine
        .get_issue(principal.as_ref(), path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(issue))
}

pub async fn list_issues(
    data: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<PageQuery>,
) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let page = PageRequest::new(query.page.unwrap_or(1));
    let issues = data.engine.list_issues(principal.as_ref(), page).await?;
    Ok(HttpResponse::Ok().json(issues))
}

pub async fn latest_issues(
    data: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<LatestQuery>,
) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let issues = data
        .engine
        .latest_issues(principal.as_ref(), query.limit)
        .await?;
    Ok(HttpResponse::Ok().json(issues))
}

pub async fn issue_summary(data: web::Data<AppState>, req: HttpRequest) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let summary = data.engine.issue_summary(principal.as_ref()).await?;
    Ok(HttpResponse::Ok().json(summary))
}

pub async fn list_reporter_issues(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let issues = data
        .engine
        .list_reporter_issues(principal.as_ref(), &path)
        .await?;
    Ok(HttpResponse::Ok().json(issues))
}

pub async fn edit_issue(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Json<IssuePatch>,
) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let issue = data
        .engine
        .edit_issue(principal.as_ref(), path.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(issue))
}

pub async fn delete_issue(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> ApiResult {
    let principal = caller(&data, &req).await?;
    data.engine
        .delete_issue(principal.as_ref(), path.into_inner())
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn set_issue_status(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Json<StatusBody>,
) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let issue = data
        .engine
        .set_issue_status(principal.as_ref(), path.into_inner(), &body.status)
        .await?;
    Ok(HttpResponse::Ok().json(issue))
}

pub async fn staff_set_issue_status(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Json<StatusBody>,
) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let issue = data
        .engine
        .staff_set_issue_status(principal.as_ref(), path.into_inner(), &body.status)
        .await?;
    Ok(HttpResponse::Ok().json(issue))
}

pub async fn resolve_issue(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let issue = data
        .engine
        .resolve_issue(principal.as_ref(), path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(issue))
}

/// Rejecting an issue that is not pending succeeds without changing it.
pub async fn reject_issue(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let issue = data
        .engine
        .reject_issue(principal.as_ref(), path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(RejectResponse {
        modified: issue.is_some(),
        issue,
    }))
}

pub async fn assign_issue(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Json<AssignedStaff>,
) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let issue = data
        .engine
        .assign_issue(principal.as_ref(), path.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(issue))
}

pub async fn upvote_issue(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let upvote_count = data
        .engine
        .upvote_issue(principal.as_ref(), path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(UpvoteResponse { upvote_count }))
}

pub async fn get_timeline(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let entries = data
        .engine
        .get_timeline(principal.as_ref(), path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(entries))
}

pub async fn citizen_stats(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let stats = data.engine.citizen_stats(principal.as_ref(), &path).await?;
    Ok(HttpResponse::Ok().json(stats))
}

// ── Staff ───────────────────────────────────────────────────────────────────

/// Workload of the calling staff member.
pub async fn staff_stats(data: web::Data<AppState>, req: HttpRequest) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let email = principal
        .as_ref()
        .map(|p| p.email.clone())
        .ok_or(AppError::Unauthenticated)?;
    let stats = data.engine.staff_stats(principal.as_ref(), &email).await?;
    Ok(HttpResponse::Ok().json(stats))
}

pub async fn list_assigned_issues(data: web::Data<AppState>, req: HttpRequest) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let issues = data.engine.list_assigned_issues(principal.as_ref()).await?;
    Ok(HttpResponse::Ok().json(issues))
}

pub async fn list_staff(data: web::Data<AppState>, req: HttpRequest) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let staff = data.engine.list_staff(principal.as_ref()).await?;
    Ok(HttpResponse::Ok().json(staff))
}

pub async fn create_staff_application(
    data: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<NewStaffApplication>,
) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let application = data
        .engine
        .create_staff_application(principal.as_ref(), body.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(application))
}

pub async fn review_staff_application(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Json<ReviewBody>,
) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let application = data
        .engine
        .review_staff_application(principal.as_ref(), path.into_inner(), body.status)
        .await?;
    Ok(HttpResponse::Ok().json(application))
}

pub async fn delete_staff(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> ApiResult {
    let principal = caller(&data, &req).await?;
    data.engine
        .delete_staff(principal.as_ref(), path.into_inner())
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

// ── Citizens ────────────────────────────────────────────────────────────────

pub async fn list_citizens(
    data: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<SearchQuery>,
) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let search = query.search.as_deref().unwrap_or_default();
    let citizens = data.engine.list_citizens(principal.as_ref(), search).await?;
    Ok(HttpResponse::Ok().json(citizens))
}

pub async fn create_citizen(
    data: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<NewCitizen>,
) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let citizen = data
        .engine
        .create_citizen(principal.as_ref(), body.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(citizen))
}

pub async fn get_citizen(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let citizen = data.engine.get_citizen(principal.as_ref(), &path).await?;
    Ok(HttpResponse::Ok().json(citizen))
}

pub async fn citizen_role(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let role = data.engine.citizen_role(principal.as_ref(), &path).await?;
    Ok(HttpResponse::Ok().json(RoleResponse { role }))
}

pub async fn set_citizen_role(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Json<RoleBody>,
) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let citizen = data
        .engine
        .set_citizen_role(principal.as_ref(), path.into_inner(), body.role)
        .await?;
    Ok(HttpResponse::Ok().json(citizen))
}

pub async fn block_citizen(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Json<BlockBody>,
) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let citizen = data
        .engine
        .block_citizen(principal.as_ref(), path.into_inner(), body.blocked)
        .await?;
    Ok(HttpResponse::Ok().json(citizen))
}

pub async fn set_citizen_premium(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> ApiResult {
    let principal = caller(&data, &req).await?;
    let citizen = data
        .engine
        .set_citizen_premium(principal.as_ref(), &path)
        .await?;
    Ok(HttpResponse::Ok().json(citizen))
}
