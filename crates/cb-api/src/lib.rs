//! # cb-api
//!
//! The HTTP routing layer for Civic-Board.

pub mod error;
pub mod handlers;
pub mod middleware;

use actix_web::web;
use cb_core::AppError;

use crate::error::ApiError;

/// Configures every route of the civic issue API.
///
/// # Developer Note
/// Fixed paths are registered before the `{id}` paths that would also match
/// them. Malformed JSON bodies, path segments and query strings are answered
/// with the same JSON error body as domain failures.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        ApiError(AppError::ValidationError(err.to_string())).into()
    }))
    .app_data(web::PathConfig::default().error_handler(|err, _req| {
        ApiError(AppError::ValidationError(err.to_string())).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        ApiError(AppError::ValidationError(err.to_string())).into()
    }))
    .route("/", web::get().to(handlers::index))
    // Issues
    .route("/all-issues", web::get().to(handlers::list_issues))
    .route("/latest-issues", web::get().to(handlers::latest_issues))
    .route("/issues/summary", web::get().to(handlers::issue_summary))
    .route("/issues", web::post().to(handlers::create_issue))
    .route("/issues/citizen-stats/{email}", web::get().to(handlers::citizen_stats))
    .route("/issues/status/{id}", web::patch().to(handlers::set_issue_status))
    .route("/issues/resolve/{id}", web::patch().to(handlers::resolve_issue))
    .route("/issues/reject/{id}", web::patch().to(handlers::reject_issue))
    .route("/issues/assign/{id}", web::patch().to(handlers::assign_issue))
    .route("/issues/upvote/{id}", web::patch().to(handlers::upvote_issue))
    .route("/issues/{id}/status", web::patch().to(handlers::staff_set_issue_status))
    .route("/issues/{id}", web::get().to(handlers::get_issue))
    .route("/issues/{id}", web::put().to(handlers::edit_issue))
    .route("/issues/{id}", web::delete().to(handlers::delete_issue))
    .route("/my-issues/{email}", web::get().to(handlers::list_reporter_issues))
    .route("/timeline/{issue_id}", web::get().to(handlers::get_timeline))
    // Staff
    .route("/staff/stats", web::get().to(handlers::staff_stats))
    .route("/staff/assigned-issues", web::get().to(handlers::list_assigned_issues))
    .route("/staff", web::get().to(handlers::list_staff))
    .route("/staff", web::post().to(handlers::create_staff_application))
    .route("/staff/{id}", web::patch().to(handlers::review_staff_application))
    .route("/staff/{id}", web::delete().to(handlers::delete_staff))
    // Citizens
    .route("/citizen", web::get().to(handlers::list_citizens))
    .route("/citizen", web::post().to(handlers::create_citizen))
    .route("/citizen/premium/{email}", web::put().to(handlers::set_citizen_premium))
    .route("/citizen/block/{id}", web::patch().to(handlers::block_citizen))
    .route("/citizen/{id}/role", web::patch().to(handlers::set_citizen_role))
    .route("/citizen/{email}", web::get().to(handlers::get_citizen))
    .route("/citizens/{email}/role", web::get().to(handlers::citizen_role));
}
