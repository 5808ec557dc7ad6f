//! cb-api Middleware
//!
//! Request logging and CORS for the Civic-Board API.

use actix_cors::Cors;
use actix_web::http::{header, Method};
use actix_web::middleware::Logger;

/// Access log in the default format:
/// remote-ip "request-line" status-code response-size "referrer" "user-agent"
pub fn standard_middleware() -> Logger {
    Logger::default()
}

/// The dashboard is served from another origin and sends bearer tokens.
pub fn cors_policy() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allowed_methods(vec![
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allowed_headers(vec![header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(3600)
}
