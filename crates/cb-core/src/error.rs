//! # AppError
//!
//! Centralized error handling for the Civic-Board ecosystem.
//! Every failure maps onto one user-visible `ErrorKind`.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// The primary error type for all cb-core operations.
#[derive(Error, Debug)]
pub enum AppError {
    /// No credential, or one the identity provider rejected
    #[error("authentication required")]
    Unauthenticated,

    /// Authenticated but not allowed (wrong role, blocked, not the assignee)
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Resource not found (e.g., Issue, Citizen, Staff application)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// The principal already upvoted this issue
    #[error("already upvoted")]
    AlreadyVoted,

    /// Resource already exists (e.g., duplicate citizen registration)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed or incomplete input
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Requested status is unknown or unreachable from the current one
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Storage collaborator failure. The source is logged, never displayed.
    #[error("storage is unavailable")]
    StoreUnavailable(#[from] anyhow::Error),

    /// The mutation committed but its timeline entry could not be appended
    #[error("issue {0} was updated but its timeline entry was not recorded")]
    AuditGap(Uuid, #[source] anyhow::Error),
}

impl AppError {
    pub fn not_found(what: &str, id: impl ToString) -> Self {
        AppError::NotFound(what.to_string(), id.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Unauthenticated => ErrorKind::Unauthenticated,
            AppError::Forbidden(_) => ErrorKind::Forbidden,
            AppError::NotFound(..) => ErrorKind::NotFound,
            AppError::AlreadyVoted | AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::ValidationError(_) | AppError::InvalidState(_) => ErrorKind::Validation,
            AppError::StoreUnavailable(_) | AppError::AuditGap(..) => ErrorKind::StoreUnavailable,
        }
    }
}

/// The user-facing error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthenticated,
    Forbidden,
    NotFound,
    Conflict,
    Validation,
    StoreUnavailable,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Validation => "validation",
            ErrorKind::StoreUnavailable => "store_unavailable",
        }
    }
}

/// A specialized Result type for Civic-Board logic.
pub type Result<T> = std::result::Result<T, AppError>;
