use crate::api::models::users::Role;
use crate::auth::{api_tokens::TokenRejection, csrf::CsrfRejection};
use crate::db::errors::DbError;
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error as ThisError;

/// What a caller was missing when an endpoint refused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Role(Role),
    Scope(String),
    Session,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Role(role) => write!(f, "role {role}"),
            Requirement::Scope(scope) => write!(f, "scope '{scope}'"),
            Requirement::Session => write!(f, "a browser session"),
        }
    }
}

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Bearer token was presented and rejected
    #[error("API token rejected: {0}")]
    Token(TokenRejection),

    /// Caller is authenticated but lacks the role, scope or credential kind the endpoint needs
    #[error("Insufficient permissions to access {resource}: requires {required}")]
    InsufficientPermissions { required: Requirement, resource: String },

    /// State-changing session request without a valid anti-forgery token
    #[error("CSRF check failed: {0}")]
    Csrf(CsrfRejection),

    /// Fixed-window request budget exhausted
    #[error("Rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Conflict error, e.g., for unique constraint violations
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<TokenRejection> for Error {
    fn from(rejection: TokenRejection) -> Self {
        Error::Token(rejection)
    }
}

impl From<CsrfRejection> for Error {
    fn from(rejection: CsrfRejection) -> Self {
        Error::Csrf(rejection)
    }
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::Token(rejection) => match rejection {
                TokenRejection::InvalidTokenFormat | TokenRejection::InvalidToken | TokenRejection::TokenDisabled => {
                    StatusCode::UNAUTHORIZED
                }
                TokenRejection::TokenExpired => StatusCode::GONE,
                TokenRejection::AuthenticationFailed => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::InsufficientPermissions { .. } => StatusCode::FORBIDDEN,
            Error::Csrf(_) => StatusCode::FORBIDDEN,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::Token(rejection) => rejection.user_message().to_string(),
            Error::InsufficientPermissions { .. } => "Forbidden".to_string(),
            Error::Csrf(rejection) => rejection.user_message().to_string(),
            Error::RateLimited { .. } => "Too many requests".to_string(),
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { resource, .. } => format!("{resource} not found"),
            Error::Conflict { message } => message.clone(),
            Error::Internal { .. } | Error::Other(_) => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { table, constraint, .. } => match (table.as_deref(), constraint.as_deref()) {
                    (Some("users"), Some(c)) if c.contains("email") => "An account with this email address already exists".to_string(),
                    _ => "Resource already exists".to_string(),
                },
                DbError::Other(_) => "Internal server error".to_string(),
            },
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_))
            | Error::Internal { .. }
            | Error::Other(_)
            | Error::Token(TokenRejection::AuthenticationFailed) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Database(_) | Error::Conflict { .. } => {
                tracing::warn!("Database constraint error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::Token(_) | Error::InsufficientPermissions { .. } | Error::Csrf(_) => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::RateLimited { .. } => {
                tracing::warn!("{}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let mut response = (status, Json(json!({ "error": self.user_message() }))).into_response();

        if let Error::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }

        response
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
