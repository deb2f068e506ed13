use axum::{
    Json,
    http::{StatusCode, header},
    response::{AppendHeaders, IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::api::models::users::UserResponse;

/// Request to login
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Email address
    pub email: String,
    /// Password
    pub password: String,
}

/// Response after successful login
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    /// User information
    pub user: UserResponse,
    /// Success message
    pub message: String,
}

/// Generic success response
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthSuccessResponse {
    pub message: String,
}

/// Structured response for successful login
pub struct LoginResponse {
    pub auth_response: AuthResponse,
    pub cookie: String,
}

impl IntoResponse for LoginResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, AppendHeaders([(header::SET_COOKIE, self.cookie)]), Json(self.auth_response)).into_response()
    }
}

/// Structured response for logout
pub struct LogoutResponse {
    pub auth_response: AuthSuccessResponse,
    pub cookie: String,
}

impl IntoResponse for LogoutResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, AppendHeaders([(header::SET_COOKIE, self.cookie)]), Json(self.auth_response)).into_response()
    }
}
