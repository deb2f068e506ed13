//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! - **Authentication** (`/authentication/*`): Login and logout
//! - **CSRF** (`/api/csrf`): Anti-forgery token issue
//! - **Impersonation** (`/api/impersonate`): Start and stop acting as another user
//! - **Users** (`/api/me`, `/api/users/*`): The caller's identity and role administration
//!
//! Everything under `/api/` is rate limited and CSRF protected.

pub mod handlers;
pub mod models;
