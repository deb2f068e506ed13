//! HTTP request handlers.
//!
//! Each handler is responsible for:
//! - Request deserialization
//! - Authorization checks through [`crate::auth::current_user::Authenticated`]
//! - Calling into the stores held by [`crate::AppState`]
//! - Response serialization
//!
//! # Handler Modules
//!
//! - [`auth`]: Login and logout
//! - [`csrf`]: CSRF token issue
//! - [`impersonation`]: Starting and stopping impersonation
//! - [`users`]: The caller's identity, user listing and role changes
//!
//! Rate limiting and CSRF enforcement happen in middleware before any of these run.

pub mod auth;
pub mod csrf;
pub mod impersonation;
pub mod users;
