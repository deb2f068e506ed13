//! Authentication and authorization.
//!
//! # Authentication Methods
//!
//! ## 1. Session Authentication
//!
//! Browser-based authentication using HTTP-only cookies:
//! - Users log in via `/authentication/login` with email/password
//! - The cookie holds a signed JWT naming the signed-in user
//! - Every request re-reads that user and applies any impersonation entry
//! - State-changing requests must also carry a CSRF token from `/api/csrf`
//!
//! ## 2. API Token Authentication
//!
//! Token-based authentication for programmatic access:
//! - Tokens are minted with `bookctl tokens create` and only their SHA-256 digest is stored
//! - Passed in `Authorization: Bearer <token>` header
//! - Carry a set of scopes (`read`, `write`, ...) and an optional expiry
//! - A present bearer header is authoritative: a bad token never falls back to the cookie
//!
//! # Authorization
//!
//! There is no policy engine. Handlers take an [`current_user::Authenticated`] extractor and
//! call `require_role` / `require_scope` for whatever the endpoint needs.
//!
//! # Modules
//!
//! - [`api_tokens`]: Bearer token validation and scopes
//! - [`csrf`]: Anti-forgery tokens and the middleware enforcing them
//! - [`current_user`]: The unified auth gate and handler extractors
//! - [`impersonation`]: Admin impersonation state
//! - [`password`]: Password hashing and verification using Argon2
//! - [`session`]: JWT session cookies and session resolution

pub mod api_tokens;
pub mod csrf;
pub mod current_user;
pub mod impersonation;
pub mod password;
pub mod session;
