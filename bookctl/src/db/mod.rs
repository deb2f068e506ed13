//! Persistence for users, API tokens and (optionally) impersonation sessions.
//!
//! Each store is a trait in [`handlers`] with two implementations:
//!
//! - a PostgreSQL one over a [`sqlx::PgPool`], used in production
//! - an in-memory one, used by tests and by single-process development setups
//!
//! Request/record types live in [`models`]. Database failures are categorised by
//! [`errors::DbError`] before they reach the HTTP layer.

pub mod errors;
pub mod handlers;
pub mod models;
