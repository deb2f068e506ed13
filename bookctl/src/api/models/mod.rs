pub mod auth;
pub mod csrf;
pub mod impersonation;
pub mod users;
