//! API bearer token validation.
//!
//! A presented token goes through these steps:
//!
//! 1. A format check against the configured prefix. No store access happens here.
//! 2. A lookup by SHA-256 digest.
//! 3. Activity and expiry checks.
//! 4. A best-effort `last_used_at` update.
//!
//! Expected failures come back as a [`TokenRejection`]; nothing here panics or bubbles up a
//! store error to the caller.

use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, instrument, trace, warn};

use crate::api::models::users::CurrentUser;
use crate::crypto::hash_token;
use crate::db::handlers::{ApiTokenStore, UserStore};
use crate::types::{ApiTokenId, Clock, abbrev_uuid};

/// Why a bearer token was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenRejection {
    #[error("token is empty or lacks the expected prefix")]
    InvalidTokenFormat,
    #[error("no token matches")]
    InvalidToken,
    #[error("token has been deactivated")]
    TokenDisabled,
    #[error("token has expired")]
    TokenExpired,
    #[error("token could not be validated")]
    AuthenticationFailed,
}

impl TokenRejection {
    pub fn user_message(&self) -> &'static str {
        match self {
            TokenRejection::InvalidTokenFormat => "Invalid token format",
            TokenRejection::InvalidToken => "Invalid token",
            TokenRejection::TokenDisabled => "Token is disabled",
            TokenRejection::TokenExpired => "Token has expired",
            TokenRejection::AuthenticationFailed => "Authentication failed",
        }
    }
}

/// The capability names granted to a token, e.g. `read` and `write`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Scopes(BTreeSet<String>);

impl Scopes {
    /// Parse the stored form: either a JSON string array or a comma separated list.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.starts_with('[') {
            return match serde_json::from_str::<Vec<String>>(raw) {
                Ok(list) => list.into_iter().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
                Err(e) => {
                    warn!(error = %e, "Stored token scopes are not a valid JSON array, granting none");
                    Self::default()
                }
            };
        }

        raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl FromIterator<String> for Scopes {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Exact membership test; there is no scope hierarchy.
pub fn has_scope(scopes: &Scopes, required: &str) -> bool {
    scopes.contains(required)
}

/// A successfully validated bearer token.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub token_id: ApiTokenId,
    pub user: CurrentUser,
    pub scopes: Scopes,
}

/// Validates bearer tokens against the token and user stores.
pub struct ApiTokenValidator<'a> {
    pub tokens: &'a dyn ApiTokenStore,
    pub users: &'a dyn UserStore,
    pub clock: &'a dyn Clock,
    pub prefix: &'a str,
}

impl ApiTokenValidator<'_> {
    #[instrument(skip_all)]
    pub async fn validate(&self, token: &str) -> Result<TokenGrant, TokenRejection> {
        if token.len() <= self.prefix.len() || !token.starts_with(self.prefix) {
            trace!("Token rejected by format check");
            return Err(TokenRejection::InvalidTokenFormat);
        }

        let record = match self.tokens.get_by_hash(&hash_token(token)).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("No token matches presented hash");
                return Err(TokenRejection::InvalidToken);
            }
            Err(e) => {
                error!(error = %e, "Token lookup failed");
                return Err(TokenRejection::AuthenticationFailed);
            }
        };

        if !record.active {
            debug!(token_id = %abbrev_uuid(&record.id), "Token is deactivated");
            return Err(TokenRejection::TokenDisabled);
        }

        let now = self.clock.now();
        if record.is_expired_at(now) {
            debug!(token_id = %abbrev_uuid(&record.id), "Token is expired");
            return Err(TokenRejection::TokenExpired);
        }

        let user = match self.users.get_by_id(record.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!(token_id = %abbrev_uuid(&record.id), "Token owner no longer exists");
                return Err(TokenRejection::InvalidToken);
            }
            Err(e) => {
                error!(error = %e, "Token owner lookup failed");
                return Err(TokenRejection::AuthenticationFailed);
            }
        };

        if let Err(e) = self.tokens.touch_last_used(record.id, now).await {
            warn!(token_id = %abbrev_uuid(&record.id), error = %e, "Failed to record token use");
        }

        Ok(TokenGrant {
            token_id: record.id,
            user: user.into(),
            scopes: Scopes::parse(&record.scopes),
        })
    }
}
