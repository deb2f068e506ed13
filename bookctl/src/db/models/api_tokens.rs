use crate::types::{ApiTokenId, UserId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Database request for storing a freshly minted API token.
///
/// Only the SHA-256 digest of the raw token is ever handed to a store.
#[derive(Debug, Clone)]
pub struct ApiTokenCreateDBRequest {
    pub user_id: UserId,
    pub name: String,
    pub token_hash: String,
    pub scopes: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Database response for an API token
#[derive(Debug, Clone, FromRow)]
pub struct ApiTokenDBResponse {
    pub id: ApiTokenId,
    pub user_id: UserId,
    pub token_hash: String,
    pub name: String,
    /// Raw stored form: comma separated or a JSON array
    pub scopes: String,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiTokenDBResponse {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}
