use crate::db::errors::Result;
use crate::db::models::api_tokens::{ApiTokenCreateDBRequest, ApiTokenDBResponse};
use crate::types::{ApiTokenId, UserId, abbrev_uuid};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

/// Persistence for API tokens. Tokens are addressed by the SHA-256 hex digest of their raw value.
#[async_trait::async_trait]
pub trait ApiTokenStore: Send + Sync {
    async fn create(&self, request: &ApiTokenCreateDBRequest) -> Result<ApiTokenDBResponse>;

    async fn get_by_hash(&self, token_hash: &str) -> Result<Option<ApiTokenDBResponse>>;

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<ApiTokenDBResponse>>;

    async fn touch_last_used(&self, id: ApiTokenId, at: DateTime<Utc>) -> Result<()>;

    /// Returns false when no such token exists.
    async fn deactivate(&self, id: ApiTokenId) -> Result<bool>;

    /// Deletes every token that is inactive or expired as of `now`, returning how many went.
    async fn delete_unusable(&self, now: DateTime<Utc>) -> Result<u64>;
}

const TOKEN_COLUMNS: &str = "id, user_id, token_hash, name, scopes, active, expires_at, last_used_at, created_at";

/// PostgreSQL-backed [`ApiTokenStore`].
#[derive(Clone)]
pub struct PostgresApiTokenStore {
    pool: PgPool,
}

impl PostgresApiTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ApiTokenStore for PostgresApiTokenStore {
    #[instrument(skip(self, request), fields(name = %request.name, user_id = %abbrev_uuid(&request.user_id)), err)]
    async fn create(&self, request: &ApiTokenCreateDBRequest) -> Result<ApiTokenDBResponse> {
        let token = sqlx::query_as::<_, ApiTokenDBResponse>(&format!(
            "INSERT INTO api_tokens (id, user_id, token_hash, name, scopes, expires_at) VALUES ($1, $2, $3, $4, $5, $6) RETURNING {TOKEN_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(&request.token_hash)
        .bind(&request.name)
        .bind(&request.scopes)
        .bind(request.expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(token)
    }

    #[instrument(skip_all, err)]
    async fn get_by_hash(&self, token_hash: &str) -> Result<Option<ApiTokenDBResponse>> {
        let token = sqlx::query_as::<_, ApiTokenDBResponse>(&format!("SELECT {TOKEN_COLUMNS} FROM api_tokens WHERE token_hash = $1"))
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;

        Ok(token)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<ApiTokenDBResponse>> {
        let tokens = sqlx::query_as::<_, ApiTokenDBResponse>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM api_tokens WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tokens)
    }

    #[instrument(skip(self), fields(token_id = %abbrev_uuid(&id)), err)]
    async fn touch_last_used(&self, id: ApiTokenId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE api_tokens SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(token_id = %abbrev_uuid(&id)), err)]
    async fn deactivate(&self, id: ApiTokenId) -> Result<bool> {
        let result = sqlx::query("UPDATE api_tokens SET active = FALSE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn delete_unusable(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM api_tokens WHERE active = FALSE OR (expires_at IS NOT NULL AND expires_at <= $1)")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
