use crate::api::models::users::Role;
use crate::db::errors::{DbError, Result};
use crate::db::models::users::{UserCreateDBRequest, UserDBResponse};
use crate::types::{UserId, abbrev_uuid};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

/// Lookup and mutation of user accounts.
#[async_trait::async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse>;

    async fn get_by_id(&self, id: UserId) -> Result<Option<UserDBResponse>>;

    /// Emails are matched case-insensitively.
    async fn get_by_email(&self, email: &str) -> Result<Option<UserDBResponse>>;

    async fn list(&self) -> Result<Vec<UserDBResponse>>;

    /// Fails with [`DbError::NotFound`] when the user does not exist.
    async fn update_role(&self, id: UserId, role: Role) -> Result<UserDBResponse>;

    async fn set_password_hash(&self, id: UserId, password_hash: Option<&str>) -> Result<()>;
}

const USER_COLUMNS: &str = "id, email, name, role, password_hash, created_at, updated_at";

/// PostgreSQL-backed [`UserStore`].
#[derive(Clone)]
pub struct PostgresUserStore {
    pool: PgPool,
}

impl PostgresUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UserStore for PostgresUserStore {
    #[instrument(skip(self, request), fields(email = %request.email, role = %request.role), err)]
    async fn create(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!(
            "INSERT INTO users (id, email, name, role, password_hash) VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&request.email)
        .bind(&request.name)
        .bind(request.role)
        .bind(&request.password_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&self, id: UserId) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    #[instrument(skip(self, email), err)]
    async fn get_by_email(&self, email: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!("SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    #[instrument(skip(self), err)]
    async fn list(&self) -> Result<Vec<UserDBResponse>> {
        let users = sqlx::query_as::<_, UserDBResponse>(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at, email"))
            .fetch_all(&self.pool)
            .await?;

        Ok(users)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id), role = %role), err)]
    async fn update_role(&self, id: UserId, role: Role) -> Result<UserDBResponse> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!(
            "UPDATE users SET role = $2, updated_at = NOW() WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(role)
        .fetch_optional(&self.pool)
        .await?;

        user.ok_or(DbError::NotFound)
    }

    #[instrument(skip(self, password_hash), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn set_password_hash(&self, id: UserId, password_hash: Option<&str>) -> Result<()> {
        let result = sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}
