//! Admin impersonation state.
//!
//! An entry maps an admin's own user id to the user they are currently acting as. Session
//! resolution consults the store on every request (see [`crate::auth::session`]). Entries are
//! always keyed by the id in the admin's session token, never by the overlaid identity.
//!
//! The store never checks who may impersonate whom; the `/api/impersonate` handler does.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use tracing::instrument;

use crate::db::errors::DbError;
use crate::errors::Result;
use crate::types::{UserId, abbrev_uuid};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ImpersonationEntry {
    pub impersonating_user_id: UserId,
    pub original_user_email: String,
    pub started_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait ImpersonationStore: Send + Sync {
    async fn get(&self, admin_id: UserId) -> Result<Option<ImpersonationEntry>>;

    /// Replaces any existing entry for `admin_id`.
    async fn set(&self, admin_id: UserId, entry: ImpersonationEntry) -> Result<()>;

    /// Returns whether an entry was removed.
    async fn clear(&self, admin_id: UserId) -> Result<bool>;
}

/// Process-local store. Every instance has its own view and a restart ends all impersonation.
#[derive(Clone, Default)]
pub struct InMemoryImpersonationStore {
    entries: Arc<DashMap<UserId, ImpersonationEntry>>,
}

impl InMemoryImpersonationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ImpersonationStore for InMemoryImpersonationStore {
    async fn get(&self, admin_id: UserId) -> Result<Option<ImpersonationEntry>> {
        Ok(self.entries.get(&admin_id).map(|e| e.value().clone()))
    }

    async fn set(&self, admin_id: UserId, entry: ImpersonationEntry) -> Result<()> {
        self.entries.insert(admin_id, entry);
        Ok(())
    }

    async fn clear(&self, admin_id: UserId) -> Result<bool> {
        Ok(self.entries.remove(&admin_id).is_some())
    }
}

/// Store shared between instances through the `impersonation_sessions` table.
#[derive(Clone)]
pub struct PostgresImpersonationStore {
    pool: PgPool,
}

impl PostgresImpersonationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ImpersonationStore for PostgresImpersonationStore {
    #[instrument(skip(self), fields(admin_id = %abbrev_uuid(&admin_id)), err)]
    async fn get(&self, admin_id: UserId) -> Result<Option<ImpersonationEntry>> {
        let entry = sqlx::query_as::<_, ImpersonationEntry>(
            "SELECT impersonating_user_id, original_user_email, started_at FROM impersonation_sessions WHERE admin_user_id = $1",
        )
        .bind(admin_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(entry)
    }

    #[instrument(skip(self, entry), fields(admin_id = %abbrev_uuid(&admin_id), target = %abbrev_uuid(&entry.impersonating_user_id)), err)]
    async fn set(&self, admin_id: UserId, entry: ImpersonationEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO impersonation_sessions (admin_user_id, impersonating_user_id, original_user_email, started_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (admin_user_id) DO UPDATE
            SET impersonating_user_id = EXCLUDED.impersonating_user_id,
                original_user_email = EXCLUDED.original_user_email,
                started_at = EXCLUDED.started_at
            "#,
        )
        .bind(admin_id)
        .bind(entry.impersonating_user_id)
        .bind(&entry.original_user_email)
        .bind(entry.started_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(())
    }

    #[instrument(skip(self), fields(admin_id = %abbrev_uuid(&admin_id)), err)]
    async fn clear(&self, admin_id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM impersonation_sessions WHERE admin_user_id = $1")
            .bind(admin_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(result.rows_affected() > 0)
    }
}
