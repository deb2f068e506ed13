//! In-memory store implementations.
//!
//! These keep everything in process-local maps and are lost on restart. They back the test
//! suite and are handy for running the service without PostgreSQL.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::api_tokens::ApiTokenStore;
use super::users::UserStore;
use crate::api::models::users::Role;
use crate::db::errors::{DbError, Result};
use crate::db::models::api_tokens::{ApiTokenCreateDBRequest, ApiTokenDBResponse};
use crate::db::models::users::{UserCreateDBRequest, UserDBResponse};
use crate::types::{ApiTokenId, UserId};

/// In-memory implementation of [`UserStore`].
#[derive(Clone, Default)]
pub struct InMemoryUserStore {
    users: Arc<RwLock<HashMap<UserId, UserDBResponse>>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl UserStore for InMemoryUserStore {
    async fn create(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let mut users = self.users.write();
        if users.values().any(|u| u.email.eq_ignore_ascii_case(&request.email)) {
            return Err(DbError::UniqueViolation {
                constraint: Some("users_email_unique".to_string()),
                table: Some("users".to_string()),
                message: format!("email {} already exists", request.email),
            });
        }

        let now = Utc::now();
        let user = UserDBResponse {
            id: Uuid::new_v4(),
            email: request.email.clone(),
            name: request.name.clone(),
            role: request.role,
            password_hash: request.password_hash.clone(),
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_by_id(&self, id: UserId) -> Result<Option<UserDBResponse>> {
        Ok(self.users.read().get(&id).cloned())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<UserDBResponse>> {
        Ok(self.users.read().values().find(|u| u.email.eq_ignore_ascii_case(email)).cloned())
    }

    async fn list(&self) -> Result<Vec<UserDBResponse>> {
        let mut users: Vec<_> = self.users.read().values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.email.cmp(&b.email)));
        Ok(users)
    }

    async fn update_role(&self, id: UserId, role: Role) -> Result<UserDBResponse> {
        let mut users = self.users.write();
        let user = users.get_mut(&id).ok_or(DbError::NotFound)?;
        user.role = role;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn set_password_hash(&self, id: UserId, password_hash: Option<&str>) -> Result<()> {
        let mut users = self.users.write();
        let user = users.get_mut(&id).ok_or(DbError::NotFound)?;
        user.password_hash = password_hash.map(str::to_string);
        user.updated_at = Utc::now();
        Ok(())
    }
}

/// In-memory implementation of [`ApiTokenStore`].
#[derive(Clone, Default)]
pub struct InMemoryApiTokenStore {
    tokens: Arc<RwLock<HashMap<ApiTokenId, ApiTokenDBResponse>>>,
}

impl InMemoryApiTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ApiTokenStore for InMemoryApiTokenStore {
    async fn create(&self, request: &ApiTokenCreateDBRequest) -> Result<ApiTokenDBResponse> {
        let mut tokens = self.tokens.write();
        if tokens.values().any(|t| t.token_hash == request.token_hash) {
            return Err(DbError::UniqueViolation {
                constraint: Some("api_tokens_token_hash_unique".to_string()),
                table: Some("api_tokens".to_string()),
                message: "token hash already exists".to_string(),
            });
        }

        let token = ApiTokenDBResponse {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            token_hash: request.token_hash.clone(),
            name: request.name.clone(),
            scopes: request.scopes.clone(),
            active: true,
            expires_at: request.expires_at,
            last_used_at: None,
            created_at: Utc::now(),
        };
        tokens.insert(token.id, token.clone());
        Ok(token)
    }

    async fn get_by_hash(&self, token_hash: &str) -> Result<Option<ApiTokenDBResponse>> {
        Ok(self.tokens.read().values().find(|t| t.token_hash == token_hash).cloned())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<ApiTokenDBResponse>> {
        let mut tokens: Vec<_> = self.tokens.read().values().filter(|t| t.user_id == user_id).cloned().collect();
        tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tokens)
    }

    async fn touch_last_used(&self, id: ApiTokenId, at: DateTime<Utc>) -> Result<()> {
        if let Some(token) = self.tokens.write().get_mut(&id) {
            token.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn deactivate(&self, id: ApiTokenId) -> Result<bool> {
        match self.tokens.write().get_mut(&id) {
            Some(token) => {
                token.active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_unusable(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut tokens = self.tokens.write();
        let before = tokens.len();
        tokens.retain(|_, t| t.active && !t.is_expired_at(now));
        Ok((before - tokens.len()) as u64)
    }
}
