//! Test helpers: an application wired to in-memory stores and a manual clock.

use std::sync::Arc;

use axum_test::TestServer;
use chrono::{DateTime, Utc};

use crate::{
    AppState, build_router,
    api::models::users::{CurrentUser, Role},
    auth::{
        impersonation::InMemoryImpersonationStore,
        password::{self, Argon2Params},
        session,
    },
    config::{Config, PasswordConfig, SessionConfig},
    crypto::{generate_api_token, hash_token},
    db::{
        handlers::{ApiTokenStore, InMemoryApiTokenStore, InMemoryUserStore, UserStore},
        models::{api_tokens::ApiTokenCreateDBRequest, users::UserCreateDBRequest},
    },
    types::{ManualClock, UserId},
};

/// Cheapest Argon2 parameters the crate accepts.
pub const FAST_ARGON2: Argon2Params = Argon2Params {
    memory_kib: 64,
    iterations: 1,
    parallelism: 1,
};

pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        admin_email: "admin@test.com".to_string(),
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        auth: crate::config::AuthConfig {
            session: SessionConfig {
                cookie_secure: false,
                ..Default::default()
            },
            password: PasswordConfig {
                argon2_memory_kib: FAST_ARGON2.memory_kib,
                argon2_iterations: FAST_ARGON2.iterations,
                argon2_parallelism: FAST_ARGON2.parallelism,
                ..Default::default()
            },
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Application state over in-memory stores, plus handles to drive it from tests.
pub struct TestHarness {
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub users: Arc<InMemoryUserStore>,
    pub tokens: Arc<InMemoryApiTokenStore>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(create_test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let clock = Arc::new(ManualClock::default());
        let users = Arc::new(InMemoryUserStore::new());
        let tokens = Arc::new(InMemoryApiTokenStore::new());

        let state = AppState::from_stores(
            config,
            users.clone(),
            tokens.clone(),
            Arc::new(InMemoryImpersonationStore::new()),
            clock.clone(),
        )
        .expect("Failed to build test state");

        Self {
            state,
            clock,
            users,
            tokens,
        }
    }

    pub fn server(&self) -> TestServer {
        let router = build_router(&self.state).expect("Failed to build router");
        TestServer::new(router).expect("Failed to create test server")
    }

    pub async fn user(&self, email: &str, role: Role) -> CurrentUser {
        self.create_user(email, role, None).await
    }

    pub async fn user_with_password(&self, email: &str, role: Role, password: &str) -> CurrentUser {
        let hash = password::hash_password(password, FAST_ARGON2).expect("Failed to hash password");
        self.create_user(email, role, Some(hash)).await
    }

    async fn create_user(&self, email: &str, role: Role, password_hash: Option<String>) -> CurrentUser {
        self.users
            .create(&UserCreateDBRequest {
                email: email.to_string(),
                name: email.split('@').next().unwrap_or(email).to_string(),
                role,
                password_hash,
            })
            .await
            .expect("Failed to create test user")
            .into()
    }

    /// Mint a token for `owner` and return the raw value.
    pub async fn token(&self, owner: &CurrentUser, scopes: &str, expires_at: Option<DateTime<Utc>>) -> String {
        let raw = generate_api_token(&self.state.config.auth.api_tokens.prefix);
        self.tokens
            .create(&ApiTokenCreateDBRequest {
                user_id: owner.id,
                name: "test token".to_string(),
                token_hash: hash_token(&raw),
                scopes: scopes.to_string(),
                expires_at,
            })
            .await
            .expect("Failed to create test token");
        raw
    }

    pub async fn deactivate(&self, raw: &str) {
        let record = self
            .tokens
            .get_by_hash(&hash_token(raw))
            .await
            .unwrap()
            .expect("No such test token");
        self.tokens.deactivate(record.id).await.unwrap();
    }

    pub async fn role_of(&self, id: UserId) -> Role {
        self.users.get_by_id(id).await.unwrap().expect("No such test user").role
    }
}

/// `Cookie` header value carrying a fresh session for `user`.
pub fn session_cookie_header(state: &AppState, user: &CurrentUser) -> String {
    let token = session::create_session_token(user, &state.config).expect("Failed to create session token");
    format!("{}={}", state.config.auth.session.cookie_name, token)
}

/// Session cookie and a matching CSRF token for `user`.
pub fn session_headers(state: &AppState, user: &CurrentUser) -> (String, String) {
    let csrf = state.csrf.issue(user.id).expect("Failed to issue CSRF token");
    (session_cookie_header(state, user), csrf)
}
