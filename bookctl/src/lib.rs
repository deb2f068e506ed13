//! # bookctl: authentication and authorization for the booking application
//!
//! `bookctl` is the access layer in front of the booking API. It decides who a request is
//! acting as and whether it may proceed. Everything behind it (bookings, technicians, customer
//! records) can assume an authenticated, authorized caller.
//!
//! ## Overview
//!
//! Two kinds of caller reach the API. Staff use the browser app, which signs in with email and
//! password and carries a session cookie. Integrations call with an API token in the
//! `Authorization: Bearer` header. Both end up as a [`api::models::users::CurrentUser`] with one
//! of three roles: `ADMIN`, `CUSTOMER_SERVICE` or `TECHNICIAN`.
//!
//! Admins can *impersonate* another user from the browser to see the app exactly as that user
//! does. Impersonation is an overlay on the admin's own session and never changes the cookie.
//!
//! ## Request Flow
//!
//! A request under `/api/` passes through, in order:
//!
//! 1. **Rate limiting** ([`limits`]): a fixed window per client IP, 30 requests per 60 seconds
//!    by default. The next request in the window gets `429` with `Retry-After`.
//! 2. **CSRF protection** ([`auth::csrf`]): state-changing requests authenticated by cookie must
//!    echo a token from `GET /api/csrf` in the `x-csrf-token` header. Bearer requests are exempt.
//! 3. **Authentication** ([`auth::current_user`]): handlers extract
//!    [`auth::current_user::Authenticated`], which validates the bearer token if one is present
//!    and otherwise resolves the session cookie, applying any impersonation.
//! 4. **Authorization**: each handler checks the role and, for bearer callers, the token scope
//!    it needs.
//!
//! ## Storage
//!
//! Users and API tokens live in PostgreSQL. Impersonation entries live in process memory by
//! default, or in PostgreSQL with `impersonation.store: postgres` when several instances serve
//! the same users. Rate-limit counters are always per instance.
//!
//! Every store sits behind a trait ([`db::handlers::UserStore`], [`db::handlers::ApiTokenStore`],
//! [`auth::impersonation::ImpersonationStore`], [`limits::RateLimitStore`]) held in [`AppState`],
//! and each has an in-memory implementation used by the tests.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use bookctl::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = bookctl::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     bookctl::telemetry::init_telemetry(&config.telemetry)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod admin;
pub mod api;
pub mod auth;
pub mod config;
mod crypto;
pub mod db;
pub mod errors;
pub mod limits;
pub mod telemetry;
pub mod types;

#[cfg(test)]
mod test_utils;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router, http,
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{get, patch, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use sqlx::{PgPool, postgres::PgPoolOptions};
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument, warn};

use crate::{
    api::models::users::Role,
    auth::{
        api_tokens::ApiTokenValidator,
        csrf::{CsrfService, csrf_protection},
        impersonation::{ImpersonationStore, InMemoryImpersonationStore, PostgresImpersonationStore},
        password::{self, Argon2Params},
    },
    config::{CorsOrigin, ImpersonationBackend, PasswordConfig},
    db::{
        handlers::{ApiTokenStore, PostgresApiTokenStore, PostgresUserStore, UserStore},
        models::users::UserCreateDBRequest,
    },
    limits::{InMemoryRateLimitStore, RateLimiter},
    types::{Clock, SystemClock},
};

pub use config::Config;
pub use types::{ApiTokenId, UserId};

/// Application state shared across all request handlers.
///
/// Every store is a trait object so the server runs on PostgreSQL while tests run on the
/// in-memory implementations.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .users(users)
///     .api_tokens(api_tokens)
///     .impersonation(impersonation)
///     .rate_limiter(rate_limiter)
///     .csrf(csrf)
///     .clock(clock)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub users: Arc<dyn UserStore>,
    pub api_tokens: Arc<dyn ApiTokenStore>,
    pub impersonation: Arc<dyn ImpersonationStore>,
    pub rate_limiter: RateLimiter,
    pub csrf: CsrfService,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Build state around the given stores, deriving the CSRF service and rate limiter from config.
    pub fn from_stores(
        config: Config,
        users: Arc<dyn UserStore>,
        api_tokens: Arc<dyn ApiTokenStore>,
        impersonation: Arc<dyn ImpersonationStore>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let csrf = CsrfService::new(config.secret()?, config.csrf.token_ttl, clock.clone());
        let rate_limiter = RateLimiter::new(&config.rate_limit, Arc::new(InMemoryRateLimitStore::new()), clock.clone());

        Ok(Self::builder()
            .config(config)
            .users(users)
            .api_tokens(api_tokens)
            .impersonation(impersonation)
            .rate_limiter(rate_limiter)
            .csrf(csrf)
            .clock(clock)
            .build())
    }

    pub fn token_validator(&self) -> ApiTokenValidator<'_> {
        ApiTokenValidator {
            tokens: self.api_tokens.as_ref(),
            users: self.users.as_ref(),
            clock: self.clock.as_ref(),
            prefix: &self.config.auth.api_tokens.prefix,
        }
    }
}

/// Get the bookctl database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Connect to PostgreSQL with the configured pool settings and run pending migrations.
pub async fn connect_database(config: &Config) -> anyhow::Result<PgPool> {
    let settings = &config.database.pool;
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.acquire_timeout)
        .idle_timeout(settings.idle_timeout)
        .connect(&config.database.url)
        .await?;

    migrator().run(&pool).await?;
    Ok(pool)
}

/// Create the initial admin user if it doesn't exist.
///
/// Idempotent. An existing user with this email is promoted to `ADMIN` if needed, and their
/// password is replaced when one is given. The password must satisfy the configured length
/// bounds. Without a password the admin can still be given API tokens from the command line.
#[instrument(skip_all)]
pub async fn create_initial_admin_user(
    email: &str,
    password: Option<&str>,
    password_config: &PasswordConfig,
    users: &dyn UserStore,
) -> anyhow::Result<UserId> {
    let password_hash = password
        .map(|pwd| {
            password::check_length(pwd, password_config)?;
            password::hash_password(pwd, Argon2Params::from(password_config))
        })
        .transpose()?;

    if let Some(existing) = users.get_by_email(email).await? {
        if existing.role != Role::Admin {
            warn!(previous = %existing.role, "Promoting configured admin user to ADMIN");
            users.update_role(existing.id, Role::Admin).await?;
        }
        if let Some(hash) = password_hash.as_deref() {
            users.set_password_hash(existing.id, Some(hash)).await?;
        }
        return Ok(existing.id);
    }

    let created = users
        .create(&UserCreateDBRequest {
            email: email.to_string(),
            name: "Administrator".to_string(),
            role: Role::Admin,
            password_hash,
        })
        .await?;

    info!("Created initial admin user");
    Ok(created.id)
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.auth.security.cors.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let csrf_header = http::HeaderName::from_bytes(config.csrf.header_name.as_bytes())?;
    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(config.auth.security.cors.allow_credentials)
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PATCH,
            http::Method::DELETE,
        ])
        .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION, csrf_header])
        .expose_headers([http::header::RETRY_AFTER]);

    if let Some(max_age) = config.auth.security.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router.
///
/// Layers, outermost first: tracing, metrics (if enabled), CORS, rate limiting, and CSRF
/// protection on the `/api/` routes.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let auth_routes = Router::new()
        .route("/authentication/login", post(api::handlers::auth::login))
        .route("/authentication/logout", post(api::handlers::auth::logout))
        .with_state(state.clone());

    let api_routes = Router::new()
        .route("/api/csrf", get(api::handlers::csrf::get_csrf_token))
        .route(
            "/api/impersonate",
            post(api::handlers::impersonation::start_impersonation).delete(api::handlers::impersonation::stop_impersonation),
        )
        .route("/api/me", get(api::handlers::users::get_me))
        .route("/api/users", get(api::handlers::users::list_users))
        .route("/api/users/{id}/role", patch(api::handlers::users::update_user_role))
        .layer(from_fn_with_state(state.clone(), csrf_protection))
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .merge(auth_routes)
        .merge(api_routes)
        .layer(from_fn_with_state(state.clone(), limits::rate_limit));

    let mut router = router.layer(create_cors_layer(&state.config)?);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Main application struct that owns the router and the database pool.
///
/// 1. **Create**: [`Application::new`] connects to the database, runs migrations, ensures the
///    admin user exists and builds the router
/// 2. **Serve**: [`Application::serve`] binds to the configured address and handles requests
///    until the shutdown future resolves
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
}

impl Application {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting bookctl with configuration: {:#?}", config);

        let pool = connect_database(&config).await?;

        let users: Arc<dyn UserStore> = Arc::new(PostgresUserStore::new(pool.clone()));
        let api_tokens: Arc<dyn ApiTokenStore> = Arc::new(PostgresApiTokenStore::new(pool.clone()));
        let impersonation: Arc<dyn ImpersonationStore> = match config.impersonation.store {
            ImpersonationBackend::Memory => Arc::new(InMemoryImpersonationStore::new()),
            ImpersonationBackend::Postgres => Arc::new(PostgresImpersonationStore::new(pool.clone())),
        };
        info!(store = ?config.impersonation.store, "Impersonation store selected");

        create_initial_admin_user(
            &config.admin_email,
            config.admin_password.as_deref(),
            &config.auth.password,
            users.as_ref(),
        )
        .await?;

        let state = AppState::from_stores(config.clone(), users, api_tokens, impersonation, Arc::new(SystemClock))?;
        let router = build_router(&state)?;

        Ok(Self { router, config, pool })
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("bookctl listening on http://{}", bind_addr);

        // Peer addresses feed the rate limiter when no proxy header is present
        axum::serve(listener, self.router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
