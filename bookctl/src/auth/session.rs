//! JWT session cookies and session resolution.
//!
//! The cookie carries who signed in. What the request acts as is decided per request by
//! [`resolve_session`]: the signed-in user is re-read from the user store (so role changes and
//! deletions apply immediately) and any impersonation entry keyed by that user's id is overlaid.

use axum::http::{HeaderMap, header};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::{
    api::models::users::{CurrentUser, Role},
    auth::impersonation::ImpersonationStore,
    config::Config,
    db::handlers::UserStore,
    errors::Error,
    types::{UserId, abbrev_uuid},
};

/// JWT session claims
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: UserId,    // Subject (user ID)
    pub email: String,  // User email
    pub name: String,   // Display name
    pub role: Role,     // Role at sign-in; authorization re-reads the user store
    pub exp: i64,       // Expiration time
    pub iat: i64,       // Issued at
}

impl SessionClaims {
    pub fn new(user: &CurrentUser, config: &Config) -> Self {
        let now = Utc::now();
        let exp = now + config.auth.security.jwt_expiry;

        Self {
            sub: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
            exp: exp.timestamp(),
            iat: now.timestamp(),
        }
    }
}

/// Create a JWT token for a user session
pub fn create_session_token(user: &CurrentUser, config: &Config) -> Result<String, Error> {
    let claims = SessionClaims::new(user, config);
    let key = EncodingKey::from_secret(config.secret()?.as_bytes());

    encode(&Header::default(), &claims, &key).map_err(|e| Error::Internal {
        operation: format!("create JWT: {e}"),
    })
}

/// Verify and decode a JWT session token
pub fn verify_session_token(token: &str, config: &Config) -> Result<SessionClaims, Error> {
    use jsonwebtoken::errors::ErrorKind;

    let key = DecodingKey::from_secret(config.secret()?.as_bytes());

    let token_data = decode::<SessionClaims>(token, &key, &Validation::default()).map_err(|e| match e.kind() {
        ErrorKind::InvalidToken
        | ErrorKind::InvalidSignature
        | ErrorKind::ExpiredSignature
        | ErrorKind::MissingRequiredClaim(_)
        | ErrorKind::ImmatureSignature
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_)
        | ErrorKind::InvalidAlgorithm => Error::Unauthenticated { message: None },
        _ => Error::Internal {
            operation: format!("JWT verification: {e}"),
        },
    })?;

    Ok(token_data.claims)
}

/// `Set-Cookie` value establishing a session.
pub fn session_cookie(token: &str, config: &Config) -> String {
    let session = &config.auth.session;
    let secure = if session.cookie_secure { "; Secure" } else { "" };

    format!(
        "{}={}; Path=/; HttpOnly{}; SameSite={}; Max-Age={}",
        session.cookie_name,
        token,
        secure,
        session.cookie_same_site,
        session.timeout.as_secs()
    )
}

/// `Set-Cookie` value expiring the session cookie.
pub fn clear_session_cookie(config: &Config) -> String {
    let session = &config.auth.session;
    let secure = if session.cookie_secure { "; Secure" } else { "" };

    format!("{}=; Path=/; HttpOnly{}; SameSite={}; Max-Age=0", session.cookie_name, secure, session.cookie_same_site)
}

/// The raw session token from the request's cookies, if any.
pub fn session_token_from_headers<'a>(headers: &'a HeaderMap, cookie_name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name && !value.is_empty())
        .map(|(_, value)| value)
}

/// Verified claims from the request's session cookie, if present and valid.
pub fn claims_from_headers(headers: &HeaderMap, config: &Config) -> Option<SessionClaims> {
    let token = session_token_from_headers(headers, &config.auth.session.cookie_name)?;
    match verify_session_token(token, config) {
        Ok(claims) => Some(claims),
        Err(e) => {
            debug!("Ignoring invalid session cookie: {e}");
            None
        }
    }
}

/// A browser session after impersonation has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    /// The effective user: whoever is being impersonated, else the signed-in user.
    pub user: CurrentUser,
    /// The signed-in admin, present only while impersonating.
    pub original: Option<CurrentUser>,
}

impl SessionUser {
    pub fn is_impersonating(&self) -> bool {
        self.original.is_some()
    }

    /// Whoever actually holds the session cookie.
    pub fn authenticated_user(&self) -> &CurrentUser {
        self.original.as_ref().unwrap_or(&self.user)
    }
}

/// Resolve verified claims to the session's effective identity.
///
/// Returns `None` when the signed-in user no longer exists.
#[instrument(skip_all, fields(user_id = %abbrev_uuid(&claims.sub)))]
pub async fn resolve_session(
    claims: &SessionClaims,
    users: &dyn UserStore,
    impersonation: &dyn ImpersonationStore,
) -> Result<Option<SessionUser>, Error> {
    let Some(own) = users.get_by_id(claims.sub).await? else {
        debug!("Session user no longer exists");
        return Ok(None);
    };
    let own = CurrentUser::from(own);

    let Some(entry) = impersonation.get(own.id).await? else {
        return Ok(Some(SessionUser { user: own, original: None }));
    };

    if !own.is_admin() {
        warn!(role = %own.role, "Dropping impersonation held by a user who is no longer an admin");
        impersonation.clear(own.id).await?;
        return Ok(Some(SessionUser { user: own, original: None }));
    }

    match users.get_by_id(entry.impersonating_user_id).await? {
        Some(target) => Ok(Some(SessionUser {
            user: target.into(),
            original: Some(own),
        })),
        None => {
            warn!(
                target = %abbrev_uuid(&entry.impersonating_user_id),
                "Impersonated user no longer exists, ending impersonation"
            );
            impersonation.clear(own.id).await?;
            Ok(Some(SessionUser { user: own, original: None }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::impersonation::{ImpersonationEntry, InMemoryImpersonationStore};
    use crate::db::handlers::InMemoryUserStore;
    use crate::db::models::users::UserCreateDBRequest;
    use crate::test_utils::create_test_config;
    use axum::http::HeaderValue;
    use uuid::Uuid;

    fn create_test_user() -> CurrentUser {
        CurrentUser {
            id: Uuid::new_v4(),
            email: "test@example.com".to_string(),
            name: "Test User".to_string(),
            role: Role::Technician,
        }
    }

    async fn add_user(users: &InMemoryUserStore, email: &str, role: Role) -> CurrentUser {
        users
            .create(&UserCreateDBRequest {
                email: email.to_string(),
                name: email.to_string(),
                role,
                password_hash: None,
            })
            .await
            .unwrap()
            .into()
    }

    fn claims_for(user: &CurrentUser) -> SessionClaims {
        SessionClaims::new(user, &create_test_config())
    }

    #[test]
    fn test_create_and_verify_session_token() {
        let config = create_test_config();
        let user = create_test_user();

        let token = create_session_token(&user, &config).unwrap();
        let claims = verify_session_token(&token, &config).unwrap();

        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.email, user.email);
        assert_eq!(claims.role, Role::Technician);
    }

    #[test]
    fn test_verify_token_wrong_secret() {
        let mut config = create_test_config();
        let token = create_session_token(&create_test_user(), &config).unwrap();

        config.secret_key = Some("different-secret".to_string());
        assert!(matches!(verify_session_token(&token, &config), Err(Error::Unauthenticated { .. })));
    }

    #[test]
    fn test_verify_expired_token() {
        let config = create_test_config();
        let user = create_test_user();
        let now = Utc::now();
        let claims = SessionClaims {
            exp: (now - chrono::Duration::seconds(3600)).timestamp(),
            ..SessionClaims::new(&user, &config)
        };
        let key = EncodingKey::from_secret(config.secret_key.as_ref().unwrap().as_bytes());
        let token = encode(&Header::default(), &claims, &key).unwrap();

        assert!(matches!(verify_session_token(&token, &config), Err(Error::Unauthenticated { .. })));
    }

    #[test]
    fn test_verify_malformed_token() {
        let config = create_test_config();
        for token in ["not.a.token", "invalid", "", "too.many.parts.in.this.token"] {
            assert!(
                matches!(verify_session_token(token, &config), Err(Error::Unauthenticated { .. })),
                "Expected Unauthenticated error for token: {token}"
            );
        }
    }

    #[test]
    fn test_cookie_round_trip_through_headers() {
        let config = create_test_config();
        let user = create_test_user();
        let token = create_session_token(&user, &config).unwrap();

        let set_cookie = session_cookie(&token, &config);
        assert!(set_cookie.starts_with(&format!("{}={token};", config.auth.session.cookie_name)));
        assert!(set_cookie.contains("HttpOnly"));

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("theme=dark; {}={token}; other=1", config.auth.session.cookie_name)).unwrap(),
        );
        assert_eq!(claims_from_headers(&headers, &config).unwrap().sub, user.id);
    }

    #[test]
    fn test_cleared_cookie_is_not_a_session() {
        let config = create_test_config();
        assert!(clear_session_cookie(&config).contains("Max-Age=0"));

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("{}=", config.auth.session.cookie_name)).unwrap(),
        );
        assert!(session_token_from_headers(&headers, &config.auth.session.cookie_name).is_none());
    }

    #[tokio::test]
    async fn test_resolve_plain_session() {
        let users = InMemoryUserStore::new();
        let store = InMemoryImpersonationStore::new();
        let tech = add_user(&users, "tech@example.com", Role::Technician).await;

        let session = resolve_session(&claims_for(&tech), &users, &store).await.unwrap().unwrap();
        assert_eq!(session.user, tech);
        assert!(!session.is_impersonating());
    }

    #[tokio::test]
    async fn test_resolve_reads_current_role() {
        let users = InMemoryUserStore::new();
        let store = InMemoryImpersonationStore::new();
        let tech = add_user(&users, "tech@example.com", Role::Technician).await;
        let claims = claims_for(&tech);

        users.update_role(tech.id, Role::CustomerService).await.unwrap();

        let session = resolve_session(&claims, &users, &store).await.unwrap().unwrap();
        assert_eq!(session.user.role, Role::CustomerService);
    }

    #[tokio::test]
    async fn test_resolve_deleted_user_is_none() {
        let users = InMemoryUserStore::new();
        let store = InMemoryImpersonationStore::new();
        let ghost = create_test_user();

        assert!(resolve_session(&claims_for(&ghost), &users, &store).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_impersonation_overlay_set_then_clear() {
        let users = InMemoryUserStore::new();
        let store = InMemoryImpersonationStore::new();
        let admin = add_user(&users, "admin@example.com", Role::Admin).await;
        let tech = add_user(&users, "tech@example.com", Role::Technician).await;
        let claims = claims_for(&admin);

        store
            .set(
                admin.id,
                ImpersonationEntry {
                    impersonating_user_id: tech.id,
                    original_user_email: admin.email.clone(),
                    started_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let session = resolve_session(&claims, &users, &store).await.unwrap().unwrap();
        assert!(session.is_impersonating());
        assert_eq!(session.user, tech);
        assert_eq!(session.authenticated_user(), &admin);

        store.clear(admin.id).await.unwrap();

        let session = resolve_session(&claims, &users, &store).await.unwrap().unwrap();
        assert!(!session.is_impersonating());
        assert_eq!(session.user, admin);
    }

    #[tokio::test]
    async fn test_demoted_admin_loses_overlay() {
        let users = InMemoryUserStore::new();
        let store = InMemoryImpersonationStore::new();
        let admin = add_user(&users, "admin@example.com", Role::Admin).await;
        let tech = add_user(&users, "tech@example.com", Role::Technician).await;
        store
            .set(
                admin.id,
                ImpersonationEntry {
                    impersonating_user_id: tech.id,
                    original_user_email: admin.email.clone(),
                    started_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        users.update_role(admin.id, Role::CustomerService).await.unwrap();

        let session = resolve_session(&claims_for(&admin), &users, &store).await.unwrap().unwrap();
        assert!(!session.is_impersonating());
        assert_eq!(session.user.id, admin.id);
        assert!(store.get(admin.id).await.unwrap().is_none());
    }
}
