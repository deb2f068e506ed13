//! The unified authentication gate.
//!
//! [`authorize`] looks at a request and decides who is calling:
//!
//! - An `Authorization: Bearer` header is validated as an API token and nothing else is
//!   consulted, even when the token is bad.
//! - Otherwise the session cookie is verified and resolved, with impersonation applied.
//!
//! Handlers take [`Authenticated`] (or just [`CurrentUser`]) as an extractor and then check
//! roles and scopes themselves.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use tracing::{debug, instrument, trace};

use crate::{
    AppState,
    api::models::users::{CurrentUser, Role},
    auth::{
        api_tokens::{Scopes, TokenGrant, TokenRejection, has_scope},
        session::{self, SessionUser},
    },
    errors::{Error, Requirement, Result},
    types::abbrev_uuid,
};

/// Why a request could not be authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnauthenticatedReason {
    /// A bearer token was presented and rejected.
    Token(TokenRejection),
    /// No bearer header and no usable session cookie.
    Unauthorized,
}

impl From<UnauthenticatedReason> for Error {
    fn from(reason: UnauthenticatedReason) -> Self {
        match reason {
            UnauthenticatedReason::Token(rejection) => Error::Token(rejection),
            UnauthenticatedReason::Unauthorized => Error::Unauthenticated { message: None },
        }
    }
}

/// Result of running the auth gate over a request.
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    Bearer(TokenGrant),
    Session(SessionUser),
    Unauthenticated(UnauthenticatedReason),
}

impl AuthOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, AuthOutcome::Unauthenticated(_))
    }

    /// `"bearer"` or `"session"` for a successful outcome.
    pub fn auth_type(&self) -> Option<&'static str> {
        match self {
            AuthOutcome::Bearer(_) => Some("bearer"),
            AuthOutcome::Session(_) => Some("session"),
            AuthOutcome::Unauthenticated(_) => None,
        }
    }
}

/// The token from an `Authorization: Bearer <token>` header, if the request has one.
///
/// Other schemes are ignored. An empty token still counts as a bearer request and fails
/// validation.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_at_checked(7)?;
    scheme.eq_ignore_ascii_case("bearer ").then(|| token.trim())
}

/// Authenticate a request by bearer token or session cookie.
///
/// Only unexpected failures (a store outage while resolving a session) are returned as `Err`.
#[instrument(skip_all)]
pub async fn authorize(parts: &Parts, state: &AppState) -> Result<AuthOutcome> {
    if let Some(token) = bearer_token(&parts.headers) {
        return Ok(match state.token_validator().validate(token).await {
            Ok(grant) => {
                debug!(user_id = %abbrev_uuid(&grant.user.id), token_id = %abbrev_uuid(&grant.token_id), "Authenticated via API token");
                AuthOutcome::Bearer(grant)
            }
            Err(rejection) => {
                trace!("Bearer token rejected: {rejection}");
                AuthOutcome::Unauthenticated(UnauthenticatedReason::Token(rejection))
            }
        });
    }

    let Some(claims) = session::claims_from_headers(&parts.headers, &state.config) else {
        trace!("No bearer token or valid session cookie");
        return Ok(AuthOutcome::Unauthenticated(UnauthenticatedReason::Unauthorized));
    };

    match session::resolve_session(&claims, state.users.as_ref(), state.impersonation.as_ref()).await? {
        Some(session) => {
            debug!(
                user_id = %abbrev_uuid(&session.user.id),
                impersonating = session.is_impersonating(),
                "Authenticated via session"
            );
            Ok(AuthOutcome::Session(session))
        }
        None => Ok(AuthOutcome::Unauthenticated(UnauthenticatedReason::Unauthorized)),
    }
}

/// An authenticated caller. Extracting this rejects unauthenticated requests.
#[derive(Debug, Clone)]
pub enum Authenticated {
    Bearer(TokenGrant),
    Session(SessionUser),
}

impl Authenticated {
    /// The effective user.
    pub fn user(&self) -> &CurrentUser {
        match self {
            Authenticated::Bearer(grant) => &grant.user,
            Authenticated::Session(session) => &session.user,
        }
    }

    pub fn auth_type(&self) -> &'static str {
        match self {
            Authenticated::Bearer(_) => "bearer",
            Authenticated::Session(_) => "session",
        }
    }

    /// Token scopes; sessions have none.
    pub fn scopes(&self) -> Option<&Scopes> {
        match self {
            Authenticated::Bearer(grant) => Some(&grant.scopes),
            Authenticated::Session(_) => None,
        }
    }

    /// The browser session, for endpoints that only make sense with one.
    pub fn session(&self, resource: &str) -> Result<&SessionUser> {
        match self {
            Authenticated::Session(session) => Ok(session),
            Authenticated::Bearer(_) => Err(Error::InsufficientPermissions {
                required: Requirement::Session,
                resource: resource.to_string(),
            }),
        }
    }

    /// Require the effective user to hold `role`.
    pub fn require_role(&self, role: Role, resource: &str) -> Result<&CurrentUser> {
        let user = self.user();
        if user.role == role {
            Ok(user)
        } else {
            Err(Error::InsufficientPermissions {
                required: Requirement::Role(role),
                resource: resource.to_string(),
            })
        }
    }

    /// Require a bearer token to carry `scope`. Sessions act with the user's full authority.
    pub fn require_scope(&self, scope: &str, resource: &str) -> Result<()> {
        match self.scopes() {
            Some(scopes) if !has_scope(scopes, scope) => Err(Error::InsufficientPermissions {
                required: Requirement::Scope(scope.to_string()),
                resource: resource.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        match authorize(parts, state).await? {
            AuthOutcome::Bearer(grant) => Ok(Authenticated::Bearer(grant)),
            AuthOutcome::Session(session) => Ok(Authenticated::Session(session)),
            AuthOutcome::Unauthenticated(reason) => Err(reason.into()),
        }
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        Authenticated::from_request_parts(parts, state).await.map(|auth| auth.user().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::impersonation::ImpersonationEntry;
    use crate::test_utils::{TestHarness, session_cookie_header};
    use axum::http::Request;
    use chrono::{Duration, Utc};

    fn parts(headers: &[(&str, String)]) -> Parts {
        let mut builder = Request::builder().uri("/api/me");
        for (name, value) in headers {
            builder = builder.header(*name, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer bk_abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("bk_abc"));

        headers.insert(header::AUTHORIZATION, "bearer bk_abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("bk_abc"));

        headers.insert(header::AUTHORIZATION, "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some(""));

        headers.insert(header::AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    #[tokio::test]
    async fn test_bearer_without_session_reports_bearer() {
        let harness = TestHarness::new();
        let admin = harness.user("ops@example.com", Role::Admin).await;
        let token = harness.token(&admin, "read,write", None).await;

        let outcome = authorize(&parts(&[("authorization", format!("Bearer {token}"))]), &harness.state)
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.auth_type(), Some("bearer"));
        match outcome {
            AuthOutcome::Bearer(grant) => {
                assert_eq!(grant.user.id, admin.id);
                assert!(grant.scopes.contains("write"));
            }
            other => panic!("expected bearer outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_session_without_bearer_reports_session() {
        let harness = TestHarness::new();
        let tech = harness.user("tech@example.com", Role::Technician).await;

        let outcome = authorize(&parts(&[("cookie", session_cookie_header(&harness.state, &tech))]), &harness.state)
            .await
            .unwrap();

        assert_eq!(outcome.auth_type(), Some("session"));
        match outcome {
            AuthOutcome::Session(session) => assert_eq!(session.user, tech),
            other => panic!("expected session outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_bearer_does_not_fall_back_to_session() {
        let harness = TestHarness::new();
        let tech = harness.user("tech@example.com", Role::Technician).await;

        let outcome = authorize(
            &parts(&[
                ("authorization", "Bearer bk_not-a-token".to_string()),
                ("cookie", session_cookie_header(&harness.state, &tech)),
            ]),
            &harness.state,
        )
        .await
        .unwrap();

        assert!(matches!(
            outcome,
            AuthOutcome::Unauthenticated(UnauthenticatedReason::Token(TokenRejection::InvalidToken))
        ));
    }

    #[tokio::test]
    async fn test_no_credentials_is_unauthorized() {
        let harness = TestHarness::new();
        let outcome = authorize(&parts(&[]), &harness.state).await.unwrap();

        assert!(!outcome.is_success());
        assert!(matches!(outcome, AuthOutcome::Unauthenticated(UnauthenticatedReason::Unauthorized)));
    }

    #[tokio::test]
    async fn test_garbage_cookie_is_unauthorized() {
        let harness = TestHarness::new();
        let cookie = format!("{}=garbage", harness.state.config.auth.session.cookie_name);
        let outcome = authorize(&parts(&[("cookie", cookie)]), &harness.state).await.unwrap();

        assert!(matches!(outcome, AuthOutcome::Unauthenticated(UnauthenticatedReason::Unauthorized)));
    }

    #[tokio::test]
    async fn test_session_outcome_carries_impersonation() {
        let harness = TestHarness::new();
        let admin = harness.user("admin@example.com", Role::Admin).await;
        let tech = harness.user("tech@example.com", Role::Technician).await;
        harness
            .state
            .impersonation
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

        let outcome = authorize(&parts(&[("cookie", session_cookie_header(&harness.state, &admin))]), &harness.state)
            .await
            .unwrap();

        let AuthOutcome::Session(session) = outcome else {
            panic!("expected session outcome");
        };
        assert_eq!(session.user.id, tech.id);
        assert_eq!(session.authenticated_user().id, admin.id);
    }

    #[tokio::test]
    async fn test_expired_bearer_maps_to_gone() {
        let harness = TestHarness::new();
        let admin = harness.user("ops@example.com", Role::Admin).await;
        let token = harness.token(&admin, "read", Some(Utc::now() - Duration::hours(1))).await;

        let err = Authenticated::from_request_parts(
            &mut parts(&[("authorization", format!("Bearer {token}"))]),
            &harness.state,
        )
        .await
        .unwrap_err();

        assert_eq!(err.status_code(), axum::http::StatusCode::GONE);
    }

    #[test]
    fn test_scope_and_role_checks() {
        let user = CurrentUser {
            id: uuid::Uuid::new_v4(),
            email: "a@example.com".to_string(),
            name: "A".to_string(),
            role: Role::CustomerService,
        };
        let bearer = Authenticated::Bearer(TokenGrant {
            token_id: uuid::Uuid::new_v4(),
            user: user.clone(),
            scopes: Scopes::parse("read"),
        });
        let session = Authenticated::Session(SessionUser {
            user: user.clone(),
            original: None,
        });

        assert!(bearer.require_scope("read", "users").is_ok());
        assert!(bearer.require_scope("write", "users").is_err());
        assert!(session.require_scope("write", "users").is_ok());

        assert!(session.require_role(Role::CustomerService, "users").is_ok());
        assert!(session.require_role(Role::Admin, "users").is_err());

        assert!(bearer.session("impersonation").is_err());
        assert!(session.session("impersonation").is_ok());
    }
}
