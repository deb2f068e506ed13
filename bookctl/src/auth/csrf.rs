//! Anti-forgery tokens for cookie-authenticated requests.
//!
//! Tokens are `{issued_at}.{nonce}.{signature}`: the signature is HMAC-SHA256 over the user id,
//! issue time and nonce, keyed by the configured secret. Verification needs no server-side state
//! and works across instances. A token is only accepted for the user it was issued to and only
//! until `csrf.token_ttl` has passed.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, trace};

use crate::AppState;
use crate::auth::current_user::bearer_token;
use crate::auth::session;
use crate::crypto::random_urlsafe;
use crate::errors::Error;
use crate::types::{Clock, UserId};

type HmacSha256 = Hmac<Sha256>;

/// Tolerated clock skew for tokens issued by another instance.
const MAX_FUTURE_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CsrfRejection {
    #[error("no CSRF token header on a state-changing request")]
    Missing,
    #[error("CSRF token does not match the session")]
    Invalid,
}

impl CsrfRejection {
    pub fn user_message(&self) -> &'static str {
        match self {
            CsrfRejection::Missing => "CSRF token missing",
            CsrfRejection::Invalid => "Invalid CSRF token",
        }
    }
}

#[derive(Clone)]
pub struct CsrfService {
    key: Arc<[u8]>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl CsrfService {
    pub fn new(secret: &str, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            key: Arc::from(secret.as_bytes()),
            ttl,
            clock,
        }
    }

    fn mac(&self, user_id: UserId, issued_at: i64, nonce: &str) -> Result<HmacSha256, Error> {
        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|e| Error::Internal {
            operation: format!("initialise CSRF HMAC: {e}"),
        })?;
        mac.update(b"csrf:");
        mac.update(user_id.as_bytes());
        mac.update(b":");
        mac.update(issued_at.to_string().as_bytes());
        mac.update(b":");
        mac.update(nonce.as_bytes());
        Ok(mac)
    }

    /// Issue a fresh token bound to `user_id`.
    pub fn issue(&self, user_id: UserId) -> Result<String, Error> {
        let issued_at = self.clock.now().timestamp();
        let nonce = random_urlsafe(16);
        let signature = self.mac(user_id, issued_at, &nonce)?.finalize().into_bytes();

        Ok(format!("{issued_at}.{nonce}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }

    /// Whether `token` was issued by this service to `user_id` and has not expired.
    pub fn verify(&self, user_id: UserId, token: &str) -> bool {
        let mut parts = token.splitn(3, '.');
        let (Some(issued_at), Some(nonce), Some(signature)) = (parts.next(), parts.next(), parts.next()) else {
            return false;
        };
        let Ok(issued_at) = issued_at.parse::<i64>() else {
            return false;
        };
        let Ok(signature) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };

        let now = self.clock.now().timestamp();
        let age = now - issued_at;
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        if age < -MAX_FUTURE_SKEW_SECS || age > ttl {
            trace!(age, "CSRF token outside its validity window");
            return false;
        }

        match self.mac(user_id, issued_at, nonce) {
            Ok(mac) => mac.verify_slice(&signature).is_ok(),
            Err(_) => false,
        }
    }
}

fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

fn check_request(state: &AppState, method: &Method, headers: &HeaderMap) -> Result<(), CsrfRejection> {
    // Bearer requests are authenticated by the header alone and never fall back to the
    // session cookie, so they carry no ambient credential to forge.
    if is_safe_method(method) || bearer_token(headers).is_some() {
        return Ok(());
    }

    let token = headers
        .get(state.config.csrf.header_name.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(CsrfRejection::Missing)?;

    let claims = session::claims_from_headers(headers, &state.config).ok_or(CsrfRejection::Invalid)?;

    if state.csrf.verify(claims.sub, token) {
        Ok(())
    } else {
        Err(CsrfRejection::Invalid)
    }
}

/// Middleware rejecting state-changing session requests without a valid token header.
pub async fn csrf_protection(State(state): State<AppState>, request: Request, next: Next) -> Result<Response, Error> {
    if !state.config.csrf.enabled {
        return Ok(next.run(request).await);
    }

    if let Err(rejection) = check_request(&state, request.method(), request.headers()) {
        debug!(method = %request.method(), path = %request.uri().path(), "{rejection}");
        return Err(rejection.into());
    }

    Ok(next.run(request).await)
}
