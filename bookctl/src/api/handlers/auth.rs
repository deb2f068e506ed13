use axum::{Json, extract::State, http::HeaderMap};
use tracing::{debug, info};

use crate::{
    AppState,
    api::models::{
        auth::{AuthResponse, AuthSuccessResponse, LoginRequest, LoginResponse, LogoutResponse},
        users::{CurrentUser, UserResponse},
    },
    auth::{password, session},
    errors::Error,
    types::abbrev_uuid,
};

fn invalid_credentials() -> Error {
    Error::Unauthenticated {
        message: Some("Invalid email or password".to_string()),
    }
}

/// Login with email and password
#[tracing::instrument(skip_all)]
pub async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Result<LoginResponse, Error> {
    let user = state.users.get_by_email(&request.email).await?.ok_or_else(invalid_credentials)?;

    // Users created without a password can only use API tokens
    let hash = user.password_hash.clone().ok_or_else(invalid_credentials)?;

    // Verify password on a blocking thread to avoid blocking async runtime
    let password = request.password;
    let is_valid = tokio::task::spawn_blocking(move || password::verify_password(&password, &hash))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password verification task: {e}"),
        })??;

    if !is_valid {
        debug!(user_id = %abbrev_uuid(&user.id), "Password mismatch");
        return Err(invalid_credentials());
    }

    let user_response = UserResponse::from(user.clone());
    let current_user = CurrentUser::from(user);
    let token = session::create_session_token(&current_user, &state.config)?;
    let cookie = session::session_cookie(&token, &state.config);

    info!(user_id = %abbrev_uuid(&current_user.id), "User logged in");

    Ok(LoginResponse {
        auth_response: AuthResponse {
            user: user_response,
            message: "Login successful".to_string(),
        },
        cookie,
    })
}

/// Logout (clear session and any impersonation it holds)
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<LogoutResponse, Error> {
    if let Some(claims) = session::claims_from_headers(&headers, &state.config)
        && state.impersonation.clear(claims.sub).await?
    {
        info!(user_id = %abbrev_uuid(&claims.sub), "Impersonation ended by logout");
    }

    Ok(LogoutResponse {
        auth_response: AuthSuccessResponse {
            message: "Logout successful".to_string(),
        },
        cookie: session::clear_session_cookie(&state.config),
    })
}

#[cfg(test)]
mod tests {
    use crate::api::models::users::Role;
    use crate::auth::impersonation::ImpersonationEntry;
    use crate::test_utils::{TestHarness, session_cookie_header};
    use axum::http::StatusCode;
    use chrono::Utc;
    use serde_json::json;

    #[test_log::test(tokio::test)]
    async fn test_login_sets_session_cookie() {
        let harness = TestHarness::new();
        harness.user_with_password("cs@example.com", Role::CustomerService, "hunter2-hunter2").await;
        let server = harness.server();

        let response = server
            .post("/authentication/login")
            .json(&json!({ "email": "CS@example.com", "password": "hunter2-hunter2" }))
            .await;

        response.assert_status_ok();
        let cookie = response.header("set-cookie");
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.starts_with("bookctl_session="));
        assert!(cookie.contains("HttpOnly"));

        let body: serde_json::Value = response.json();
        assert_eq!(body["user"]["email"], "cs@example.com");
        assert_eq!(body["user"]["role"], "CUSTOMER_SERVICE");
        assert!(body["user"].get("passwordHash").is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_login_rejects_bad_credentials() {
        let harness = TestHarness::new();
        harness.user_with_password("cs@example.com", Role::CustomerService, "hunter2-hunter2").await;
        harness.user("nopass@example.com", Role::Technician).await;
        let server = harness.server();

        for (email, password) in [
            ("cs@example.com", "wrong-password"),
            ("nobody@example.com", "hunter2-hunter2"),
            ("nopass@example.com", ""),
        ] {
            let response = server
                .post("/authentication/login")
                .json(&json!({ "email": email, "password": password }))
                .await;
            response.assert_status(StatusCode::UNAUTHORIZED);
            response.assert_json(&json!({ "error": "Invalid email or password" }));
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_logout_clears_cookie_and_impersonation() {
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
        let server = harness.server();

        let response = server
            .post("/authentication/logout")
            .add_header("cookie", session_cookie_header(&harness.state, &admin))
            .await;

        response.assert_status_ok();
        assert!(response.header("set-cookie").to_str().unwrap().contains("Max-Age=0"));
        assert!(harness.state.impersonation.get(admin.id).await.unwrap().is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_logout_without_session_is_ok() {
        let harness = TestHarness::new();
        harness.server().post("/authentication/logout").await.assert_status_ok();
    }
}
