//! Starting and stopping impersonation.
//!
//! Only a signed-in admin can impersonate, and only through a browser session. Entries are
//! keyed by the admin's own id, so the admin keeps their authority over the entry while the rest
//! of the API sees the impersonated user.

use axum::{Json, extract::State};
use tracing::info;

use crate::{
    AppState,
    api::models::{
        impersonation::{ImpersonateRequest, ImpersonateResponse, StopImpersonatingResponse},
        users::{CurrentUser, Role},
    },
    auth::{current_user::Authenticated, impersonation::ImpersonationEntry},
    errors::{Error, Requirement},
    types::abbrev_uuid,
};

#[tracing::instrument(skip_all)]
pub async fn start_impersonation(
    State(state): State<AppState>,
    auth: Authenticated,
    Json(request): Json<ImpersonateRequest>,
) -> Result<Json<ImpersonateResponse>, Error> {
    let session = auth.session("impersonation")?;

    // Role check is against whoever holds the cookie, not whoever they may already be acting as
    let admin = session.authenticated_user();
    if !admin.is_admin() {
        return Err(Error::InsufficientPermissions {
            required: Requirement::Role(Role::Admin),
            resource: "impersonation".to_string(),
        });
    }

    if request.user_id == admin.id {
        return Err(Error::BadRequest {
            message: "Cannot impersonate yourself".to_string(),
        });
    }

    let target: CurrentUser = state
        .users
        .get_by_id(request.user_id)
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "User".to_string(),
            id: request.user_id.to_string(),
        })?
        .into();

    state
        .impersonation
        .set(
            admin.id,
            ImpersonationEntry {
                impersonating_user_id: target.id,
                original_user_email: admin.email.clone(),
                started_at: state.clock.now(),
            },
        )
        .await?;

    info!(
        admin_id = %abbrev_uuid(&admin.id),
        target_id = %abbrev_uuid(&target.id),
        "Impersonation started"
    );

    Ok(Json(ImpersonateResponse {
        success: true,
        impersonating_user_id: target.id,
        target_user: target.into(),
    }))
}

#[tracing::instrument(skip_all)]
pub async fn stop_impersonation(State(state): State<AppState>, auth: Authenticated) -> Result<Json<StopImpersonatingResponse>, Error> {
    let session = auth.session("impersonation")?;
    let admin_id = session.authenticated_user().id;

    if state.impersonation.clear(admin_id).await? {
        info!(admin_id = %abbrev_uuid(&admin_id), "Impersonation stopped");
    }

    Ok(Json(StopImpersonatingResponse { success: true }))
}

#[cfg(test)]
mod tests {
    use crate::api::models::users::Role;
    use crate::test_utils::{TestHarness, session_headers};
    use axum::http::StatusCode;
    use serde_json::json;

    #[test_log::test(tokio::test)]
    async fn test_overlay_appears_after_set_and_disappears_after_clear() {
        let harness = TestHarness::new();
        let admin = harness.user("admin@example.com", Role::Admin).await;
        let tech = harness.user("tech@example.com", Role::Technician).await;
        let server = harness.server();
        let (cookie, csrf) = session_headers(&harness.state, &admin);

        let response = server
            .post("/api/impersonate")
            .add_header("cookie", cookie.clone())
            .add_header("x-csrf-token", csrf.clone())
            .json(&json!({ "userId": tech.id }))
            .await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["success"], true);
        assert_eq!(body["impersonatingUserId"], tech.id.to_string());
        assert_eq!(body["targetUser"]["email"], "tech@example.com");
        assert_eq!(body["targetUser"]["role"], "TECHNICIAN");

        let me: serde_json::Value = server.get("/api/me").add_header("cookie", cookie.clone()).await.json();
        assert_eq!(me["user"]["id"], tech.id.to_string());
        assert_eq!(me["user"]["role"], "TECHNICIAN");
        assert_eq!(me["isImpersonating"], true);
        assert_eq!(me["originalUserId"], admin.id.to_string());
        assert_eq!(me["originalUserEmail"], "admin@example.com");

        // The CSRF token was bound to the admin and still works while impersonating
        server
            .delete("/api/impersonate")
            .add_header("cookie", cookie.clone())
            .add_header("x-csrf-token", csrf)
            .await
            .assert_json(&json!({ "success": true }));

        let me: serde_json::Value = server.get("/api/me").add_header("cookie", cookie).await.json();
        assert_eq!(me["user"]["id"], admin.id.to_string());
        assert_eq!(me["isImpersonating"], false);
        assert!(me.get("originalUserId").is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_second_set_replaces_first() {
        let harness = TestHarness::new();
        let admin = harness.user("admin@example.com", Role::Admin).await;
        let tech = harness.user("tech@example.com", Role::Technician).await;
        let cs = harness.user("cs@example.com", Role::CustomerService).await;
        let server = harness.server();
        let (cookie, csrf) = session_headers(&harness.state, &admin);

        for target in [&tech, &cs] {
            server
                .post("/api/impersonate")
                .add_header("cookie", cookie.clone())
                .add_header("x-csrf-token", csrf.clone())
                .json(&json!({ "userId": target.id }))
                .await
                .assert_status_ok();
        }

        let me: serde_json::Value = server.get("/api/me").add_header("cookie", cookie).await.json();
        assert_eq!(me["user"]["id"], cs.id.to_string());
    }

    #[test_log::test(tokio::test)]
    async fn test_rejections() {
        let harness = TestHarness::new();
        let admin = harness.user("admin@example.com", Role::Admin).await;
        let tech = harness.user("tech@example.com", Role::Technician).await;
        let token = harness.token(&admin, "read,write", None).await;
        let server = harness.server();

        let (cookie, csrf) = session_headers(&harness.state, &admin);
        let response = server
            .post("/api/impersonate")
            .add_header("cookie", cookie.clone())
            .add_header("x-csrf-token", csrf.clone())
            .json(&json!({ "userId": admin.id }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        response.assert_json(&json!({ "error": "Cannot impersonate yourself" }));

        let response = server
            .post("/api/impersonate")
            .add_header("cookie", cookie)
            .add_header("x-csrf-token", csrf)
            .json(&json!({ "userId": uuid::Uuid::new_v4() }))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        response.assert_json(&json!({ "error": "User not found" }));

        let (cookie, csrf) = session_headers(&harness.state, &tech);
        server
            .post("/api/impersonate")
            .add_header("cookie", cookie)
            .add_header("x-csrf-token", csrf)
            .json(&json!({ "userId": admin.id }))
            .await
            .assert_status(StatusCode::FORBIDDEN);

        server
            .post("/api/impersonate")
            .add_header("authorization", format!("Bearer {token}"))
            .json(&json!({ "userId": tech.id }))
            .await
            .assert_status(StatusCode::FORBIDDEN);

        assert!(harness.state.impersonation.get(admin.id).await.unwrap().is_none());
        assert!(harness.state.impersonation.get(tech.id).await.unwrap().is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_admin_can_switch_target_while_impersonating_non_admin() {
        let harness = TestHarness::new();
        let admin = harness.user("admin@example.com", Role::Admin).await;
        let tech = harness.user("tech@example.com", Role::Technician).await;
        let cs = harness.user("cs@example.com", Role::CustomerService).await;
        let server = harness.server();
        let (cookie, csrf) = session_headers(&harness.state, &admin);

        server
            .post("/api/impersonate")
            .add_header("cookie", cookie.clone())
            .add_header("x-csrf-token", csrf.clone())
            .json(&json!({ "userId": tech.id }))
            .await
            .assert_status_ok();

        // Effective user is a technician, but the admin still holds the session
        server
            .post("/api/impersonate")
            .add_header("cookie", cookie)
            .add_header("x-csrf-token", csrf)
            .json(&json!({ "userId": cs.id }))
            .await
            .assert_status_ok();

        let entry = harness.state.impersonation.get(admin.id).await.unwrap().unwrap();
        assert_eq!(entry.impersonating_user_id, cs.id);
    }
}
