use axum::{
    Json,
    extract::{Path, State},
};
use tracing::info;

use crate::{
    AppState,
    api::models::users::{MeResponse, Role, RoleUpdate, UserResponse},
    auth::current_user::Authenticated,
    db::errors::DbError,
    errors::Error,
    types::{UserId, abbrev_uuid},
};

/// The effective identity of the caller and how it was established.
#[tracing::instrument(skip_all)]
pub async fn get_me(auth: Authenticated) -> Result<Json<MeResponse>, Error> {
    let (original_user_id, original_user_email) = match &auth {
        Authenticated::Session(session) => match &session.original {
            Some(original) => (Some(original.id), Some(original.email.clone())),
            None => (None, None),
        },
        Authenticated::Bearer(_) => (None, None),
    };

    Ok(Json(MeResponse {
        user: auth.user().clone(),
        auth_type: auth.auth_type().to_string(),
        scopes: auth.scopes().map(|s| s.to_vec()),
        is_impersonating: original_user_id.is_some(),
        original_user_id,
        original_user_email,
    }))
}

/// List all users. Admins only; bearer callers need the `read` scope.
#[tracing::instrument(skip_all)]
pub async fn list_users(State(state): State<AppState>, auth: Authenticated) -> Result<Json<Vec<UserResponse>>, Error> {
    auth.require_scope("read", "users")?;
    auth.require_role(Role::Admin, "users")?;

    let users = state.users.list().await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// Change a user's role. Admins only; bearer callers need the `write` scope.
#[tracing::instrument(skip_all)]
pub async fn update_user_role(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    auth: Authenticated,
    Json(update): Json<RoleUpdate>,
) -> Result<Json<UserResponse>, Error> {
    auth.require_scope("write", "user role")?;
    let actor = auth.require_role(Role::Admin, "user role")?;

    let updated = state.users.update_role(user_id, update.role).await.map_err(|e| match e {
        DbError::NotFound => Error::NotFound {
            resource: "User".to_string(),
            id: user_id.to_string(),
        },
        other => other.into(),
    })?;

    info!(
        actor_id = %abbrev_uuid(&actor.id),
        user_id = %abbrev_uuid(&user_id),
        role = %updated.role,
        via = auth.auth_type(),
        "User role changed"
    );

    Ok(Json(updated.into()))
}
