use axum::{Json, extract::State};

use crate::{AppState, api::models::csrf::CsrfTokenResponse, auth::current_user::Authenticated, errors::Error};

/// Issue a CSRF token for the caller's session.
///
/// The token is bound to the signed-in user, so it stays valid across the start and end of an
/// impersonation.
#[tracing::instrument(skip_all)]
pub async fn get_csrf_token(State(state): State<AppState>, auth: Authenticated) -> Result<Json<CsrfTokenResponse>, Error> {
    let session = auth.session("csrf token")?;
    let csrf_token = state.csrf.issue(session.authenticated_user().id)?;

    Ok(Json(CsrfTokenResponse { csrf_token }))
}
