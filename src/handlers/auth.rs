use axum::{
    Extension, Json,
    body::Bytes,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

use crate::error::{AuthError, LOGIN_PATH};
use crate::gate::{CurrentSession, DASHBOARD_PATH};
use crate::models::{CredentialsRequest, LoginResponse, SessionUser};
use crate::state::AppState;

// POST /api/auth/callback/credentials
//
// The gate has already counted this attempt against the login limit. A body
// that isn't valid JSON is treated like empty credentials.
pub async fn credentials_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, AuthError> {
    let credentials: CredentialsRequest = serde_json::from_slice(&body).unwrap_or_else(|e| {
        debug!("Unreadable credentials body: {}", e);
        CredentialsRequest::default()
    });

    let (token, session) = state
        .authenticator
        .login(&credentials.email, &credentials.password)
        .await?;
    let cookie = state.sessions().cookie(&token)?;

    debug!(user_id = %session.identity.id, expires_at = %session.expires_at, "Session issued");
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(LoginResponse {
            url: DASHBOARD_PATH.to_string(),
        }),
    )
        .into_response())
}

// GET /api/auth/session
pub async fn session_handler(
    Extension(CurrentSession(session)): Extension<CurrentSession>,
) -> Json<Option<SessionUser>> {
    Json(session.map(|s| s.user()))
}

// POST /api/auth/signout
pub async fn signout_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::SET_COOKIE, state.sessions().expired_cookie())],
        Json(LoginResponse {
            url: LOGIN_PATH.to_string(),
        }),
    )
}
