//! 会话路由

use axum::{
    Json, Router,
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
};
use pulse_domain::Session;
use pulse_errors::{AppError, AppResult};
use pulse_telemetry::record_login_attempt;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::middleware::{ClientKey, CurrentSession, clear_session_cookie, session_cookie};
use crate::state::AppState;

pub fn session_routes() -> Router<AppState> {
    Router::new().route(
        "/api/session",
        get(current_session).post(login).delete(logout),
    )
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub access_key: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub authenticated: bool,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            authenticated: session.authenticated,
        }
    }
}

async fn current_session(current: CurrentSession) -> Json<SessionResponse> {
    Json(current.session.into())
}

/// 登录，成功时签发会话 cookie
async fn login(
    State(state): State<AppState>,
    ClientKey(client): ClientKey,
    current: CurrentSession,
    Json(req): Json<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    let result = state
        .sessions
        .authenticate(&client, current.id, &req.access_key, &state.gate);

    let outcome = match &result {
        Ok(_) => "success",
        Err(AppError::ResourceExhausted(_)) => "locked",
        Err(_) => "failure",
    };
    record_login_attempt(outcome);

    let (id, session) = result?;
    let ttl = state.sessions.policy().ttl.as_secs();
    let cookie = session_cookie(id, ttl, state.settings.secure_cookies)
        .map_err(|e| AppError::internal(format!("Invalid session cookie: {}", e)))?;

    Ok(([(header::SET_COOKIE, cookie)], Json(SessionResponse::from(session))))
}

async fn logout(State(state): State<AppState>, current: CurrentSession) -> impl IntoResponse {
    if let Some(id) = current.id {
        state.sessions.logout(&id);
        info!(session_id = %id, "Logged out");
    }

    (
        [(header::SET_COOKIE, clear_session_cookie())],
        Json(SessionResponse {
            authenticated: false,
        }),
    )
}
