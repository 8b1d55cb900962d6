//! Session API endpoints.
//!
//! - POST `/login` - Exchange username and password for a token pair
//! - POST `/refresh` - Exchange a refresh token for a new pair
//! - POST `/logout` - Revoke a refresh token
//! - POST `/logout-all` - Revoke every refresh token of the caller
//! - GET `/me` - Identity carried by the access token
//! - GET `/sessions` - Active refresh sessions of the caller

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, State},
    http::request::Parts,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::auth::{Auth, Authenticator, extract_client_ip, require_auth};
use crate::rate_limit::{LoginRateLimit, rate_limit_login};
use crate::session::{SessionInfo, SessionService};

#[derive(Clone)]
pub struct SessionState {
    pub sessions: Arc<SessionService>,
    pub trust_forwarded_for: bool,
}

pub fn router(
    state: SessionState,
    authenticator: Authenticator,
    rate_limit: Option<LoginRateLimit>,
) -> Router {
    let login_route = match rate_limit {
        Some(limit) => {
            post(login).route_layer(middleware::from_fn_with_state(limit, rate_limit_login))
        }
        None => post(login),
    };

    let protected = Router::new()
        .route("/logout-all", post(logout_all))
        .route("/me", get(me))
        .route("/sessions", get(list_sessions))
        .route_layer(middleware::from_fn_with_state(authenticator, require_auth));

    Router::new()
        .route("/login", login_route)
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .merge(protected)
        .with_state(state)
}

/// Client IP as seen by the session endpoints, used for audit only.
struct ClientIp(Option<String>);

impl FromRequestParts<SessionState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SessionState,
    ) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(
            extract_client_ip(parts, state.trust_forwarded_for).ok(),
        ))
    }
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

#[derive(Serialize)]
struct LogoutAllResponse {
    revoked: u64,
}

#[derive(Serialize)]
struct ListSessionsResponse {
    sessions: Vec<SessionInfo>,
}

async fn login(
    State(state): State<SessionState>,
    ClientIp(client_ip): ClientIp,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .sessions
        .login(&body.username, &body.password, client_ip.as_deref())
        .await?;
    Ok(Json(outcome))
}

async fn refresh(
    State(state): State<SessionState>,
    Json(body): Json<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let tokens = state.sessions.refresh(&body.refresh_token).await?;
    Ok(Json(tokens))
}

/// Idempotent: unknown or already revoked tokens still succeed.
async fn logout(
    State(state): State<SessionState>,
    Json(body): Json<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.sessions.logout(&body.refresh_token).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn logout_all(
    State(state): State<SessionState>,
    Auth(identity): Auth,
) -> Result<impl IntoResponse, ApiError> {
    let revoked = state.sessions.logout_all(&identity.user_id).await?;
    Ok(Json(LogoutAllResponse { revoked }))
}

async fn me(Auth(identity): Auth) -> impl IntoResponse {
    Json(identity)
}

async fn list_sessions(
    State(state): State<SessionState>,
    Auth(identity): Auth,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = state.sessions.list_sessions(&identity.user_id).await?;
    Ok(Json(ListSessionsResponse { sessions }))
}
