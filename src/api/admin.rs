//! Admin API endpoints.
//!
//! Every route requires authentication plus its own capability or role:
//!
//! - GET `/users` - `users:read`
//! - POST `/users/{uuid}/logout-all` - `sessions:revoke`
//! - POST `/users/{uuid}/disable` - role `admin`
//! - GET `/audit` - `audit:read` or `users:write`

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::error::{ApiError, ResultExt, validate_uuid};
use crate::auth::{
    Auth, Authenticator, enforce, require_any_permission, require_auth, require_permission,
    require_role,
};
use crate::db::{AuditRecord, Database, UserProfile};
use crate::session::SessionService;

const DEFAULT_AUDIT_LIMIT: i64 = 100;
const MAX_AUDIT_LIMIT: i64 = 500;

/// State for admin endpoints.
#[derive(Clone)]
pub struct AdminState {
    pub db: Database,
    pub sessions: Arc<SessionService>,
}

/// Wrap a method router in a capability gate.
macro_rules! gated {
    ($method:expr, $requirement:expr) => {
        $method.route_layer(middleware::from_fn_with_state(
            Arc::new($requirement),
            enforce,
        ))
    };
}

pub fn router(state: AdminState, authenticator: Authenticator) -> Router {
    Router::new()
        .route(
            "/users",
            gated!(get(list_users), require_permission("users:read")),
        )
        .route(
            "/users/{uuid}/logout-all",
            gated!(post(logout_user), require_permission("sessions:revoke")),
        )
        .route(
            "/users/{uuid}/disable",
            gated!(post(disable_user), require_role("admin")),
        )
        .route(
            "/audit",
            gated!(
                get(list_audit),
                require_any_permission(["audit:read", "users:write"])
            ),
        )
        .route_layer(middleware::from_fn_with_state(authenticator, require_auth))
        .with_state(state)
}

#[derive(Serialize)]
struct UsersResponse {
    users: Vec<UserProfile>,
}

#[derive(Serialize)]
struct AuditResponse {
    events: Vec<AuditRecord>,
}

#[derive(Deserialize)]
struct AuditQuery {
    limit: Option<i64>,
}

async fn list_users(State(state): State<AdminState>) -> Result<impl IntoResponse, ApiError> {
    let users = state
        .db
        .users()
        .list()
        .await
        .db_err("Failed to list users")?;

    Ok(Json(UsersResponse { users }))
}

/// Sign a user out everywhere.
async fn logout_user(
    State(state): State<AdminState>,
    Auth(admin): Auth,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    validate_uuid(&uuid)?;

    state
        .db
        .users()
        .get_by_uuid(&uuid)
        .await
        .db_err("Failed to get user")?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let revoked = state.sessions.logout_all(&uuid).await?;
    info!(admin = %admin.user_id, user = %uuid, revoked, "Admin revoked user sessions");

    Ok(Json(serde_json::json!({ "revoked": revoked })))
}

async fn disable_user(
    State(state): State<AdminState>,
    Auth(admin): Auth,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    validate_uuid(&uuid)?;

    if uuid == admin.user_id {
        return Err(ApiError::bad_request("Cannot disable your own account"));
    }

    if !state.sessions.disable_user(&uuid).await? {
        return Err(ApiError::not_found("User not found"));
    }
    info!(admin = %admin.user_id, user = %uuid, "Admin disabled user");

    Ok(Json(serde_json::json!({ "success": true })))
}

async fn list_audit(
    State(state): State<AdminState>,
    Query(query): Query<AuditQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .clamp(1, MAX_AUDIT_LIMIT);

    let events = state
        .db
        .audit()
        .list_recent(limit)
        .await
        .db_err("Failed to list audit events")?;

    Ok(Json(AuditResponse { events }))
}
