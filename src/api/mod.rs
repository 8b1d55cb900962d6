mod admin;
mod error;
mod public;
mod session;

use axum::Router;
use std::sync::Arc;

use crate::auth::Authenticator;
use crate::db::Database;
use crate::jwt::JwtConfig;
use crate::rate_limit::LoginRateLimit;
use crate::session::SessionService;

pub use error::ApiError;

/// Create the API router.
pub fn create_api_router(
    db: Database,
    jwt: Arc<JwtConfig>,
    sessions: Arc<SessionService>,
    trust_forwarded_for: bool,
    login_rate_limit: bool,
) -> Router {
    let authenticator = Authenticator::new(jwt);
    let rate_limit = login_rate_limit.then(|| LoginRateLimit::new(trust_forwarded_for));

    let session_state = session::SessionState {
        sessions: sessions.clone(),
        trust_forwarded_for,
    };

    let admin_state = admin::AdminState { db, sessions };

    Router::new()
        .nest(
            "/auth",
            session::router(session_state, authenticator.clone(), rate_limit),
        )
        .nest("/admin", admin::router(admin_state, authenticator.clone()))
        .nest("/public", public::router(authenticator))
}
