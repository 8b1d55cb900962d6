//! Endpoints that work both authenticated and anonymously.

use axum::{Json, Router, middleware, response::IntoResponse, routing::get};

use crate::auth::{Authenticator, OptionalAuth, optional_auth};

pub fn router(authenticator: Authenticator) -> Router {
    Router::new()
        .route("/whoami", get(whoami))
        .route_layer(middleware::from_fn_with_state(authenticator, optional_auth))
}

/// The caller's identity, or `null` when anonymous.
async fn whoami(OptionalAuth(identity): OptionalAuth) -> impl IntoResponse {
    Json(identity)
}
