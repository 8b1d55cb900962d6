//! Bearer-token request authentication.
//!
//! Both modes only consult the token codec. Access tokens are self-contained,
//! so nothing here touches the database.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use super::errors::{ApiAuthError, AuthErrorKind};
use super::types::Identity;
use crate::jwt::{BearerError, JwtConfig, extract_bearer};

/// Verifies the `Authorization` header of incoming requests.
#[derive(Clone)]
pub struct Authenticator {
    jwt: Arc<JwtConfig>,
}

impl Authenticator {
    pub fn new(jwt: Arc<JwtConfig>) -> Self {
        Self { jwt }
    }

    /// Establish the identity behind a request's bearer token.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, AuthErrorKind> {
        let value = headers
            .get(header::AUTHORIZATION)
            .ok_or(AuthErrorKind::NotAuthenticated)?
            .to_str()
            .map_err(|_| AuthErrorKind::InvalidToken)?;

        let token = extract_bearer(value).map_err(|e| match e {
            BearerError::Empty => AuthErrorKind::NotAuthenticated,
            BearerError::WrongScheme => AuthErrorKind::InvalidToken,
        })?;

        let claims = self.jwt.verify_access(token).map_err(|e| {
            debug!(reason = e.reason(), "Access token rejected");
            AuthErrorKind::InvalidToken
        })?;

        Ok(Identity::from(claims))
    }
}

/// Reject the request unless it carries a valid access token.
pub async fn require_auth(
    State(authenticator): State<Authenticator>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiAuthError> {
    let identity = authenticator.authenticate(request.headers())?;
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// Attach an identity when a valid access token is present. Never rejects.
pub async fn optional_auth(
    State(authenticator): State<Authenticator>,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticator.authenticate(request.headers()) {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
        }
        Err(kind) => debug!(?kind, "Continuing as anonymous"),
    }
    next.run(request).await
}
