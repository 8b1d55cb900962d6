//! Axum extractors reading the identity injected by the auth middleware.

use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::request::Parts};

use super::errors::{ApiAuthError, AuthErrorKind};
use super::types::Identity;

/// Extractor for handlers behind `require_auth`.
///
/// Fails with 401 if no identity was injected, which only happens when the
/// handler was mounted without the middleware.
pub struct Auth(pub Identity);

impl<S> FromRequestParts<S> for Auth
where
    S: Send + Sync,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .map(Auth)
            .ok_or(ApiAuthError::new(AuthErrorKind::NotAuthenticated))
    }
}

/// Optional identity extractor, never fails.
pub struct OptionalAuth(pub Option<Identity>);

impl<S> FromRequestParts<S> for OptionalAuth
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalAuth(parts.extensions.get::<Identity>().cloned()))
    }
}
