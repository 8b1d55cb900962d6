//! Capability gate: authorization over the identity injected by the
//! authenticator.
//!
//! The gate must be layered inside `require_auth` or `optional_auth`. When it
//! finds no identity it answers 401, when the identity lacks the capability
//! or role it answers 403. Either way the handler does not run.
//!
//! ```ignore
//! Router::new()
//!     .route(
//!         "/users",
//!         get(list_users).route_layer(middleware::from_fn_with_state(
//!             Arc::new(require_permission("users:read")),
//!             enforce,
//!         )),
//!     )
//!     .route_layer(middleware::from_fn_with_state(authenticator, require_auth))
//! ```

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use super::errors::{ApiAuthError, AuthErrorKind};
use super::types::Identity;
use crate::capability::{Permission, Role};

/// What an identity must hold to pass the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Permission(Permission),
    /// At least one of the listed permissions. An empty list admits no one.
    AnyPermission(Vec<Permission>),
    Role(Role),
    /// One of the listed roles. An empty list admits no one.
    AnyRole(Vec<Role>),
}

pub fn require_permission(name: impl Into<Permission>) -> Requirement {
    Requirement::Permission(name.into())
}

pub fn require_any_permission<I, P>(names: I) -> Requirement
where
    I: IntoIterator<Item = P>,
    P: Into<Permission>,
{
    Requirement::AnyPermission(names.into_iter().map(Into::into).collect())
}

pub fn require_role(name: impl Into<Role>) -> Requirement {
    Requirement::Role(name.into())
}

pub fn require_any_role<I, R>(names: I) -> Requirement
where
    I: IntoIterator<Item = R>,
    R: Into<Role>,
{
    Requirement::AnyRole(names.into_iter().map(Into::into).collect())
}

impl Requirement {
    /// Decide whether `identity` satisfies this requirement.
    pub fn check(&self, identity: Option<&Identity>) -> Result<(), AuthErrorKind> {
        let identity = identity.ok_or(AuthErrorKind::NotAuthenticated)?;

        let allowed = match self {
            Requirement::Permission(permission) => identity.has_permission(permission),
            Requirement::AnyPermission(permissions) => {
                identity.capabilities.contains_any(permissions)
            }
            Requirement::Role(role) => identity.has_role(role),
            Requirement::AnyRole(roles) => roles.iter().any(|role| identity.has_role(role)),
        };

        if allowed {
            Ok(())
        } else {
            Err(AuthErrorKind::Forbidden)
        }
    }
}

/// Middleware applying a [`Requirement`] to the request's identity.
pub async fn enforce(
    State(requirement): State<Arc<Requirement>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiAuthError> {
    let identity = request.extensions().get::<Identity>();
    if let Err(kind) = requirement.check(identity) {
        debug!(
            ?kind,
            requirement = ?requirement,
            user = identity.map(|i| i.user_id.as_str()).unwrap_or("-"),
            "Request refused by capability gate"
        );
        return Err(kind.into());
    }
    Ok(next.run(request).await)
}
