//! Authenticated identity types.

use serde::Serialize;

use crate::capability::{CapabilitySet, Permission, Role};
use crate::jwt::AccessClaims;

/// Identity established from a verified access token.
///
/// Inserted into the request extensions by the authenticator and read by the
/// capability gate and handlers. Never consults the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// User UUID (token subject)
    pub user_id: String,
    pub username: String,
    pub role: Role,
    pub capabilities: CapabilitySet,
}

impl Identity {
    pub fn has_permission(&self, permission: &Permission) -> bool {
        self.capabilities.contains(permission)
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.role == *role
    }
}

impl From<AccessClaims> for Identity {
    fn from(claims: AccessClaims) -> Self {
        Self {
            user_id: claims.sub,
            username: claims.username,
            role: claims.role,
            capabilities: claims.capabilities,
        }
    }
}
