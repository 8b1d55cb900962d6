//! Roles, permissions and the role -> capability map.
//!
//! The map is loaded once at startup and shared read-only behind an `Arc`.
//! Lookups for roles that are not configured resolve to the empty set.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single named permission, e.g. `"tasks:read"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Permission {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

/// Role name as stored on the user record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Role {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

/// Unordered set of permissions granted to a subject.
///
/// Serialized as a sorted JSON array so tokens minted for the same set are
/// byte-for-byte comparable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Permission>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, permission: &Permission) -> bool {
        self.0.contains(permission)
    }

    /// True if at least one of `permissions` is in the set.
    pub fn contains_any(&self, permissions: &[Permission]) -> bool {
        permissions.iter().any(|p| self.0.contains(p))
    }

    pub fn insert(&mut self, permission: Permission) -> bool {
        self.0.insert(permission)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.0.iter()
    }
}

impl FromIterator<Permission> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|s| Permission::new(s.to_string()))
                .collect(),
        )
    }
}

/// Errors raised while loading a roles file.
#[derive(Debug, Error)]
pub enum RoleConfigError {
    #[error("failed to read roles file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid roles file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("role name cannot be empty")]
    EmptyRole,
    #[error("role '{0}' lists an empty permission")]
    EmptyPermission(String),
}

/// Read-only role -> capability map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleCapabilities {
    roles: HashMap<Role, CapabilitySet>,
}

impl RoleCapabilities {
    pub fn new(roles: HashMap<Role, CapabilitySet>) -> Self {
        Self { roles }
    }

    /// Parse a JSON object of the form `{"role": ["perm", ...], ...}`.
    pub fn from_json(json: &str) -> Result<Self, RoleConfigError> {
        let raw: HashMap<String, Vec<String>> = serde_json::from_str(json)?;
        let mut roles = HashMap::with_capacity(raw.len());
        for (role, permissions) in raw {
            let role = role.trim().to_string();
            if role.is_empty() {
                return Err(RoleConfigError::EmptyRole);
            }
            if permissions.iter().any(|p| p.trim().is_empty()) {
                return Err(RoleConfigError::EmptyPermission(role));
            }
            let set = permissions
                .into_iter()
                .map(|p| Permission::new(p.trim().to_string()))
                .collect();
            roles.insert(Role::new(role), set);
        }
        Ok(Self { roles })
    }

    /// Load the map from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RoleConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| RoleConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Capabilities granted to `role`. Unknown roles get the empty set.
    pub fn capabilities_for_role(&self, role: &Role) -> CapabilitySet {
        self.roles.get(role).cloned().unwrap_or_default()
    }

    pub fn is_known(&self, role: &Role) -> bool {
        self.roles.contains_key(role)
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

impl Default for RoleCapabilities {
    /// Built-in map used when no roles file is configured.
    fn default() -> Self {
        let admin: CapabilitySet = [
            "users:read",
            "users:write",
            "users:disable",
            "sessions:revoke",
            "organizations:read",
            "organizations:write",
            "tasks:read",
            "tasks:write",
            "tasks:delete",
            "roles:read",
            "roles:write",
            "audit:read",
        ]
        .into_iter()
        .collect();
        let manager: CapabilitySet = ["tasks:read", "tasks:write"].into_iter().collect();
        let user: CapabilitySet = ["tasks:read"].into_iter().collect();

        let mut roles = HashMap::new();
        roles.insert(Role::from("admin"), admin);
        roles.insert(Role::from("manager"), manager);
        roles.insert(Role::from("user"), user);
        Self { roles }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_role_has_no_capabilities() {
        let roles = RoleCapabilities::default();
        assert!(roles.capabilities_for_role(&Role::from("ghost")).is_empty());
        assert!(!roles.is_known(&Role::from("ghost")));
    }

    #[test]
    fn test_manager_capabilities() {
        let roles = RoleCapabilities::default();
        let caps = roles.capabilities_for_role(&Role::from("manager"));
        let expected: CapabilitySet = ["tasks:write", "tasks:read"].into_iter().collect();
        assert_eq!(caps, expected);
    }

    #[test]
    fn test_from_json() {
        let roles =
            RoleCapabilities::from_json(r#"{"auditor": ["audit:read", "users:read"], "guest": []}"#)
                .unwrap();
        assert_eq!(roles.len(), 2);
        let caps = roles.capabilities_for_role(&Role::from("auditor"));
        assert!(caps.contains(&Permission::from("audit:read")));
        assert!(caps.contains(&Permission::from("users:read")));
        assert!(roles.capabilities_for_role(&Role::from("guest")).is_empty());
    }

    #[test]
    fn test_from_json_rejects_empty_permission() {
        let result = RoleCapabilities::from_json(r#"{"auditor": ["audit:read", " "]}"#);
        assert!(matches!(result, Err(RoleConfigError::EmptyPermission(_))));
    }

    #[test]
    fn test_from_json_rejects_wrong_shape() {
        assert!(RoleCapabilities::from_json(r#"["admin"]"#).is_err());
    }

    #[test]
    fn test_contains_any() {
        let caps: CapabilitySet = ["tasks:read"].into_iter().collect();
        assert!(caps.contains_any(&[Permission::from("tasks:write"), Permission::from("tasks:read")]));
        assert!(!caps.contains_any(&[Permission::from("tasks:write")]));
        assert!(!caps.contains_any(&[]));
    }

    #[test]
    fn test_serializes_sorted() {
        let caps: CapabilitySet = ["b", "a", "c"].into_iter().collect();
        assert_eq!(serde_json::to_string(&caps).unwrap(), r#"["a","b","c"]"#);
    }
}
