//! Bearer-token authentication and capability-based authorization.
//!
//! `require_auth` / `optional_auth` verify the access token and inject an
//! [`Identity`] into the request extensions. The capability gate (`enforce`
//! with a [`Requirement`]) runs after them and decides 401 vs 403.

mod errors;
mod extractors;
mod gate;
mod ip;
mod middleware;
mod types;

pub use errors::{ApiAuthError, AuthErrorKind};
pub use extractors::{Auth, OptionalAuth};
pub use gate::{
    Requirement, enforce, require_any_permission, require_any_role, require_permission,
    require_role,
};
pub use ip::{FORWARDED_FOR_HEADER, HasHeadersAndExtensions, extract_client_ip};
pub use middleware::{Authenticator, optional_auth, require_auth};
pub use types::Identity;
