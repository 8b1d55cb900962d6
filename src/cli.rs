//! CLI argument parsing, validation, and startup helpers.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use base64::Engine;
use chrono::Duration;
use clap::Parser;
use rand::RngCore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::ServerConfig;
use crate::audit::{AuditSink, DatabaseAuditSink, TracingAuditSink};
use crate::capability::{Role, RoleCapabilities};
use crate::db::Database;
use crate::jwt::{DEFAULT_ACCESS_TOKEN_SECS, DEFAULT_REFRESH_TOKEN_SECS, TokenLifetimes};
use crate::password::hash_password;
use crate::session::{DEFAULT_REUSE_GRACE_SECS, GraceAction, SessionSettings};

const MIN_JWT_SECRET_LENGTH: usize = 32;

/// Random bytes in a generated admin password (base64url encoded).
const ADMIN_PASSWORD_BYTES: usize = 18;

/// Role given to accounts made with --create-admin.
const ADMIN_ROLE: &str = "admin";

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Where audit events go.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AuditTarget {
    /// The audit_events table, readable through the admin API
    #[default]
    Database,
    /// Structured log events only
    Log,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "steward",
    about = "Session and authorization service with rotating refresh tokens"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "7291", env = "STEWARD_PORT")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, default_value = "steward.db", env = "STEWARD_DATABASE")]
    pub database: String,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Access token lifetime in seconds
    #[arg(long, default_value_t = DEFAULT_ACCESS_TOKEN_SECS, value_parser = clap::value_parser!(i64).range(1..))]
    pub access_ttl: i64,

    /// Refresh token lifetime in seconds
    #[arg(long, default_value_t = DEFAULT_REFRESH_TOKEN_SECS, value_parser = clap::value_parser!(i64).range(1..))]
    pub refresh_ttl: i64,

    /// Keep refresh tokens valid across refreshes instead of rotating them
    #[arg(long)]
    pub no_rotation: bool,

    /// Seconds a rotated refresh token may be replayed before it counts as stolen (0 disables)
    #[arg(long, default_value_t = DEFAULT_REUSE_GRACE_SECS, value_parser = clap::value_parser!(i64).range(0..))]
    pub reuse_grace: i64,

    /// Answer a replay inside the grace window with the already-issued successor instead of rejecting it
    #[arg(long)]
    pub grace_reissue: bool,

    /// Deadline for each session store operation, in milliseconds
    #[arg(long, default_value = "5000", value_parser = clap::value_parser!(u64).range(1..))]
    pub store_timeout_ms: u64,

    /// JSON file mapping role names to permission lists
    #[arg(long, env = "STEWARD_ROLES_FILE")]
    pub roles_file: Option<String>,

    /// Take the client IP from X-Forwarded-For (only behind a trusted proxy)
    #[arg(long)]
    pub trust_forwarded_for: bool,

    /// Disable per-IP throttling of login attempts
    #[arg(long)]
    pub no_rate_limit: bool,

    /// Create an admin account with this username and print its password
    #[arg(long, value_name = "USERNAME")]
    pub create_admin: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,

    /// Audit event destination
    #[arg(long, default_value = "database")]
    pub audit: AuditTarget,
}

impl Args {
    pub fn lifetimes(&self) -> TokenLifetimes {
        TokenLifetimes {
            access: Duration::seconds(self.access_ttl),
            refresh: Duration::seconds(self.refresh_ttl),
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            rotation: !self.no_rotation,
            reuse_grace: Duration::seconds(self.reuse_grace),
            grace_action: if self.grace_reissue {
                GraceAction::Reissue
            } else {
                GraceAction::Reject
            },
            store_timeout: StdDuration::from_millis(self.store_timeout_ms),
        }
    }
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load JWT secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_jwt_secret(jwt_secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var("JWT_SECRET") {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var("JWT_SECRET") };
        secret
    } else if let Some(path) = jwt_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                return None;
            }
        }
    } else {
        error!(
            "JWT secret is required. Set JWT_SECRET environment variable (recommended) or use --jwt-secret-file"
        );
        return None;
    };

    validate_jwt_secret(secret)
}

fn validate_jwt_secret(secret: String) -> Option<String> {
    if secret.len() < MIN_JWT_SECRET_LENGTH {
        error!(
            "JWT secret is shorter than {} characters. Use a longer secret",
            MIN_JWT_SECRET_LENGTH
        );
        return None;
    }
    Some(secret)
}

/// Load the role map from `path`, or the built-in map when no file is given.
pub fn load_roles(path: Option<&str>) -> Option<RoleCapabilities> {
    let roles = match path {
        None => RoleCapabilities::default(),
        Some(path) => match RoleCapabilities::load(path) {
            Ok(roles) => {
                info!(path = %path, roles = roles.len(), "Role map loaded");
                roles
            }
            Err(e) => {
                error!(error = %e, "Failed to load role map");
                return None;
            }
        },
    };

    if !roles.is_known(&Role::from(ADMIN_ROLE)) {
        warn!(role = ADMIN_ROLE, "Role map has no entry for admin accounts, they get no capabilities");
    }
    Some(roles)
}

/// Handle the --create-admin flag: create an active admin account with a
/// random password, or report that the username is taken.
pub async fn handle_create_admin(db: &Database, username: &str) {
    match db.users().get_by_username(username).await {
        Ok(Some(existing)) => {
            println!();
            println!("User already exists: {} ({})", existing.username, existing.role);
            println!();
        }
        Ok(None) => {
            let password = generate_password();
            let hash = match hash_password(&password) {
                Ok(hash) => hash,
                Err(e) => {
                    error!(error = %e, "Failed to hash admin password");
                    std::process::exit(1);
                }
            };

            let uuid = Uuid::new_v4().to_string();
            match db.users().create(&uuid, username, &hash, ADMIN_ROLE).await {
                Ok(_) => {
                    println!();
                    println!("Admin user created: {}", username);
                    println!("Password: {}", password);
                    println!();
                }
                Err(e) => {
                    error!(error = %e, "Failed to create admin user");
                    std::process::exit(1);
                }
            }
        }
        Err(e) => {
            error!(error = %e, "Failed to check for existing user");
            std::process::exit(1);
        }
    }
}

fn generate_password() -> String {
    let mut bytes = [0u8; ADMIN_PASSWORD_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    args: &Args,
    db: Database,
    jwt_secret: String,
    roles: RoleCapabilities,
) -> ServerConfig {
    let audit = audit_sink(args.audit, &db);

    ServerConfig {
        db,
        jwt_secret: jwt_secret.into_bytes(),
        lifetimes: args.lifetimes(),
        session: args.session_settings(),
        roles: Arc::new(roles),
        audit,
        trust_forwarded_for: args.trust_forwarded_for,
        login_rate_limit: !args.no_rate_limit,
    }
}

fn audit_sink(target: AuditTarget, db: &Database) -> Arc<dyn AuditSink> {
    match target {
        AuditTarget::Database => Arc::new(DatabaseAuditSink::new(db.audit())),
        AuditTarget::Log => Arc::new(TracingAuditSink),
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
