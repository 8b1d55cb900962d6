pub mod api;
pub mod audit;
pub mod auth;
pub mod capability;
pub mod cleanup;
pub mod cli;
pub mod db;
pub mod jwt;
pub mod password;
pub mod rate_limit;
pub mod session;

use api::create_api_router;
use audit::AuditSink;
use axum::Router;
use capability::RoleCapabilities;
use db::Database;
use jwt::{JwtConfig, TokenLifetimes};
use session::{SessionService, SessionSettings};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// JWT secret for signing tokens
    pub jwt_secret: Vec<u8>,
    pub lifetimes: TokenLifetimes,
    /// Rotation, reuse grace window and store deadline
    pub session: SessionSettings,
    /// Role -> capability map, read-only for the process lifetime
    pub roles: Arc<RoleCapabilities>,
    pub audit: Arc<dyn AuditSink>,
    /// Take the client IP from X-Forwarded-For (requires running behind a proxy)
    pub trust_forwarded_for: bool,
    /// Whether login attempts are throttled per client IP
    pub login_rate_limit: bool,
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    let jwt = Arc::new(JwtConfig::new(&config.jwt_secret, config.lifetimes));

    let sessions = Arc::new(SessionService::new(
        config.db.clone(),
        jwt.clone(),
        config.roles.clone(),
        config.session,
        config.audit.clone(),
    ));

    let api_router = create_api_router(
        config.db.clone(),
        jwt,
        sessions,
        config.trust_forwarded_for,
        config.login_rate_limit,
    );

    Router::new().nest("/api", api_router)
}

/// Run cleanup tasks and spawn background scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(db: &Database) {
    cleanup::run_cleanup(db).await;
    cleanup::spawn_cleanup_scheduler(db.clone());
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}
