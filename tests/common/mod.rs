#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, Response, header},
};
use chrono::Duration;
use serde_json::Value;
use steward::{
    ServerConfig,
    audit::{AuditSink, MemoryAuditSink},
    capability::RoleCapabilities,
    create_app,
    db::Database,
    jwt::{JwtConfig, TokenLifetimes},
    password::hash_password,
    session::{GraceAction, SessionService, SessionSettings},
};

pub const TEST_SECRET: &[u8] = b"test-jwt-secret-that-is-long-enough";
pub const PASSWORD: &str = "correct horse battery staple";

/// Everything a test needs to drive the session layer directly or over HTTP.
pub struct TestEnv {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub sessions: Arc<SessionService>,
    pub audit: Arc<MemoryAuditSink>,
    pub settings: SessionSettings,
}

/// Builder for test setup with various options
pub struct TestSetup {
    settings: SessionSettings,
    lifetimes: TokenLifetimes,
    login_rate_limit: bool,
    trust_forwarded_for: bool,
}

impl TestSetup {
    pub fn new() -> Self {
        Self {
            settings: SessionSettings::default(),
            lifetimes: TokenLifetimes::default(),
            login_rate_limit: false,
            trust_forwarded_for: false,
        }
    }

    pub fn with_rotation(mut self, rotation: bool) -> Self {
        self.settings.rotation = rotation;
        self
    }

    pub fn with_reuse_grace(mut self, secs: i64) -> Self {
        self.settings.reuse_grace = Duration::seconds(secs);
        self
    }

    pub fn with_grace_action(mut self, action: GraceAction) -> Self {
        self.settings.grace_action = action;
        self
    }

    pub fn with_store_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.settings.store_timeout = timeout;
        self
    }

    /// Throttle logins, keyed on X-Forwarded-For.
    pub fn with_login_rate_limit(mut self) -> Self {
        self.login_rate_limit = true;
        self.trust_forwarded_for = true;
        self
    }

    pub async fn build(self) -> TestEnv {
        let db = Database::open(":memory:")
            .await
            .expect("Failed to open test database");
        let jwt = Arc::new(JwtConfig::new(TEST_SECRET, self.lifetimes));
        let audit = Arc::new(MemoryAuditSink::new());
        let sink: Arc<dyn AuditSink> = audit.clone();
        let sessions = Arc::new(SessionService::new(
            db.clone(),
            jwt.clone(),
            Arc::new(RoleCapabilities::default()),
            self.settings,
            sink,
        ));

        TestEnv {
            db,
            jwt,
            sessions,
            audit,
            settings: self.settings,
        }
    }

    /// Build the HTTP app. The app owns its own session service but shares
    /// the database and audit sink with the returned environment.
    pub async fn build_app(self) -> (Router, TestEnv) {
        let login_rate_limit = self.login_rate_limit;
        let trust_forwarded_for = self.trust_forwarded_for;
        let lifetimes = self.lifetimes;
        let env = self.build().await;

        let config = ServerConfig {
            db: env.db.clone(),
            jwt_secret: TEST_SECRET.to_vec(),
            lifetimes,
            session: env.settings,
            roles: Arc::new(RoleCapabilities::default()),
            audit: env.audit.clone(),
            trust_forwarded_for,
            login_rate_limit,
        };

        (create_app(&config), env)
    }
}

pub async fn setup() -> TestEnv {
    TestSetup::new().build().await
}

pub async fn setup_app() -> (Router, TestEnv) {
    TestSetup::new().build_app().await
}

/// Create an active user with [`PASSWORD`]. Returns (id, uuid).
pub async fn create_user(db: &Database, username: &str, role: &str) -> (i64, String) {
    let uuid = uuid::Uuid::new_v4().to_string();
    let hash = hash_password(PASSWORD).unwrap();
    let id = db
        .users()
        .create(&uuid, username, &hash, role)
        .await
        .unwrap();
    (id, uuid)
}

/// Count every refresh token row of a user, revoked or not.
pub async fn count_refresh_tokens(db: &Database, user_id: i64) -> i64 {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM refresh_tokens WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(db.pool())
        .await
        .unwrap();
    count
}

pub fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn authed_request(method: Method, uri: &str, access_token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
        .body(Body::empty())
        .unwrap()
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
