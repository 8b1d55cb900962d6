//! Session lifecycle: login, refresh with rotation and reuse detection,
//! logout and logout-everywhere.
//!
//! Every way a refresh credential can be refused (bad signature, unknown
//! identity, revoked, expired, lost rotation race) surfaces to callers as the
//! single [`SessionError::InvalidOrExpired`]. The precise reason is only
//! logged.

use std::future::Future;
use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEvent, AuditSink, LoginFailureReason};
use crate::capability::RoleCapabilities;
use crate::db::{from_unix, Database, NewRefreshToken, RefreshTokenRecord, TokenState, User, UserProfile, UserStatus};
use crate::jwt::{AccessToken, JwtConfig, RefreshToken, TokenError};
use crate::password;

/// Default reuse grace window: 10 seconds
pub const DEFAULT_REUSE_GRACE_SECS: i64 = 10;

/// Default deadline for a single store operation.
pub const DEFAULT_STORE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Number of random bytes in a refresh token identity.
const TOKEN_IDENTITY_BYTES: usize = 32;

/// Outcome for a rotated refresh token presented again inside the grace
/// window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GraceAction {
    /// Refuse it, leaving the user's other sessions alone. Two concurrent
    /// refreshes of one token then always yield one success.
    #[default]
    Reject,
    /// Hand out the successor already issued for it. Concurrent duplicates
    /// may both succeed, sharing that one successor.
    Reissue,
}

/// Refresh policy knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Issue a new refresh token on every refresh and retire the old one.
    pub rotation: bool,
    /// How long after rotation a predecessor may be presented again without
    /// being treated as stolen. Zero disables the window.
    pub reuse_grace: Duration,
    pub grace_action: GraceAction,
    /// Deadline applied to each store call.
    pub store_timeout: std::time::Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            rotation: true,
            reuse_grace: Duration::seconds(DEFAULT_REUSE_GRACE_SECS),
            grace_action: GraceAction::default(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account disabled")]
    AccountDisabled,
    #[error("invalid or expired credential")]
    InvalidOrExpired,
    /// The store did not answer within the deadline. Retryable.
    #[error("session store unavailable")]
    Unavailable,
    #[error("internal error: {0}")]
    Internal(String),
}

impl SessionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Unavailable)
    }
}

/// Why a refresh credential was refused.
#[derive(Debug, Clone, Copy)]
enum Rejection {
    Token(&'static str),
    UnknownIdentity,
    Expired,
    UnknownUser,
    SubjectMismatch,
    AccountInactive,
    RaceLost,
    WithinGrace,
    SuccessorUnavailable,
    SessionsRevoked,
}

impl Rejection {
    fn as_str(&self) -> &'static str {
        match self {
            Rejection::Token(reason) => reason,
            Rejection::UnknownIdentity => "unknown_identity",
            Rejection::Expired => "record_expired",
            Rejection::UnknownUser => "unknown_user",
            Rejection::SubjectMismatch => "subject_mismatch",
            Rejection::AccountInactive => "account_inactive",
            Rejection::RaceLost => "rotation_race_lost",
            Rejection::WithinGrace => "rotated_within_grace",
            Rejection::SuccessorUnavailable => "successor_unavailable",
            Rejection::SessionsRevoked => "sessions_revoked",
        }
    }
}

fn reject(reason: Rejection) -> SessionError {
    debug!(reason = reason.as_str(), "Refresh credential rejected");
    SessionError::InvalidOrExpired
}

impl From<TokenError> for Rejection {
    fn from(err: TokenError) -> Self {
        Rejection::Token(err.reason())
    }
}

/// Access and refresh token handed to the client.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

impl TokenPair {
    fn new(access: AccessToken, refresh_token: String) -> Self {
        Self {
            access_token: access.token,
            refresh_token,
            expires_in: access.expires_in,
        }
    }
}

/// Result of a successful login.
#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: UserProfile,
}

/// Active refresh session as shown to its owner. The token identity is a
/// secret and is never part of this view.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<RefreshTokenRecord> for SessionInfo {
    fn from(record: RefreshTokenRecord) -> Self {
        Self {
            id: record.id,
            created_at: record.created_at,
            expires_at: record.expires_at,
        }
    }
}

/// Generate an unguessable refresh token identity (base64url, 256 bits).
pub fn generate_token_identity() -> String {
    let mut bytes = [0u8; TOKEN_IDENTITY_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Binds token issuance to the refresh token store.
pub struct SessionService {
    db: Database,
    jwt: Arc<JwtConfig>,
    roles: Arc<RoleCapabilities>,
    settings: SessionSettings,
    audit: Arc<dyn AuditSink>,
}

impl SessionService {
    pub fn new(
        db: Database,
        jwt: Arc<JwtConfig>,
        roles: Arc<RoleCapabilities>,
        settings: SessionSettings,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            db,
            jwt,
            roles,
            settings,
            audit,
        }
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    /// Verify credentials and open a new session.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        client_ip: Option<&str>,
    ) -> Result<LoginOutcome, SessionError> {
        let user = self
            .store("get_user_by_username", self.db.users().get_by_username(username))
            .await?;

        let Some(user) = user else {
            self.login_failed(username, LoginFailureReason::UnknownUser, client_ip);
            return Err(SessionError::InvalidCredentials);
        };

        if !self.check_password(password, &user.password_hash).await? {
            self.login_failed(username, LoginFailureReason::BadPassword, client_ip);
            return Err(SessionError::InvalidCredentials);
        }

        if !user.is_active() {
            self.login_failed(username, LoginFailureReason::Disabled, client_ip);
            return Err(SessionError::AccountDisabled);
        }

        let tokens = self.open_session(&user).await?;

        info!(user = %user.uuid, "Login succeeded");
        self.audit.record(AuditEvent::LoginSuccess {
            user_uuid: user.uuid.clone(),
            username: user.username.clone(),
            client_ip: client_ip.map(str::to_string),
        });

        Ok(LoginOutcome {
            tokens,
            user: user.profile(),
        })
    }

    /// Exchange a refresh token for a new token pair.
    ///
    /// With rotation enabled the presented token is retired and a successor
    /// issued. Presenting a retired token again outside the grace window
    /// revokes every refresh token of its owner, unless the token was itself
    /// taken out by such a sweep.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, SessionError> {
        let claims = self
            .jwt
            .verify_refresh(refresh_token)
            .map_err(|e| reject(e.into()))?;

        let record = self
            .store(
                "get_refresh_token",
                self.db.refresh_tokens().get_by_identity(&claims.jti),
            )
            .await?
            .ok_or_else(|| reject(Rejection::UnknownIdentity))?;

        let now = Utc::now();
        match record.state(now) {
            TokenState::Active => {}
            TokenState::Expired => return Err(reject(Rejection::Expired)),
            TokenState::SessionsRevoked => return Err(reject(Rejection::SessionsRevoked)),
            TokenState::Rotated {
                successor,
                rotated_at,
            } if self.settings.rotation && now - rotated_at < self.settings.reuse_grace => {
                return match self.settings.grace_action {
                    GraceAction::Reject => Err(reject(Rejection::WithinGrace)),
                    GraceAction::Reissue => self.reissue_successor(&claims.sub, successor).await,
                };
            }
            TokenState::Rotated { .. } | TokenState::Revoked => {
                return Err(self.reuse_detected(&record, &claims.sub).await);
            }
        }

        let user = self.active_owner(&record, &claims.sub).await?;
        let access = self.mint_access(&user)?;

        if !self.settings.rotation {
            return Ok(TokenPair::new(access, refresh_token.to_string()));
        }

        let identity = generate_token_identity();
        let refresh = self.mint_refresh(&user.uuid, &identity)?;
        let successor = new_record(identity, user.id, &refresh);

        let rotated = self
            .store(
                "rotate_refresh_token",
                self.db.refresh_tokens().rotate(&record.identity, &successor),
            )
            .await?;
        if !rotated {
            return Err(reject(Rejection::RaceLost));
        }

        debug!(user = %user.uuid, "Refresh token rotated");
        Ok(TokenPair::new(access, refresh.token))
    }

    /// Revoke the session behind a refresh token. Unknown, unverifiable and
    /// already revoked tokens are ignored.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), SessionError> {
        let claims = match self.jwt.verify_refresh(refresh_token) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(reason = e.reason(), "Ignoring unverifiable refresh token on logout");
                return Ok(());
            }
        };

        let revoked = self
            .store(
                "revoke_refresh_token",
                self.db.refresh_tokens().revoke(&claims.jti),
            )
            .await?;

        if revoked {
            info!(user = %claims.sub, "Logged out");
            self.audit.record(AuditEvent::Logout {
                user_uuid: claims.sub,
            });
        }
        Ok(())
    }

    /// Revoke every refresh token of a user. Returns how many were revoked.
    pub async fn logout_all(&self, user_uuid: &str) -> Result<u64, SessionError> {
        let Some(user) = self
            .store("get_user_by_uuid", self.db.users().get_by_uuid(user_uuid))
            .await?
        else {
            return Ok(0);
        };

        let revoked = self
            .store(
                "revoke_all_refresh_tokens",
                self.db.refresh_tokens().revoke_all_for_user(user.id),
            )
            .await?;

        info!(user = %user.uuid, revoked, "Logged out everywhere");
        self.audit.record(AuditEvent::LogoutAll {
            user_uuid: user.uuid,
            revoked,
        });
        Ok(revoked)
    }

    /// Disable an account and end all of its sessions.
    /// Returns `false` if the user does not exist.
    pub async fn disable_user(&self, user_uuid: &str) -> Result<bool, SessionError> {
        let Some(user) = self
            .store("get_user_by_uuid", self.db.users().get_by_uuid(user_uuid))
            .await?
        else {
            return Ok(false);
        };

        self.store(
            "set_user_status",
            self.db.users().set_status(user.id, UserStatus::Disabled),
        )
        .await?;
        self.logout_all(user_uuid).await?;
        Ok(true)
    }

    /// Active refresh sessions of a user, newest first.
    pub async fn list_sessions(&self, user_uuid: &str) -> Result<Vec<SessionInfo>, SessionError> {
        let Some(user) = self
            .store("get_user_by_uuid", self.db.users().get_by_uuid(user_uuid))
            .await?
        else {
            return Ok(Vec::new());
        };

        let records = self
            .store(
                "list_refresh_tokens",
                self.db.refresh_tokens().list_active_by_user(user.id),
            )
            .await?;
        Ok(records.into_iter().map(SessionInfo::from).collect())
    }

    /// Mint a token pair for `user` and persist the new refresh record.
    async fn open_session(&self, user: &User) -> Result<TokenPair, SessionError> {
        let access = self.mint_access(user)?;
        let identity = generate_token_identity();
        let refresh = self.mint_refresh(&user.uuid, &identity)?;
        let record = new_record(identity, user.id, &refresh);

        self.store(
            "create_refresh_token",
            self.db.refresh_tokens().create(&record),
        )
        .await?;

        Ok(TokenPair::new(access, refresh.token))
    }

    /// A rotated token came back within the grace window, most likely a
    /// client retry. Hand out the successor again instead of a new one.
    async fn reissue_successor(
        &self,
        user_uuid: &str,
        successor_identity: &str,
    ) -> Result<TokenPair, SessionError> {
        let successor = self
            .store(
                "get_refresh_token",
                self.db.refresh_tokens().get_by_identity(successor_identity),
            )
            .await?;

        let Some(successor) = successor else {
            return Err(reject(Rejection::SuccessorUnavailable));
        };
        if successor.state(Utc::now()) != TokenState::Active {
            return Err(reject(Rejection::SuccessorUnavailable));
        }

        let user = self.active_owner(&successor, user_uuid).await?;
        let access = self.mint_access(&user)?;
        let refresh = self.mint_refresh(&user.uuid, &successor.identity)?;

        info!(user = %user.uuid, "Rotated refresh token replayed within grace window");
        Ok(TokenPair::new(access, refresh.token))
    }

    /// Treat a replayed revoked token as stolen: revoke the whole family.
    async fn reuse_detected(&self, record: &RefreshTokenRecord, user_uuid: &str) -> SessionError {
        let revoked = match self
            .store(
                "revoke_all_refresh_tokens",
                self.db.refresh_tokens().revoke_all_for_user(record.user_id),
            )
            .await
        {
            Ok(revoked) => revoked,
            Err(e) => return e,
        };

        warn!(
            user = %user_uuid,
            record = record.id,
            revoked,
            "Revoked refresh token presented again, revoking all sessions"
        );
        self.audit.record(AuditEvent::ReuseDetected {
            user_uuid: user_uuid.to_string(),
            revoked,
        });
        SessionError::InvalidOrExpired
    }

    /// Load the owner of a record and make sure it may still hold a session.
    async fn active_owner(
        &self,
        record: &RefreshTokenRecord,
        user_uuid: &str,
    ) -> Result<User, SessionError> {
        let user = self
            .store("get_user_by_id", self.db.users().get_by_id(record.user_id))
            .await?
            .ok_or_else(|| reject(Rejection::UnknownUser))?;

        if user.uuid != user_uuid {
            return Err(reject(Rejection::SubjectMismatch));
        }
        if !user.is_active() {
            return Err(reject(Rejection::AccountInactive));
        }
        Ok(user)
    }

    fn mint_access(&self, user: &User) -> Result<AccessToken, SessionError> {
        let capabilities = self.roles.capabilities_for_role(&user.role);
        self.jwt
            .mint_access(&user.uuid, &user.username, &user.role, &capabilities)
            .map_err(signing_failed)
    }

    fn mint_refresh(&self, user_uuid: &str, identity: &str) -> Result<RefreshToken, SessionError> {
        self.jwt
            .mint_refresh(user_uuid, identity)
            .map_err(signing_failed)
    }

    async fn check_password(&self, password: &str, hash: &str) -> Result<bool, SessionError> {
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || password::verify_password(&password, &hash))
            .await
            .map_err(|e| {
                error!(error = %e, "Password verification task failed");
                SessionError::Internal("Password verification failed".into())
            })
    }

    fn login_failed(&self, username: &str, reason: LoginFailureReason, client_ip: Option<&str>) {
        info!(username = %username, reason = reason.as_str(), "Login failed");
        self.audit.record(AuditEvent::LoginFailure {
            username: username.to_string(),
            reason,
            client_ip: client_ip.map(str::to_string),
        });
    }

    /// Run a store operation under the configured deadline.
    async fn store<T, F>(&self, op: &'static str, fut: F) -> Result<T, SessionError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.settings.store_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(sqlx::Error::PoolTimedOut)) => {
                error!(op, "Timed out waiting for a database connection");
                Err(SessionError::Unavailable)
            }
            Ok(Err(e)) => {
                error!(op, error = %e, "Store operation failed");
                Err(SessionError::Internal("Database error".into()))
            }
            Err(_) => {
                error!(op, "Store operation exceeded its deadline");
                Err(SessionError::Unavailable)
            }
        }
    }
}

fn new_record(identity: String, user_id: i64, refresh: &RefreshToken) -> NewRefreshToken {
    NewRefreshToken {
        identity,
        user_id,
        expires_at: from_unix(refresh.expires_at),
        created_at: from_unix(refresh.issued_at),
    }
}

fn signing_failed(err: TokenError) -> SessionError {
    error!(error = %err, "Failed to sign token");
    SessionError::Internal("Failed to generate token".into())
}
