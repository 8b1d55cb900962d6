//! Refresh token records and their revocation state.
//!
//! Access tokens are stateless and never touch this store. A record's
//! `revoked` flag is only ever set, never cleared; every update below is
//! guarded with `revoked = 0` so callers can observe whether they performed
//! the transition.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use tracing::warn;

use super::from_unix;

/// What retired a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    /// Superseded by a successor during refresh.
    Rotated,
    /// Single session ended by its holder.
    Logout,
    /// Swept by a revoke-all (logout everywhere, account disabled, or reuse
    /// detection).
    AllSessions,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::Rotated => "rotated",
            RevocationReason::Logout => "logout",
            RevocationReason::AllSessions => "all_sessions",
        }
    }
}

impl FromStr for RevocationReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rotated" => Ok(RevocationReason::Rotated),
            "logout" => Ok(RevocationReason::Logout),
            "all_sessions" => Ok(RevocationReason::AllSessions),
            other => Err(format!("unknown revocation reason '{}'", other)),
        }
    }
}

/// A persisted refresh token record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: i64,
    /// Opaque token identity, also embedded in the signed token
    pub identity: String,
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<RevocationReason>,
    /// Identity of the successor when this record was rotated out
    pub replaced_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Usability of a record at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState<'a> {
    Active,
    /// Revoked by rotation; carries the successor and the rotation time.
    Rotated {
        successor: &'a str,
        rotated_at: DateTime<Utc>,
    },
    /// Ended by a single-session logout.
    Revoked,
    /// Swept along with every other session of its owner.
    SessionsRevoked,
    Expired,
}

impl RefreshTokenRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Revocation takes precedence over expiry.
    pub fn state(&self, now: DateTime<Utc>) -> TokenState<'_> {
        if self.revoked {
            match (self.revoked_reason, &self.replaced_by, self.revoked_at) {
                (Some(RevocationReason::AllSessions), _, _) => TokenState::SessionsRevoked,
                (_, Some(successor), Some(rotated_at)) => TokenState::Rotated {
                    successor,
                    rotated_at,
                },
                _ => TokenState::Revoked,
            }
        } else if self.is_expired(now) {
            TokenState::Expired
        } else {
            TokenState::Active
        }
    }
}

/// Fields needed to insert a freshly issued record.
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub identity: String,
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct RefreshTokenRow {
    id: i64,
    identity: String,
    user_id: i64,
    expires_at: i64,
    revoked: i64,
    revoked_at: Option<i64>,
    revoked_reason: Option<String>,
    replaced_by: Option<String>,
    created_at: i64,
}

impl From<RefreshTokenRow> for RefreshTokenRecord {
    fn from(row: RefreshTokenRow) -> Self {
        Self {
            id: row.id,
            identity: row.identity,
            user_id: row.user_id,
            expires_at: from_unix(row.expires_at),
            revoked: row.revoked != 0,
            revoked_at: row.revoked_at.map(from_unix),
            revoked_reason: row.revoked_reason.as_deref().and_then(|reason| {
                match reason.parse() {
                    Ok(reason) => Some(reason),
                    Err(e) => {
                        warn!(record = row.id, error = %e, "Ignoring stored revocation reason");
                        None
                    }
                }
            }),
            replaced_by: row.replaced_by,
            created_at: from_unix(row.created_at),
        }
    }
}

const TOKEN_COLUMNS: &str =
    "id, identity, user_id, expires_at, revoked, revoked_at, revoked_reason, replaced_by, created_at";

/// Store for refresh token records.
#[derive(Clone)]
pub struct RefreshTokenStore {
    pool: SqlitePool,
}

impl RefreshTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new, unrevoked record.
    pub async fn create(&self, record: &NewRefreshToken) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO refresh_tokens (identity, user_id, expires_at, revoked, created_at) VALUES (?, ?, ?, 0, ?)",
        )
        .bind(&record.identity)
        .bind(record.user_id)
        .bind(record.expires_at.timestamp())
        .bind(record.created_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Get a record by its token identity.
    pub async fn get_by_identity(
        &self,
        identity: &str,
    ) -> Result<Option<RefreshTokenRecord>, sqlx::Error> {
        let row: Option<RefreshTokenRow> = sqlx::query_as(&format!(
            "SELECT {} FROM refresh_tokens WHERE identity = ?",
            TOKEN_COLUMNS
        ))
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(RefreshTokenRecord::from))
    }

    /// List non-revoked, non-expired records for a user, newest first.
    pub async fn list_active_by_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<RefreshTokenRecord>, sqlx::Error> {
        let rows: Vec<RefreshTokenRow> = sqlx::query_as(&format!(
            "SELECT {} FROM refresh_tokens WHERE user_id = ? AND revoked = 0 AND expires_at > ? ORDER BY created_at DESC, id DESC",
            TOKEN_COLUMNS
        ))
        .bind(user_id)
        .bind(Utc::now().timestamp())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RefreshTokenRecord::from).collect())
    }

    /// Revoke a single record if it is not already revoked.
    /// Returns whether this call performed the transition.
    pub async fn revoke(&self, identity: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, revoked_at = ?, revoked_reason = ? WHERE identity = ? AND revoked = 0",
        )
        .bind(Utc::now().timestamp())
        .bind(RevocationReason::Logout.as_str())
        .bind(identity)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Revoke `old_identity` in favour of `successor` and insert the successor,
    /// in one transaction.
    ///
    /// Returns `false`, inserting nothing, when `old_identity` was already
    /// revoked (or does not exist). Of any number of concurrent rotations of
    /// the same record, at most one returns `true`.
    pub async fn rotate(
        &self,
        old_identity: &str,
        successor: &NewRefreshToken,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // The write lock is taken by this first statement, so no read in this
        // transaction can observe a stale `revoked` flag.
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, revoked_at = ?, revoked_reason = ?, replaced_by = ? WHERE identity = ? AND revoked = 0",
        )
        .bind(successor.created_at.timestamp())
        .bind(RevocationReason::Rotated.as_str())
        .bind(&successor.identity)
        .bind(old_identity)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO refresh_tokens (identity, user_id, expires_at, revoked, created_at) VALUES (?, ?, ?, 0, ?)",
        )
        .bind(&successor.identity)
        .bind(successor.user_id)
        .bind(successor.expires_at.timestamp())
        .bind(successor.created_at.timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Revoke every unrevoked record of a user (logout everywhere).
    pub async fn revoke_all_for_user(&self, user_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, revoked_at = ?, revoked_reason = ? WHERE user_id = ? AND revoked = 0",
        )
        .bind(Utc::now().timestamp())
        .bind(RevocationReason::AllSessions.as_str())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete all expired records.
    pub async fn delete_expired(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= ?")
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
