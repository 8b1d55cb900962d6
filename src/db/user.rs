use std::str::FromStr;

use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use tracing::warn;

use crate::capability::Role;

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

/// Account status. Only active accounts may sign in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Disabled,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Disabled => "disabled",
        }
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(UserStatus::Active),
            "disabled" => Ok(UserStatus::Disabled),
            other => Err(format!("unknown user status '{}'", other)),
        }
    }
}

/// Credential record as read by the session service.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub uuid: String,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub status: UserStatus,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// Public view of the account, without the password hash or row id.
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            uuid: self.uuid.clone(),
            username: self.username.clone(),
            role: self.role.clone(),
            status: self.status,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    uuid: String,
    username: String,
    password_hash: String,
    role: String,
    status: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        // Unknown statuses never grant a session.
        let status = row.status.parse().unwrap_or_else(|e: String| {
            warn!(user = %row.uuid, error = %e, "Treating account as disabled");
            UserStatus::Disabled
        });
        Self {
            id: row.id,
            uuid: row.uuid,
            username: row.username,
            password_hash: row.password_hash,
            role: Role::new(row.role),
            status,
        }
    }
}

/// Public user profile. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub uuid: String,
    pub username: String,
    pub role: Role,
    pub status: UserStatus,
}

const USER_COLUMNS: &str = "id, uuid, username, password_hash, role, status";

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new active user. Returns the user ID.
    pub async fn create(
        &self,
        uuid: &str,
        username: &str,
        password_hash: &str,
        role: &str,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO users (uuid, username, password_hash, role, status) VALUES (?, ?, ?, ?, 'active')",
        )
        .bind(uuid)
        .bind(username)
        .bind(password_hash)
        .bind(role)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Get a user by username (case-insensitive).
    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE username = ?",
            USER_COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by UUID.
    pub async fn get_by_uuid(&self, uuid: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE uuid = ?", USER_COLUMNS))
                .bind(uuid)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(User::from))
    }

    /// Set the account status for a user.
    pub async fn set_status(&self, id: i64, status: UserStatus) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List all users (for the admin dashboard).
    pub async fn list(&self) -> Result<Vec<UserProfile>, sqlx::Error> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users ORDER BY created_at, id",
            USER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| User::from(r).profile()).collect())
    }
}
