use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqlitePool;

use super::from_unix;

/// A persisted audit event.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: i64,
    pub kind: String,
    pub user_uuid: Option<String>,
    pub username: Option<String>,
    pub client_ip: Option<String>,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: i64,
    kind: String,
    user_uuid: Option<String>,
    username: Option<String>,
    client_ip: Option<String>,
    detail: Option<String>,
    created_at: i64,
}

impl From<AuditRow> for AuditRecord {
    fn from(row: AuditRow) -> Self {
        Self {
            id: row.id,
            kind: row.kind,
            user_uuid: row.user_uuid,
            username: row.username,
            client_ip: row.client_ip,
            detail: row.detail,
            created_at: from_unix(row.created_at),
        }
    }
}

#[derive(Clone)]
pub struct AuditStore {
    pool: SqlitePool,
}

impl AuditStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        kind: &str,
        user_uuid: Option<&str>,
        username: Option<&str>,
        client_ip: Option<&str>,
        detail: Option<&str>,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO audit_events (kind, user_uuid, username, client_ip, detail) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(kind)
        .bind(user_uuid)
        .bind(username)
        .bind(client_ip)
        .bind(detail)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Most recent events first.
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<AuditRecord>, sqlx::Error> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            "SELECT id, kind, user_uuid, username, client_ip, detail, created_at FROM audit_events ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AuditRecord::from).collect())
    }
}
