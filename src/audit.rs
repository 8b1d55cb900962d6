//! Security audit events and the sinks that receive them.
//!
//! Recording is fire-and-forget: a sink never reports failure back to the
//! caller, and nothing in the session flow waits on it.

use std::sync::Mutex;

use serde::Serialize;
use tracing::{info, warn};

use crate::db::AuditStore;

/// Why a login attempt was refused. Only ever recorded, never returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginFailureReason {
    UnknownUser,
    BadPassword,
    Disabled,
}

impl LoginFailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginFailureReason::UnknownUser => "unknown_user",
            LoginFailureReason::BadPassword => "bad_password",
            LoginFailureReason::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    LoginSuccess {
        user_uuid: String,
        username: String,
        client_ip: Option<String>,
    },
    LoginFailure {
        username: String,
        reason: LoginFailureReason,
        client_ip: Option<String>,
    },
    Logout {
        user_uuid: String,
    },
    LogoutAll {
        user_uuid: String,
        revoked: u64,
    },
    /// A rotated-out or revoked refresh token was replayed; the whole token
    /// family has been revoked.
    ReuseDetected {
        user_uuid: String,
        revoked: u64,
    },
}

impl AuditEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AuditEvent::LoginSuccess { .. } => "login_success",
            AuditEvent::LoginFailure { .. } => "login_failure",
            AuditEvent::Logout { .. } => "logout",
            AuditEvent::LogoutAll { .. } => "logout_all",
            AuditEvent::ReuseDetected { .. } => "reuse_detected",
        }
    }

    pub fn user_uuid(&self) -> Option<&str> {
        match self {
            AuditEvent::LoginSuccess { user_uuid, .. }
            | AuditEvent::Logout { user_uuid }
            | AuditEvent::LogoutAll { user_uuid, .. }
            | AuditEvent::ReuseDetected { user_uuid, .. } => Some(user_uuid),
            AuditEvent::LoginFailure { .. } => None,
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            AuditEvent::LoginSuccess { username, .. }
            | AuditEvent::LoginFailure { username, .. } => Some(username),
            _ => None,
        }
    }

    pub fn client_ip(&self) -> Option<&str> {
        match self {
            AuditEvent::LoginSuccess { client_ip, .. }
            | AuditEvent::LoginFailure { client_ip, .. } => client_ip.as_deref(),
            _ => None,
        }
    }

    pub fn detail(&self) -> Option<String> {
        match self {
            AuditEvent::LoginFailure { reason, .. } => Some(reason.as_str().to_string()),
            AuditEvent::LogoutAll { revoked, .. } | AuditEvent::ReuseDetected { revoked, .. } => {
                Some(format!("revoked={}", revoked))
            }
            _ => None,
        }
    }
}

/// Receiver of audit events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits every event as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        match &event {
            AuditEvent::ReuseDetected { user_uuid, revoked } => {
                warn!(target: "audit", kind = event.kind(), user = %user_uuid, revoked, "Refresh token reuse detected");
            }
            AuditEvent::LoginFailure {
                username, reason, ..
            } => {
                info!(target: "audit", kind = event.kind(), username = %username, reason = reason.as_str(), "Login failed");
            }
            _ => {
                info!(target: "audit", kind = event.kind(), user = event.user_uuid().unwrap_or("-"), "Audit event");
            }
        }
    }
}

/// Persists events to the `audit_events` table on a spawned task.
#[derive(Clone)]
pub struct DatabaseAuditSink {
    store: AuditStore,
}

impl DatabaseAuditSink {
    pub fn new(store: AuditStore) -> Self {
        Self { store }
    }
}

impl AuditSink for DatabaseAuditSink {
    fn record(&self, event: AuditEvent) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(kind = event.kind(), "No runtime available, dropping audit event");
            return;
        };

        let store = self.store.clone();
        handle.spawn(async move {
            let detail = event.detail();
            if let Err(e) = store
                .insert(
                    event.kind(),
                    event.user_uuid(),
                    event.username(),
                    event.client_ip(),
                    detail.as_deref(),
                )
                .await
            {
                warn!(kind = event.kind(), error = %e, "Failed to record audit event");
            }
        });
    }
}

/// Keeps events in memory. Used by tests and local tooling.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events recorded so far.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events().iter().filter(|e| e.kind() == kind).count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}
