// ============================
// guard-lib/src/session.rs
// ============================
//! Session and refresh-token records, plus the table the orchestrator keeps them in.
use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sessionguard_common::Metadata;
use std::sync::Arc;

/// Session information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Session id, also the access token's `jti`
    pub id: String,
    pub user_id: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub created_at: DateTime<Utc>,
    /// End of the session's life (bounded by the refresh token TTL)
    pub expires_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub ip_address: String,
    pub user_agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Single-use refresh token bound to one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub refresh_token: String,
    pub user_id: String,
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Session + refresh-token table
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: Session) -> Result<(), StorageError>;

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StorageError>;

    /// Set `last_accessed_at`; returns the updated session if it exists
    async fn touch_session(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Session>, StorageError>;

    async fn delete_session(&self, session_id: &str) -> Result<Option<Session>, StorageError>;

    async fn sessions_for_user(&self, user_id: &str) -> Result<Vec<Session>, StorageError>;

    async fn insert_refresh_token(&self, record: RefreshTokenRecord) -> Result<(), StorageError>;

    /// Remove and return the record. Two concurrent callers never both get it.
    async fn take_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<RefreshTokenRecord>, StorageError>;

    async fn delete_refresh_tokens_for_session(&self, session_id: &str) -> Result<usize, StorageError>;

    /// Drop expired sessions and refresh records. Returns how many rows went.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError>;
}

/// In-memory session table
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<DashMap<String, Session>>,
    refresh_tokens: Arc<DashMap<String, RefreshTokenRecord>>,
}

impl MemorySessionStore {
    /// Create a new session store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert_session(&self, session: Session) -> Result<(), StorageError> {
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StorageError> {
        Ok(self.sessions.get(session_id).map(|s| s.clone()))
    }

    async fn touch_session(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Session>, StorageError> {
        Ok(self.sessions.get_mut(session_id).map(|mut session| {
            session.last_accessed_at = at;
            session.clone()
        }))
    }

    async fn delete_session(&self, session_id: &str) -> Result<Option<Session>, StorageError> {
        Ok(self.sessions.remove(session_id).map(|(_, session)| session))
    }

    async fn sessions_for_user(&self, user_id: &str) -> Result<Vec<Session>, StorageError> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    async fn insert_refresh_token(&self, record: RefreshTokenRecord) -> Result<(), StorageError> {
        self.refresh_tokens
            .insert(record.refresh_token.clone(), record);
        Ok(())
    }

    async fn take_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<RefreshTokenRecord>, StorageError> {
        Ok(self
            .refresh_tokens
            .remove(refresh_token)
            .map(|(_, record)| record))
    }

    async fn delete_refresh_tokens_for_session(&self, session_id: &str) -> Result<usize, StorageError> {
        let before = self.refresh_tokens.len();
        self.refresh_tokens
            .retain(|_, record| record.session_id != session_id);
        Ok(before.saturating_sub(self.refresh_tokens.len()))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let before = self.sessions.len() + self.refresh_tokens.len();
        self.sessions.retain(|_, session| !session.is_expired_at(now));
        self.refresh_tokens.retain(|_, record| record.is_valid_at(now));
        let after = self.sessions.len() + self.refresh_tokens.len();
        Ok(before.saturating_sub(after))
    }
}
