//! Revocation (blacklist) store for token identifiers.
//!
//! A token whose `jti` is present here must be rejected even if its signature
//! and expiry are still valid. Entries carry their own expiry and are purged
//! once the underlying token could no longer be accepted anyway.

mod memory;

pub use memory::MemoryRevocationStore;

use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sessionguard_common::{Metadata, RevocationReason};

/// A revoked token identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlacklistedToken {
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: DateTime<Utc>,
    pub reason: RevocationReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl BlacklistedToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Request to revoke one token identifier
#[derive(Debug, Clone)]
pub struct Revocation {
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
    pub reason: RevocationReason,
    pub user_id: Option<String>,
    pub metadata: Option<Metadata>,
}

impl Revocation {
    pub fn new(
        token_id: impl Into<String>,
        expires_at: DateTime<Utc>,
        reason: RevocationReason,
    ) -> Self {
        Self {
            token_id: token_id.into(),
            expires_at,
            reason,
            user_id: None,
            metadata: None,
        }
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Storage contract for revoked token identifiers.
///
/// `add` is idempotent: re-adding a `token_id` replaces its reason and expiry,
/// so an identifier is present at most once. `is_revoked` sits on every
/// validated request and must be an expected O(1) lookup.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    async fn add(&self, revocation: Revocation) -> Result<(), StorageError>;

    async fn is_revoked(&self, token_id: &str) -> Result<bool, StorageError>;

    async fn get(&self, token_id: &str) -> Result<Option<BlacklistedToken>, StorageError>;

    async fn remove(&self, token_id: &str) -> Result<(), StorageError>;

    /// Remove every entry whose `expires_at` has passed. Returns the number removed.
    async fn cleanup(&self) -> Result<usize, StorageError>;

    async fn size(&self) -> Result<usize, StorageError>;
}
