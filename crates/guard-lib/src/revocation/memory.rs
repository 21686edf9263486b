// ============================
// crates/guard-lib/src/revocation/memory.rs
// ============================
//! In-memory revocation store for single-node deployments and tests.

use super::{BlacklistedToken, Revocation, RevocationStore};
use crate::clock::Clock;
use crate::error::StorageError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Hash-indexed revocation store
#[derive(Debug, Clone)]
pub struct MemoryRevocationStore {
    entries: Arc<DashMap<String, BlacklistedToken>>,
    clock: Arc<dyn Clock>,
}

impl MemoryRevocationStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
        }
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn add(&self, revocation: Revocation) -> Result<(), StorageError> {
        let entry = BlacklistedToken {
            token_id: revocation.token_id.clone(),
            expires_at: revocation.expires_at,
            revoked_at: self.clock.now(),
            reason: revocation.reason,
            user_id: revocation.user_id,
            metadata: revocation.metadata,
        };
        self.entries.insert(revocation.token_id, entry);
        Ok(())
    }

    /// An entry past its expiry no longer counts, even before `cleanup` runs
    async fn is_revoked(&self, token_id: &str) -> Result<bool, StorageError> {
        let now = self.clock.now();
        Ok(self
            .entries
            .get(token_id)
            .is_some_and(|entry| !entry.is_expired_at(now)))
    }

    async fn get(&self, token_id: &str) -> Result<Option<BlacklistedToken>, StorageError> {
        Ok(self.entries.get(token_id).map(|entry| entry.clone()))
    }

    async fn remove(&self, token_id: &str) -> Result<(), StorageError> {
        self.entries.remove(token_id);
        Ok(())
    }

    async fn cleanup(&self) -> Result<usize, StorageError> {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "purged expired revocation entries");
        }
        Ok(removed)
    }

    async fn size(&self) -> Result<usize, StorageError> {
        Ok(self.entries.len())
    }
}
