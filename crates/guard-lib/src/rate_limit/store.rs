//! Storage for rate-limit attempts and lockouts.

use super::{Lockout, RateLimitAttempt, RateLimitKey};
use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// What a sweep removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub attempts_removed: usize,
    pub lockouts_removed: usize,
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn append_attempt(&self, attempt: RateLimitAttempt) -> Result<(), StorageError>;

    /// Attempts for `key` with `timestamp >= since`, oldest first
    async fn attempts_since(
        &self,
        key: &RateLimitKey,
        since: DateTime<Utc>,
    ) -> Result<Vec<RateLimitAttempt>, StorageError>;

    async fn clear_failed_attempts(&self, key: &RateLimitKey) -> Result<(), StorageError>;

    async fn get_lockout(&self, key: &RateLimitKey) -> Result<Option<Lockout>, StorageError>;

    async fn set_lockout(&self, lockout: Lockout) -> Result<(), StorageError>;

    async fn clear_lockout(&self, key: &RateLimitKey) -> Result<(), StorageError>;

    /// Drop attempts older than `attempts_before` and lockouts that ended before `now`
    async fn sweep(
        &self,
        attempts_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<SweepStats, StorageError>;
}

/// In-memory attempt log keyed by identifier and kind
#[derive(Debug, Clone, Default)]
pub struct MemoryRateLimitStore {
    attempts: Arc<DashMap<RateLimitKey, Vec<RateLimitAttempt>>>,
    lockouts: Arc<DashMap<RateLimitKey, Lockout>>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn append_attempt(&self, attempt: RateLimitAttempt) -> Result<(), StorageError> {
        self.attempts
            .entry(attempt.key())
            .or_default()
            .push(attempt);
        Ok(())
    }

    async fn attempts_since(
        &self,
        key: &RateLimitKey,
        since: DateTime<Utc>,
    ) -> Result<Vec<RateLimitAttempt>, StorageError> {
        Ok(self
            .attempts
            .get(key)
            .map(|attempts| {
                attempts
                    .iter()
                    .filter(|attempt| attempt.timestamp >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn clear_failed_attempts(&self, key: &RateLimitKey) -> Result<(), StorageError> {
        if let Some(mut attempts) = self.attempts.get_mut(key) {
            attempts.retain(|attempt| attempt.success);
        }
        self.attempts.remove_if(key, |_, attempts| attempts.is_empty());
        Ok(())
    }

    async fn get_lockout(&self, key: &RateLimitKey) -> Result<Option<Lockout>, StorageError> {
        Ok(self.lockouts.get(key).map(|lockout| lockout.clone()))
    }

    async fn set_lockout(&self, lockout: Lockout) -> Result<(), StorageError> {
        self.lockouts.insert(lockout.key(), lockout);
        Ok(())
    }

    async fn clear_lockout(&self, key: &RateLimitKey) -> Result<(), StorageError> {
        self.lockouts.remove(key);
        Ok(())
    }

    async fn sweep(
        &self,
        attempts_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<SweepStats, StorageError> {
        let mut stats = SweepStats::default();

        self.attempts.retain(|_, attempts| {
            let before = attempts.len();
            attempts.retain(|attempt| attempt.timestamp >= attempts_before);
            stats.attempts_removed += before - attempts.len();
            !attempts.is_empty()
        });

        let before = self.lockouts.len();
        self.lockouts.retain(|_, lockout| lockout.locked_until > now);
        stats.lockouts_removed = before.saturating_sub(self.lockouts.len());

        Ok(stats)
    }
}
