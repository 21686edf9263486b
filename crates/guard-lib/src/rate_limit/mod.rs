// ============================
// crates/guard-lib/src/rate_limit/mod.rs
// ============================
//! Sliding-window rate limiting with lockout and progressive backoff.
//!
//! Each `(identifier, kind)` pair is an independent state machine:
//! Open while failed attempts in the window stay below the maximum, Locked
//! once they reach it, and Open again when the lockout ends or, with
//! `reset_on_success`, immediately after a successful attempt.

mod store;

pub use store::{MemoryRateLimitStore, RateLimitStore, SweepStats};

use crate::clock::{to_chrono, Clock};
use crate::config::RateLimitConfig;
use crate::error::StorageError;
use crate::locks::KeyedLocks;
use crate::metrics::LOCKOUT_ENGAGED;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use sessionguard_common::{AttemptKind, Metadata};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Base delay for progressive backoff
const BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for progressive backoff
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Counter key: identifier (usually an IP) plus attempt kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateLimitKey {
    pub identifier: String,
    pub kind: AttemptKind,
}

impl RateLimitKey {
    pub fn new(identifier: impl Into<String>, kind: AttemptKind) -> Self {
        Self {
            identifier: identifier.into(),
            kind,
        }
    }

    fn lock_key(&self) -> String {
        format!("{}:{}", self.kind, self.identifier)
    }
}

/// One recorded attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitAttempt {
    pub identifier: String,
    pub timestamp: DateTime<Utc>,
    pub kind: AttemptKind,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl RateLimitAttempt {
    pub fn key(&self) -> RateLimitKey {
        RateLimitKey::new(self.identifier.clone(), self.kind)
    }
}

/// Active deny-all state for a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lockout {
    pub identifier: String,
    pub kind: AttemptKind,
    pub locked_until: DateTime<Utc>,
}

impl Lockout {
    pub fn key(&self) -> RateLimitKey {
        RateLimitKey::new(self.identifier.clone(), self.kind)
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until > now
    }
}

/// Answer to "may this key try again?"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining_attempts: u32,
    /// When the oldest counted failure leaves the window, or the lockout ends
    pub reset_time: DateTime<Utc>,
    pub locked_until: Option<DateTime<Utc>>,
    pub current_attempts: u32,
}

/// Rate limiter for authentication attempts
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks,
}

impl RateLimiter {
    /// Create a new rate limiter over `store`
    pub fn new(store: Arc<dyn RateLimitStore>, config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
            locks: KeyedLocks::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check whether `identifier` may attempt `kind` right now. Never records anything.
    pub async fn check_limit(
        &self,
        identifier: &str,
        kind: AttemptKind,
    ) -> Result<RateLimitResult, StorageError> {
        let key = RateLimitKey::new(identifier, kind);
        self.evaluate(&key, self.clock.now()).await
    }

    /// Record an attempt and return the resulting limit state.
    ///
    /// A failure that uses up the last remaining attempt engages a lockout;
    /// a success with `reset_on_success` clears lockout and failure history.
    pub async fn record_attempt(
        &self,
        identifier: &str,
        kind: AttemptKind,
        success: bool,
        metadata: Option<Metadata>,
    ) -> Result<RateLimitResult, StorageError> {
        let key = RateLimitKey::new(identifier, kind);
        let _guard = self.locks.lock(&key.lock_key()).await;
        let now = self.clock.now();

        self.store
            .append_attempt(RateLimitAttempt {
                identifier: identifier.to_string(),
                timestamp: now,
                kind,
                success,
                metadata,
            })
            .await?;

        if success && self.config.reset_on_success {
            self.store.clear_lockout(&key).await?;
            self.store.clear_failed_attempts(&key).await?;
            return self.evaluate(&key, now).await;
        }

        let mut result = self.evaluate(&key, now).await?;
        if result.remaining_attempts == 0 && result.locked_until.is_none() {
            let locked_until = now + to_chrono(self.config.lockout_duration);
            self.store
                .set_lockout(Lockout {
                    identifier: identifier.to_string(),
                    kind,
                    locked_until,
                })
                .await?;
            // The lockout now carries the penalty; counting restarts once it ends
            self.store.clear_failed_attempts(&key).await?;

            counter!(LOCKOUT_ENGAGED).increment(1);
            warn!(
                security_event = "lockout_engaged",
                identifier,
                kind = %kind,
                %locked_until,
                "too many failed attempts"
            );

            result = RateLimitResult {
                allowed: false,
                remaining_attempts: 0,
                reset_time: locked_until,
                locked_until: Some(locked_until),
                current_attempts: self.config.max_attempts,
            };
        }
        Ok(result)
    }

    /// Advisory backoff for the `attempt_count`-th consecutive failure.
    ///
    /// `1s * 2^(n-1)` capped at 30s, or zero when progressive delay is disabled.
    /// The limiter never sleeps itself.
    pub fn progressive_delay(&self, attempt_count: u32) -> Duration {
        if !self.config.progressive_delay || attempt_count == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempt_count - 1).min(16);
        BASE_DELAY.saturating_mul(1 << exponent).min(MAX_DELAY)
    }

    /// Administrative unlock: drop the lockout and the failure history
    pub async fn clear_limit(&self, identifier: &str, kind: AttemptKind) -> Result<(), StorageError> {
        let key = RateLimitKey::new(identifier, kind);
        let _guard = self.locks.lock(&key.lock_key()).await;
        self.store.clear_lockout(&key).await?;
        self.store.clear_failed_attempts(&key).await?;
        info!(identifier, kind = %kind, "rate limit cleared");
        Ok(())
    }

    /// Delete attempts older than two windows and lockouts that have ended
    pub async fn sweep(&self) -> Result<SweepStats, StorageError> {
        let now = self.clock.now();
        let horizon = now - to_chrono(self.config.window) * 2;
        let stats = self.store.sweep(horizon, now).await?;
        self.locks.prune();
        Ok(stats)
    }

    async fn evaluate(&self, key: &RateLimitKey, now: DateTime<Utc>) -> Result<RateLimitResult, StorageError> {
        let max = self.config.max_attempts;

        // A live lockout always wins over counting
        if let Some(lockout) = self.store.get_lockout(key).await? {
            if lockout.is_active_at(now) {
                return Ok(RateLimitResult {
                    allowed: false,
                    remaining_attempts: 0,
                    reset_time: lockout.locked_until,
                    locked_until: Some(lockout.locked_until),
                    current_attempts: max,
                });
            }
        }

        let window = to_chrono(self.config.window);
        let failures: Vec<_> = self
            .store
            .attempts_since(key, now - window)
            .await?
            .into_iter()
            .filter(|attempt| !attempt.success)
            .collect();

        let failed = u32::try_from(failures.len()).unwrap_or(u32::MAX);
        let remaining = max.saturating_sub(failed);
        let reset_time = failures
            .iter()
            .map(|attempt| attempt.timestamp)
            .min()
            .map_or(now + window, |oldest| oldest + window);

        Ok(RateLimitResult {
            allowed: remaining > 0,
            remaining_attempts: remaining,
            reset_time,
            locked_until: None,
            current_attempts: failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(max_attempts: u32) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let config = RateLimitConfig {
            window: Duration::from_secs(15 * 60),
            max_attempts,
            lockout_duration: Duration::from_secs(5 * 60),
            reset_on_success: true,
            progressive_delay: true,
        };
        let limiter = RateLimiter::new(Arc::new(MemoryRateLimitStore::new()), config, clock.clone());
        (limiter, clock)
    }

    #[tokio::test]
    async fn test_initial_check_is_open() {
        let (limiter, _) = limiter(3);
        let result = limiter.check_limit("10.0.0.1", AttemptKind::Login).await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining_attempts, 3);
        assert_eq!(result.current_attempts, 0);
        assert!(result.locked_until.is_none());
    }

    #[tokio::test]
    async fn test_third_failure_locks_out() {
        let (limiter, clock) = limiter(3);
        let ip = "10.0.0.1";

        let first = limiter.record_attempt(ip, AttemptKind::Login, false, None).await.unwrap();
        assert!(first.allowed);
        assert_eq!(first.remaining_attempts, 2);

        limiter.record_attempt(ip, AttemptKind::Login, false, None).await.unwrap();
        let third = limiter.record_attempt(ip, AttemptKind::Login, false, None).await.unwrap();
        assert!(!third.allowed);
        assert_eq!(third.remaining_attempts, 0);
        let locked_until = third.locked_until.expect("lockout expected");
        assert!(locked_until > clock.now());

        let check = limiter.check_limit(ip, AttemptKind::Login).await.unwrap();
        assert!(!check.allowed);
        assert_eq!(check.current_attempts, 3);
        assert_eq!(check.locked_until, Some(locked_until));
    }

    #[tokio::test]
    async fn test_lockout_expires() {
        let (limiter, clock) = limiter(2);
        let ip = "10.0.0.2";
        for _ in 0..2 {
            limiter.record_attempt(ip, AttemptKind::Login, false, None).await.unwrap();
        }
        assert!(!limiter.check_limit(ip, AttemptKind::Login).await.unwrap().allowed);

        clock.advance(Duration::from_secs(5 * 60 + 1));
        let result = limiter.check_limit(ip, AttemptKind::Login).await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining_attempts, 2);
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let (limiter, _) = limiter(3);
        let ip = "10.0.0.3";
        limiter.record_attempt(ip, AttemptKind::Login, false, None).await.unwrap();
        limiter.record_attempt(ip, AttemptKind::Login, false, None).await.unwrap();

        let result = limiter.record_attempt(ip, AttemptKind::Login, true, None).await.unwrap();
        assert!(result.allowed);

        let check = limiter.check_limit(ip, AttemptKind::Login).await.unwrap();
        assert_eq!(check.current_attempts, 0);
        assert_eq!(check.remaining_attempts, 3);
    }

    #[tokio::test]
    async fn test_window_boundary_is_inclusive() {
        let (limiter, clock) = limiter(3);
        let ip = "10.0.0.4";
        limiter.record_attempt(ip, AttemptKind::Login, false, None).await.unwrap();

        clock.advance(Duration::from_secs(15 * 60));
        let at_boundary = limiter.check_limit(ip, AttemptKind::Login).await.unwrap();
        assert_eq!(at_boundary.current_attempts, 1);

        clock.advance(Duration::from_millis(1));
        let past_boundary = limiter.check_limit(ip, AttemptKind::Login).await.unwrap();
        assert_eq!(past_boundary.current_attempts, 0);
    }

    #[tokio::test]
    async fn test_kinds_are_independent() {
        let (limiter, _) = limiter(2);
        let ip = "10.0.0.5";
        for _ in 0..2 {
            limiter.record_attempt(ip, AttemptKind::Login, false, None).await.unwrap();
        }
        assert!(!limiter.check_limit(ip, AttemptKind::Login).await.unwrap().allowed);
        assert!(limiter.check_limit(ip, AttemptKind::PasswordReset).await.unwrap().allowed);
        assert!(limiter.check_limit("10.0.0.6", AttemptKind::Login).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_clear_limit_unlocks() {
        let (limiter, _) = limiter(1);
        let ip = "10.0.0.7";
        limiter.record_attempt(ip, AttemptKind::Mfa, false, None).await.unwrap();
        assert!(!limiter.check_limit(ip, AttemptKind::Mfa).await.unwrap().allowed);

        limiter.clear_limit(ip, AttemptKind::Mfa).await.unwrap();
        let result = limiter.check_limit(ip, AttemptKind::Mfa).await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.current_attempts, 0);
    }

    #[tokio::test]
    async fn test_reset_time_tracks_oldest_failure() {
        let (limiter, clock) = limiter(5);
        let ip = "10.0.0.8";
        let first_at = clock.now();
        limiter.record_attempt(ip, AttemptKind::Login, false, None).await.unwrap();
        clock.advance(Duration::from_secs(60));
        let result = limiter.record_attempt(ip, AttemptKind::Login, false, None).await.unwrap();
        assert_eq!(result.reset_time, first_at + chrono::Duration::minutes(15));
    }

    #[test]
    fn test_progressive_delay() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryRateLimitStore::new());
        let enabled = RateLimiter::new(
            store.clone(),
            RateLimitConfig {
                progressive_delay: true,
                ..RateLimitConfig::default()
            },
            clock.clone(),
        );
        assert_eq!(enabled.progressive_delay(0), Duration::ZERO);
        assert_eq!(enabled.progressive_delay(1), Duration::from_secs(1));
        assert_eq!(enabled.progressive_delay(2), Duration::from_secs(2));
        assert_eq!(enabled.progressive_delay(5), Duration::from_secs(16));
        assert_eq!(enabled.progressive_delay(6), Duration::from_secs(30));
        assert_eq!(enabled.progressive_delay(u32::MAX), Duration::from_secs(30));

        let disabled = RateLimiter::new(store, RateLimitConfig::default(), clock);
        assert_eq!(disabled.progressive_delay(4), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_sweep_removes_stale_state() {
        let (limiter, clock) = limiter(1);
        limiter.record_attempt("a", AttemptKind::Login, false, None).await.unwrap();
        limiter.record_attempt("b", AttemptKind::Login, true, None).await.unwrap();

        clock.advance(Duration::from_secs(31 * 60));
        let stats = limiter.sweep().await.unwrap();
        assert_eq!(stats.lockouts_removed, 1);
        assert!(limiter.check_limit("a", AttemptKind::Login).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_sweep_drops_attempts_older_than_two_windows() {
        let (limiter, clock) = limiter(5);
        limiter.record_attempt("old", AttemptKind::Login, false, None).await.unwrap();
        clock.advance(Duration::from_secs(60));
        limiter.record_attempt("edge", AttemptKind::Login, false, None).await.unwrap();
        clock.advance(Duration::from_secs(15 * 60));
        limiter.record_attempt("recent", AttemptKind::Login, false, None).await.unwrap();

        // Two windows after "edge": "old" is past the horizon, "edge" sits on it
        clock.advance(Duration::from_secs(15 * 60));
        let stats = limiter.sweep().await.unwrap();
        assert_eq!(stats.attempts_removed, 1);
        assert_eq!(stats.lockouts_removed, 0);

        clock.advance(Duration::from_secs(1));
        let stats = limiter.sweep().await.unwrap();
        assert_eq!(stats.attempts_removed, 1);

        let stats = limiter.sweep().await.unwrap();
        assert_eq!(stats.attempts_removed, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_engage_one_lockout() {
        let (limiter, _clock) = limiter(5);
        let ip = "10.0.0.20";

        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.record_attempt(ip, AttemptKind::Login, false, None).await
            }));
        }
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        // Exactly max - 1 failures are let through before the lockout
        assert_eq!(results.iter().filter(|r| r.allowed).count(), 4);
        let lockouts: std::collections::HashSet<_> =
            results.iter().filter_map(|r| r.locked_until).collect();
        assert_eq!(lockouts.len(), 1);

        let check = limiter.check_limit(ip, AttemptKind::Login).await.unwrap();
        assert!(!check.allowed);
        assert_eq!(check.locked_until, lockouts.into_iter().next());
    }
}
