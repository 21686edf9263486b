// ============================
// crates/guard-lib/src/devices/mod.rs
// ============================
//! Device session registry.
//!
//! Recognises returning devices, binds sessions to them and keeps two caps:
//! sessions per device (oldest-created evicted first) and distinct devices
//! per user (least-recently-active device evicted first, all of its sessions).

pub mod fingerprint;
mod model;
mod store;

pub use model::{DeviceInfo, DeviceSession, RevokeOutcome};
pub use store::{DeviceSessionStore, MemoryDeviceSessionStore};

use crate::clock::Clock;
use crate::config::RegistryConfig;
use crate::error::StorageError;
use crate::locks::KeyedLocks;
use crate::metrics::SESSION_EVICTED;
use crate::session::Session;
use chrono::{DateTime, Utc};
use metrics::counter;
use sessionguard_common::{Metadata, RevocationReason, SessionStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Everything needed to bind a new session to a device
#[derive(Debug, Clone)]
pub struct NewDeviceSession {
    pub user_id: String,
    pub session_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub user_agent: String,
    pub ip_address: String,
    pub fingerprint: Option<String>,
    pub metadata: Option<Metadata>,
}

/// Outcome of [`DeviceSessionRegistry::register_session`]
#[derive(Debug, Clone)]
pub struct SessionRegistration {
    pub session: DeviceSession,
    /// Sessions revoked to make room, in eviction order
    pub evicted: Vec<DeviceSession>,
    /// The device had never been seen before
    pub new_device: bool,
}

#[derive(Clone)]
pub struct DeviceSessionRegistry {
    store: Arc<dyn DeviceSessionStore>,
    config: RegistryConfig,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks,
}

impl DeviceSessionRegistry {
    pub fn new(store: Arc<dyn DeviceSessionStore>, config: RegistryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
            locks: KeyedLocks::new(),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Recognise (or describe) the device behind a request.
    ///
    /// Known devices come back with a fresh `last_active_at`; unknown ones are
    /// built untrusted. Nothing is persisted here.
    pub async fn identify_device(
        &self,
        user_agent: &str,
        ip_address: &str,
        fingerprint: Option<&str>,
    ) -> Result<DeviceInfo, StorageError> {
        Ok(self
            .identify(user_agent, ip_address, fingerprint, self.clock.now())
            .await?
            .0)
    }

    /// Bind a new session to its device, enforcing both caps first.
    pub async fn create_session(&self, request: NewDeviceSession) -> Result<DeviceSession, StorageError> {
        Ok(self.register_session(request).await?.session)
    }

    /// Like [`Self::create_session`], also reporting what was evicted.
    pub async fn register_session(
        &self,
        request: NewDeviceSession,
    ) -> Result<SessionRegistration, StorageError> {
        let device_id = fingerprint::device_id(
            &request.user_agent,
            &request.ip_address,
            request.fingerprint.as_deref(),
        );

        // Count, evict and insert as one critical section per device and per user
        let _device_guard = self.locks.lock(&format!("device:{device_id}")).await;
        let _user_guard = self.locks.lock(&format!("user:{}", request.user_id)).await;

        let now = self.clock.now();
        let (device, new_device) = self
            .identify(
                &request.user_agent,
                &request.ip_address,
                request.fingerprint.as_deref(),
                now,
            )
            .await?;

        let mut evicted = self.enforce_device_cap(&device.device_id, now).await?;
        evicted.extend(
            self.enforce_user_cap(&request.user_id, &device.device_id, now)
                .await?,
        );

        let verification_required = new_device && self.config.require_verification_for_new_device;
        if verification_required {
            warn!(
                security_event = "new_device_login",
                user_id = %request.user_id,
                device_id = %device.device_id,
                device_type = %device.device_type,
                "session created on an unrecognised device"
            );
        }

        let session = DeviceSession {
            session: Session {
                id: request.session_id,
                user_id: request.user_id,
                access_token: request.access_token,
                refresh_token: request.refresh_token,
                created_at: now,
                expires_at: request.expires_at,
                last_accessed_at: now,
                ip_address: request.ip_address,
                user_agent: request.user_agent,
                fingerprint: request.fingerprint,
                metadata: request.metadata,
            },
            device: device.clone(),
            status: SessionStatus::Active,
            verification_required,
            revoked_at: None,
            revoked_reason: None,
        };

        self.store.put_device(device).await?;
        self.store.insert_session(session.clone()).await?;
        debug!(session_id = %session.id(), device_id = %session.device_id(), "device session created");

        Ok(SessionRegistration {
            session,
            evicted,
            new_device,
        })
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<DeviceSession>, StorageError> {
        self.store.get_session(session_id).await
    }

    /// Active sessions of a user, oldest first
    pub async fn list_user_sessions(&self, user_id: &str) -> Result<Vec<DeviceSession>, StorageError> {
        let now = self.clock.now();
        Ok(self
            .store
            .sessions_for_user(user_id)
            .await?
            .into_iter()
            .filter(|s| s.is_active_at(now))
            .collect())
    }

    /// Active sessions bound to a device, oldest first
    pub async fn list_device_sessions(&self, device_id: &str) -> Result<Vec<DeviceSession>, StorageError> {
        let now = self.clock.now();
        Ok(self
            .store
            .sessions_for_device(device_id)
            .await?
            .into_iter()
            .filter(|s| s.is_active_at(now))
            .collect())
    }

    /// Distinct devices with an active session for the user, most recently active first
    pub async fn list_user_devices(&self, user_id: &str) -> Result<Vec<DeviceInfo>, StorageError> {
        let sessions = self.list_user_sessions(user_id).await?;
        let mut devices: Vec<_> = latest_device_records(&sessions).into_values().collect();
        devices.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        Ok(devices)
    }

    /// Mark one session revoked. Returns false only if it does not exist.
    pub async fn revoke_session(
        &self,
        session_id: &str,
        reason: RevocationReason,
    ) -> Result<bool, StorageError> {
        let outcome = self
            .store
            .mark_revoked(session_id, reason, self.clock.now())
            .await?;
        if outcome == RevokeOutcome::Revoked {
            info!(session_id, reason = %reason, "device session revoked");
        }
        Ok(outcome != RevokeOutcome::NotFound)
    }

    /// Revoke every active session on a device; returns how many changed state
    pub async fn revoke_device_sessions(
        &self,
        device_id: &str,
        reason: RevocationReason,
    ) -> Result<usize, StorageError> {
        let sessions = self.store.sessions_for_device(device_id).await?;
        Ok(self.revoke_each(&sessions, reason).await.len())
    }

    /// Revoke every active session of a user; returns how many changed state
    pub async fn revoke_all_user_sessions(
        &self,
        user_id: &str,
        reason: RevocationReason,
    ) -> Result<usize, StorageError> {
        let sessions = self.store.sessions_for_user(user_id).await?;
        Ok(self.revoke_each(&sessions, reason).await.len())
    }

    /// Record activity on an active session and its device
    pub async fn update_activity(&self, session_id: &str) -> Result<(), StorageError> {
        self.store
            .touch_session(session_id, self.clock.now())
            .await?;
        Ok(())
    }

    /// Update a device's trust flag; existing sessions are untouched
    pub async fn mark_trusted(&self, device_id: &str, trusted: bool) -> Result<bool, StorageError> {
        // Serialised with registrations on the same device
        let _device_guard = self.locks.lock(&format!("device:{device_id}")).await;
        let found = self.store.set_device_trusted(device_id, trusted).await?;
        if found {
            info!(device_id, trusted, "device trust updated");
        }
        Ok(found)
    }

    /// Delete expired and revoked sessions. Device history is kept.
    pub async fn cleanup_expired(&self) -> Result<usize, StorageError> {
        let removed = self.store.purge_sessions(self.clock.now()).await?;
        self.locks.prune();
        Ok(removed)
    }

    async fn identify(
        &self,
        user_agent: &str,
        ip_address: &str,
        fingerprint: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(DeviceInfo, bool), StorageError> {
        let device_id = fingerprint::device_id(user_agent, ip_address, fingerprint);
        if let Some(mut known) = self.store.get_device(&device_id).await? {
            known.last_active_at = now;
            return Ok((known, false));
        }
        Ok((
            DeviceInfo {
                device_id,
                device_type: fingerprint::detect_device_type(user_agent),
                user_agent: user_agent.to_string(),
                ip_address: ip_address.to_string(),
                fingerprint: fingerprint.map(str::to_string),
                os: fingerprint::detect_os(user_agent),
                browser: fingerprint::detect_browser(user_agent),
                first_seen_at: now,
                last_active_at: now,
                trusted: false,
            },
            true,
        ))
    }

    /// Leave room for one more session on the device by revoking its oldest
    async fn enforce_device_cap(
        &self,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeviceSession>, StorageError> {
        let active: Vec<_> = self
            .store
            .sessions_for_device(device_id)
            .await?
            .into_iter()
            .filter(|s| s.is_active_at(now))
            .collect();

        let max = self.config.max_sessions_per_device;
        if active.len() < max {
            return Ok(Vec::new());
        }

        let excess = active.len() + 1 - max;
        let mut oldest = active;
        oldest.sort_by(|a, b| a.session.created_at.cmp(&b.session.created_at));
        oldest.truncate(excess);

        let evicted = self.revoke_each(&oldest, RevocationReason::Security).await;
        if !evicted.is_empty() {
            counter!(SESSION_EVICTED).increment(evicted.len() as u64);
            warn!(
                security_event = "device_session_cap",
                device_id,
                evicted = evicted.len(),
                "evicted oldest sessions on device"
            );
        }
        Ok(evicted)
    }

    /// Leave room for one more device by revoking the least recently active ones.
    /// Logging in again from a device the user already has does not count as a new device.
    async fn enforce_user_cap(
        &self,
        user_id: &str,
        incoming_device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeviceSession>, StorageError> {
        let active: Vec<_> = self
            .store
            .sessions_for_user(user_id)
            .await?
            .into_iter()
            .filter(|s| s.is_active_at(now))
            .collect();

        let devices = latest_device_records(&active);
        let max = self.config.max_devices_per_user;
        if devices.contains_key(incoming_device_id) || devices.len() < max {
            return Ok(Vec::new());
        }

        let mut by_activity: Vec<_> = devices.into_values().collect();
        by_activity.sort_by(|a, b| a.last_active_at.cmp(&b.last_active_at));
        let excess = by_activity.len() + 1 - max;

        let mut evicted = Vec::new();
        for device in by_activity.into_iter().take(excess) {
            let on_device: Vec<_> = active
                .iter()
                .filter(|s| s.device_id() == device.device_id)
                .cloned()
                .collect();
            evicted.extend(self.revoke_each(&on_device, RevocationReason::Security).await);
            warn!(
                security_event = "user_device_cap",
                user_id,
                device_id = %device.device_id,
                "evicted least recently active device"
            );
        }
        if !evicted.is_empty() {
            counter!(SESSION_EVICTED).increment(evicted.len() as u64);
        }
        Ok(evicted)
    }

    /// Best-effort revoke of each session; one failure does not stop the rest.
    /// Returns the sessions that actually transitioned.
    async fn revoke_each(
        &self,
        sessions: &[DeviceSession],
        reason: RevocationReason,
    ) -> Vec<DeviceSession> {
        let now = self.clock.now();
        let mut revoked = Vec::new();
        for session in sessions.iter().filter(|s| s.status == SessionStatus::Active) {
            match self.store.mark_revoked(session.id(), reason, now).await {
                Ok(RevokeOutcome::Revoked) => {
                    let mut session = session.clone();
                    session.status = SessionStatus::Revoked;
                    session.revoked_at = Some(now);
                    session.revoked_reason = Some(reason);
                    revoked.push(session);
                },
                Ok(_) => {},
                Err(err) => {
                    error!(session_id = %session.id(), error = %err, "failed to revoke device session");
                },
            }
        }
        revoked
    }
}

/// One record per device, keeping the most recently active sighting
fn latest_device_records(sessions: &[DeviceSession]) -> HashMap<String, DeviceInfo> {
    let mut devices: HashMap<String, DeviceInfo> = HashMap::new();
    for session in sessions {
        devices
            .entry(session.device.device_id.clone())
            .and_modify(|current| {
                if session.device.last_active_at > current.last_active_at {
                    *current = session.device.clone();
                }
            })
            .or_insert_with(|| session.device.clone());
    }
    devices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    const UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

    fn registry(config: RegistryConfig) -> (DeviceSessionRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let registry = DeviceSessionRegistry::new(
            Arc::new(MemoryDeviceSessionStore::new()),
            config,
            clock.clone(),
        );
        (registry, clock)
    }

    fn request(user: &str, session: &str, fingerprint: &str, clock: &ManualClock) -> NewDeviceSession {
        NewDeviceSession {
            user_id: user.to_string(),
            session_id: session.to_string(),
            access_token: format!("at-{session}"),
            refresh_token: Some(format!("rt-{session}")),
            expires_at: clock.now() + ChronoDuration::days(7),
            user_agent: UA.to_string(),
            ip_address: "10.0.0.1".to_string(),
            fingerprint: Some(fingerprint.to_string()),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn test_identify_device_is_idempotent() {
        let (registry, clock) = registry(RegistryConfig::default());
        let first = registry.identify_device(UA, "10.0.0.1", Some("fp-1")).await.unwrap();
        assert!(!first.trusted);
        assert_eq!(first.os.as_deref(), Some("Windows"));
        assert_eq!(first.browser.as_deref(), Some("Chrome"));

        registry.create_session(request("u-1", "s-1", "fp-1", &clock)).await.unwrap();
        clock.advance(Duration::from_secs(60));

        let second = registry.identify_device(UA, "192.168.1.9", Some("fp-1")).await.unwrap();
        assert_eq!(first.device_id, second.device_id);
        assert_eq!(second.first_seen_at, first.first_seen_at);
        assert_eq!(second.last_active_at, clock.now());
    }

    #[tokio::test]
    async fn test_device_cap_evicts_oldest_created() {
        let (registry, clock) = registry(RegistryConfig {
            max_sessions_per_device: 2,
            ..RegistryConfig::default()
        });

        for id in ["s1", "s2", "s3"] {
            registry.create_session(request("u-1", id, "fp-shared", &clock)).await.unwrap();
            clock.advance(Duration::from_secs(1));
        }

        let active: Vec<_> = registry
            .list_user_sessions("u-1")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.session.id)
            .collect();
        assert_eq!(active, vec!["s2", "s3"]);

        let s1 = registry.get_session("s1").await.unwrap().unwrap();
        assert_eq!(s1.status, SessionStatus::Revoked);
        assert_eq!(s1.revoked_reason, Some(RevocationReason::Security));
    }

    #[tokio::test]
    async fn test_user_cap_evicts_least_recently_active_device() {
        let (registry, clock) = registry(RegistryConfig {
            max_devices_per_user: 2,
            max_sessions_per_device: 5,
            ..RegistryConfig::default()
        });

        registry.create_session(request("u-1", "a1", "fp-a", &clock)).await.unwrap();
        clock.advance(Duration::from_secs(1));
        registry.create_session(request("u-1", "a2", "fp-a", &clock)).await.unwrap();
        clock.advance(Duration::from_secs(1));
        registry.create_session(request("u-1", "b1", "fp-b", &clock)).await.unwrap();
        clock.advance(Duration::from_secs(1));

        // Device A becomes the most recently active
        registry.update_activity("a1").await.unwrap();
        clock.advance(Duration::from_secs(1));

        let registration = registry
            .register_session(request("u-1", "c1", "fp-c", &clock))
            .await
            .unwrap();
        let evicted: Vec<_> = registration.evicted.iter().map(|s| s.id().to_string()).collect();
        assert_eq!(evicted, vec!["b1"]);
        assert!(registration.new_device);

        let devices = registry.list_user_devices("u-1").await.unwrap();
        assert_eq!(devices.len(), 2);
    }

    #[tokio::test]
    async fn test_known_device_does_not_trigger_user_cap() {
        let (registry, clock) = registry(RegistryConfig {
            max_devices_per_user: 1,
            max_sessions_per_device: 5,
            ..RegistryConfig::default()
        });
        registry.create_session(request("u-1", "a1", "fp-a", &clock)).await.unwrap();
        let registration = registry
            .register_session(request("u-1", "a2", "fp-a", &clock))
            .await
            .unwrap();
        assert!(registration.evicted.is_empty());
        assert!(!registration.new_device);
        assert_eq!(registry.list_user_sessions("u-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_revoke_counts_only_transitions() {
        let (registry, clock) = registry(RegistryConfig::default());
        registry.create_session(request("u-1", "s1", "fp-a", &clock)).await.unwrap();
        registry.create_session(request("u-1", "s2", "fp-a", &clock)).await.unwrap();
        registry.create_session(request("u-1", "s3", "fp-b", &clock)).await.unwrap();

        assert!(registry.revoke_session("s1", RevocationReason::Logout).await.unwrap());
        assert!(!registry.revoke_session("nope", RevocationReason::Logout).await.unwrap());

        let device_a = fingerprint::device_id(UA, "10.0.0.1", Some("fp-a"));
        assert_eq!(
            registry.revoke_device_sessions(&device_a, RevocationReason::Admin).await.unwrap(),
            1
        );
        assert_eq!(
            registry.revoke_all_user_sessions("u-1", RevocationReason::Admin).await.unwrap(),
            1
        );
        assert_eq!(
            registry.revoke_all_user_sessions("u-1", RevocationReason::Admin).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_update_activity_ignores_revoked_sessions() {
        let (registry, clock) = registry(RegistryConfig::default());
        registry.create_session(request("u-1", "s1", "fp-a", &clock)).await.unwrap();
        registry.revoke_session("s1", RevocationReason::Logout).await.unwrap();

        clock.advance(Duration::from_secs(30));
        registry.update_activity("s1").await.unwrap();
        let session = registry.get_session("s1").await.unwrap().unwrap();
        assert!(session.session.last_accessed_at < clock.now());
    }

    #[tokio::test]
    async fn test_mark_trusted_and_verification_flag() {
        let (registry, clock) = registry(RegistryConfig {
            require_verification_for_new_device: true,
            ..RegistryConfig::default()
        });
        let first = registry
            .register_session(request("u-1", "s1", "fp-a", &clock))
            .await
            .unwrap();
        assert!(first.session.verification_required);

        let device_id = first.session.device_id().to_string();
        assert!(registry.mark_trusted(&device_id, true).await.unwrap());
        assert!(!registry.mark_trusted("unknown", true).await.unwrap());

        let second = registry
            .register_session(request("u-1", "s2", "fp-a", &clock))
            .await
            .unwrap();
        assert!(!second.session.verification_required);
        assert!(second.session.device.trusted);
        assert_eq!(
            registry.get_session("s1").await.unwrap().unwrap().status,
            SessionStatus::Active
        );
    }

    #[tokio::test]
    async fn test_cleanup_keeps_devices() {
        let (registry, clock) = registry(RegistryConfig::default());
        let mut short = request("u-1", "short", "fp-a", &clock);
        short.expires_at = clock.now() + ChronoDuration::minutes(1);
        registry.create_session(short).await.unwrap();
        registry.create_session(request("u-1", "revoked", "fp-a", &clock)).await.unwrap();
        registry.create_session(request("u-1", "live", "fp-a", &clock)).await.unwrap();
        registry.revoke_session("revoked", RevocationReason::Logout).await.unwrap();

        clock.advance(Duration::from_secs(120));
        assert_eq!(registry.cleanup_expired().await.unwrap(), 2);
        assert!(registry.get_session("live").await.unwrap().is_some());

        let device = registry.identify_device(UA, "10.0.0.1", Some("fp-a")).await.unwrap();
        assert!(device.first_seen_at < clock.now());
    }

    /// Memory store that stalls while listing a device's sessions
    struct StallingStore {
        inner: MemoryDeviceSessionStore,
        stall: Duration,
    }

    #[async_trait]
    impl DeviceSessionStore for StallingStore {
        async fn get_device(&self, device_id: &str) -> Result<Option<DeviceInfo>, StorageError> {
            self.inner.get_device(device_id).await
        }

        async fn put_device(&self, device: DeviceInfo) -> Result<(), StorageError> {
            self.inner.put_device(device).await
        }

        async fn set_device_trusted(&self, device_id: &str, trusted: bool) -> Result<bool, StorageError> {
            self.inner.set_device_trusted(device_id, trusted).await
        }

        async fn insert_session(&self, session: DeviceSession) -> Result<(), StorageError> {
            self.inner.insert_session(session).await
        }

        async fn get_session(&self, session_id: &str) -> Result<Option<DeviceSession>, StorageError> {
            self.inner.get_session(session_id).await
        }

        async fn sessions_for_device(&self, device_id: &str) -> Result<Vec<DeviceSession>, StorageError> {
            tokio::time::sleep(self.stall).await;
            self.inner.sessions_for_device(device_id).await
        }

        async fn sessions_for_user(&self, user_id: &str) -> Result<Vec<DeviceSession>, StorageError> {
            self.inner.sessions_for_user(user_id).await
        }

        async fn mark_revoked(
            &self,
            session_id: &str,
            reason: RevocationReason,
            at: DateTime<Utc>,
        ) -> Result<RevokeOutcome, StorageError> {
            self.inner.mark_revoked(session_id, reason, at).await
        }

        async fn touch_session(&self, session_id: &str, at: DateTime<Utc>) -> Result<bool, StorageError> {
            self.inner.touch_session(session_id, at).await
        }

        async fn purge_sessions(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
            self.inner.purge_sessions(now).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_trust_update_survives_concurrent_registration() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = StallingStore {
            inner: MemoryDeviceSessionStore::new(),
            stall: Duration::from_millis(100),
        };
        let registry = DeviceSessionRegistry::new(Arc::new(store), RegistryConfig::default(), clock.clone());

        let first = registry
            .register_session(request("u-1", "s1", "fp-t", &clock))
            .await
            .unwrap();
        let device_id = first.session.device_id().to_string();

        let racing = registry.clone();
        let second = request("u-1", "s2", "fp-t", &clock);
        let registration = tokio::spawn(async move { racing.register_session(second).await });

        // Land the trust update while the registration is counting sessions
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(registry.mark_trusted(&device_id, true).await.unwrap());
        registration.await.unwrap().unwrap();

        let device = registry.identify_device(UA, "10.0.0.1", Some("fp-t")).await.unwrap();
        assert!(device.trusted);
        assert_eq!(device.first_seen_at, first.session.device.first_seen_at);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registrations_respect_device_cap() {
        let (registry, clock) = registry(RegistryConfig {
            max_sessions_per_device: 2,
            ..RegistryConfig::default()
        });

        let mut handles = Vec::new();
        for i in 0..64 {
            let registry = registry.clone();
            let request = request("u-1", &format!("s{i}"), "fp-shared", &clock);
            handles.push(tokio::spawn(async move { registry.create_session(request).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let device_id = fingerprint::device_id(UA, "10.0.0.1", Some("fp-shared"));
        assert_eq!(registry.list_device_sessions(&device_id).await.unwrap().len(), 2);
        assert_eq!(registry.list_user_sessions("u-1").await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registrations_respect_user_device_cap() {
        let (registry, clock) = registry(RegistryConfig {
            max_devices_per_user: 2,
            max_sessions_per_device: 5,
            ..RegistryConfig::default()
        });

        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = registry.clone();
            let request = request("u-1", &format!("s{i}"), &format!("fp-{i}"), &clock);
            handles.push(tokio::spawn(async move { registry.create_session(request).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(registry.list_user_devices("u-1").await.unwrap().len(), 2);
        assert_eq!(registry.list_user_sessions("u-1").await.unwrap().len(), 2);
    }
}
