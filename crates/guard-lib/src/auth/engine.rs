// ============================
// crates/guard-lib/src/auth/engine.rs
// ============================
//! Authentication orchestrator.
//!
//! [`AuthEngine`] ties together the rate limiter, token issuer, device
//! registry, revocation store and the session/refresh table. Public
//! operations never return storage or token errors: callers see
//! [`AuthFailure`], `Option` or `bool`, and the details go to the log.

use super::identity::{Credentials, IdentityProvider};
use super::token_generator::{generate_refresh_token, generate_session_id};
use super::tokens::TokenIssuer;
use crate::clock::{to_chrono, Clock};
use crate::config::{EngineConfig, Settings};
use crate::devices::{
    DeviceSession, DeviceSessionRegistry, DeviceSessionStore, MemoryDeviceSessionStore, NewDeviceSession,
    SessionRegistration,
};
use crate::error::{AuthFailure, ConfigError, StorageError, TokenError};
use crate::locks::KeyedLocks;
use crate::metrics::{
    AUTH_FAILURE, AUTH_RATE_LIMITED, AUTH_SUCCESS, REVOCATION_ENTRIES, SESSION_CREATED, SESSION_EXPIRED,
    TOKEN_REFRESHED, TOKEN_REJECTED, TOKEN_REVOKED,
};
use crate::rate_limit::{MemoryRateLimitStore, RateLimitStore, RateLimiter};
use crate::revocation::{MemoryRevocationStore, Revocation, RevocationStore};
use crate::session::{MemorySessionStore, RefreshTokenRecord, Session, SessionStore};
use crate::tasks::BackgroundTasks;
use chrono::{DateTime, TimeZone, Utc};
use metrics::{counter, gauge};
use sessionguard_common::{AttemptKind, Metadata, RevocationReason, User};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Lifetime of the token signed by [`AuthEngine::is_healthy`]
const HEALTH_CHECK_TTL: Duration = Duration::from_secs(60);

/// Placeholder for client context that could not be recovered
const UNKNOWN_CLIENT: &str = "unknown";

/// Storage backends the engine runs on
#[derive(Clone)]
pub struct EngineStorage {
    pub revocations: Arc<dyn RevocationStore>,
    pub rate_limits: Arc<dyn RateLimitStore>,
    pub devices: Arc<dyn DeviceSessionStore>,
    pub sessions: Arc<dyn SessionStore>,
}

impl EngineStorage {
    /// Reference in-memory backends for single-node use and tests
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            revocations: Arc::new(MemoryRevocationStore::new(clock)),
            rate_limits: Arc::new(MemoryRateLimitStore::new()),
            devices: Arc::new(MemoryDeviceSessionStore::new()),
            sessions: Arc::new(MemorySessionStore::new()),
        }
    }
}

/// Request context of a login
#[derive(Debug, Clone, PartialEq)]
pub struct ClientInfo {
    /// Rate-limit identifier
    pub ip_address: String,
    pub user_agent: String,
    pub fingerprint: Option<String>,
    pub metadata: Option<Metadata>,
}

impl ClientInfo {
    pub fn new(ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
            fingerprint: None,
            metadata: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    fn from_session(session: &Session) -> Self {
        Self {
            ip_address: session.ip_address.clone(),
            user_agent: session.user_agent.clone(),
            fingerprint: session.fingerprint.clone(),
            metadata: session.metadata.clone(),
        }
    }
}

/// Successful login
#[derive(Debug, Clone)]
pub struct AuthSuccess {
    pub user: User,
    pub session: Session,
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
}

/// Why a new session could not be minted
#[derive(Debug, Error)]
enum IssueError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Run a storage call under a deadline
async fn bounded<T, F>(operation: &'static str, after: Duration, call: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout { operation, after }),
    }
}

/// Handles for making evicted sessions unusable, detachable from the engine
#[derive(Clone)]
struct EvictionTeardown {
    revocations: Arc<dyn RevocationStore>,
    sessions: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    access_token_ttl: Duration,
    deadline: Duration,
}

impl EvictionTeardown {
    /// Revocation entries must outlive every token that could still verify
    fn horizon(&self, session_expires_at: DateTime<Utc>) -> DateTime<Utc> {
        let access_expiry = self.clock.now() + to_chrono(self.access_token_ttl);
        session_expires_at.max(access_expiry)
    }

    /// Blacklist and forget sessions evicted by the registry. Best-effort.
    async fn drop_evicted(&self, evicted: &[DeviceSession]) {
        for session in evicted {
            let id = session.id();
            let revocation = Revocation::new(id, self.horizon(session.session.expires_at), RevocationReason::Security)
                .for_user(session.user_id());
            if let Err(err) = bounded("revocation.add", self.deadline, self.revocations.add(revocation)).await {
                error!(session_id = id, error = %err, "failed to revoke evicted session");
            }
            if let Err(err) = bounded("sessions.delete", self.deadline, self.sessions.delete_session(id)).await {
                error!(session_id = id, error = %err, "failed to delete evicted session");
            }
            if let Err(err) = bounded(
                "sessions.delete_refresh_tokens",
                self.deadline,
                self.sessions.delete_refresh_tokens_for_session(id),
            )
            .await
            {
                error!(session_id = id, error = %err, "failed to delete evicted refresh tokens");
            }
        }
    }
}

/// The session security engine
pub struct AuthEngine {
    config: EngineConfig,
    tokens: TokenIssuer,
    identity: Arc<dyn IdentityProvider>,
    revocations: Arc<dyn RevocationStore>,
    rate_limiter: RateLimiter,
    registry: DeviceSessionRegistry,
    sessions: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    teardown: EvictionTeardown,
    user_locks: KeyedLocks,
    tasks: BackgroundTasks,
}

impl AuthEngine {
    /// Validate `settings`, wire the components and start background maintenance.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        settings: &Settings,
        identity: Arc<dyn IdentityProvider>,
        storage: EngineStorage,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let config = settings.validate()?;
        Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;

        let tokens = TokenIssuer::new(&config.token);
        let teardown = EvictionTeardown {
            revocations: storage.revocations.clone(),
            sessions: storage.sessions.clone(),
            clock: clock.clone(),
            access_token_ttl: tokens.access_token_ttl(),
            deadline: config.storage_timeout,
        };
        let engine = Self {
            tokens,
            identity,
            revocations: storage.revocations,
            rate_limiter: RateLimiter::new(storage.rate_limits, config.rate_limit, clock.clone()),
            registry: DeviceSessionRegistry::new(storage.devices, config.registry, clock.clone()),
            sessions: storage.sessions,
            clock,
            teardown,
            user_locks: KeyedLocks::new(),
            tasks: BackgroundTasks::new(),
            config,
        };
        engine.start_maintenance();

        info!(
            algorithm = ?engine.config.token.algorithm,
            blacklist = engine.config.enable_blacklist,
            rate_limit = engine.config.enable_rate_limit,
            max_concurrent_sessions = ?engine.config.max_concurrent_sessions,
            "auth engine started"
        );
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Verify credentials and open a session.
    pub async fn authenticate(
        &self,
        credentials: &Credentials,
        client: &ClientInfo,
    ) -> Result<AuthSuccess, AuthFailure> {
        let ip = client.ip_address.as_str();

        if self.config.enable_rate_limit {
            let limit = self
                .bounded("rate_limit.check", self.rate_limiter.check_limit(ip, AttemptKind::Login))
                .await
                .map_err(|err| {
                    error!(ip_address = ip, error = %err, "rate limit check failed");
                    AuthFailure::Unavailable
                })?;
            if !limit.allowed {
                counter!(AUTH_RATE_LIMITED).increment(1);
                info!(ip_address = ip, locked_until = ?limit.locked_until, "login refused by rate limiter");
                return Err(AuthFailure::TooManyAttempts {
                    locked_until: limit.locked_until,
                });
            }
        }

        let verified = self
            .identity
            .verify_credentials(credentials)
            .await
            .map_err(|err| {
                error!(ip_address = ip, error = %err, "identity provider failed");
                AuthFailure::Unavailable
            })?;

        // Fails open; a locked identifier was already refused by the pre-check
        let attempt = if self.config.enable_rate_limit {
            let record = self.rate_limiter.record_attempt(
                ip,
                AttemptKind::Login,
                verified.is_some(),
                client.metadata.clone(),
            );
            match self.bounded("rate_limit.record", record).await {
                Ok(result) => Some(result),
                Err(err) => {
                    error!(ip_address = ip, error = %err, "failed to record login attempt");
                    None
                },
            }
        } else {
            None
        };

        let Some(user) = verified else {
            counter!(AUTH_FAILURE).increment(1);
            info!(ip_address = ip, username = %credentials.username, "invalid credentials");
            if let Some(result) = attempt {
                let delay = self.rate_limiter.progressive_delay(result.current_attempts);
                if !delay.is_zero() {
                    debug!(ip_address = ip, ?delay, "delaying failed login");
                    tokio::time::sleep(delay).await;
                }
            }
            return Err(AuthFailure::InvalidCredentials);
        };

        // Eviction and insertion form one critical section per user
        let _guard = self.user_locks.lock(&user.id).await;
        if let Some(max) = self.config.max_concurrent_sessions {
            self.enforce_session_limit(&user.id, max as usize).await;
        }

        let (session, access_token) = self.start_session(&user.id, client).await.map_err(|err| {
            error!(user_id = %user.id, error = %err, "failed to start session");
            AuthFailure::Unavailable
        })?;

        counter!(AUTH_SUCCESS).increment(1);
        info!(user_id = %user.id, session_id = %session.id, ip_address = ip, "user authenticated");

        Ok(AuthSuccess {
            refresh_token: session.refresh_token.clone().unwrap_or_default(),
            expires_in: self.tokens.access_token_ttl().as_secs(),
            user,
            session,
            access_token,
        })
    }

    /// Resolve an access token to its live session, bumping its activity.
    pub async fn validate_session(&self, access_token: &str) -> Option<Session> {
        let now = self.clock.now();
        let claims = match self.tokens.verify(access_token, now) {
            Ok(claims) => claims,
            Err(err) => {
                counter!(TOKEN_REJECTED).increment(1);
                debug!(error = %err, "access token rejected");
                return None;
            },
        };

        if self.config.enable_blacklist {
            match self
                .bounded("revocation.is_revoked", self.revocations.is_revoked(&claims.jti))
                .await
            {
                Ok(false) => {},
                Ok(true) => {
                    counter!(TOKEN_REJECTED).increment(1);
                    warn!(
                        security_event = "revoked_token_use",
                        token_id = %claims.jti,
                        user_id = %claims.sub,
                        "revoked token presented"
                    );
                    return None;
                },
                Err(err) => {
                    error!(token_id = %claims.jti, error = %err, "revocation lookup failed");
                    return None;
                },
            }
        }

        let session = match self
            .bounded("sessions.get", self.sessions.get_session(&claims.jti))
            .await
        {
            Ok(session) => session,
            Err(err) => {
                error!(token_id = %claims.jti, error = %err, "session lookup failed");
                return None;
            },
        };

        let live = match session {
            Some(session) if !session.is_expired_at(now) && session.user_id == claims.sub => session,
            stale => {
                counter!(SESSION_EXPIRED).increment(1);
                debug!(token_id = %claims.jti, found = stale.is_some(), "no live session for token");
                let token_expiry = Utc.timestamp_opt(claims.exp, 0).single().unwrap_or(now);
                self.expire_token(&claims.jti, &claims.sub, token_expiry).await;
                return None;
            },
        };

        match self
            .bounded("sessions.touch", self.sessions.touch_session(&live.id, now))
            .await
        {
            Ok(Some(touched)) => {
                if let Err(err) = self
                    .bounded("registry.update_activity", self.registry.update_activity(&touched.id))
                    .await
                {
                    warn!(session_id = %touched.id, error = %err, "failed to update device activity");
                }
                Some(touched)
            },
            Ok(None) => None,
            Err(err) => {
                error!(session_id = %live.id, error = %err, "failed to touch session");
                None
            },
        }
    }

    /// Rotate a refresh token into a brand new session.
    ///
    /// The old refresh record is consumed before anything else, so any later
    /// failure leaves it unusable.
    pub async fn refresh_token(&self, refresh_token: &str) -> Option<Session> {
        let now = self.clock.now();
        let record = match self
            .bounded("sessions.take_refresh_token", self.sessions.take_refresh_token(refresh_token))
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(security_event = "refresh_token_rejected", "unknown or already used refresh token");
                return None;
            },
            Err(err) => {
                error!(error = %err, "refresh token lookup failed");
                return None;
            },
        };
        if !record.is_valid_at(now) {
            info!(session_id = %record.session_id, "expired refresh token");
            return None;
        }

        let old = match self
            .bounded("sessions.get", self.sessions.get_session(&record.session_id))
            .await
        {
            Ok(old) => old,
            Err(err) => {
                error!(session_id = %record.session_id, error = %err, "session lookup failed");
                return None;
            },
        };
        let old_expiry = old.as_ref().map_or(record.expires_at, |s| s.expires_at);

        let revocation = Revocation::new(
            record.session_id.clone(),
            self.revocation_horizon(old_expiry),
            RevocationReason::Security,
        )
        .for_user(record.user_id.clone());
        if let Err(err) = self.bounded("revocation.add", self.revocations.add(revocation)).await {
            error!(session_id = %record.session_id, error = %err, "failed to revoke rotated session");
            return None;
        }
        if let Err(err) = self
            .bounded("sessions.delete", self.sessions.delete_session(&record.session_id))
            .await
        {
            error!(session_id = %record.session_id, error = %err, "failed to delete rotated session");
            return None;
        }
        if let Err(err) = self
            .bounded(
                "sessions.delete_refresh_tokens",
                self.sessions.delete_refresh_tokens_for_session(&record.session_id),
            )
            .await
        {
            warn!(session_id = %record.session_id, error = %err, "failed to drop sibling refresh tokens");
        }

        let client = match old {
            Some(old) => ClientInfo::from_session(&old),
            None => self.client_from_registry(&record.session_id).await,
        };
        if let Err(err) = self
            .bounded(
                "registry.revoke",
                self.registry.revoke_session(&record.session_id, RevocationReason::Security),
            )
            .await
        {
            warn!(session_id = %record.session_id, error = %err, "failed to revoke rotated device session");
        }

        match self.start_session(&record.user_id, &client).await {
            Ok((session, _)) => {
                counter!(TOKEN_REFRESHED).increment(1);
                info!(
                    user_id = %record.user_id,
                    old_session_id = %record.session_id,
                    session_id = %session.id,
                    "session rotated"
                );
                Some(session)
            },
            Err(err) => {
                error!(user_id = %record.user_id, error = %err, "failed to mint rotated session");
                None
            },
        }
    }

    /// Log a session out. Returns false when it is unknown or could not be revoked.
    pub async fn revoke_session(&self, session_id: &str) -> bool {
        self.revoke_with_reason(session_id, RevocationReason::Logout).await
    }

    /// Revoke every session on record for the user. Returns how many were revoked.
    pub async fn revoke_all_sessions(&self, user_id: &str) -> usize {
        let sessions = match self
            .bounded("sessions.for_user", self.sessions.sessions_for_user(user_id))
            .await
        {
            Ok(sessions) => sessions,
            Err(err) => {
                error!(user_id, error = %err, "failed to list sessions");
                return 0;
            },
        };

        let mut revoked = 0;
        for session in &sessions {
            if self.revoke_with_reason(&session.id, RevocationReason::Logout).await {
                revoked += 1;
            }
        }

        // Registry sessions with no local counterpart
        if let Err(err) = self
            .bounded(
                "registry.revoke_all",
                self.registry.revoke_all_user_sessions(user_id, RevocationReason::Logout),
            )
            .await
        {
            warn!(user_id, error = %err, "failed to revoke remaining device sessions");
        }

        info!(user_id, revoked, total = sessions.len(), "revoked all sessions");
        revoked
    }

    /// Revoke every active session bound to a device. Returns how many were revoked.
    pub async fn revoke_device_sessions(&self, device_id: &str) -> usize {
        let sessions = match self
            .bounded("registry.list_device", self.registry.list_device_sessions(device_id))
            .await
        {
            Ok(sessions) => sessions,
            Err(err) => {
                error!(device_id, error = %err, "failed to list device sessions");
                return 0;
            },
        };

        let mut revoked = 0;
        for session in &sessions {
            if self.revoke_with_reason(session.id(), RevocationReason::Admin).await {
                revoked += 1;
            }
        }
        if let Err(err) = self
            .bounded(
                "registry.revoke_device",
                self.registry.revoke_device_sessions(device_id, RevocationReason::Admin),
            )
            .await
        {
            warn!(device_id, error = %err, "failed to revoke remaining device sessions");
        }
        revoked
    }

    /// Self-test: sign and verify a throwaway token with the active configuration.
    pub fn is_healthy(&self) -> bool {
        let now = self.clock.now();
        let check_id = format!("health-{}", generate_session_id());
        let result = self
            .tokens
            .issue("health-check", &check_id, now, HEALTH_CHECK_TTL)
            .and_then(|issued| self.tokens.verify(&issued.token, now));
        match result {
            Ok(claims) => claims.jti == check_id,
            Err(err) => {
                warn!(error = %err, "token self-test failed");
                false
            },
        }
    }

    /// Administrative unlock of a rate-limited identifier
    pub async fn unlock(&self, identifier: &str, kind: AttemptKind) -> bool {
        match self
            .bounded("rate_limit.clear", self.rate_limiter.clear_limit(identifier, kind))
            .await
        {
            Ok(()) => true,
            Err(err) => {
                error!(identifier, kind = %kind, error = %err, "failed to clear rate limit");
                false
            },
        }
    }

    /// Returns false when the device is unknown or the update failed
    pub async fn mark_device_trusted(&self, device_id: &str, trusted: bool) -> bool {
        match self
            .bounded("registry.mark_trusted", self.registry.mark_trusted(device_id, trusted))
            .await
        {
            Ok(found) => found,
            Err(err) => {
                error!(device_id, error = %err, "failed to update device trust");
                false
            },
        }
    }

    /// Active device sessions of a user, oldest first
    pub async fn list_user_sessions(&self, user_id: &str) -> Vec<DeviceSession> {
        self.bounded("registry.list_user", self.registry.list_user_sessions(user_id))
            .await
            .unwrap_or_else(|err| {
                error!(user_id, error = %err, "failed to list user sessions");
                Vec::new()
            })
    }

    /// Stop background maintenance and wait for it to finish
    pub async fn close(&self) {
        self.tasks.shutdown().await;
        info!("auth engine closed");
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        bounded(operation, self.config.storage_timeout, call).await
    }

    fn revocation_horizon(&self, session_expires_at: DateTime<Utc>) -> DateTime<Utc> {
        self.teardown.horizon(session_expires_at)
    }

    async fn revoke_with_reason(&self, session_id: &str, reason: RevocationReason) -> bool {
        let session = match self
            .bounded("sessions.get", self.sessions.get_session(session_id))
            .await
        {
            Ok(Some(session)) => session,
            Ok(None) => {
                debug!(session_id, "revoke requested for unknown session");
                return false;
            },
            Err(err) => {
                error!(session_id, error = %err, "session lookup failed");
                return false;
            },
        };

        let revocation = Revocation::new(
            session.id.clone(),
            self.revocation_horizon(session.expires_at),
            reason,
        )
        .for_user(session.user_id.clone());
        if let Err(err) = self.bounded("revocation.add", self.revocations.add(revocation)).await {
            error!(session_id, error = %err, "failed to add revocation");
            return false;
        }
        if let Err(err) = self.bounded("sessions.delete", self.sessions.delete_session(session_id)).await {
            error!(session_id, error = %err, "failed to delete session");
            return false;
        }
        if let Err(err) = self
            .bounded(
                "sessions.delete_refresh_tokens",
                self.sessions.delete_refresh_tokens_for_session(session_id),
            )
            .await
        {
            error!(session_id, error = %err, "failed to delete refresh tokens");
            return false;
        }
        if let Err(err) = self
            .bounded("registry.revoke", self.registry.revoke_session(session_id, reason))
            .await
        {
            warn!(session_id, error = %err, "failed to revoke device session");
        }

        counter!(TOKEN_REVOKED).increment(1);
        info!(session_id, user_id = %session.user_id, reason = %reason, "session revoked");
        true
    }

    /// Evict the user's oldest sessions so one more fits under `max`. Best-effort.
    async fn enforce_session_limit(&self, user_id: &str, max: usize) {
        let now = self.clock.now();
        let active: Vec<Session> = match self
            .bounded("sessions.for_user", self.sessions.sessions_for_user(user_id))
            .await
        {
            Ok(sessions) => sessions.into_iter().filter(|s| !s.is_expired_at(now)).collect(),
            Err(err) => {
                error!(user_id, error = %err, "failed to count sessions");
                return;
            },
        };
        if active.len() < max {
            return;
        }

        let excess = active.len() + 1 - max;
        for session in active.iter().take(excess) {
            if self.revoke_with_reason(&session.id, RevocationReason::Security).await {
                warn!(
                    security_event = "concurrent_session_cap",
                    user_id,
                    session_id = %session.id,
                    "evicted oldest session"
                );
            }
        }
    }

    /// Mint tokens, register the device session and store the session and its refresh record.
    async fn start_session(&self, user_id: &str, client: &ClientInfo) -> Result<(Session, String), IssueError> {
        let now = self.clock.now();
        let session_id = generate_session_id();
        let access = self.tokens.issue_access_token(user_id, &session_id, now)?;
        let refresh_token = generate_refresh_token();
        let expires_at = now + to_chrono(self.config.token.refresh_token_ttl);

        let registration = self
            .register_detached(NewDeviceSession {
                user_id: user_id.to_string(),
                session_id: session_id.clone(),
                access_token: access.token.clone(),
                refresh_token: Some(refresh_token.clone()),
                expires_at,
                user_agent: client.user_agent.clone(),
                ip_address: client.ip_address.clone(),
                fingerprint: client.fingerprint.clone(),
                metadata: client.metadata.clone(),
            })
            .await?;

        let session = registration.session.session;
        let record = RefreshTokenRecord {
            refresh_token,
            user_id: user_id.to_string(),
            session_id: session_id.clone(),
            expires_at,
        };
        if let Err(err) = self.store_session(&session, record).await {
            self.abandon_session(&session_id).await;
            return Err(err.into());
        }

        counter!(SESSION_CREATED).increment(1);
        Ok((session, access.token))
    }

    /// Run the registry's count, evict and insert sequence in a task of its own.
    ///
    /// Only the wait is bounded by `storage_timeout`. The task always tears down
    /// what it evicted, and revokes its own session again if nobody is left to
    /// receive it.
    async fn register_detached(&self, request: NewDeviceSession) -> Result<SessionRegistration, StorageError> {
        let registry = self.registry.clone();
        let teardown = self.teardown.clone();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let result = registry.register_session(request).await;
            if let Ok(registration) = &result {
                teardown.drop_evicted(&registration.evicted).await;
            }
            if let Err(Ok(orphan)) = tx.send(result) {
                let session_id = orphan.session.id();
                warn!(session_id, "registration finished after its caller gave up, revoking");
                let revoke = registry.revoke_session(session_id, RevocationReason::Security);
                if let Err(err) = bounded("registry.revoke", teardown.deadline, revoke).await {
                    error!(session_id, error = %err, "failed to revoke orphaned device session");
                }
            }
        });

        let after = self.config.storage_timeout;
        match tokio::time::timeout(after, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(StorageError::Unavailable("device registration aborted".to_string())),
            Err(_) => Err(StorageError::Timeout {
                operation: "registry.register",
                after,
            }),
        }
    }

    async fn store_session(&self, session: &Session, record: RefreshTokenRecord) -> Result<(), StorageError> {
        self.bounded("sessions.insert", self.sessions.insert_session(session.clone()))
            .await?;
        self.bounded("sessions.insert_refresh_token", self.sessions.insert_refresh_token(record))
            .await
    }

    /// Undo a registration whose session could not be stored. Best-effort.
    async fn abandon_session(&self, session_id: &str) {
        if let Err(err) = self
            .bounded(
                "registry.revoke",
                self.registry.revoke_session(session_id, RevocationReason::Security),
            )
            .await
        {
            error!(session_id, error = %err, "failed to revoke unstored device session");
        }
        if let Err(err) = self.bounded("sessions.delete", self.sessions.delete_session(session_id)).await {
            warn!(session_id, error = %err, "failed to delete partially stored session");
        }
        if let Err(err) = self
            .bounded(
                "sessions.delete_refresh_tokens",
                self.sessions.delete_refresh_tokens_for_session(session_id),
            )
            .await
        {
            warn!(session_id, error = %err, "failed to delete partially stored refresh token");
        }
    }

    /// Blacklist a token whose session is gone or past its end
    async fn expire_token(&self, token_id: &str, user_id: &str, token_expiry: DateTime<Utc>) {
        if self.config.enable_blacklist {
            let revocation = Revocation::new(token_id, token_expiry, RevocationReason::Expired).for_user(user_id);
            if let Err(err) = self.bounded("revocation.add", self.revocations.add(revocation)).await {
                warn!(token_id, error = %err, "failed to blacklist stale token");
            }
        }
        if let Err(err) = self.bounded("sessions.delete", self.sessions.delete_session(token_id)).await {
            warn!(token_id, error = %err, "failed to delete stale session");
        }
    }

    async fn client_from_registry(&self, session_id: &str) -> ClientInfo {
        match self
            .bounded("registry.get", self.registry.get_session(session_id))
            .await
        {
            Ok(Some(device_session)) => ClientInfo::from_session(&device_session.session),
            Ok(None) => ClientInfo::new(UNKNOWN_CLIENT, UNKNOWN_CLIENT),
            Err(err) => {
                warn!(session_id, error = %err, "failed to recover client context");
                ClientInfo::new(UNKNOWN_CLIENT, UNKNOWN_CLIENT)
            },
        }
    }

    fn start_maintenance(&self) {
        let every = self.config.cleanup_interval;
        let deadline = self.config.storage_timeout;

        let revocations = self.revocations.clone();
        self.tasks.spawn_periodic("revocation_cleanup", every, move || {
            let revocations = revocations.clone();
            async move {
                match bounded("revocation.cleanup", deadline, revocations.cleanup()).await {
                    Ok(removed) => {
                        if removed > 0 {
                            debug!(removed, "revocation cleanup");
                        }
                        if let Ok(size) = bounded("revocation.size", deadline, revocations.size()).await {
                            gauge!(REVOCATION_ENTRIES).set(size as f64);
                        }
                    },
                    Err(err) => warn!(task = "revocation_cleanup", error = %err, "cleanup failed, retrying next interval"),
                }
            }
        });

        let limiter = self.rate_limiter.clone();
        self.tasks.spawn_periodic("rate_limit_sweep", every, move || {
            let limiter = limiter.clone();
            async move {
                match bounded("rate_limit.sweep", deadline, limiter.sweep()).await {
                    Ok(stats) => debug!(
                        attempts = stats.attempts_removed,
                        lockouts = stats.lockouts_removed,
                        "rate limit sweep"
                    ),
                    Err(err) => warn!(task = "rate_limit_sweep", error = %err, "sweep failed, retrying next interval"),
                }
            }
        });

        let registry = self.registry.clone();
        self.tasks.spawn_periodic("device_session_cleanup", every, move || {
            let registry = registry.clone();
            async move {
                match bounded("registry.cleanup", deadline, registry.cleanup_expired()).await {
                    Ok(removed) if removed > 0 => debug!(removed, "device session cleanup"),
                    Ok(_) => {},
                    Err(err) => warn!(task = "device_session_cleanup", error = %err, "cleanup failed, retrying next interval"),
                }
            }
        });

        let sessions = self.sessions.clone();
        let clock = self.clock.clone();
        let user_locks = self.user_locks.clone();
        self.tasks.spawn_periodic("session_purge", every, move || {
            let sessions = sessions.clone();
            let now = clock.now();
            let user_locks = user_locks.clone();
            async move {
                match bounded("sessions.purge", deadline, sessions.purge_expired(now)).await {
                    Ok(removed) if removed > 0 => debug!(removed, "session purge"),
                    Ok(_) => {},
                    Err(err) => warn!(task = "session_purge", error = %err, "purge failed, retrying next interval"),
                }
                user_locks.prune();
            }
        });
    }
}
