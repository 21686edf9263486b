// ============================
// crates/guard-lib/src/devices/store.rs
// ============================
//! Storage contract for devices and device-bound sessions.

use super::model::{DeviceInfo, DeviceSession, RevokeOutcome};
use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sessionguard_common::{RevocationReason, SessionStatus};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[async_trait]
pub trait DeviceSessionStore: Send + Sync {
    async fn get_device(&self, device_id: &str) -> Result<Option<DeviceInfo>, StorageError>;

    /// Insert a device, or refresh the sighting of a known one.
    /// A known device keeps its `trusted` flag and `first_seen_at`.
    async fn put_device(&self, device: DeviceInfo) -> Result<(), StorageError>;

    /// Returns false when the device is unknown
    async fn set_device_trusted(&self, device_id: &str, trusted: bool) -> Result<bool, StorageError>;

    async fn insert_session(&self, session: DeviceSession) -> Result<(), StorageError>;

    async fn get_session(&self, session_id: &str) -> Result<Option<DeviceSession>, StorageError>;

    async fn sessions_for_device(&self, device_id: &str) -> Result<Vec<DeviceSession>, StorageError>;

    async fn sessions_for_user(&self, user_id: &str) -> Result<Vec<DeviceSession>, StorageError>;

    /// Atomically move a session to `revoked`, stamping time and reason
    async fn mark_revoked(
        &self,
        session_id: &str,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<RevokeOutcome, StorageError>;

    /// Bump `last_accessed_at` and the device's `last_active_at` if the session is active.
    /// Returns whether anything changed.
    async fn touch_session(&self, session_id: &str, at: DateTime<Utc>) -> Result<bool, StorageError>;

    /// Delete sessions that are expired at `now` or were revoked. Devices are kept.
    async fn purge_sessions(&self, now: DateTime<Utc>) -> Result<usize, StorageError>;
}

#[derive(Debug, Default)]
struct Tables {
    devices: HashMap<String, DeviceInfo>,
    sessions: HashMap<String, DeviceSession>,
    by_user: HashMap<String, HashSet<String>>,
    by_device: HashMap<String, HashSet<String>>,
}

impl Tables {
    fn collect(&self, ids: Option<&HashSet<String>>) -> Vec<DeviceSession> {
        let mut sessions: Vec<_> = ids
            .into_iter()
            .flatten()
            .filter_map(|id| self.sessions.get(id).cloned())
            .collect();
        sessions.sort_by(|a, b| a.session.created_at.cmp(&b.session.created_at));
        sessions
    }

    fn unindex(&mut self, session: &DeviceSession) {
        if let Some(ids) = self.by_user.get_mut(session.user_id()) {
            ids.remove(session.id());
            if ids.is_empty() {
                self.by_user.remove(session.user_id());
            }
        }
        if let Some(ids) = self.by_device.get_mut(session.device_id()) {
            ids.remove(session.id());
            if ids.is_empty() {
                self.by_device.remove(session.device_id());
            }
        }
    }
}

/// Single-lock in-memory registry tables with user and device indexes
#[derive(Debug, Clone, Default)]
pub struct MemoryDeviceSessionStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryDeviceSessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceSessionStore for MemoryDeviceSessionStore {
    async fn get_device(&self, device_id: &str) -> Result<Option<DeviceInfo>, StorageError> {
        Ok(self.tables.read().devices.get(device_id).cloned())
    }

    async fn put_device(&self, device: DeviceInfo) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        match tables.devices.get_mut(&device.device_id) {
            Some(known) => {
                known.ip_address = device.ip_address;
                known.user_agent = device.user_agent;
                known.last_active_at = known.last_active_at.max(device.last_active_at);
            },
            None => {
                tables.devices.insert(device.device_id.clone(), device);
            },
        }
        Ok(())
    }

    async fn set_device_trusted(&self, device_id: &str, trusted: bool) -> Result<bool, StorageError> {
        let mut tables = self.tables.write();
        match tables.devices.get_mut(device_id) {
            Some(device) => {
                device.trusted = trusted;
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn insert_session(&self, session: DeviceSession) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        if let Some(previous) = tables.sessions.remove(session.id()) {
            tables.unindex(&previous);
        }
        tables
            .by_user
            .entry(session.user_id().to_string())
            .or_default()
            .insert(session.id().to_string());
        tables
            .by_device
            .entry(session.device_id().to_string())
            .or_default()
            .insert(session.id().to_string());
        tables.sessions.insert(session.id().to_string(), session);
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<DeviceSession>, StorageError> {
        Ok(self.tables.read().sessions.get(session_id).cloned())
    }

    async fn sessions_for_device(&self, device_id: &str) -> Result<Vec<DeviceSession>, StorageError> {
        let tables = self.tables.read();
        Ok(tables.collect(tables.by_device.get(device_id)))
    }

    async fn sessions_for_user(&self, user_id: &str) -> Result<Vec<DeviceSession>, StorageError> {
        let tables = self.tables.read();
        Ok(tables.collect(tables.by_user.get(user_id)))
    }

    async fn mark_revoked(
        &self,
        session_id: &str,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<RevokeOutcome, StorageError> {
        let mut tables = self.tables.write();
        let Some(session) = tables.sessions.get_mut(session_id) else {
            return Ok(RevokeOutcome::NotFound);
        };
        if session.status == SessionStatus::Revoked {
            return Ok(RevokeOutcome::AlreadyRevoked);
        }
        session.status = SessionStatus::Revoked;
        session.revoked_at = Some(at);
        session.revoked_reason = Some(reason);
        Ok(RevokeOutcome::Revoked)
    }

    async fn touch_session(&self, session_id: &str, at: DateTime<Utc>) -> Result<bool, StorageError> {
        let mut tables = self.tables.write();
        let device_id = match tables.sessions.get_mut(session_id) {
            Some(session) if session.status == SessionStatus::Active => {
                session.session.last_accessed_at = at;
                session.device.last_active_at = at;
                session.device.device_id.clone()
            },
            _ => return Ok(false),
        };
        if let Some(device) = tables.devices.get_mut(&device_id) {
            device.last_active_at = at;
        }
        Ok(true)
    }

    async fn purge_sessions(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut tables = self.tables.write();
        let doomed: Vec<String> = tables
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Revoked || s.session.is_expired_at(now))
            .map(|s| s.id().to_string())
            .collect();
        for id in &doomed {
            if let Some(session) = tables.sessions.remove(id) {
                tables.unindex(&session);
            }
        }
        Ok(doomed.len())
    }
}
