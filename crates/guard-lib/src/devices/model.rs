use crate::session::Session;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sessionguard_common::{DeviceType, RevocationReason, SessionStatus};

/// A recognised client device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Digest of the fingerprint, or of user agent + IP when no fingerprint was sent
    pub device_id: String,
    pub device_type: DeviceType,
    pub user_agent: String,
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub trusted: bool,
}

/// A session bound to the device it was created from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSession {
    #[serde(flatten)]
    pub session: Session,
    pub device: DeviceInfo,
    pub status: SessionStatus,
    /// Set when the session was created on a device never seen before
    /// while new-device verification is required
    #[serde(default)]
    pub verification_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_reason: Option<RevocationReason>,
}

impl DeviceSession {
    pub fn id(&self) -> &str {
        &self.session.id
    }

    pub fn user_id(&self) -> &str {
        &self.session.user_id
    }

    pub fn device_id(&self) -> &str {
        &self.device.device_id
    }

    /// Active and not yet expired. A session is expired from the instant `expires_at` is reached.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Active && !self.session.is_expired_at(now)
    }
}

/// Result of a store-level revoke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeOutcome {
    NotFound,
    AlreadyRevoked,
    Revoked,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sessionguard_common::DeviceType;

    fn sample(now: DateTime<Utc>) -> DeviceSession {
        DeviceSession {
            session: Session {
                id: "s-1".into(),
                user_id: "u-1".into(),
                access_token: "at".into(),
                refresh_token: None,
                created_at: now,
                expires_at: now + Duration::days(7),
                last_accessed_at: now,
                ip_address: "10.0.0.1".into(),
                user_agent: "curl/8.4.0".into(),
                fingerprint: None,
                metadata: None,
            },
            device: DeviceInfo {
                device_id: "d-1".into(),
                device_type: DeviceType::Unknown,
                user_agent: "curl/8.4.0".into(),
                ip_address: "10.0.0.1".into(),
                fingerprint: None,
                os: None,
                browser: None,
                first_seen_at: now,
                last_active_at: now,
                trusted: false,
            },
            status: SessionStatus::Revoked,
            verification_required: false,
            revoked_at: Some(now),
            revoked_reason: Some(RevocationReason::Admin),
        }
    }

    #[test]
    fn test_device_session_serializes_flat() {
        let now = Utc::now();
        let session = sample(now);

        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["id"], "s-1");
        assert_eq!(json["user_id"], "u-1");
        assert_eq!(json["device"]["device_id"], "d-1");
        assert!(json.get("refresh_token").is_none());

        let back: DeviceSession = serde_json::from_value(json).unwrap();
        assert_eq!(back, session);
        assert!(!back.is_active_at(now));
    }

    #[test]
    fn test_expiry_boundary_matches_session() {
        let now = Utc::now();
        let mut session = sample(now);
        session.status = SessionStatus::Active;
        session.revoked_at = None;
        session.revoked_reason = None;
        session.session.expires_at = now;

        assert!(session.session.is_expired_at(now));
        assert!(!session.is_active_at(now));
        assert!(session.is_active_at(now - Duration::seconds(1)));
    }
}
