// ============================
// guard-lib/src/config.rs
// ============================
//! Configuration management.
//!
//! [`Settings`] is the raw, serde-friendly shape loaded through figment.
//! [`Settings::validate`] turns it into an [`EngineConfig`] with parsed
//! durations, failing fast on anything the engine cannot run with.
use crate::error::ConfigError;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use jsonwebtoken::Algorithm;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;
use zeroize::Zeroizing;

/// Default config file looked up by [`Settings::load`]
pub const DEFAULT_CONFIG_FILE: &str = "sessionguard.toml";

/// Environment prefix; nested keys use `__` (e.g. `SESSIONGUARD_JWT__SECRET`)
pub const ENV_PREFIX: &str = "SESSIONGUARD_";

/// Minimum signing secret length in bytes
pub const MIN_SECRET_BYTES: usize = 32;

static TTL_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)([smhd])$").unwrap());

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Token signing
    pub jwt: JwtSettings,
    /// Check the revocation store on every validation
    pub enable_blacklist: bool,
    /// Consult the rate limiter before verifying credentials
    pub enable_rate_limit: bool,
    /// Slow down repeated failures with exponential backoff
    pub enable_progressive_delay: bool,
    /// Cap on concurrent sessions per user (unset = unlimited)
    pub max_concurrent_sessions: Option<u32>,
    /// Login attempt limits
    pub rate_limit: RateLimitSettings,
    /// Device session caps
    pub devices: DeviceSettings,
    /// Background sweeps and storage deadlines
    pub maintenance: MaintenanceSettings,
}

/// Token signing settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtSettings {
    /// HMAC secret, at least 32 bytes
    pub secret: Option<String>,
    /// Algorithm name, e.g. `HS256`
    pub algorithm: String,
    pub issuer: String,
    pub audience: String,
    /// Access token lifetime, e.g. `15m`
    pub access_token_ttl: String,
    /// Refresh token lifetime, e.g. `7d`
    pub refresh_token_ttl: String,
}

impl fmt::Debug for JwtSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtSettings")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .finish()
    }
}

/// Sliding-window login limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub window_ms: u64,
    pub max_attempts: u32,
    pub lockout_duration_ms: u64,
    pub reset_on_success: bool,
}

/// Per-device and per-user session caps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub max_devices_per_user: u32,
    pub max_sessions_per_device: u32,
    pub require_verification_for_new_device: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceSettings {
    /// Interval of every background sweep
    pub cleanup_interval_secs: u64,
    /// Deadline for a single storage call made by the orchestrator
    pub storage_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            jwt: JwtSettings::default(),
            enable_blacklist: true,
            enable_rate_limit: true,
            enable_progressive_delay: false,
            max_concurrent_sessions: None,
            rate_limit: RateLimitSettings::default(),
            devices: DeviceSettings::default(),
            maintenance: MaintenanceSettings::default(),
        }
    }
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            secret: None,
            algorithm: "HS256".to_string(),
            issuer: "sessionguard".to_string(),
            audience: "sessionguard-clients".to_string(),
            access_token_ttl: "15m".to_string(),
            refresh_token_ttl: "7d".to_string(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window_ms: 15 * 60 * 1000,
            max_attempts: 5,
            lockout_duration_ms: 15 * 60 * 1000,
            reset_on_success: true,
        }
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            max_devices_per_user: 5,
            max_sessions_per_device: 3,
            require_verification_for_new_device: false,
        }
    }
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: 60,
            storage_timeout_ms: 5_000,
        }
    }
}

impl Settings {
    /// Load settings from defaults, `sessionguard.toml` and the environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::figment(Toml::file(DEFAULT_CONFIG_FILE))
    }

    /// Load settings from an explicit TOML file, then the environment
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::figment(Toml::file(path.as_ref()))
    }

    fn figment(file: figment::providers::Data<Toml>) -> Result<Self, ConfigError> {
        let settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(settings)
    }

    /// Check every setting and resolve durations.
    pub fn validate(&self) -> Result<EngineConfig, ConfigError> {
        let secret = match self.jwt.secret.as_deref() {
            None | Some("") => return Err(ConfigError::MissingSecret),
            Some(secret) => Zeroizing::new(secret.as_bytes().to_vec()),
        };
        if secret.len() < MIN_SECRET_BYTES {
            return Err(ConfigError::SecretTooShort {
                min: MIN_SECRET_BYTES,
                actual: secret.len(),
            });
        }

        let algorithm = Algorithm::from_str(&self.jwt.algorithm)
            .map_err(|_| ConfigError::InvalidAlgorithm(self.jwt.algorithm.clone()))?;
        let access_token_ttl = parse_ttl("jwt.access_token_ttl", &self.jwt.access_token_ttl)?;
        let refresh_token_ttl = parse_ttl("jwt.refresh_token_ttl", &self.jwt.refresh_token_ttl)?;

        if self.max_concurrent_sessions == Some(0) {
            return Err(ConfigError::InvalidLimit {
                field: "max_concurrent_sessions",
                reason: "must be at least 1 when set",
            });
        }
        if self.rate_limit.max_attempts == 0 {
            return Err(ConfigError::InvalidLimit {
                field: "rate_limit.max_attempts",
                reason: "must be at least 1",
            });
        }
        if self.rate_limit.window_ms == 0 {
            return Err(ConfigError::InvalidLimit {
                field: "rate_limit.window_ms",
                reason: "must be positive",
            });
        }
        if self.devices.max_devices_per_user == 0 {
            return Err(ConfigError::InvalidLimit {
                field: "devices.max_devices_per_user",
                reason: "must be at least 1",
            });
        }
        if self.devices.max_sessions_per_device == 0 {
            return Err(ConfigError::InvalidLimit {
                field: "devices.max_sessions_per_device",
                reason: "must be at least 1",
            });
        }
        if self.maintenance.cleanup_interval_secs == 0 {
            return Err(ConfigError::InvalidLimit {
                field: "maintenance.cleanup_interval_secs",
                reason: "must be positive",
            });
        }
        if self.maintenance.storage_timeout_ms == 0 {
            return Err(ConfigError::InvalidLimit {
                field: "maintenance.storage_timeout_ms",
                reason: "must be positive",
            });
        }

        Ok(EngineConfig {
            token: TokenConfig {
                secret,
                algorithm,
                issuer: self.jwt.issuer.clone(),
                audience: self.jwt.audience.clone(),
                access_token_ttl,
                refresh_token_ttl,
            },
            enable_blacklist: self.enable_blacklist,
            enable_rate_limit: self.enable_rate_limit,
            max_concurrent_sessions: self.max_concurrent_sessions,
            rate_limit: RateLimitConfig {
                window: Duration::from_millis(self.rate_limit.window_ms),
                max_attempts: self.rate_limit.max_attempts,
                lockout_duration: Duration::from_millis(self.rate_limit.lockout_duration_ms),
                reset_on_success: self.rate_limit.reset_on_success,
                progressive_delay: self.enable_progressive_delay,
            },
            registry: RegistryConfig {
                max_devices_per_user: self.devices.max_devices_per_user as usize,
                max_sessions_per_device: self.devices.max_sessions_per_device as usize,
                require_verification_for_new_device: self
                    .devices
                    .require_verification_for_new_device,
            },
            cleanup_interval: Duration::from_secs(self.maintenance.cleanup_interval_secs),
            storage_timeout: Duration::from_millis(self.maintenance.storage_timeout_ms),
        })
    }
}

/// Parse a duration string of the form `<digits><s|m|h|d>`
pub fn parse_ttl(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidTtl {
        field,
        value: value.to_string(),
    };
    let caps = TTL_REGEX.captures(value).ok_or_else(invalid)?;
    let amount: u64 = caps[1].parse().map_err(|_| invalid())?;
    let unit = match &caps[2] {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => 24 * 60 * 60,
    };
    let secs = amount.checked_mul(unit).ok_or_else(invalid)?;
    if secs == 0 {
        return Err(invalid());
    }
    Ok(Duration::from_secs(secs))
}

/// Validated engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub token: TokenConfig,
    pub enable_blacklist: bool,
    pub enable_rate_limit: bool,
    pub max_concurrent_sessions: Option<u32>,
    pub rate_limit: RateLimitConfig,
    pub registry: RegistryConfig,
    pub cleanup_interval: Duration,
    pub storage_timeout: Duration,
}

#[derive(Clone)]
pub struct TokenConfig {
    pub secret: Zeroizing<Vec<u8>>,
    pub algorithm: Algorithm,
    pub issuer: String,
    pub audience: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .finish()
    }
}

/// Rate limiter tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Length of the sliding window
    pub window: Duration,
    /// Failed attempts allowed inside one window
    pub max_attempts: u32,
    /// How long a lockout lasts
    pub lockout_duration: Duration,
    /// Clear history and lockout on a successful attempt
    pub reset_on_success: bool,
    /// Whether [`crate::rate_limit::RateLimiter::progressive_delay`] returns non-zero
    pub progressive_delay: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(15 * 60),
            max_attempts: 5,
            lockout_duration: Duration::from_secs(15 * 60),
            reset_on_success: true,
            progressive_delay: false,
        }
    }
}

/// Device session registry caps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    pub max_devices_per_user: usize,
    pub max_sessions_per_device: usize,
    pub require_verification_for_new_device: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_devices_per_user: 5,
            max_sessions_per_device: 3,
            require_verification_for_new_device: false,
        }
    }
}

#[cfg(test)]
mod config_tests;
