// ============================
// crates/guard-lib/src/lib.rs
// ============================
//! Token lifecycle and session security engine.
//!
//! Four components, leaf first:
//! - [`revocation`]: revoked token identifiers with per-entry expiry
//! - [`rate_limit`]: sliding-window attempt counting with lockout
//! - [`devices`]: device recognition and capped device-bound sessions
//! - [`auth`]: the [`AuthEngine`] that composes them
//!
//! Every component reads time from one injected [`Clock`] and talks to
//! storage through an async trait with an in-memory reference backend.

pub mod auth;
pub mod clock;
pub mod config;
pub mod devices;
pub mod error;
pub mod locks;
pub mod metrics;
pub mod rate_limit;
pub mod revocation;
pub mod session;
pub mod tasks;

pub use auth::{AuthEngine, AuthSuccess, ClientInfo, Credentials, EngineStorage, IdentityProvider, StaticIdentityProvider};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, Settings};
pub use error::{AuthFailure, ConfigError, StorageError, TokenError};
pub use session::Session;
pub use sessionguard_common::{AttemptKind, DeviceType, Metadata, MetadataValue, RevocationReason, SessionStatus, User};
