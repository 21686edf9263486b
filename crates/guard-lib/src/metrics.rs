// ==============
// crates/guard-lib/src/metrics.rs

//! Central place for metric keys
pub const AUTH_SUCCESS: &str = "auth.success";
pub const AUTH_FAILURE: &str = "auth.failure";
pub const AUTH_RATE_LIMITED: &str = "auth.rate_limited";
pub const LOCKOUT_ENGAGED: &str = "rate_limit.lockout";
pub const TOKEN_REVOKED: &str = "token.revoked";
pub const TOKEN_REJECTED: &str = "token.rejected";
pub const TOKEN_REFRESHED: &str = "token.refreshed";
pub const SESSION_CREATED: &str = "session.created";
pub const SESSION_EVICTED: &str = "session.evicted";
pub const SESSION_EXPIRED: &str = "session.expired";
pub const REVOCATION_ENTRIES: &str = "revocation.entries";
