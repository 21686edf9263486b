// ============================
// crates/guard-lib/src/auth/mod.rs
// ============================
//! Authentication: credentials, token signing and the orchestrating engine.

mod engine;
pub mod identity;
pub mod password;
pub mod token_generator;
pub mod tokens;

pub use engine::{AuthEngine, AuthSuccess, ClientInfo, EngineStorage};
pub use identity::{Credentials, IdentityProvider, StaticIdentityProvider};
pub use password::{hash_password, verify_password, HashCost};
pub use tokens::{AccessClaims, IssuedToken, TokenIssuer};
