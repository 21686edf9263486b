// ============================
// crates/guard-lib/src/auth/token_generator.rs
// ============================
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
/** Opaque token and identifier generation
Refresh tokens are random bytes from the OS; they carry no claims and are
only meaningful as keys into the refresh-token table. */
use rand::{rngs::OsRng, RngCore};
use uuid::Uuid;

/// Refresh token size in bytes (32 bytes = 256 bits of entropy)
const REFRESH_TOKEN_BYTES: usize = 32;

/** Generate an opaque refresh token
# Returns
A base64 URL-safe encoded string without padding */
pub fn generate_refresh_token() -> String {
    generate_secure_token_with_size(REFRESH_TOKEN_BYTES)
}

/** Generate a cryptographically secure random token with specified size
# Arguments
* `bytes` - The size of the random token in bytes */
pub fn generate_secure_token_with_size(bytes: usize) -> String {
    let mut buffer = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buffer);
    URL_SAFE_NO_PAD.encode(buffer)
}

/// New session id (also the access token's `jti`)
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}
