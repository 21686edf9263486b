// ============================
// crates/guard-lib/src/auth/tokens.rs
// ============================
//! Access-token signing and verification.
//!
//! Tokens are HMAC-signed JWTs whose `jti` is the session id. Expiry and
//! not-before are checked against the engine clock rather than the system
//! clock, so the library's own time validation is switched off.

use crate::clock::to_chrono;
use crate::config::TokenConfig;
use crate::error::TokenError;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// `token_type` carried by access tokens
pub const ACCESS_TOKEN_TYPE: &str = "access";

/// Claims of an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// User id
    pub sub: String,
    /// Session id, also the revocation key
    pub jti: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub token_type: String,
}

/// A freshly signed token
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    header: Header,
    validation: Validation,
    issuer: String,
    audience: String,
    access_token_ttl: Duration,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("algorithm", &self.header.alg)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_token_ttl", &self.access_token_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(config: &TokenConfig) -> Self {
        let mut validation = Validation::new(config.algorithm);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_audience(&[config.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "sub", "iss", "aud"]);

        Self {
            encoding: EncodingKey::from_secret(&config.secret),
            decoding: DecodingKey::from_secret(&config.secret),
            header: Header::new(config.algorithm),
            validation,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_token_ttl: config.access_token_ttl,
        }
    }

    pub fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    /// Sign an access token with the configured lifetime
    pub fn issue_access_token(
        &self,
        user_id: &str,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        self.issue(user_id, session_id, now, self.access_token_ttl)
    }

    /// Sign an access token valid from `issued_at` for `ttl`
    pub fn issue(
        &self,
        user_id: &str,
        session_id: &str,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError> {
        let expires_at = issued_at + to_chrono(ttl);
        let claims = AccessClaims {
            sub: user_id.to_string(),
            jti: session_id.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: issued_at.timestamp(),
            nbf: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            token_type: ACCESS_TOKEN_TYPE.to_string(),
        };
        Ok(IssuedToken {
            token: self.sign(&claims)?,
            token_id: claims.jti,
            expires_at,
        })
    }

    pub fn sign(&self, claims: &AccessClaims) -> Result<String, TokenError> {
        encode(&self.header, claims, &self.encoding).map_err(TokenError::Signing)
    }

    /// Check signature, issuer, audience and type, then expiry against `now`.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, TokenError> {
        let claims = decode::<AccessClaims>(token, &self.decoding, &self.validation)
            .map_err(TokenError::Invalid)?
            .claims;

        if claims.token_type != ACCESS_TOKEN_TYPE {
            return Err(TokenError::Invalid(ErrorKind::InvalidToken.into()));
        }
        let now = now.timestamp();
        if now < claims.nbf {
            return Err(TokenError::NotYetValid);
        }
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}
