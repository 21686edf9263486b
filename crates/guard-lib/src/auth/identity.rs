// ============================
// crates/guard-lib/src/auth/identity.rs
// ============================
//! Credential verification collaborator.
use super::password::{self, HashCost};
use super::token_generator::generate_refresh_token;
use async_trait::async_trait;
use dashmap::DashMap;
use sessionguard_common::User;
use std::fmt;
use zeroize::Zeroizing;

/// Username/password pair presented at login
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: Zeroizing<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Resolves credentials to a user.
///
/// `Ok(None)` means the credentials are wrong; `Err` means the provider itself
/// failed and the attempt could not be judged.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify_credentials(&self, credentials: &Credentials) -> anyhow::Result<Option<User>>;
}

struct StoredUser {
    user: User,
    password_hash: String,
}

/// In-memory user table with scrypt password hashes
pub struct StaticIdentityProvider {
    users: DashMap<String, StoredUser>,
    cost: HashCost,
    /// Verified against when the username is unknown so both paths cost the same
    dummy_hash: String,
}

impl StaticIdentityProvider {
    pub fn new(cost: HashCost) -> anyhow::Result<Self> {
        Ok(Self {
            users: DashMap::new(),
            cost,
            dummy_hash: password::hash_password(&generate_refresh_token(), cost)?,
        })
    }

    /// Add or replace a user, hashing `password` with the provider's cost
    pub fn add_user(&self, user: User, password: &str) -> anyhow::Result<()> {
        let password_hash = password::hash_password(password, self.cost)?;
        self.users.insert(
            user.username.clone(),
            StoredUser {
                user,
                password_hash,
            },
        );
        Ok(())
    }

    pub fn remove_user(&self, username: &str) -> bool {
        self.users.remove(username).is_some()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn verify_credentials(&self, credentials: &Credentials) -> anyhow::Result<Option<User>> {
        let (hash, user) = match self.users.get(&credentials.username) {
            Some(stored) => (stored.password_hash.clone(), Some(stored.user.clone())),
            None => (self.dummy_hash.clone(), None),
        };

        let password = credentials.password.clone();
        let matches =
            tokio::task::spawn_blocking(move || password::verify_password(&hash, &password)).await?;

        Ok(user.filter(|_| matches))
    }
}
