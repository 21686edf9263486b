//! Shared setup for engine integration tests.
//!
//! Builds an [`AuthEngine`] over in-memory storage with a manual clock and a
//! couple of known users. Password hashing uses a deliberately cheap scrypt
//! cost so the suite stays fast.

#![allow(dead_code)]

use guard_lib::auth::{HashCost, TokenIssuer};
use guard_lib::{AuthEngine, ClientInfo, Credentials, EngineStorage, ManualClock, Settings, StaticIdentityProvider, User};
use std::sync::Arc;

pub const SECRET: &str = "integration-test-secret-with-plenty-of-bytes";
pub const ALICE_PASSWORD: &str = "alice-correct-horse";
pub const BOB_PASSWORD: &str = "bob-battery-staple";
pub const CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const CHEAP: HashCost = HashCost { log_n: 4, r: 8, p: 1 };

pub struct TestEnv {
    pub engine: AuthEngine,
    pub clock: Arc<ManualClock>,
    pub storage: EngineStorage,
    pub settings: Settings,
}

impl TestEnv {
    /// Signer sharing the engine's key, for crafting tokens by hand
    pub fn issuer(&self) -> TokenIssuer {
        TokenIssuer::new(&self.settings.validate().unwrap().token)
    }
}

/// Default settings with a valid signing secret
pub fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.jwt.secret = Some(SECRET.to_string());
    settings
}

pub fn identity() -> Arc<StaticIdentityProvider> {
    let identity = StaticIdentityProvider::new(CHEAP).unwrap();
    identity
        .add_user(User::new("u-alice", "alice"), ALICE_PASSWORD)
        .unwrap();
    identity
        .add_user(User::new("u-bob", "bob"), BOB_PASSWORD)
        .unwrap();
    Arc::new(identity)
}

/// Must be called from inside a Tokio runtime
pub fn setup() -> TestEnv {
    setup_with(settings())
}

pub fn setup_with(settings: Settings) -> TestEnv {
    let clock = Arc::new(ManualClock::starting_now());
    let storage = EngineStorage::in_memory(clock.clone());
    setup_with_storage(settings, clock, storage)
}

/// Engine over caller-supplied backends sharing `clock`
pub fn setup_with_storage(settings: Settings, clock: Arc<ManualClock>, storage: EngineStorage) -> TestEnv {
    let engine = AuthEngine::new(&settings, identity(), storage.clone(), clock.clone()).unwrap();
    TestEnv {
        engine,
        clock,
        storage,
        settings,
    }
}

pub fn alice() -> Credentials {
    Credentials::new("alice", ALICE_PASSWORD)
}

pub fn client(ip: &str, fingerprint: &str) -> ClientInfo {
    ClientInfo::new(ip, CHROME_UA).with_fingerprint(fingerprint)
}
