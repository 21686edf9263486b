use super::*;
use std::io::Write;

const SECRET: &str = "0123456789abcdef0123456789abcdef";

fn valid_settings() -> Settings {
    let mut settings = Settings::default();
    settings.jwt.secret = Some(SECRET.to_string());
    settings
}

#[test]
fn test_settings_validation() {
    // Test valid settings
    let config = valid_settings().validate().unwrap();
    assert_eq!(config.token.access_token_ttl, Duration::from_secs(15 * 60));
    assert_eq!(config.token.refresh_token_ttl, Duration::from_secs(7 * 24 * 60 * 60));
    assert_eq!(config.token.algorithm, Algorithm::HS256);
    assert_eq!(config.rate_limit.max_attempts, 5);
    assert_eq!(config.registry.max_sessions_per_device, 3);

    // Test missing secret
    let mut invalid = valid_settings();
    invalid.jwt.secret = None;
    assert!(matches!(invalid.validate(), Err(ConfigError::MissingSecret)));

    // Test short secret
    let mut invalid = valid_settings();
    invalid.jwt.secret = Some("too-short".to_string());
    assert!(matches!(
        invalid.validate(),
        Err(ConfigError::SecretTooShort { min: 32, actual: 9 })
    ));

    // Test unparseable TTL
    let mut invalid = valid_settings();
    invalid.jwt.refresh_token_ttl = "7 days".to_string();
    assert!(matches!(
        invalid.validate(),
        Err(ConfigError::InvalidTtl { field: "jwt.refresh_token_ttl", .. })
    ));

    // Test unknown algorithm
    let mut invalid = valid_settings();
    invalid.jwt.algorithm = "HS999".to_string();
    assert!(matches!(invalid.validate(), Err(ConfigError::InvalidAlgorithm(_))));

    // Test zero limits
    let mut invalid = valid_settings();
    invalid.devices.max_sessions_per_device = 0;
    assert!(matches!(invalid.validate(), Err(ConfigError::InvalidLimit { .. })));

    let mut invalid = valid_settings();
    invalid.max_concurrent_sessions = Some(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_parse_ttl() {
    assert_eq!(parse_ttl("ttl", "30s").unwrap(), Duration::from_secs(30));
    assert_eq!(parse_ttl("ttl", "15m").unwrap(), Duration::from_secs(900));
    assert_eq!(parse_ttl("ttl", "2h").unwrap(), Duration::from_secs(7200));
    assert_eq!(parse_ttl("ttl", "7d").unwrap(), Duration::from_secs(604_800));

    for bad in ["", "15", "m", "1.5h", "-1m", "15M", " 15m", "15m ", "0s", "10w"] {
        assert!(parse_ttl("ttl", bad).is_err(), "{bad:?} should be rejected");
    }
}

#[test]
fn test_secret_is_redacted_from_debug() {
    let settings = valid_settings();
    let rendered = format!("{settings:?}");
    assert!(!rendered.contains(SECRET));
    assert!(rendered.contains("<redacted>"));

    let config = settings.validate().unwrap();
    assert!(!format!("{config:?}").contains(SECRET));
}

#[test]
fn test_load_settings_from_file_and_env() {
    figment::Jail::expect_with(|jail| {
        jail.create_file(
            DEFAULT_CONFIG_FILE,
            r#"
            enable_progressive_delay = true
            max_concurrent_sessions = 4

            [jwt]
            secret = "0123456789abcdef0123456789abcdef"
            access_token_ttl = "5m"

            [rate_limit]
            max_attempts = 3
            "#,
        )?;
        jail.set_env("SESSIONGUARD_JWT__ISSUER", "auth.example.test");
        jail.set_env("SESSIONGUARD_RATE_LIMIT__MAX_ATTEMPTS", "7");

        let settings = Settings::load().expect("settings should load");
        assert!(settings.enable_progressive_delay);
        assert_eq!(settings.max_concurrent_sessions, Some(4));
        assert_eq!(settings.jwt.access_token_ttl, "5m");
        assert_eq!(settings.jwt.issuer, "auth.example.test");
        // Environment variable takes precedence
        assert_eq!(settings.rate_limit.max_attempts, 7);
        // Untouched sections keep their defaults
        assert_eq!(settings.devices.max_devices_per_user, 5);

        let config = settings.validate().expect("settings should validate");
        assert!(config.rate_limit.progressive_delay);
        Ok(())
    });
}

#[test]
fn test_load_settings_from_explicit_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
        enable_blacklist = false

        [devices]
        max_sessions_per_device = 2
        require_verification_for_new_device = true
        "#
    )
    .unwrap();

    let settings = Settings::load_from(file.path()).unwrap();
    assert!(!settings.enable_blacklist);
    assert_eq!(settings.devices.max_sessions_per_device, 2);
    assert!(settings.devices.require_verification_for_new_device);
    assert_eq!(settings.jwt.refresh_token_ttl, "7d");
}
