use std::env;

use serial_test::serial;

use spectre::config::SpectreConfig;
use spectre::errors::LicenseError;
use spectre::tiers::Tier;

const VARS: &[&str] = &[
    "SPECTRE_SERVER_HOST",
    "SPECTRE_SERVER_PORT",
    "SPECTRE_DATABASE_TYPE",
    "SPECTRE_DATABASE_URL",
    "SPECTRE_LICENSE_KEY_PREFIX",
    "SPECTRE_MASTER_KEY",
    "SPECTRE_ADMIN_SECRET",
    "SPECTRE_TRIAL_CREDITS",
    "SPECTRE_TRIAL_DURATION_DAYS",
    "SPECTRE_LOGGING_ENABLED",
    "SPECTRE_LOG_LEVEL",
];

fn clear_env() {
    for var in VARS {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn load_uses_defaults_without_env() {
    clear_env();

    let config = SpectreConfig::load().expect("config should load");

    // config.toml overrides would change these, so only check stable values.
    assert!(config.server.port > 0);
    assert!(config.trial.credits >= 0);
    assert!(config.trial.duration_days > 0);
    assert!(config.license.master_key.is_none());
    assert!(config.admin.secret.is_none());
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn env_overrides_file_and_defaults() {
    clear_env();
    env::set_var("SPECTRE_SERVER_HOST", "0.0.0.0");
    env::set_var("SPECTRE_SERVER_PORT", "9443");
    env::set_var("SPECTRE_DATABASE_TYPE", "memory");
    env::set_var("SPECTRE_LICENSE_KEY_PREFIX", "ACME");
    env::set_var("SPECTRE_MASTER_KEY", "env-master");
    env::set_var("SPECTRE_ADMIN_SECRET", "env-admin");
    env::set_var("SPECTRE_TRIAL_CREDITS", "25");
    env::set_var("SPECTRE_TRIAL_DURATION_DAYS", "3");
    env::set_var("SPECTRE_LOG_LEVEL", "debug");

    let config = SpectreConfig::load().expect("config should load");
    clear_env();

    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 9443);
    assert_eq!(config.database.db_type, "memory");
    assert_eq!(config.license.key_prefix, "ACME");
    assert_eq!(
        config.license.master_key.as_ref().map(|s| s.expose()),
        Some("env-master")
    );
    assert_eq!(
        config.admin.secret.as_ref().map(|s| s.expose()),
        Some("env-admin")
    );
    assert_eq!(config.trial.credits, 25);
    assert_eq!(config.trial.duration_days, 3);
    assert_eq!(config.logging.level, "debug");
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn unparsable_values_are_rejected() {
    for (var, value) in [
        ("SPECTRE_SERVER_PORT", "not-a-port"),
        ("SPECTRE_SERVER_PORT", "70000"),
        ("SPECTRE_TRIAL_CREDITS", "lots"),
        ("SPECTRE_TRIAL_DURATION_DAYS", "7d"),
        ("SPECTRE_LOGGING_ENABLED", "yes"),
    ] {
        clear_env();
        env::set_var(var, value);

        let result = SpectreConfig::load();
        clear_env();

        match result {
            Err(LicenseError::ConfigError(message)) => {
                assert!(message.contains(var), "{var}: {message}")
            }
            other => panic!("{var}={value} should be rejected, got {other:?}"),
        }
    }
}

#[test]
#[serial]
fn non_sqlite_database_url_is_rejected() {
    clear_env();
    env::set_var("SPECTRE_DATABASE_URL", "postgres://localhost/spectre");

    let result = SpectreConfig::load();
    clear_env();

    assert!(matches!(result, Err(LicenseError::ConfigError(_))));
}

#[test]
#[serial]
fn sqlite_database_url_and_padded_numbers_are_accepted() {
    clear_env();
    env::set_var("SPECTRE_DATABASE_URL", "sqlite::memory:");
    env::set_var("SPECTRE_SERVER_PORT", " 9000 ");
    env::set_var("SPECTRE_LOGGING_ENABLED", "false");

    let config = SpectreConfig::load().expect("config should load");
    clear_env();

    assert_eq!(config.database.sqlite_url, "sqlite::memory:");
    assert_eq!(config.server.port, 9000);
    assert!(!config.logging.enabled);
}

#[test]
#[serial]
fn empty_values_count_as_unset() {
    clear_env();
    env::set_var("SPECTRE_SERVER_PORT", "");
    env::set_var("SPECTRE_ADMIN_SECRET", "");

    let config = SpectreConfig::load().expect("config should load");
    clear_env();

    assert!(config.server.port > 0);
    assert!(config.admin.secret.is_none());
}

#[test]
#[serial]
fn invalid_log_level_fails_validation() {
    clear_env();
    env::set_var("SPECTRE_LOG_LEVEL", "verbose");

    let config = SpectreConfig::load().expect("config should load");
    clear_env();

    assert!(config.validate().is_err());
}

#[test]
fn unlocked_tiers_deserialize_lowercase() {
    let config: SpectreConfig = serde_json::from_value(serde_json::json!({
        "license": { "unlocked_tiers": ["custom", "premium"] }
    }))
    .unwrap();

    assert_eq!(config.license.unlocked_tiers, vec![Tier::Custom, Tier::Premium]);
    assert_eq!(config.license.key_prefix, "SPK");
    assert_eq!(config.trial.credits, 100);
}
