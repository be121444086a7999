//! Configuration system for Spectre.
//!
//! Configuration is loaded from multiple sources with the following precedence:
//! 1. Environment variables (highest priority)
//! 2. `config.toml` file
//! 3. Default values (lowest priority)
//!
//! # Environment Variables
//!
//! - `SPECTRE_SERVER_HOST` - Server bind address
//! - `SPECTRE_SERVER_PORT` - Server port
//! - `SPECTRE_DATABASE_TYPE` - Store backend: `sqlite` or `memory`
//! - `SPECTRE_DATABASE_URL` - SQLite connection URL
//! - `SPECTRE_LICENSE_KEY_PREFIX` - Prefix for generated keys
//! - `SPECTRE_MASTER_KEY` - Master key that verifies as the `master` tier
//! - `SPECTRE_ADMIN_SECRET` - Shared secret for the admin surface
//! - `SPECTRE_TRIAL_CREDITS` - Credits granted to a trial key
//! - `SPECTRE_TRIAL_DURATION_DAYS` - Lifetime of a trial key in days
//! - `SPECTRE_LOGGING_ENABLED` - Enable the tracing subscriber
//! - `SPECTRE_LOG_LEVEL` - Log level (trace, debug, info, warn, error)
//!
//! A variable that is set but cannot be parsed fails [`SpectreConfig::load`]
//! with [`LicenseError::ConfigError`] naming the variable.

use config::Config;
use serde::Deserialize;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::errors::{LicenseError, LicenseResult};
use crate::license_key::LicenseKeyConfig;
use crate::tiers::Tier;

/// Global configuration singleton.
static CONFIG: OnceLock<SpectreConfig> = OnceLock::new();

/// A configured secret. Never printed by `Debug`.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([redacted])")
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SpectreConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub license: LicenseConfig,
    pub trial: TrialConfig,
    pub admin: AdminConfig,
    pub logging: LoggingConfig,
    pub jobs: JobsConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Store type: "sqlite" or "memory"
    pub db_type: String,
    /// SQLite connection URL
    pub sqlite_url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: "sqlite".to_string(),
            sqlite_url: "sqlite://spectre.db?mode=rwc".to_string(),
        }
    }
}

/// License key and verification configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LicenseConfig {
    /// Prefix for generated license keys (e.g., "SPK" -> "SPK-XXXXX-...")
    pub key_prefix: String,
    /// Number of segments in the license key
    pub key_segments: u8,
    /// Characters per segment
    pub key_segment_length: u8,
    /// Out-of-band master key. Verifies as the virtual `master` tier.
    pub master_key: Option<Secret>,
    /// Tiers that never lock to a machine
    pub unlocked_tiers: Vec<Tier>,
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            key_prefix: "SPK".to_string(),
            key_segments: 5,
            key_segment_length: 5,
            master_key: None,
            unlocked_tiers: Vec::new(),
        }
    }
}

/// Trial issuance configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrialConfig {
    /// Credits granted to a new trial key
    pub credits: i64,
    /// Days until a trial key expires
    pub duration_days: i64,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            credits: 100,
            duration_days: 7,
        }
    }
}

/// Admin surface configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Shared admin secret. When unset, every admin call is unauthorized.
    pub secret: Option<Secret>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Enable logging
    pub enabled: bool,
    /// Log level: trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
        }
    }
}

/// Background job configuration (used with the `background-jobs` feature).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Cron expression for the expired-license scan (default: hourly)
    pub expired_scan_cron: String,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            expired_scan_cron: "0 0 * * * *".to_string(),
        }
    }
}

fn config_err(e: config::ConfigError) -> LicenseError {
    LicenseError::ConfigError(e.to_string())
}

/// Read a string override. An empty value counts as unset.
fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

/// Read and parse an override, failing when it is set but unparsable.
fn env_parsed<T>(name: &str) -> LicenseResult<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    env_string(name)
        .map(|value| {
            value.trim().parse::<T>().map_err(|e| {
                LicenseError::ConfigError(format!("{name}={value:?} is invalid: {e}"))
            })
        })
        .transpose()
}

fn env_sqlite_url(name: &str) -> LicenseResult<Option<String>> {
    match env_string(name) {
        Some(url) if !url.starts_with("sqlite:") => Err(LicenseError::ConfigError(format!(
            "{name} must be a sqlite: URL, got {url:?}"
        ))),
        url => Ok(url),
    }
}

impl SpectreConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. `config.toml` file (optional)
    /// 3. Environment variables
    ///
    /// The result is not validated; see [`SpectreConfig::validate`].
    pub fn load() -> LicenseResult<Self> {
        let builder = Config::builder()
            .set_default("server.host", "127.0.0.1")
            .map_err(config_err)?
            .set_default("server.port", 8080)
            .map_err(config_err)?
            .set_default("database.db_type", "sqlite")
            .map_err(config_err)?
            .set_default("database.sqlite_url", "sqlite://spectre.db?mode=rwc")
            .map_err(config_err)?
            .set_default("license.key_prefix", "SPK")
            .map_err(config_err)?
            .set_default("license.key_segments", 5)
            .map_err(config_err)?
            .set_default("license.key_segment_length", 5)
            .map_err(config_err)?
            .set_default("license.unlocked_tiers", Vec::<String>::new())
            .map_err(config_err)?
            .set_default("trial.credits", 100)
            .map_err(config_err)?
            .set_default("trial.duration_days", 7)
            .map_err(config_err)?
            .set_default("logging.enabled", true)
            .map_err(config_err)?
            .set_default("logging.level", "info")
            .map_err(config_err)?
            .set_default("jobs.expired_scan_cron", "0 0 * * * *")
            .map_err(config_err)?
            // Load from config.toml (optional)
            .add_source(config::File::with_name("config").required(false))
            // Override with environment variables
            .set_override_option("server.host", env_string("SPECTRE_SERVER_HOST"))
            .map_err(config_err)?
            .set_override_option(
                "server.port",
                env_parsed::<u16>("SPECTRE_SERVER_PORT")?.map(i64::from),
            )
            .map_err(config_err)?
            .set_override_option("database.db_type", env_string("SPECTRE_DATABASE_TYPE"))
            .map_err(config_err)?
            .set_override_option(
                "database.sqlite_url",
                env_sqlite_url("SPECTRE_DATABASE_URL")?,
            )
            .map_err(config_err)?
            .set_override_option(
                "license.key_prefix",
                env_string("SPECTRE_LICENSE_KEY_PREFIX"),
            )
            .map_err(config_err)?
            .set_override_option("license.master_key", env_string("SPECTRE_MASTER_KEY"))
            .map_err(config_err)?
            .set_override_option("admin.secret", env_string("SPECTRE_ADMIN_SECRET"))
            .map_err(config_err)?
            .set_override_option(
                "trial.credits",
                env_parsed::<i64>("SPECTRE_TRIAL_CREDITS")?,
            )
            .map_err(config_err)?
            .set_override_option(
                "trial.duration_days",
                env_parsed::<i64>("SPECTRE_TRIAL_DURATION_DAYS")?,
            )
            .map_err(config_err)?
            .set_override_option(
                "logging.enabled",
                env_parsed::<bool>("SPECTRE_LOGGING_ENABLED")?,
            )
            .map_err(config_err)?
            .set_override_option("logging.level", env_string("SPECTRE_LOG_LEVEL"))
            .map_err(config_err)?;

        let settings = builder
            .build()
            .map_err(|e| LicenseError::ConfigError(format!("failed to build config: {e}")))?;

        settings
            .try_deserialize()
            .map_err(|e| LicenseError::ConfigError(format!("failed to deserialize config: {e}")))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> LicenseResult<()> {
        if self.server.port == 0 {
            return Err(LicenseError::ConfigError(
                "server.port must be greater than 0".to_string(),
            ));
        }

        match self.database.db_type.as_str() {
            "sqlite" | "memory" => {}
            other => {
                return Err(LicenseError::ConfigError(format!(
                    "database.db_type must be 'sqlite' or 'memory', got '{other}'"
                )));
            }
        }

        LicenseKeyConfig::from(&self.license).validate()?;

        if self
            .license
            .unlocked_tiers
            .iter()
            .any(|tier| !tier.is_persistable())
        {
            return Err(LicenseError::ConfigError(
                "license.unlocked_tiers cannot list the master tier".to_string(),
            ));
        }

        if matches!(&self.license.master_key, Some(key) if key.expose().trim().is_empty()) {
            return Err(LicenseError::ConfigError(
                "license.master_key cannot be empty when set".to_string(),
            ));
        }

        if matches!(&self.admin.secret, Some(secret) if secret.expose().trim().is_empty()) {
            return Err(LicenseError::ConfigError(
                "admin.secret cannot be empty when set".to_string(),
            ));
        }

        if self.trial.credits < 0 {
            return Err(LicenseError::ConfigError(
                "trial.credits cannot be negative".to_string(),
            ));
        }
        if self.trial.duration_days <= 0 {
            return Err(LicenseError::ConfigError(
                "trial.duration_days must be greater than 0".to_string(),
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(LicenseError::ConfigError(format!(
                    "logging.level must be one of: trace, debug, info, warn, error. Got '{other}'"
                )));
            }
        }

        Ok(())
    }
}

/// Get the global configuration.
///
/// This loads the configuration on first access and caches it.
/// Returns an error if configuration loading or validation fails.
pub fn get_config() -> LicenseResult<&'static SpectreConfig> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }

    let config = SpectreConfig::load()?;
    config.validate()?;

    // Another thread may have won the race; either value is valid.
    Ok(CONFIG.get_or_init(|| config))
}

/// Initialize configuration explicitly.
///
/// Call this early in your application to catch configuration errors.
pub fn init_config() -> LicenseResult<&'static SpectreConfig> {
    get_config()
}
