//! License store: transactional persistence of license records.
//!
//! The engine talks to storage only through [`Database`]. Every mutating
//! method is a single atomic conditional operation (unique-guarded insert,
//! compare-and-set, guarded decrement), so concurrent callers are serialized
//! by the store and never by the engine.
//!
//! Available backends depend on enabled features:
//! - `sqlite` feature enables `Database::SQLite`
//! - `Database::Memory` is always available (in-process adapter)

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::error;

#[cfg(feature = "sqlite")]
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::config::{get_config, DatabaseConfig};
use crate::errors::{LicenseError, LicenseResult};
use crate::tiers::Tier;

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;

/// Storage format for timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

pub fn format_timestamp(dt: NaiveDateTime) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp. Accepts the storage format and the
/// space-separated variant older rows were written with.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

/// A license record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct License {
    pub key: String,
    pub tier: Tier,
    pub credits: i64,
    pub issued_to: String,
    pub created_at: NaiveDateTime,
    pub expires_at: Option<NaiveDateTime>,
    pub hwid: Option<String>,
    pub active: bool,
    /// Machine a trial was issued for. `None` for non-trial keys.
    pub machine_id: Option<String>,
}

impl License {
    /// Check if the license is bound to a machine.
    pub fn is_bound(&self) -> bool {
        self.hwid.is_some()
    }

    /// Expired means `expires_at` is strictly before `now`.
    pub fn is_expired_at(&self, now: NaiveDateTime) -> bool {
        self.expires_at.is_some_and(|exp| exp < now)
    }

    pub fn days_since_created(&self, now: NaiveDateTime) -> i64 {
        (now - self.created_at).num_days()
    }

    pub fn days_until_expiry(&self, now: NaiveDateTime) -> Option<i64> {
        self.expires_at.map(|exp| (exp - now).num_days())
    }
}

/// Field changes for an admin edit. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LicenseUpdate {
    pub tier: Option<Tier>,
    pub credits: Option<i64>,
    pub issued_to: Option<String>,
    pub expires_at: Option<NaiveDateTime>,
}

impl LicenseUpdate {
    pub fn is_empty(&self) -> bool {
        self.tier.is_none()
            && self.credits.is_none()
            && self.issued_to.is_none()
            && self.expires_at.is_none()
    }

    fn apply(&self, license: &mut License) {
        if let Some(tier) = self.tier {
            license.tier = tier;
        }
        if let Some(credits) = self.credits {
            license.credits = credits;
        }
        if let Some(issued_to) = &self.issued_to {
            license.issued_to = issued_to.clone();
        }
        if let Some(expires_at) = self.expires_at {
            license.expires_at = Some(expires_at);
        }
    }
}

/// Filters for [`Database::query_licenses`]. All set filters must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LicenseFilter {
    pub tier: Option<Tier>,
    pub issued_to: Option<String>,
    pub active: Option<bool>,
    pub key: Option<String>,
}

impl LicenseFilter {
    pub fn matches(&self, license: &License) -> bool {
        self.tier.is_none_or(|t| license.tier == t)
            && self
                .issued_to
                .as_deref()
                .is_none_or(|i| license.issued_to == i)
            && self.active.is_none_or(|a| license.active == a)
            && self.key.as_deref().is_none_or(|k| license.key == k)
    }
}

/// A stored record that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityWarning {
    pub key: String,
    pub message: String,
}

/// Result of scanning for expired licenses.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExpiredScan {
    pub expired: Vec<License>,
    pub integrity_warnings: Vec<IntegrityWarning>,
}

/// Unified store abstraction over the available backends.
#[derive(Debug, Clone)]
pub enum Database {
    #[cfg(feature = "sqlite")]
    SQLite(SqlitePool),
    Memory(MemoryStore),
}

impl Database {
    /// Initialize the store based on the global configuration.
    pub async fn new() -> LicenseResult<Arc<Self>> {
        let config = get_config()?;
        Self::connect(&config.database).await
    }

    /// Initialize the store from an explicit configuration.
    ///
    /// Creates the schema if it does not exist yet.
    pub async fn connect(db_config: &DatabaseConfig) -> LicenseResult<Arc<Self>> {
        let db = match db_config.db_type.as_str() {
            #[cfg(feature = "sqlite")]
            "sqlite" => {
                let mut options = SqlitePoolOptions::new();
                // Every connection to an in-memory SQLite URL is its own database.
                if db_config.sqlite_url.contains(":memory:") {
                    options = options.max_connections(1);
                }
                let pool = options
                    .connect(&db_config.sqlite_url)
                    .await
                    .map_err(|e| {
                        error!("Failed to connect to SQLite: {e}");
                        LicenseError::StorageUnavailable(format!(
                            "failed to connect to SQLite: {e}"
                        ))
                    })?;
                Database::SQLite(pool)
            }
            #[cfg(not(feature = "sqlite"))]
            "sqlite" => {
                return Err(LicenseError::ConfigError(
                    "SQLite support not compiled in. Enable the 'sqlite' feature.".to_string(),
                ))
            }
            "memory" => Database::memory(),
            other => {
                return Err(LicenseError::ConfigError(format!(
                    "unsupported database type: {other}"
                )))
            }
        };

        db.migrate().await?;
        Ok(Arc::new(db))
    }

    /// A fresh, empty in-process store.
    pub fn memory() -> Self {
        Database::Memory(MemoryStore::new())
    }

    /// Backend name for health reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(_) => "sqlite",
            Database::Memory(_) => "memory",
        }
    }

    /// Create tables and indexes if they are missing.
    pub async fn migrate(&self) -> LicenseResult<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => sqlite::migrate(pool).await,
            Database::Memory(_) => Ok(()),
        }
    }

    /// Check the store answers.
    pub async fn ping(&self) -> bool {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => sqlite::ping(pool).await,
            Database::Memory(store) => store.ping(),
        }
    }

    /// Insert a new license.
    ///
    /// Fails with `Conflict` if the key exists and with `TrialAlreadyIssued`
    /// if a trial record collides with an existing trial's machine id or
    /// issued-to identity. The check and the insert are one operation.
    pub async fn insert_license(&self, license: &License) -> LicenseResult<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => sqlite::insert_license(pool, license).await,
            Database::Memory(store) => store.insert_license(license),
        }
    }

    /// Fetch a license by key.
    pub async fn get_license(&self, key: &str) -> LicenseResult<Option<License>> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => sqlite::get_license(pool, key).await,
            Database::Memory(store) => store.get_license(key),
        }
    }

    /// Compare-and-set the hardware binding.
    ///
    /// Sets `hwid` only if the record exists, is active and is unbound.
    /// Returns `Ok(true)` if this call performed the binding.
    pub async fn bind_hwid(&self, key: &str, hwid: &str) -> LicenseResult<bool> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => sqlite::bind_hwid(pool, key, hwid).await,
            Database::Memory(store) => store.bind_hwid(key, hwid),
        }
    }

    /// Decrement credits by `amount` only if the balance covers it.
    ///
    /// Returns `Ok(Some(remaining))` when applied and `Ok(None)` when the key
    /// is missing or the balance is short.
    pub async fn consume_credits(&self, key: &str, amount: i64) -> LicenseResult<Option<i64>> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => sqlite::consume_credits(pool, key, amount).await,
            Database::Memory(store) => store.consume_credits(key, amount),
        }
    }

    /// Set tier, add credits and reset expiry in one update.
    ///
    /// Returns `Ok(false)` if the key does not exist.
    pub async fn extend_license(
        &self,
        key: &str,
        tier: Tier,
        additional_credits: i64,
        expires_at: NaiveDateTime,
    ) -> LicenseResult<bool> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                sqlite::extend_license(pool, key, tier, additional_credits, expires_at).await
            }
            Database::Memory(store) => {
                store.extend_license(key, tier, additional_credits, expires_at)
            }
        }
    }

    /// Apply an admin edit. Returns `Ok(false)` if the key does not exist.
    pub async fn update_license(&self, key: &str, update: &LicenseUpdate) -> LicenseResult<bool> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => sqlite::update_license(pool, key, update).await,
            Database::Memory(store) => store.update_license(key, update),
        }
    }

    /// Mark a license inactive. Returns `Ok(false)` if the key does not exist.
    pub async fn revoke_license(&self, key: &str) -> LicenseResult<bool> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => sqlite::revoke_license(pool, key).await,
            Database::Memory(store) => store.revoke_license(key),
        }
    }

    /// Clear the hardware binding. Returns `Ok(false)` if the key does not exist.
    pub async fn reset_hwid(&self, key: &str) -> LicenseResult<bool> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => sqlite::reset_hwid(pool, key).await,
            Database::Memory(store) => store.reset_hwid(key),
        }
    }

    /// Delete a license. Returns `Ok(false)` if the key does not exist.
    pub async fn delete_license(&self, key: &str) -> LicenseResult<bool> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => sqlite::delete_license(pool, key).await,
            Database::Memory(store) => store.delete_license(key),
        }
    }

    /// Find licenses whose `expires_at` is strictly before `now`.
    ///
    /// Records that cannot be decoded are reported as integrity warnings.
    pub async fn scan_expired(&self, now: NaiveDateTime) -> LicenseResult<ExpiredScan> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => sqlite::scan_expired(pool, now).await,
            Database::Memory(store) => store.scan_expired(now),
        }
    }

    /// List licenses matching `filter`, oldest first.
    pub async fn query_licenses(&self, filter: &LicenseFilter) -> LicenseResult<Vec<License>> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => sqlite::query_licenses(pool, filter).await,
            Database::Memory(store) => store.query_licenses(filter),
        }
    }
}

/// Credits plus an addition, refusing to overflow.
pub(crate) fn checked_credit_sum(current: i64, additional: i64) -> LicenseResult<i64> {
    current.checked_add(additional).ok_or_else(|| {
        LicenseError::Validation(crate::validation::ValidationError::new(
            "additional_credits",
            "resulting balance is too large",
        ))
    })
}
