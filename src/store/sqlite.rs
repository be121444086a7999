//! SQLite backend.
//!
//! Atomicity comes from SQLite itself: each primitive is a single statement
//! (guarded `UPDATE`, `INSERT` against unique indexes, `UPDATE ... RETURNING`).

use chrono::NaiveDateTime;
use sqlx::sqlite::SqlitePool;
use sqlx::{query, query_as, query_scalar, FromRow, QueryBuilder, Sqlite};
use tracing::{error, warn};

use super::{
    format_timestamp, parse_timestamp, ExpiredScan, IntegrityWarning, License, LicenseFilter,
    LicenseUpdate,
};
use crate::errors::{LicenseError, LicenseResult};
use crate::tiers::Tier;
use crate::validation::ValidationError;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS licenses (
        key         TEXT PRIMARY KEY,
        tier        TEXT NOT NULL,
        credits     INTEGER NOT NULL CHECK (credits >= 0),
        issued_to   TEXT NOT NULL,
        created_at  TEXT NOT NULL,
        expires_at  TEXT,
        hwid        TEXT,
        active      INTEGER NOT NULL DEFAULT 1,
        machine_id  TEXT
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_trial_machine ON licenses(machine_id) WHERE tier = 'trial'",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_trial_issued_to ON licenses(issued_to) WHERE tier = 'trial'",
];

const SELECT_LICENSE: &str = "SELECT key, tier, credits, issued_to, created_at, expires_at, hwid, active, machine_id FROM licenses";

/// Raw row as stored. Decoded into [`License`] with integrity checks.
#[derive(Debug, FromRow)]
struct LicenseRow {
    key: String,
    tier: String,
    credits: i64,
    issued_to: String,
    created_at: String,
    expires_at: Option<String>,
    hwid: Option<String>,
    active: bool,
    machine_id: Option<String>,
}

impl TryFrom<LicenseRow> for License {
    type Error = LicenseError;

    fn try_from(row: LicenseRow) -> Result<Self, Self::Error> {
        let integrity = |field: &str, value: &str| {
            LicenseError::DataIntegrity(format!(
                "license {}: malformed {field} '{value}'",
                row.key
            ))
        };

        let tier: Tier = row
            .tier
            .parse()
            .ok()
            .filter(Tier::is_persistable)
            .ok_or_else(|| integrity("tier", &row.tier))?;
        let created_at =
            parse_timestamp(&row.created_at).ok_or_else(|| integrity("created_at", &row.created_at))?;
        let expires_at = match &row.expires_at {
            Some(raw) => Some(parse_timestamp(raw).ok_or_else(|| integrity("expires_at", raw))?),
            None => None,
        };
        if row.credits < 0 {
            return Err(integrity("credits", &row.credits.to_string()));
        }

        Ok(License {
            key: row.key,
            tier,
            credits: row.credits,
            issued_to: row.issued_to,
            created_at,
            expires_at,
            hwid: row.hwid,
            active: row.active,
            machine_id: row.machine_id,
        })
    }
}

fn storage_error(op: &str, e: sqlx::Error) -> LicenseError {
    error!("SQLite {op} failed: {e}");
    LicenseError::StorageUnavailable(format!("database error: {e}"))
}

/// Map a write failure, turning unique-index violations into domain errors.
fn write_error(op: &str, key: &str, e: sqlx::Error) -> LicenseError {
    if let sqlx::Error::Database(db_err) = &e {
        let message = db_err.message();
        if db_err.is_unique_violation() || message.contains("UNIQUE constraint failed") {
            if message.contains("licenses.key") {
                return LicenseError::Conflict(format!("license key already exists: {key}"));
            }
            return LicenseError::TrialAlreadyIssued;
        }
    }
    storage_error(op, e)
}

pub(super) async fn migrate(pool: &SqlitePool) -> LicenseResult<()> {
    for statement in SCHEMA {
        query(statement)
            .execute(pool)
            .await
            .map_err(|e| storage_error("migrate", e))?;
    }
    Ok(())
}

pub(super) async fn ping(pool: &SqlitePool) -> bool {
    query_scalar::<_, i64>("SELECT 1")
        .fetch_one(pool)
        .await
        .is_ok()
}

pub(super) async fn insert_license(pool: &SqlitePool, license: &License) -> LicenseResult<()> {
    query(
        r#"
        INSERT INTO licenses (
            key, tier, credits, issued_to, created_at, expires_at, hwid, active, machine_id
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&license.key)
    .bind(license.tier.as_str())
    .bind(license.credits)
    .bind(&license.issued_to)
    .bind(format_timestamp(license.created_at))
    .bind(license.expires_at.map(format_timestamp))
    .bind(&license.hwid)
    .bind(license.active)
    .bind(&license.machine_id)
    .execute(pool)
    .await
    .map_err(|e| write_error("insert_license", &license.key, e))?;

    Ok(())
}

pub(super) async fn get_license(pool: &SqlitePool, key: &str) -> LicenseResult<Option<License>> {
    let row = query_as::<_, LicenseRow>(&format!("{SELECT_LICENSE} WHERE key = ?"))
        .bind(key)
        .fetch_optional(pool)
        .await
        .map_err(|e| storage_error("get_license", e))?;

    row.map(License::try_from).transpose()
}

pub(super) async fn bind_hwid(pool: &SqlitePool, key: &str, hwid: &str) -> LicenseResult<bool> {
    let rows = query("UPDATE licenses SET hwid = ? WHERE key = ? AND hwid IS NULL AND active = 1")
        .bind(hwid)
        .bind(key)
        .execute(pool)
        .await
        .map_err(|e| storage_error("bind_hwid", e))?
        .rows_affected();

    Ok(rows == 1)
}

pub(super) async fn consume_credits(
    pool: &SqlitePool,
    key: &str,
    amount: i64,
) -> LicenseResult<Option<i64>> {
    query_scalar::<_, i64>(
        "UPDATE licenses SET credits = credits - ? WHERE key = ? AND credits >= ? RETURNING credits",
    )
    .bind(amount)
    .bind(key)
    .bind(amount)
    .fetch_optional(pool)
    .await
    .map_err(|e| storage_error("consume_credits", e))
}

pub(super) async fn extend_license(
    pool: &SqlitePool,
    key: &str,
    tier: Tier,
    additional_credits: i64,
    expires_at: NaiveDateTime,
) -> LicenseResult<bool> {
    let rows = query(
        r#"
        UPDATE licenses
           SET tier = ?, credits = credits + ?, expires_at = ?
         WHERE key = ? AND credits <= ?
        "#,
    )
    .bind(tier.as_str())
    .bind(additional_credits)
    .bind(format_timestamp(expires_at))
    .bind(key)
    .bind(i64::MAX - additional_credits)
    .execute(pool)
    .await
    .map_err(|e| write_error("extend_license", key, e))?
    .rows_affected();

    if rows == 1 {
        return Ok(true);
    }

    // Zero rows: either the key is gone or the balance would overflow.
    if get_license(pool, key).await?.is_some() {
        return Err(LicenseError::Validation(ValidationError::new(
            "additional_credits",
            "resulting balance is too large",
        )));
    }
    Ok(false)
}

pub(super) async fn update_license(
    pool: &SqlitePool,
    key: &str,
    update: &LicenseUpdate,
) -> LicenseResult<bool> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE licenses SET ");
    let mut fields = builder.separated(", ");

    if let Some(tier) = update.tier {
        fields.push("tier = ");
        fields.push_bind_unseparated(tier.as_str());
    }
    if let Some(credits) = update.credits {
        fields.push("credits = ");
        fields.push_bind_unseparated(credits);
    }
    if let Some(issued_to) = &update.issued_to {
        fields.push("issued_to = ");
        fields.push_bind_unseparated(issued_to.clone());
    }
    if let Some(expires_at) = update.expires_at {
        fields.push("expires_at = ");
        fields.push_bind_unseparated(format_timestamp(expires_at));
    }

    builder.push(" WHERE key = ");
    builder.push_bind(key.to_string());

    let rows = builder
        .build()
        .execute(pool)
        .await
        .map_err(|e| write_error("update_license", key, e))?
        .rows_affected();

    Ok(rows == 1)
}

pub(super) async fn revoke_license(pool: &SqlitePool, key: &str) -> LicenseResult<bool> {
    let rows = query("UPDATE licenses SET active = 0 WHERE key = ?")
        .bind(key)
        .execute(pool)
        .await
        .map_err(|e| storage_error("revoke_license", e))?
        .rows_affected();

    Ok(rows == 1)
}

pub(super) async fn reset_hwid(pool: &SqlitePool, key: &str) -> LicenseResult<bool> {
    let rows = query("UPDATE licenses SET hwid = NULL WHERE key = ?")
        .bind(key)
        .execute(pool)
        .await
        .map_err(|e| storage_error("reset_hwid", e))?
        .rows_affected();

    Ok(rows == 1)
}

pub(super) async fn delete_license(pool: &SqlitePool, key: &str) -> LicenseResult<bool> {
    let rows = query("DELETE FROM licenses WHERE key = ?")
        .bind(key)
        .execute(pool)
        .await
        .map_err(|e| storage_error("delete_license", e))?
        .rows_affected();

    Ok(rows == 1)
}

pub(super) async fn scan_expired(pool: &SqlitePool, now: NaiveDateTime) -> LicenseResult<ExpiredScan> {
    let rows = query_as::<_, LicenseRow>(&format!(
        "{SELECT_LICENSE} WHERE expires_at IS NOT NULL ORDER BY created_at, key"
    ))
    .fetch_all(pool)
    .await
    .map_err(|e| storage_error("scan_expired", e))?;

    let mut scan = ExpiredScan::default();
    for row in rows {
        let key = row.key.clone();
        match License::try_from(row) {
            Ok(license) if license.is_expired_at(now) => scan.expired.push(license),
            Ok(_) => {}
            Err(e) => {
                warn!("Integrity warning while scanning for expired licenses: {e}");
                scan.integrity_warnings.push(IntegrityWarning {
                    key,
                    message: e.to_string(),
                });
            }
        }
    }

    Ok(scan)
}

pub(super) async fn query_licenses(
    pool: &SqlitePool,
    filter: &LicenseFilter,
) -> LicenseResult<Vec<License>> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_LICENSE);
    builder.push(" WHERE 1 = 1");

    if let Some(tier) = filter.tier {
        builder.push(" AND tier = ");
        builder.push_bind(tier.as_str());
    }
    if let Some(issued_to) = &filter.issued_to {
        builder.push(" AND issued_to = ");
        builder.push_bind(issued_to.clone());
    }
    if let Some(active) = filter.active {
        builder.push(" AND active = ");
        builder.push_bind(active);
    }
    if let Some(key) = &filter.key {
        builder.push(" AND key = ");
        builder.push_bind(key.clone());
    }
    builder.push(" ORDER BY created_at, key");

    let rows = builder
        .build_query_as::<LicenseRow>()
        .fetch_all(pool)
        .await
        .map_err(|e| storage_error("query_licenses", e))?;

    rows.into_iter().map(License::try_from).collect()
}
