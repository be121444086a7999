//! License entitlement engine.
//!
//! Holds the verification state machine, the hardware binding protocol, the
//! credit ledger and issuance (including trial dedup). The engine keeps no
//! state of its own between calls: every decision is made against a fresh
//! read of the store, and every mutation is one conditional store operation.
//!
//! # Verification order
//!
//! For a presented `(key, hwid?)`:
//!
//! 1. master key match (no store access)
//! 2. unknown key -> `not_found`
//! 3. revoked -> `inactive`
//! 4. `expires_at` strictly before now -> `expired`
//! 5. unbound and binding applies -> compare-and-set the hwid, `bound = true`
//! 6. bound to a different hwid -> `hwid_mismatch`
//! 7. valid

use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{SpectreConfig, TrialConfig};
use crate::errors::{LicenseError, LicenseResult};
use crate::license_key::{KeyGenerator, LicenseKeyConfig, RandomKeyGenerator};
use crate::logging::{log_license_event, LicenseEvent};
use crate::store::{Database, ExpiredScan, License, LicenseFilter, LicenseUpdate};
use crate::tiers::{BindingPolicy, Tier, MASTER_CREDITS};
use crate::validation::{
    validate_amount, validate_credits, validate_identity, validate_license_key, ValidationError,
};

/// Days added to `now` when a license is extended.
pub const RENEWAL_WINDOW_DAYS: i64 = 30;

/// Rounds of re-reading a record after losing a binding race.
const MAX_BIND_ROUNDS: usize = 3;

/// Attempts at inserting a freshly generated key before giving up.
const MAX_KEY_ATTEMPTS: usize = 10;

/// Why a verification was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    NotFound,
    Inactive,
    Expired,
    HwidMismatch,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::NotFound => "not_found",
            DenyReason::Inactive => "inactive",
            DenyReason::Expired => "expired",
            DenyReason::HwidMismatch => "hwid_mismatch",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`LicenseEngine::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Valid {
        tier: Tier,
        credits: i64,
        /// True only when this call performed the hardware binding.
        bound: bool,
    },
    Denied(DenyReason),
}

impl VerifyOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyOutcome::Valid { .. })
    }

    pub fn reason(&self) -> Option<DenyReason> {
        match self {
            VerifyOutcome::Valid { .. } => None,
            VerifyOutcome::Denied(reason) => Some(*reason),
        }
    }
}

/// Parameters for issuing a license.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub tier: Tier,
    pub credits: i64,
    pub issued_to: String,
    /// Use this key instead of generating one. Duplicates are a conflict.
    pub custom_key: Option<String>,
    pub expires_at: Option<NaiveDateTime>,
}

impl IssueRequest {
    pub fn new(tier: Tier, credits: i64, issued_to: impl Into<String>) -> Self {
        Self {
            tier,
            credits,
            issued_to: issued_to.into(),
            custom_key: None,
            expires_at: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.custom_key = Some(key.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: NaiveDateTime) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// A license plus values derived from it at read time.
#[derive(Debug, Clone, Serialize)]
pub struct LicenseStats {
    #[serde(flatten)]
    pub license: License,
    pub days_since_created: i64,
    pub days_until_expiry: Option<i64>,
    pub is_bound: bool,
    pub is_expired: bool,
}

/// The entitlement engine. Cheap to clone; clones share the store.
#[derive(Clone)]
pub struct LicenseEngine {
    store: Arc<Database>,
    clock: Arc<dyn Clock>,
    keys: Arc<dyn KeyGenerator>,
    master_digest: Option<Vec<u8>>,
    policy: BindingPolicy,
    trial: TrialConfig,
}

impl fmt::Debug for LicenseEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LicenseEngine")
            .field("store", &self.store.kind())
            .field("master_key", &self.master_digest.is_some())
            .field("policy", &self.policy)
            .field("trial", &self.trial)
            .finish()
    }
}

pub(crate) fn digest(value: &str) -> Vec<u8> {
    Sha256::digest(value.as_bytes()).to_vec()
}

/// Constant-time comparison of a presented secret against a stored digest.
pub(crate) fn matches_digest(presented: &str, expected: &[u8]) -> bool {
    bool::from(digest(presented).as_slice().ct_eq(expected))
}

impl LicenseEngine {
    /// Build an engine over `store` using the license and trial settings of
    /// `config`, the system clock and a random key generator.
    pub fn new(store: Arc<Database>, config: &SpectreConfig) -> LicenseResult<Self> {
        let keys = RandomKeyGenerator::new(LicenseKeyConfig::from(&config.license))?;

        Ok(Self {
            store,
            clock: Arc::new(SystemClock),
            keys: Arc::new(keys),
            master_digest: config
                .license
                .master_key
                .as_ref()
                .map(|secret| digest(secret.expose())),
            policy: BindingPolicy::new(config.license.unlocked_tiers.iter().copied()),
            trial: config.trial.clone(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_key_generator(mut self, keys: Arc<dyn KeyGenerator>) -> Self {
        self.keys = keys;
        self
    }

    pub fn store(&self) -> &Arc<Database> {
        &self.store
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    fn is_master_key(&self, key: &str) -> bool {
        self.master_digest
            .as_deref()
            .is_some_and(|expected| matches_digest(key, expected))
    }

    // ------------------------------------------------------------------
    // Verification
    // ------------------------------------------------------------------

    /// Verify a key, binding it to `hwid` on first use.
    ///
    /// Denials are returned as [`VerifyOutcome::Denied`]. `Err` is reserved
    /// for malformed input and storage failures.
    pub async fn verify(&self, key: &str, hwid: Option<&str>) -> LicenseResult<VerifyOutcome> {
        let key = key.trim();

        if self.is_master_key(key) {
            log_license_event(LicenseEvent::Verified, "master", Some("tier=master"));
            return Ok(VerifyOutcome::Valid {
                tier: Tier::Master,
                credits: MASTER_CREDITS,
                bound: false,
            });
        }

        validate_license_key(key, "key")?;
        let hwid = hwid.map(str::trim).filter(|h| !h.is_empty());
        if let Some(hwid) = hwid {
            validate_identity(hwid, "hwid")?;
        }

        let now = self.clock.now();

        for round in 1..=MAX_BIND_ROUNDS {
            let Some(license) = self.store.get_license(key).await? else {
                return Ok(self.deny(key, DenyReason::NotFound));
            };
            if !license.active {
                return Ok(self.deny(key, DenyReason::Inactive));
            }
            if license.is_expired_at(now) {
                return Ok(self.deny(key, DenyReason::Expired));
            }

            let presented = match hwid {
                Some(hwid) if self.policy.requires_binding(license.tier) => hwid,
                _ => return Ok(self.accept(&license, false)),
            };

            match license.hwid.as_deref() {
                None => {
                    if self.store.bind_hwid(key, presented).await? {
                        log_license_event(
                            LicenseEvent::Bound,
                            key,
                            Some(&format!("hwid={presented}")),
                        );
                        return Ok(self.accept(&license, true));
                    }
                    debug!(key = %key, round, "Lost binding race, re-reading license");
                }
                Some(bound) if bound == presented => return Ok(self.accept(&license, false)),
                Some(_) => return Ok(self.deny(key, DenyReason::HwidMismatch)),
            }
        }

        warn!(key = %key, "License kept changing during verification");
        Err(LicenseError::StorageUnavailable(
            "license record changed concurrently, retry verification".to_string(),
        ))
    }

    fn accept(&self, license: &License, bound: bool) -> VerifyOutcome {
        log_license_event(
            LicenseEvent::Verified,
            &license.key,
            Some(&format!("tier={}", license.tier)),
        );
        VerifyOutcome::Valid {
            tier: license.tier,
            credits: license.credits,
            bound,
        }
    }

    fn deny(&self, key: &str, reason: DenyReason) -> VerifyOutcome {
        log_license_event(LicenseEvent::VerificationFailed, key, Some(reason.as_str()));
        VerifyOutcome::Denied(reason)
    }

    // ------------------------------------------------------------------
    // Issuance
    // ------------------------------------------------------------------

    /// Issue a new license.
    pub async fn issue(&self, request: IssueRequest) -> LicenseResult<License> {
        if !request.tier.is_persistable() {
            return Err(ValidationError::new("tier", "the master tier cannot be issued").into());
        }
        validate_credits(request.credits, "credits")?;
        let issued_to = request.issued_to.trim();
        validate_identity(issued_to, "issued_to")?;

        let mut license = License {
            key: String::new(),
            tier: request.tier,
            credits: request.credits,
            issued_to: issued_to.to_string(),
            created_at: self.clock.now(),
            expires_at: request.expires_at,
            hwid: None,
            active: true,
            machine_id: None,
        };

        let license = match request.custom_key {
            Some(custom) => {
                let custom = custom.trim();
                validate_license_key(custom, "custom_key")?;
                license.key = custom.to_string();
                self.store.insert_license(&license).await?;
                license
            }
            None => self.insert_with_generated_key(license).await?,
        };

        log_license_event(
            LicenseEvent::Issued,
            &license.key,
            Some(&format!(
                "tier={} credits={} issued_to={}",
                license.tier, license.credits, license.issued_to
            )),
        );
        Ok(license)
    }

    /// Issue a trial license pre-bound to `machine_id`.
    ///
    /// At most one trial exists per machine id and per issued-to identity.
    pub async fn issue_trial(&self, machine_id: &str, issued_to: &str) -> LicenseResult<License> {
        let machine_id = machine_id.trim();
        let issued_to = issued_to.trim();
        validate_identity(machine_id, "machine_id")?;
        validate_identity(issued_to, "issued_to")?;

        let now = self.clock.now();
        let expires_at = TimeDelta::try_days(self.trial.duration_days)
            .and_then(|duration| now.checked_add_signed(duration))
            .ok_or_else(|| {
                LicenseError::ConfigError("trial.duration_days is out of range".to_string())
            })?;

        let license = License {
            key: String::new(),
            tier: Tier::Trial,
            credits: self.trial.credits,
            issued_to: issued_to.to_string(),
            created_at: now,
            expires_at: Some(expires_at),
            hwid: Some(machine_id.to_string()),
            active: true,
            machine_id: Some(machine_id.to_string()),
        };

        let license = self.insert_with_generated_key(license).await?;
        log_license_event(
            LicenseEvent::TrialIssued,
            &license.key,
            Some(&format!("machine_id={machine_id} issued_to={issued_to}")),
        );
        Ok(license)
    }

    /// Insert `license` under a fresh key, regenerating on key collisions.
    async fn insert_with_generated_key(&self, mut license: License) -> LicenseResult<License> {
        for attempt in 1..=MAX_KEY_ATTEMPTS {
            license.key = self.keys.generate();
            match self.store.insert_license(&license).await {
                Ok(()) => return Ok(license),
                Err(LicenseError::Conflict(_)) => {
                    warn!(attempt, "Generated license key collided, regenerating");
                }
                Err(e) => return Err(e),
            }
        }

        Err(LicenseError::Conflict(format!(
            "could not generate a unique license key after {MAX_KEY_ATTEMPTS} attempts"
        )))
    }

    // ------------------------------------------------------------------
    // Credit ledger
    // ------------------------------------------------------------------

    /// Consume `amount` credits. Returns the remaining balance.
    pub async fn consume(&self, key: &str, amount: i64) -> LicenseResult<i64> {
        let key = key.trim();
        validate_license_key(key, "key")?;
        validate_amount(amount, "amount")?;

        if let Some(remaining) = self.store.consume_credits(key, amount).await? {
            log_license_event(
                LicenseEvent::CreditsConsumed,
                key,
                Some(&format!("amount={amount} remaining={remaining}")),
            );
            return Ok(remaining);
        }

        match self.store.get_license(key).await? {
            None => Err(LicenseError::NotFound(key.to_string())),
            Some(license) => Err(LicenseError::InsufficientCredits {
                requested: amount,
                available: license.credits,
            }),
        }
    }

    /// Set the tier, add credits and push expiry to now plus
    /// [`RENEWAL_WINDOW_DAYS`]. Returns the new expiry.
    ///
    /// Moving a key into [`Tier::Trial`] fails with
    /// [`LicenseError::TrialAlreadyIssued`] when another trial already holds
    /// the key's identity or machine.
    pub async fn extend(
        &self,
        key: &str,
        tier: Tier,
        additional_credits: i64,
    ) -> LicenseResult<NaiveDateTime> {
        let key = key.trim();
        validate_license_key(key, "key")?;
        if !tier.is_persistable() {
            return Err(ValidationError::new("tier", "the master tier cannot be persisted").into());
        }
        validate_credits(additional_credits, "additional_credits")?;

        let expires_at = self.clock.now() + TimeDelta::days(RENEWAL_WINDOW_DAYS);
        if !self
            .store
            .extend_license(key, tier, additional_credits, expires_at)
            .await?
        {
            return Err(LicenseError::NotFound(key.to_string()));
        }

        log_license_event(
            LicenseEvent::Extended,
            key,
            Some(&format!(
                "tier={tier} additional_credits={additional_credits} expires_at={expires_at}"
            )),
        );
        Ok(expires_at)
    }

    // ------------------------------------------------------------------
    // Record access
    // ------------------------------------------------------------------

    /// Apply an admin edit.
    ///
    /// Like [`LicenseEngine::extend`], an edit into [`Tier::Trial`] is subject
    /// to the one-trial-per-machine-and-identity claim.
    pub async fn edit(&self, key: &str, mut update: LicenseUpdate) -> LicenseResult<()> {
        let key = key.trim();
        validate_license_key(key, "key")?;
        if update.is_empty() {
            return Err(LicenseError::NoFields);
        }

        if let Some(tier) = update.tier {
            if !tier.is_persistable() {
                return Err(
                    ValidationError::new("tier", "the master tier cannot be persisted").into(),
                );
            }
        }
        if let Some(credits) = update.credits {
            validate_credits(credits, "credits")?;
        }
        if let Some(issued_to) = update.issued_to.take() {
            let issued_to = issued_to.trim().to_string();
            validate_identity(&issued_to, "issued_to")?;
            update.issued_to = Some(issued_to);
        }

        if !self.store.update_license(key, &update).await? {
            return Err(LicenseError::NotFound(key.to_string()));
        }

        let mut fields = Vec::new();
        if update.tier.is_some() {
            fields.push("tier");
        }
        if update.credits.is_some() {
            fields.push("credits");
        }
        if update.issued_to.is_some() {
            fields.push("issued_to");
        }
        if update.expires_at.is_some() {
            fields.push("expires_at");
        }
        log_license_event(
            LicenseEvent::Edited,
            key,
            Some(&format!("fields={}", fields.join(","))),
        );
        Ok(())
    }

    pub async fn revoke(&self, key: &str) -> LicenseResult<()> {
        let key = key.trim();
        validate_license_key(key, "key")?;
        if !self.store.revoke_license(key).await? {
            return Err(LicenseError::NotFound(key.to_string()));
        }
        log_license_event(LicenseEvent::Revoked, key, None);
        Ok(())
    }

    /// Delete a license. Deleting a trial releases its dedup claim.
    pub async fn delete(&self, key: &str) -> LicenseResult<()> {
        let key = key.trim();
        validate_license_key(key, "key")?;
        if !self.store.delete_license(key).await? {
            return Err(LicenseError::NotFound(key.to_string()));
        }
        log_license_event(LicenseEvent::Deleted, key, None);
        Ok(())
    }

    /// Clear the hardware binding so the next verification re-binds.
    pub async fn reset_hwid(&self, key: &str) -> LicenseResult<()> {
        let key = key.trim();
        validate_license_key(key, "key")?;
        if !self.store.reset_hwid(key).await? {
            return Err(LicenseError::NotFound(key.to_string()));
        }
        log_license_event(LicenseEvent::HwidReset, key, None);
        Ok(())
    }

    /// Licenses expired as of the engine clock.
    pub async fn list_expired(&self) -> LicenseResult<ExpiredScan> {
        self.list_expired_at(self.clock.now()).await
    }

    /// Licenses whose expiry is strictly before `now`. Undecodable records
    /// are reported, never skipped.
    pub async fn list_expired_at(&self, now: NaiveDateTime) -> LicenseResult<ExpiredScan> {
        let scan = self.store.scan_expired(now).await?;
        for warning in &scan.integrity_warnings {
            warn!(key = %warning.key, "Integrity warning: {}", warning.message);
        }
        info!(
            expired = scan.expired.len(),
            integrity_warnings = scan.integrity_warnings.len(),
            "Expired license scan complete"
        );
        Ok(scan)
    }

    pub async fn query(&self, filter: &LicenseFilter) -> LicenseResult<Vec<License>> {
        if let Some(key) = &filter.key {
            validate_license_key(key, "key")?;
        }
        if let Some(issued_to) = &filter.issued_to {
            validate_identity(issued_to, "issued_to")?;
        }
        self.store.query_licenses(filter).await
    }

    pub async fn stats(&self, key: &str) -> LicenseResult<LicenseStats> {
        let key = key.trim();
        validate_license_key(key, "key")?;
        let license = self
            .store
            .get_license(key)
            .await?
            .ok_or_else(|| LicenseError::NotFound(key.to_string()))?;

        let now = self.clock.now();
        Ok(LicenseStats {
            days_since_created: license.days_since_created(now),
            days_until_expiry: license.days_until_expiry(now),
            is_bound: license.is_bound(),
            is_expired: license.is_expired_at(now),
            license,
        })
    }
}
