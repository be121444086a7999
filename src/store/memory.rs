//! In-process license store.
//!
//! Each primitive takes the map's write lock exactly once, which makes every
//! conditional operation atomic with respect to every other one. The lock is
//! the store's concurrency control; callers never see it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::NaiveDateTime;

use super::{checked_credit_sum, ExpiredScan, License, LicenseFilter, LicenseUpdate};
use crate::errors::{LicenseError, LicenseResult};
use crate::tiers::Tier;

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    licenses: Arc<RwLock<HashMap<String, License>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> LicenseResult<RwLockReadGuard<'_, HashMap<String, License>>> {
        self.licenses.read().map_err(|_| {
            LicenseError::StorageUnavailable("failed to acquire license store lock".into())
        })
    }

    fn write(&self) -> LicenseResult<RwLockWriteGuard<'_, HashMap<String, License>>> {
        self.licenses.write().map_err(|_| {
            LicenseError::StorageUnavailable("failed to acquire license store lock".into())
        })
    }

    pub(super) fn ping(&self) -> bool {
        self.read().is_ok()
    }

    pub(super) fn insert_license(&self, license: &License) -> LicenseResult<()> {
        let mut map = self.write()?;

        if map.contains_key(&license.key) {
            return Err(LicenseError::Conflict(format!(
                "license key already exists: {}",
                license.key
            )));
        }
        if violates_trial_claim(&map, license) {
            return Err(LicenseError::TrialAlreadyIssued);
        }

        map.insert(license.key.clone(), license.clone());
        Ok(())
    }

    pub(super) fn get_license(&self, key: &str) -> LicenseResult<Option<License>> {
        Ok(self.read()?.get(key).cloned())
    }

    pub(super) fn bind_hwid(&self, key: &str, hwid: &str) -> LicenseResult<bool> {
        let mut map = self.write()?;
        match map.get_mut(key) {
            Some(license) if license.active && license.hwid.is_none() => {
                license.hwid = Some(hwid.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub(super) fn consume_credits(&self, key: &str, amount: i64) -> LicenseResult<Option<i64>> {
        let mut map = self.write()?;
        match map.get_mut(key) {
            Some(license) if license.credits >= amount => {
                license.credits -= amount;
                Ok(Some(license.credits))
            }
            _ => Ok(None),
        }
    }

    pub(super) fn extend_license(
        &self,
        key: &str,
        tier: Tier,
        additional_credits: i64,
        expires_at: NaiveDateTime,
    ) -> LicenseResult<bool> {
        let mut map = self.write()?;
        let Some(current) = map.get(key) else {
            return Ok(false);
        };

        let mut extended = current.clone();
        extended.tier = tier;
        extended.credits = checked_credit_sum(current.credits, additional_credits)?;
        extended.expires_at = Some(expires_at);
        if violates_trial_claim(&map, &extended) {
            return Err(LicenseError::TrialAlreadyIssued);
        }

        map.insert(key.to_string(), extended);
        Ok(true)
    }

    pub(super) fn update_license(&self, key: &str, update: &LicenseUpdate) -> LicenseResult<bool> {
        let mut map = self.write()?;
        let Some(current) = map.get(key) else {
            return Ok(false);
        };

        let mut edited = current.clone();
        update.apply(&mut edited);
        if violates_trial_claim(&map, &edited) {
            return Err(LicenseError::TrialAlreadyIssued);
        }

        map.insert(key.to_string(), edited);
        Ok(true)
    }

    pub(super) fn revoke_license(&self, key: &str) -> LicenseResult<bool> {
        let mut map = self.write()?;
        Ok(map
            .get_mut(key)
            .map(|license| license.active = false)
            .is_some())
    }

    pub(super) fn reset_hwid(&self, key: &str) -> LicenseResult<bool> {
        let mut map = self.write()?;
        Ok(map.get_mut(key).map(|license| license.hwid = None).is_some())
    }

    pub(super) fn delete_license(&self, key: &str) -> LicenseResult<bool> {
        Ok(self.write()?.remove(key).is_some())
    }

    pub(super) fn scan_expired(&self, now: NaiveDateTime) -> LicenseResult<ExpiredScan> {
        let map = self.read()?;
        let mut expired: Vec<License> = map
            .values()
            .filter(|license| license.is_expired_at(now))
            .cloned()
            .collect();
        sort_licenses(&mut expired);

        // Typed records cannot hold a malformed expiry.
        Ok(ExpiredScan {
            expired,
            integrity_warnings: Vec::new(),
        })
    }

    pub(super) fn query_licenses(&self, filter: &LicenseFilter) -> LicenseResult<Vec<License>> {
        let map = self.read()?;
        let mut found: Vec<License> = map
            .values()
            .filter(|license| filter.matches(license))
            .cloned()
            .collect();
        sort_licenses(&mut found);
        Ok(found)
    }
}

/// Mirrors the SQLite partial unique indexes: among trial records, machine
/// ids and issued-to identities are unique.
fn violates_trial_claim(map: &HashMap<String, License>, candidate: &License) -> bool {
    if candidate.tier != Tier::Trial {
        return false;
    }
    map.values()
        .filter(|other| other.key != candidate.key && other.tier == Tier::Trial)
        .any(|other| {
            other.issued_to == candidate.issued_to
                || (candidate.machine_id.is_some() && other.machine_id == candidate.machine_id)
        })
}

fn sort_licenses(licenses: &mut [License]) {
    licenses.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key.cmp(&b.key)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeDelta};

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 5, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn license(key: &str, tier: Tier, issued_to: &str, machine_id: Option<&str>) -> License {
        License {
            key: key.to_string(),
            tier,
            credits: 100,
            issued_to: issued_to.to_string(),
            created_at: now(),
            expires_at: None,
            hwid: None,
            active: true,
            machine_id: machine_id.map(String::from),
        }
    }

    #[test]
    fn duplicate_key_is_a_conflict() {
        let store = MemoryStore::new();
        store
            .insert_license(&license("K1", Tier::Lite, "alice", None))
            .unwrap();
        let err = store
            .insert_license(&license("K1", Tier::Premium, "bob", None))
            .unwrap_err();
        assert!(matches!(err, LicenseError::Conflict(_)));
    }

    #[test]
    fn trial_claims_are_unique_per_machine_and_identity() {
        let store = MemoryStore::new();
        store
            .insert_license(&license("T1", Tier::Trial, "alice", Some("m1")))
            .unwrap();

        let same_machine = store.insert_license(&license("T2", Tier::Trial, "bob", Some("m1")));
        assert!(matches!(same_machine, Err(LicenseError::TrialAlreadyIssued)));

        let same_identity =
            store.insert_license(&license("T3", Tier::Trial, "alice", Some("m2")));
        assert!(matches!(same_identity, Err(LicenseError::TrialAlreadyIssued)));

        // Paid keys are not subject to trial dedup.
        store
            .insert_license(&license("P1", Tier::Lite, "alice", None))
            .unwrap();
    }

    #[test]
    fn bind_is_compare_and_set() {
        let store = MemoryStore::new();
        store
            .insert_license(&license("K1", Tier::Lite, "alice", None))
            .unwrap();

        assert!(store.bind_hwid("K1", "hw-a").unwrap());
        assert!(!store.bind_hwid("K1", "hw-b").unwrap());
        assert_eq!(
            store.get_license("K1").unwrap().unwrap().hwid.as_deref(),
            Some("hw-a")
        );
        assert!(!store.bind_hwid("missing", "hw-a").unwrap());
    }

    #[test]
    fn consume_never_overdraws() {
        let store = MemoryStore::new();
        store
            .insert_license(&license("K1", Tier::Lite, "alice", None))
            .unwrap();

        assert_eq!(store.consume_credits("K1", 60).unwrap(), Some(40));
        assert_eq!(store.consume_credits("K1", 60).unwrap(), None);
        assert_eq!(store.get_license("K1").unwrap().unwrap().credits, 40);
    }

    #[test]
    fn scan_expired_is_strict_and_sorted() {
        let store = MemoryStore::new();
        let mut a = license("A", Tier::Lite, "a", None);
        a.expires_at = Some(now() - TimeDelta::seconds(1));
        let mut b = license("B", Tier::Lite, "b", None);
        b.expires_at = Some(now());
        store.insert_license(&a).unwrap();
        store.insert_license(&b).unwrap();

        let scan = store.scan_expired(now()).unwrap();
        assert_eq!(scan.expired.len(), 1);
        assert_eq!(scan.expired[0].key, "A");
    }
}
