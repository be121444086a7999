//! Admin operations gated by the shared admin secret.
//!
//! [`AdminOps::authorize`] is the only way to obtain an [`AdminSession`], and
//! it never touches the store. A wrong or missing secret is `Unauthorized`
//! whether or not the target key exists.

use chrono::NaiveDateTime;
use tracing::warn;

use crate::config::Secret;
use crate::engine::{digest, matches_digest, IssueRequest, LicenseEngine, LicenseStats};
use crate::errors::{LicenseError, LicenseResult};
use crate::store::{ExpiredScan, License, LicenseFilter, LicenseUpdate};
use crate::tiers::Tier;

#[derive(Debug, Clone)]
pub struct AdminOps {
    engine: LicenseEngine,
    secret_digest: Option<Vec<u8>>,
}

impl AdminOps {
    /// With no secret configured every admin call is unauthorized.
    pub fn new(engine: LicenseEngine, secret: Option<&Secret>) -> Self {
        Self {
            engine,
            secret_digest: secret.map(|s| digest(s.expose())),
        }
    }

    pub fn engine(&self) -> &LicenseEngine {
        &self.engine
    }

    /// Check a presented admin secret.
    pub fn authorize(&self, presented: Option<&str>) -> LicenseResult<AdminSession<'_>> {
        match (&self.secret_digest, presented) {
            (Some(expected), Some(presented)) if matches_digest(presented, expected) => {
                Ok(AdminSession {
                    engine: &self.engine,
                })
            }
            (None, _) => {
                warn!("Admin call rejected: no admin secret configured");
                Err(LicenseError::Unauthorized)
            }
            _ => {
                warn!("Admin call rejected: invalid admin secret");
                Err(LicenseError::Unauthorized)
            }
        }
    }

    /// Clear a key's hardware binding. Authorization comes first.
    pub async fn reset_hwid(&self, admin_secret: Option<&str>, key: &str) -> LicenseResult<()> {
        self.authorize(admin_secret)?.reset_hwid(key).await
    }
}

/// Proof of a successful admin authorization.
#[derive(Debug, Clone, Copy)]
pub struct AdminSession<'a> {
    engine: &'a LicenseEngine,
}

impl AdminSession<'_> {
    pub async fn issue(&self, request: IssueRequest) -> LicenseResult<License> {
        self.engine.issue(request).await
    }

    pub async fn edit(&self, key: &str, update: LicenseUpdate) -> LicenseResult<()> {
        self.engine.edit(key, update).await
    }

    pub async fn extend(
        &self,
        key: &str,
        tier: Tier,
        additional_credits: i64,
    ) -> LicenseResult<NaiveDateTime> {
        self.engine.extend(key, tier, additional_credits).await
    }

    pub async fn revoke(&self, key: &str) -> LicenseResult<()> {
        self.engine.revoke(key).await
    }

    pub async fn delete(&self, key: &str) -> LicenseResult<()> {
        self.engine.delete(key).await
    }

    pub async fn reset_hwid(&self, key: &str) -> LicenseResult<()> {
        self.engine.reset_hwid(key).await
    }

    pub async fn list_expired(&self) -> LicenseResult<ExpiredScan> {
        self.engine.list_expired().await
    }

    pub async fn query(&self, filter: &LicenseFilter) -> LicenseResult<Vec<License>> {
        self.engine.query(filter).await
    }

    pub async fn stats(&self, key: &str) -> LicenseResult<LicenseStats> {
        self.engine.stats(key).await
    }
}
