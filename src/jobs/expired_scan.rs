//! Expired license scan.
//!
//! Reports licenses whose `expires_at` is strictly before the engine clock.
//! Nothing is modified.

use tracing::{debug, info};

use crate::engine::LicenseEngine;
use crate::store::ExpiredScan;

use super::JobError;

/// Scan for expired licenses as of the engine clock.
///
/// Each integrity warning is also logged by the engine at `warn`.
pub async fn run_expired_scan(engine: &LicenseEngine) -> Result<ExpiredScan, JobError> {
    let scan = engine.list_expired().await?;

    for license in &scan.expired {
        debug!(
            "License {} expired at {:?} (issued to {})",
            license.key, license.expires_at, license.issued_to
        );
    }
    if !scan.expired.is_empty() {
        info!("Expired license scan: {} licenses expired", scan.expired.len());
    }

    Ok(scan)
}
