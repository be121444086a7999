//! Structured license event logging and subscriber setup.
//!
//! Engine operations report state changes through [`log_license_event`] so
//! audit lines share one span shape:
//!
//! ```text
//! license_event{event=bound key=SPK-...}: License event occurred details=hwid=...
//! ```

use tracing::{info, info_span, warn, Level};

use crate::config::LoggingConfig;

/// License state change event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseEvent {
    /// License was issued by an admin
    Issued,
    /// Trial license was issued to a machine
    TrialIssued,
    /// License was bound to a machine on first verification
    Bound,
    /// License verified successfully
    Verified,
    /// License verification failed
    VerificationFailed,
    /// Credits were consumed
    CreditsConsumed,
    /// Tier, credits or expiry were extended
    Extended,
    /// Fields were edited by an admin
    Edited,
    /// License was revoked
    Revoked,
    /// License was deleted
    Deleted,
    /// Hardware binding was cleared by an admin
    HwidReset,
}

impl std::fmt::Display for LicenseEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LicenseEvent::Issued => "issued",
            LicenseEvent::TrialIssued => "trial_issued",
            LicenseEvent::Bound => "bound",
            LicenseEvent::Verified => "verified",
            LicenseEvent::VerificationFailed => "verification_failed",
            LicenseEvent::CreditsConsumed => "credits_consumed",
            LicenseEvent::Extended => "extended",
            LicenseEvent::Edited => "edited",
            LicenseEvent::Revoked => "revoked",
            LicenseEvent::Deleted => "deleted",
            LicenseEvent::HwidReset => "hwid_reset",
        };
        write!(f, "{}", s)
    }
}

/// Log a license state change event.
///
/// Failed verifications log at `warn`, everything else at `info`.
pub fn log_license_event(event: LicenseEvent, key: &str, details: Option<&str>) {
    let span = info_span!("license_event", event = %event, key = %key);
    let _enter = span.enter();

    match event {
        LicenseEvent::VerificationFailed => {
            if let Some(d) = details {
                warn!(reason = %d, "License event occurred");
            } else {
                warn!("License event occurred");
            }
        }
        _ => {
            if let Some(d) = details {
                info!(details = %d, "License event occurred");
            } else {
                info!("License event occurred");
            }
        }
    }
}

/// Map a configured level name onto a tracing [`Level`], defaulting to INFO.
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install the global fmt subscriber if logging is enabled.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing(config: &LoggingConfig) {
    if !config.enabled {
        return;
    }

    let _ = tracing_subscriber::fmt()
        .with_max_level(parse_level(&config.level))
        .with_target(false)
        .try_init();
}
