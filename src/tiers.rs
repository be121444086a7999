//! License tiers and the hardware-binding policy attached to them.
//!
//! Four tiers are persisted: `trial`, `lite`, `premium` and `custom`.
//! `master` is virtual: it is reported for the configured master key and can
//! never be stored.
//!
//! # Configuration
//!
//! Tiers that never lock to a machine are listed in `config.toml`:
//!
//! ```toml
//! [license]
//! unlocked_tiers = ["custom"]
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::validation::ValidationError;

/// Credits reported for the virtual master tier.
pub const MASTER_CREDITS: i64 = 999_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Trial,
    Lite,
    Premium,
    Custom,
    /// Virtual tier for the master key. Never persisted.
    Master,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Trial => "trial",
            Tier::Lite => "lite",
            Tier::Premium => "premium",
            Tier::Custom => "custom",
            Tier::Master => "master",
        }
    }

    /// Returns true for tiers that may be stored on a license record.
    pub fn is_persistable(&self) -> bool {
        !matches!(self, Tier::Master)
    }

    /// Parse a tier supplied by a caller, rejecting `master`.
    pub fn parse_persistable(value: &str, field_name: &str) -> Result<Tier, ValidationError> {
        let tier: Tier = value
            .parse()
            .map_err(|e: ValidationError| ValidationError::new(field_name, e.message))?;
        if tier.is_persistable() {
            Ok(tier)
        } else {
            Err(ValidationError::new(
                field_name,
                "the master tier cannot be issued",
            ))
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trial" => Ok(Tier::Trial),
            "lite" => Ok(Tier::Lite),
            "premium" => Ok(Tier::Premium),
            "custom" => Ok(Tier::Custom),
            "master" => Ok(Tier::Master),
            other => Err(ValidationError::new(
                "tier",
                format!("unknown tier '{other}' (expected trial, lite, premium or custom)"),
            )),
        }
    }
}

/// Decides which tiers take part in hardware binding.
///
/// By default every tier binds once a caller presents a non-empty hwid.
/// Tiers listed as unlocked skip binding and mismatch checks entirely.
#[derive(Debug, Clone, Default)]
pub struct BindingPolicy {
    unlocked: Vec<Tier>,
}

impl BindingPolicy {
    pub fn new(unlocked: impl IntoIterator<Item = Tier>) -> Self {
        Self {
            unlocked: unlocked.into_iter().collect(),
        }
    }

    pub fn requires_binding(&self, tier: Tier) -> bool {
        !self.unlocked.contains(&tier)
    }
}
