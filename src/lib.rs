//! Spectre - license key issuance, hardware binding and credit metering
//!
//! # Features
//!
//! - `server` - HTTP surface (axum router, handlers). Enabled by default.
//! - `sqlite` - SQLite license store. Enabled by default.
//! - `background-jobs` - Periodic expired-license scan.
//!
//! The in-process [`store::MemoryStore`] is always available.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use spectre::config::SpectreConfig;
//! use spectre::engine::{IssueRequest, LicenseEngine};
//! use spectre::store::Database;
//! use spectre::tiers::Tier;
//!
//! # async fn demo() -> spectre::errors::LicenseResult<()> {
//! let engine = LicenseEngine::new(Arc::new(Database::memory()), &SpectreConfig::default())?;
//! let license = engine.issue(IssueRequest::new(Tier::Lite, 100, "alice")).await?;
//! let outcome = engine.verify(&license.key, Some("machine-a")).await?;
//! assert!(outcome.is_valid());
//! # Ok(())
//! # }
//! ```

// Core modules (always available)
pub mod admin;
pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod license_key;
pub mod logging;
pub mod store;
pub mod tiers;
pub mod validation;

// Server-related modules (requires "server" feature)
#[cfg(feature = "server")]
#[path = "server/mod.rs"]
pub mod server;

// Scheduled jobs (requires "background-jobs" feature)
#[cfg(feature = "background-jobs")]
pub mod jobs;
