//! Background job scheduler for Spectre.
//!
//! Requires the `background-jobs` feature.
//!
//! # Available Jobs
//!
//! - **Expired License Scan**: lists licenses whose expiry has passed and
//!   reports every record with an undecodable expiry as an integrity warning.
//!   Expired licenses are left in place; verification already denies them.
//!
//! # Usage
//!
//! ```rust,ignore
//! use spectre::jobs::JobScheduler;
//!
//! let scheduler = JobScheduler::new(engine, &config.jobs).await?;
//! scheduler.start().await?;
//! ```

use tokio_cron_scheduler::{Job, JobScheduler as TokioJobScheduler};
use tracing::{error, info, warn};

use crate::config::JobsConfig;
use crate::engine::LicenseEngine;
use crate::store::ExpiredScan;

mod expired_scan;

pub use expired_scan::run_expired_scan;

/// Background job scheduler for Spectre.
pub struct JobScheduler {
    scheduler: TokioJobScheduler,
    engine: LicenseEngine,
    config: JobsConfig,
}

impl JobScheduler {
    pub async fn new(engine: LicenseEngine, config: &JobsConfig) -> Result<Self, JobError> {
        let scheduler = TokioJobScheduler::new()
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        Ok(Self {
            scheduler,
            engine,
            config: config.clone(),
        })
    }

    /// Register the jobs and start the scheduler.
    pub async fn start(&self) -> Result<(), JobError> {
        info!("Starting Spectre job scheduler");

        self.add_expired_scan_job().await?;

        self.scheduler
            .start()
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        info!("Spectre job scheduler started successfully");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), JobError> {
        info!("Shutting down Spectre job scheduler");
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;
        Ok(())
    }

    async fn add_expired_scan_job(&self) -> Result<(), JobError> {
        let engine = self.engine.clone();

        let job = Job::new_async(self.config.expired_scan_cron.as_str(), move |_uuid, _l| {
            let engine = engine.clone();
            Box::pin(async move {
                info!("Running expired license scan at {}", engine.now());

                match run_expired_scan(&engine).await {
                    Ok(scan) => {
                        if !scan.integrity_warnings.is_empty() {
                            warn!(
                                "Expired license scan: {} integrity warnings",
                                scan.integrity_warnings.len()
                            );
                        }
                    }
                    Err(e) => {
                        error!("Expired license scan failed: {}", e);
                    }
                }
            })
        })
        .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        info!(
            "Added expired license scan job (schedule: {})",
            self.config.expired_scan_cron
        );

        Ok(())
    }

    /// Run the expired scan immediately (manual triggers and tests).
    pub async fn run_expired_scan_now(&self) -> Result<ExpiredScan, JobError> {
        run_expired_scan(&self.engine).await
    }
}

/// Errors that can occur in the job scheduler.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl From<crate::errors::LicenseError> for JobError {
    fn from(err: crate::errors::LicenseError) -> Self {
        JobError::StorageError(err.to_string())
    }
}
