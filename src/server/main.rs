use tracing::{error, info};

use spectre::admin::AdminOps;
use spectre::config::init_config;
use spectre::engine::LicenseEngine;
use spectre::errors::{LicenseError, LicenseResult};
use spectre::logging::init_tracing;
use spectre::server::{build_router, AppState};
use spectre::store::Database;

#[cfg(feature = "background-jobs")]
use spectre::jobs::JobScheduler;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Spectre server failed: {e}");
        eprintln!("spectre_server: {e}");
        std::process::exit(1);
    }
}

async fn run() -> LicenseResult<()> {
    let config = init_config()?;
    init_tracing(&config.logging);

    let store = Database::new().await?;
    let engine = LicenseEngine::new(store, config)?;
    let admin = AdminOps::new(engine.clone(), config.admin.secret.as_ref());

    if config.license.master_key.is_none() {
        info!("No master key configured");
    }
    if config.admin.secret.is_none() {
        info!("No admin secret configured; admin endpoints will reject every call");
    }

    #[cfg(feature = "background-jobs")]
    let _scheduler = {
        let scheduler = JobScheduler::new(engine.clone(), &config.jobs)
            .await
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?;
        scheduler
            .start()
            .await
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?;
        scheduler
    };

    let app = build_router(AppState::new(engine, admin));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        LicenseError::ServerError(format!("failed to bind {addr}: {e}"))
    })?;
    info!("Spectre listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| LicenseError::ServerError(e.to_string()))
}
