use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminOps;
use crate::engine::LicenseEngine;
use crate::server::logging::HealthResponse;

/// Shared application state for handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub engine: LicenseEngine,
    pub admin: AdminOps,
}

impl AppState {
    /// Admin operations share the engine's store and clock.
    pub fn new(engine: LicenseEngine, admin: AdminOps) -> Self {
        Self { engine, admin }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

/// `GET /`
pub async fn status_handler() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "Spectre License API running.",
    })
}

/// `GET /health`
///
/// Always 200; a store that does not answer reports `degraded`.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = state.engine.store();
    Json(HealthResponse::from_store(store.ping().await, store.kind()))
}
