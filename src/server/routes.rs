use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::server::admin::{
    delete_license_handler, edit_license_handler, extend_license_handler, issue_license_handler,
    license_stats_handler, list_expired_handler, list_licenses_handler, reset_hwid_handler,
    revoke_license_handler,
};
use crate::server::client_api::{consume_handler, trial_handler, verify_handler};
use crate::server::handlers::{health_handler, status_handler, AppState};
use crate::server::logging::request_logging_middleware;

/// Build the main application router for the Spectre server.
///
/// # Routes
///
/// ## Service
/// - `GET /` - Service status
/// - `GET /health` - Health with store connectivity
///
/// ## Client endpoints
/// - `POST /api/v1/verify` - Verify (and bind) a license
/// - `POST /api/v1/trial` - Issue a trial license
/// - `POST /api/v1/consume` - Consume credits
///
/// ## Admin endpoints (`X-Admin-Secret` header)
/// - `POST /api/v1/licenses` - Issue a license
/// - `GET /api/v1/licenses` - Query licenses
/// - `GET /api/v1/licenses/expired` - List expired licenses
/// - `GET /api/v1/licenses/:key` - License stats
/// - `PATCH /api/v1/licenses/:key` - Edit a license
/// - `DELETE /api/v1/licenses/:key` - Delete a license
/// - `POST /api/v1/licenses/:key/extend` - Extend a license
/// - `POST /api/v1/licenses/:key/revoke` - Revoke a license
/// - `POST /api/v1/licenses/:key/reset-hwid` - Clear the hardware binding
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status_handler))
        .route("/health", get(health_handler))
        // Client endpoints
        .route("/api/v1/verify", post(verify_handler))
        .route("/api/v1/trial", post(trial_handler))
        .route("/api/v1/consume", post(consume_handler))
        // Admin endpoints
        .route(
            "/api/v1/licenses",
            post(issue_license_handler).get(list_licenses_handler),
        )
        .route("/api/v1/licenses/expired", get(list_expired_handler))
        .route(
            "/api/v1/licenses/:key",
            get(license_stats_handler)
                .patch(edit_license_handler)
                .delete(delete_license_handler),
        )
        .route("/api/v1/licenses/:key/extend", post(extend_license_handler))
        .route("/api/v1/licenses/:key/revoke", post(revoke_license_handler))
        .route("/api/v1/licenses/:key/reset-hwid", post(reset_hwid_handler))
        .layer(middleware::from_fn(request_logging_middleware))
        .with_state(state)
}
