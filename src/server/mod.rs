//! HTTP surface for Spectre.
//!
//! This module contains:
//! - `handlers`    → `AppState`, status and health
//! - `client_api`  → verify, trial and consume endpoints
//! - `admin`       → admin endpoints gated by `X-Admin-Secret`
//! - `api_error`   → standardized error body and status mapping
//! - `extract`     → JSON and query extractors rejecting with `ApiError`
//! - `logging`     → request logging middleware
//! - `routes`      → router builder

pub mod admin;
pub mod api_error;
pub mod client_api;
pub mod extract;
pub mod handlers;
pub mod logging;
pub mod routes;

pub use admin::ADMIN_SECRET_HEADER;
pub use api_error::{ApiError, ErrorBody, ErrorCode};
pub use client_api::{
    ConsumeRequest, ConsumeResponse, TrialRequest, TrialResponse, VerifyRequest, VerifyResponse,
};
pub use extract::{ApiJson, ApiQuery};
pub use handlers::AppState;
pub use logging::{HealthResponse, REQUEST_ID_HEADER};
pub use routes::build_router;
