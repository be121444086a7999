//! Request logging middleware and health payloads.
//!
//! Every request gets a UUID request id, a tracing span carrying it, and a
//! completion line with status and duration. The id is echoed back in the
//! `X-Request-Id` response header.

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderValue, Response},
    middleware::Next,
};
use serde::Serialize;
use std::time::Instant;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// Header name for the request ID.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Logging middleware that tracks request timing and generates request IDs.
pub async fn request_logging_middleware(request: Request, next: Next) -> Response<Body> {
    let request_id = generate_request_id();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    let start = Instant::now();

    let response = async move {
        info!("Started processing request");
        next.run(request).await
    }
    .instrument(span.clone())
    .await;

    let duration = start.elapsed();
    let status = response.status();

    let _enter = span.enter();
    info!(
        status = %status.as_u16(),
        duration_ms = %duration.as_millis(),
        "Request completed"
    );

    let (mut parts, body) = response.into_parts();
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        parts.headers.insert(REQUEST_ID_HEADER, header_value);
    }

    Response::from_parts(parts, body)
}

/// Health check response structure.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// "healthy" or "degraded"
    pub status: String,
    pub service: String,
    pub version: String,
    pub store: StoreHealth,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    pub connected: bool,
    /// "sqlite" or "memory"
    pub kind: String,
}

impl HealthResponse {
    pub fn from_store(connected: bool, kind: &str) -> Self {
        Self {
            status: if connected { "healthy" } else { "degraded" }.to_string(),
            service: "spectre".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store: StoreHealth {
                connected,
                kind: kind.to_string(),
            },
        }
    }
}
