//! Client API endpoints.
//!
//! Used by client applications; no admin secret required.
//!
//! # Endpoints
//!
//! - `POST /api/v1/verify` - Verify a key, binding it on first use
//! - `POST /api/v1/trial` - Issue the one trial a machine is allowed
//! - `POST /api/v1/consume` - Consume credits from a key

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::engine::{DenyReason, VerifyOutcome};
use crate::server::api_error::ApiError;
use crate::server::extract::ApiJson;
use crate::server::handlers::AppState;
use crate::tiers::Tier;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub key: String,
    /// Machine identity. Absent or blank skips hardware binding.
    #[serde(default)]
    pub hwid: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bound: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenyReason>,
}

impl From<VerifyOutcome> for VerifyResponse {
    fn from(outcome: VerifyOutcome) -> Self {
        match outcome {
            VerifyOutcome::Valid {
                tier,
                credits,
                bound,
            } => Self {
                valid: true,
                tier: Some(tier),
                credits: Some(credits),
                bound: Some(bound),
                reason: None,
            },
            VerifyOutcome::Denied(reason) => Self {
                valid: false,
                tier: None,
                credits: None,
                bound: None,
                reason: Some(reason),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TrialRequest {
    pub machine_id: String,
    pub issued_to: String,
}

#[derive(Debug, Serialize)]
pub struct TrialResponse {
    pub key: String,
    pub tier: Tier,
    pub credits: i64,
    pub expires_at: Option<NaiveDateTime>,
}

#[derive(Debug, Deserialize)]
pub struct ConsumeRequest {
    pub key: String,
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct ConsumeResponse {
    pub key: String,
    pub consumed: i64,
    pub remaining: i64,
}

// ============================================================================
// Handlers
// ============================================================================

/// `POST /api/v1/verify`
///
/// Valid keys answer 200. Denials answer 403 with `{"valid": false, "reason"}`.
pub async fn verify_handler(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<VerifyRequest>,
) -> Result<Response, ApiError> {
    let outcome = state.engine.verify(&req.key, req.hwid.as_deref()).await?;

    let status = if outcome.is_valid() {
        StatusCode::OK
    } else {
        StatusCode::FORBIDDEN
    };
    Ok((status, Json(VerifyResponse::from(outcome))).into_response())
}

/// `POST /api/v1/trial`
pub async fn trial_handler(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<TrialRequest>,
) -> Result<(StatusCode, Json<TrialResponse>), ApiError> {
    let license = state
        .engine
        .issue_trial(&req.machine_id, &req.issued_to)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(TrialResponse {
            key: license.key,
            tier: license.tier,
            credits: license.credits,
            expires_at: license.expires_at,
        }),
    ))
}

/// `POST /api/v1/consume`
pub async fn consume_handler(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ConsumeRequest>,
) -> Result<Json<ConsumeResponse>, ApiError> {
    let remaining = state.engine.consume(&req.key, req.amount).await?;

    Ok(Json(ConsumeResponse {
        key: req.key.trim().to_string(),
        consumed: req.amount,
        remaining,
    }))
}
