//! Admin API handlers for license management.
//!
//! Every endpoint requires the shared admin secret in the `X-Admin-Secret`
//! header. The secret is checked before the request touches the store, so an
//! unauthorized caller learns nothing about which keys exist.
//!
//! # Endpoints
//!
//! - `POST /api/v1/licenses` - Issue a license
//! - `GET /api/v1/licenses?tier=&issued_to=&active=&key=` - Query licenses
//! - `GET /api/v1/licenses/expired` - List expired licenses
//! - `GET /api/v1/licenses/{key}` - License stats
//! - `PATCH /api/v1/licenses/{key}` - Edit fields
//! - `DELETE /api/v1/licenses/{key}` - Delete a license
//! - `POST /api/v1/licenses/{key}/extend` - Extend tier, credits and expiry
//! - `POST /api/v1/licenses/{key}/revoke` - Revoke a license
//! - `POST /api/v1/licenses/{key}/reset-hwid` - Clear the hardware binding

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::admin::AdminSession;
use crate::engine::{IssueRequest, LicenseStats};
use crate::errors::LicenseResult;
use crate::server::api_error::ApiError;
use crate::server::extract::{ApiJson, ApiQuery};
use crate::server::handlers::AppState;
use crate::store::{ExpiredScan, License, LicenseFilter, LicenseUpdate};
use crate::tiers::Tier;
use crate::validation::parse_datetime;

/// Header carrying the shared admin secret.
pub const ADMIN_SECRET_HEADER: &str = "X-Admin-Secret";

fn admin_session<'a>(state: &'a AppState, headers: &HeaderMap) -> LicenseResult<AdminSession<'a>> {
    let presented = headers
        .get(ADMIN_SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    state.admin.authorize(presented)
}

fn parse_optional_datetime(
    value: Option<&str>,
    field: &str,
) -> LicenseResult<Option<NaiveDateTime>> {
    Ok(value.map(|v| parse_datetime(v, field)).transpose()?)
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct IssueLicenseRequest {
    pub tier: String,
    pub credits: i64,
    pub issued_to: String,
    /// Use this key instead of generating one
    #[serde(default)]
    pub key: Option<String>,
    /// Expiration date (ISO 8601 format: "2025-12-31T23:59:59")
    #[serde(default)]
    pub expires_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IssueLicenseResponse {
    pub key: String,
    pub license: License,
}

#[derive(Debug, Default, Deserialize)]
pub struct EditLicenseRequest {
    pub tier: Option<String>,
    pub credits: Option<i64>,
    pub issued_to: Option<String>,
    pub expires_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExtendLicenseRequest {
    pub tier: String,
    #[serde(default)]
    pub additional_credits: i64,
}

#[derive(Debug, Serialize)]
pub struct ExtendLicenseResponse {
    pub key: String,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListLicensesQuery {
    pub tier: Option<String>,
    pub issued_to: Option<String>,
    pub active: Option<bool>,
    pub key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListLicensesResponse {
    pub count: usize,
    pub licenses: Vec<License>,
}

#[derive(Debug, Serialize)]
pub struct AdminActionResponse {
    pub success: bool,
    pub key: String,
}

impl AdminActionResponse {
    fn ok(key: &str) -> Json<Self> {
        Json(Self {
            success: true,
            key: key.to_string(),
        })
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// `POST /api/v1/licenses`
pub async fn issue_license_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<IssueLicenseRequest>,
) -> Result<(StatusCode, Json<IssueLicenseResponse>), ApiError> {
    let admin = admin_session(&state, &headers)?;

    let tier = Tier::parse_persistable(&req.tier, "tier")?;
    let mut request = IssueRequest::new(tier, req.credits, req.issued_to);
    if let Some(key) = req.key {
        request = request.with_key(key);
    }
    if let Some(expires_at) = parse_optional_datetime(req.expires_at.as_deref(), "expires_at")? {
        request = request.with_expiry(expires_at);
    }

    let license = admin.issue(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(IssueLicenseResponse {
            key: license.key.clone(),
            license,
        }),
    ))
}

/// `GET /api/v1/licenses`
pub async fn list_licenses_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<ListLicensesQuery>,
) -> Result<Json<ListLicensesResponse>, ApiError> {
    let admin = admin_session(&state, &headers)?;

    let tier = query
        .tier
        .as_deref()
        .map(|t| Tier::parse_persistable(t, "tier"))
        .transpose()?;
    let filter = LicenseFilter {
        tier,
        issued_to: query.issued_to,
        active: query.active,
        key: query.key,
    };

    let licenses = admin.query(&filter).await?;
    Ok(Json(ListLicensesResponse {
        count: licenses.len(),
        licenses,
    }))
}

/// `GET /api/v1/licenses/expired`
pub async fn list_expired_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ExpiredScan>, ApiError> {
    let admin = admin_session(&state, &headers)?;
    Ok(Json(admin.list_expired().await?))
}

/// `GET /api/v1/licenses/{key}`
pub async fn license_stats_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<Json<LicenseStats>, ApiError> {
    let admin = admin_session(&state, &headers)?;
    Ok(Json(admin.stats(&key).await?))
}

/// `PATCH /api/v1/licenses/{key}`
pub async fn edit_license_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
    ApiJson(req): ApiJson<EditLicenseRequest>,
) -> Result<Json<AdminActionResponse>, ApiError> {
    let admin = admin_session(&state, &headers)?;

    let tier = req
        .tier
        .as_deref()
        .map(|t| Tier::parse_persistable(t, "tier"))
        .transpose()?;
    let update = LicenseUpdate {
        tier,
        credits: req.credits,
        issued_to: req.issued_to,
        expires_at: parse_optional_datetime(req.expires_at.as_deref(), "expires_at")?,
    };

    admin.edit(&key, update).await?;
    Ok(AdminActionResponse::ok(&key))
}

/// `DELETE /api/v1/licenses/{key}`
pub async fn delete_license_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<Json<AdminActionResponse>, ApiError> {
    let admin = admin_session(&state, &headers)?;
    admin.delete(&key).await?;
    Ok(AdminActionResponse::ok(&key))
}

/// `POST /api/v1/licenses/{key}/extend`
pub async fn extend_license_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
    ApiJson(req): ApiJson<ExtendLicenseRequest>,
) -> Result<Json<ExtendLicenseResponse>, ApiError> {
    let admin = admin_session(&state, &headers)?;

    let tier = Tier::parse_persistable(&req.tier, "tier")?;
    let expires_at = admin.extend(&key, tier, req.additional_credits).await?;

    Ok(Json(ExtendLicenseResponse { key, expires_at }))
}

/// `POST /api/v1/licenses/{key}/revoke`
pub async fn revoke_license_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<Json<AdminActionResponse>, ApiError> {
    let admin = admin_session(&state, &headers)?;
    admin.revoke(&key).await?;
    Ok(AdminActionResponse::ok(&key))
}

/// `POST /api/v1/licenses/{key}/reset-hwid`
pub async fn reset_hwid_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<Json<AdminActionResponse>, ApiError> {
    let admin = admin_session(&state, &headers)?;
    admin.reset_hwid(&key).await?;
    Ok(AdminActionResponse::ok(&key))
}
