//! Organisation bootstrap: email OTP, verification and token minting.

use std::sync::Arc;

use axum::{Json, body::Bytes, extract::State};
use serde::Deserialize;
use serde_json::{Value, json};
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};

use security::IssuedToken;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
struct AuthBody {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    organization_name: Option<String>,
    #[serde(default)]
    organization_email: Option<String>,
    #[serde(default)]
    otp: Option<String>,
}

fn parse(body: &Bytes) -> Result<AuthBody, ApiError> {
    serde_json::from_slice(body).map_err(|_| ApiError::validation("Invalid JSON in request body."))
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn token_body(message: &str, issued: &IssuedToken) -> Json<Value> {
    Json(json!({
        "status": "success",
        "message": message,
        "token": issued.token,
        "organization_id": issued.organization_id,
        "expires": issued.expires_rfc3339(),
    }))
}

/// `POST /webform/auth/request-verification/`
pub async fn request_verification(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let body = parse(&body)?;
    let (Some(email), Some(_org)) = (present(&body.email), present(&body.organization_name))
    else {
        return Err(ApiError::validation(
            "Email and organization name are required",
        ));
    };

    let issued = state.otps.issue(email).await?;
    state.notifier.deliver(&issued).await.map_err(|err| {
        warn!(error = %err, "verification code not delivered");
        ApiError::Unavailable("Failed to send verification email".into())
    })?;

    Ok(Json(json!({
        "status": "success",
        "message": "Verification code sent to provided email",
        "email": email,
        "expires_at": issued
            .expires_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| issued.expires_at.unix_timestamp().to_string()),
    })))
}

/// `POST /webform/auth/verify-otp/`
pub async fn verify_otp(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let body = parse(&body)?;
    let (Some(email), Some(otp), Some(org_name)) = (
        present(&body.email),
        present(&body.otp),
        present(&body.organization_name),
    ) else {
        return Err(ApiError::validation(
            "Email, OTP, and organization name are required",
        ));
    };

    state.otps.verify(email, otp).await?;

    let org = state
        .gate
        .organisations()
        .get_or_create(org_name, Some(email))
        .await?;
    let issued = state.gate.signer().mint(&org)?;
    info!(organization_id = %issued.organization_id, "organisation verified");
    Ok(token_body("Email verified successfully", &issued))
}

/// `POST /webform/auth/token/`
pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let body = parse(&body)?;
    let Some(org_name) = present(&body.organization_name) else {
        return Err(ApiError::validation("Organization name is required."));
    };
    let email = present(&body.organization_email).or(present(&body.email));

    let org = state
        .gate
        .organisations()
        .get_or_create(org_name, email)
        .await?;
    let issued = state.gate.signer().mint(&org)?;
    Ok(token_body(
        "Authentication token generated successfully.",
        &issued,
    ))
}
