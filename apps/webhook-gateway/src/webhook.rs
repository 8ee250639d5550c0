//! `GET|POST /webhook/{platform}/`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json,
    body::to_bytes,
    extract::{Path, Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use metrics::counter;
use serde_json::{Value, json};
use tracing::{Instrument, debug, info_span, warn};
use ucg_core::platforms::webform::{PLATFORM as WEBFORM, Submitter};
use ucg_core::{
    AdapterError, Delivery, InboundRequest, OutboundRequest, PlatformAdapter, TokenRequest,
    conversation_id,
};

use security::OrgContext;

use crate::error::ApiError;
use crate::state::AppState;

/// Largest webhook body read into memory.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
    Token,
    Close,
}

impl Direction {
    /// Reads `direction` from a JSON body; anything unrecognised is an ingest.
    pub fn of(payload: Option<&Value>) -> Self {
        match payload
            .and_then(|p| p.get("direction"))
            .and_then(Value::as_str)
        {
            Some("outgoing") => Direction::Outgoing,
            Some("token") => Direction::Token,
            Some("close") => Direction::Close,
            _ => Direction::Incoming,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
            Direction::Token => "token",
            Direction::Close => "close",
        }
    }
}

pub async fn verify(
    State(state): State<Arc<AppState>>,
    Path(platform): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let adapter = state.registry.get(&platform)?;
    let request = InboundRequest::get(query);
    Ok(match adapter.handle_verification(&request) {
        Some(reply) => reply.into_response(),
        None => (StatusCode::OK, "Verification not required").into_response(),
    })
}

pub async fn receive(
    State(state): State<Arc<AppState>>,
    Path(platform): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let adapter = state.registry.get(&platform)?;
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|err| ApiError::validation(format!("unreadable body: {err}")))?;
    let payload: Option<Value> = serde_json::from_slice(&body).ok();
    let direction = Direction::of(payload.as_ref());
    let platform = adapter.name().to_string();

    // The gate layer matches on the raw path; re-check on the resolved name.
    let org = if platform == WEBFORM {
        match parts.extensions.get::<OrgContext>() {
            Some(org) => Some(org.clone()),
            None => match state.gate.authenticate(&parts.headers).await {
                Ok(org) => Some(org),
                Err(rejection) => {
                    warn!(path = %parts.uri.path(), "web-form request without organisation");
                    return Ok(rejection.into_response());
                }
            },
        }
    } else {
        None
    };

    counter!(
        "ucg_webhook_requests_total",
        "platform" => platform.clone(),
        "direction" => direction.as_str()
    )
    .increment(1);

    let span = info_span!("webhook", platform = %platform, direction = direction.as_str());
    async move {
        match direction {
            Direction::Outgoing => outgoing(&state, adapter.as_ref(), payload).await,
            Direction::Token => token(adapter.as_ref(), payload).await,
            Direction::Close => close(&state, &platform, payload).await,
            Direction::Incoming if platform == WEBFORM => {
                webform(&state, org.as_ref(), payload).await
            }
            Direction::Incoming => {
                let inbound = InboundRequest::post(parts.headers, body);
                incoming(&state, adapter.as_ref(), &inbound).await
            }
        }
    }
    .instrument(span)
    .await
}

async fn incoming(
    state: &AppState,
    adapter: &dyn PlatformAdapter,
    request: &InboundRequest,
) -> Result<Response, ApiError> {
    let outcomes = state.pipeline.ingest(adapter, request).await?;
    debug!(messages = outcomes.len(), "webhook processed");
    let deliveries: Vec<Delivery> = outcomes.into_iter().map(|o| o.delivery).collect();
    Ok(adapter.format_webhook_response(&deliveries).into_response())
}

async fn webform(
    state: &AppState,
    org: Option<&OrgContext>,
    payload: Option<Value>,
) -> Result<Response, ApiError> {
    let payload = payload.ok_or_else(|| ApiError::validation("Invalid JSON payload"))?;
    let submitter = org.map(|org| Submitter {
        org_id: org.org_id.clone(),
        org_name: org.org_name.clone(),
    });
    Ok(state
        .webform
        .submit(&state.pipeline, &payload, submitter.as_ref())
        .await
        .into_response())
}

async fn outgoing(
    state: &AppState,
    adapter: &dyn PlatformAdapter,
    payload: Option<Value>,
) -> Result<Response, ApiError> {
    let payload = payload.ok_or_else(|| ApiError::validation("Invalid JSON payload"))?;
    let request = OutboundRequest::from_payload(&payload)
        .map_err(|err| ApiError::validation(err.to_string()))?;

    let delivery = match adapter.send_message(&request).await {
        Ok(delivery) => delivery,
        Err(AdapterError::Unsupported(_)) => {
            return Err(ApiError::validation(format!(
                "Sending messages not supported for platform: {}",
                adapter.name()
            )));
        }
        Err(err) => return Err(err.into()),
    };

    if let Err(err) = state
        .conversations()
        .get_or_create(&request.recipient, adapter.name())
        .await
    {
        warn!(error = %err, "conversation not recorded after send");
    }

    if delivery.is_error() {
        let message = delivery
            .error
            .clone()
            .or_else(|| delivery.message.clone())
            .unwrap_or_else(|| "Failed to send message".to_string());
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "error", "message": message })),
        )
            .into_response());
    }

    let mut body = json!({
        "status": "success",
        "message_id": delivery.message_id,
        "message": delivery.message.as_deref().unwrap_or("Message sent successfully"),
    });
    if let Some(data) = delivery.data {
        body["data"] = data;
    }
    Ok(Json(body).into_response())
}

fn token_error(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "status": "error", "error": message.into() })),
    )
        .into_response()
}

async fn token(adapter: &dyn PlatformAdapter, payload: Option<Value>) -> Result<Response, ApiError> {
    let payload = payload.ok_or_else(|| ApiError::validation("Invalid JSON payload"))?;
    let request = match TokenRequest::from_payload(&payload) {
        Ok(request) => request,
        Err(err) => return Ok(token_error(err.to_string())),
    };
    match adapter.generate_token(&request).await {
        Ok(delivery) if delivery.is_error() => Ok((
            StatusCode::BAD_GATEWAY,
            Json(delivery.to_value()),
        )
            .into_response()),
        Ok(delivery) => Ok(Json(delivery.to_value()).into_response()),
        Err(AdapterError::Unsupported(_)) => Ok(token_error(format!(
            "Token operations not supported for {}",
            adapter.name()
        ))),
        Err(err) => Err(err.into()),
    }
}

async fn close(state: &AppState, platform: &str, payload: Option<Value>) -> Result<Response, ApiError> {
    let sender = payload
        .as_ref()
        .and_then(|p| p.get("sender_id"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::validation("sender_id is required"))?;
    let closed = state
        .conversations()
        .close(&conversation_id(platform, sender))
        .await?;
    Ok(Json(json!({ "status": "success", "closed": closed })).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_defaults_to_incoming() {
        assert_eq!(Direction::of(None), Direction::Incoming);
        assert_eq!(Direction::of(Some(&json!({"entry": []}))), Direction::Incoming);
        assert_eq!(
            Direction::of(Some(&json!({"direction": "sideways"}))),
            Direction::Incoming
        );
        assert_eq!(
            Direction::of(Some(&json!({"direction": "outgoing"}))),
            Direction::Outgoing
        );
        assert_eq!(Direction::of(Some(&json!({"direction": "token"}))), Direction::Token);
        assert_eq!(Direction::of(Some(&json!({"direction": "close"}))), Direction::Close);
    }
}
