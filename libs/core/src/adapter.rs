//! The capability set every ingest adapter implements, plus the request and
//! reply values exchanged with the dispatcher.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Json,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::delivery::Delivery;
use crate::message::StandardMessage;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("INVALID_SIGNATURE: {0}")]
    InvalidSignature(String),
    #[error("MALFORMED_PAYLOAD: {0}")]
    MalformedPayload(String),
    #[error("UPSTREAM_FETCH_FAILED: {0}")]
    UpstreamFetchFailed(String),
    #[error("UNSUPPORTED_MESSAGE_TYPE: {0}")]
    UnsupportedMessageType(String),
    #[error("DELIVERY_REJECTED: status {status}: {body}")]
    DeliveryRejected { status: u16, body: String },
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
}

impl AdapterError {
    pub fn code(&self) -> &'static str {
        match self {
            AdapterError::InvalidSignature(_) => "INVALID_SIGNATURE",
            AdapterError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            AdapterError::UpstreamFetchFailed(_) => "UPSTREAM_FETCH_FAILED",
            AdapterError::UnsupportedMessageType(_) => "UNSUPPORTED_MESSAGE_TYPE",
            AdapterError::DeliveryRejected { .. } => "DELIVERY_REJECTED",
            AdapterError::Unsupported(_) => "UNSUPPORTED_OPERATION",
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        AdapterError::MalformedPayload(detail.into())
    }
}

/// Transport-neutral view of an inbound webhook call.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub query: HashMap<String, String>,
    pub body: Bytes,
}

impl InboundRequest {
    pub fn get(query: HashMap<String, String>) -> Self {
        Self {
            method: Method::GET,
            query,
            ..Default::default()
        }
    }

    pub fn post(headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            method: Method::POST,
            headers,
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> Result<Value, AdapterError> {
        serde_json::from_slice(&self.body)
            .map_err(|err| AdapterError::malformed(format!("body is not JSON: {err}")))
    }
}

/// HTTP reply an adapter hands back to its upstream caller.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookReply {
    Empty(StatusCode),
    Text(StatusCode, String),
    Json(StatusCode, Value),
}

impl WebhookReply {
    pub fn ok_empty() -> Self {
        WebhookReply::Empty(StatusCode::OK)
    }

    pub fn ok_json(body: Value) -> Self {
        WebhookReply::Json(StatusCode::OK, body)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            WebhookReply::Empty(status)
            | WebhookReply::Text(status, _)
            | WebhookReply::Json(status, _) => *status,
        }
    }
}

impl IntoResponse for WebhookReply {
    fn into_response(self) -> Response {
        match self {
            WebhookReply::Empty(status) => status.into_response(),
            WebhookReply::Text(status, body) => (status, body).into_response(),
            WebhookReply::Json(status, body) => (status, Json(body)).into_response(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Document => "document",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "image" => Some(MediaKind::Image),
            "audio" => Some(MediaKind::Audio),
            "video" => Some(MediaKind::Video),
            "document" => Some(MediaKind::Document),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundContent {
    Text {
        body: String,
    },
    Media {
        kind: MediaKind,
        link: Option<String>,
        caption: Option<String>,
    },
}

impl OutboundContent {
    pub fn text(body: impl Into<String>) -> Self {
        OutboundContent::Text { body: body.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundContent::Text { .. } => "text",
            OutboundContent::Media { kind, .. } => kind.as_str(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OutboundRequestError {
    #[error("Recipient is required")]
    MissingRecipient,
    #[error("Unsupported message type: {0}")]
    UnsupportedType(String),
}

/// Outbound send request: `{data: {recipient, message_type, content, caption, media_url}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub recipient: String,
    pub content: OutboundContent,
}

impl OutboundRequest {
    pub fn new(recipient: impl Into<String>, content: OutboundContent) -> Self {
        Self {
            recipient: recipient.into(),
            content,
        }
    }

    pub fn from_payload(payload: &Value) -> Result<Self, OutboundRequestError> {
        let data = payload.get("data").unwrap_or(payload);
        let field = |key: &str| {
            data.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let recipient = field("recipient").ok_or(OutboundRequestError::MissingRecipient)?;
        let message_type = field("message_type").unwrap_or_else(|| "text".to_string());
        let content = match message_type.as_str() {
            "text" => OutboundContent::Text {
                body: data
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            other => {
                let kind = MediaKind::parse(other)
                    .ok_or_else(|| OutboundRequestError::UnsupportedType(other.to_string()))?;
                OutboundContent::Media {
                    kind,
                    link: field("media_url"),
                    caption: field("caption"),
                }
            }
        };
        Ok(Self { recipient, content })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenRequestError {
    #[error("Missing required fields: client_id or client_secret")]
    MissingCredentials,
    #[error("Unsupported token operation: {0}")]
    UnsupportedOperation(String),
}

/// Credential bootstrap request (`direction: "token"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub client_id: String,
    pub client_secret: String,
    pub org_id: Option<String>,
}

impl TokenRequest {
    pub fn from_payload(payload: &Value) -> Result<Self, TokenRequestError> {
        let field = |key: &str| {
            payload
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
        };
        let operation = field("operation").unwrap_or_else(|| "refresh".to_string());
        if operation != "refresh" {
            return Err(TokenRequestError::UnsupportedOperation(operation));
        }
        match (field("client_id"), field("client_secret")) {
            (Some(client_id), Some(client_secret)) => Ok(Self {
                client_id,
                client_secret,
                org_id: field("org_id"),
            }),
            _ => Err(TokenRequestError::MissingCredentials),
        }
    }
}

#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Webhook handshake; `None` when the platform has no challenge.
    fn handle_verification(&self, _request: &InboundRequest) -> Option<WebhookReply> {
        None
    }

    fn validate_request(&self, request: &InboundRequest) -> Result<(), AdapterError>;

    async fn parse_messages(
        &self,
        request: &InboundRequest,
    ) -> Result<Vec<StandardMessage>, AdapterError>;

    async fn send_message(&self, _request: &OutboundRequest) -> Result<Delivery, AdapterError> {
        Err(AdapterError::Unsupported("send_message"))
    }

    async fn generate_token(&self, _request: &TokenRequest) -> Result<Delivery, AdapterError> {
        Err(AdapterError::Unsupported("generate_token"))
    }

    /// Lets an adapter answer a parsed message in-process instead of routing it.
    async fn intercept(&self, _message: &StandardMessage) -> Option<Delivery> {
        None
    }

    fn format_webhook_response(&self, processed: &[Delivery]) -> WebhookReply;
}

pub type SharedAdapter = Arc<dyn PlatformAdapter>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outbound_request_requires_recipient() {
        let err = OutboundRequest::from_payload(&json!({"data": {"content": "hi"}})).unwrap_err();
        assert_eq!(err.to_string(), "Recipient is required");
    }

    #[test]
    fn outbound_media_request_keeps_link_and_caption() {
        let request = OutboundRequest::from_payload(&json!({
            "data": {
                "recipient": "2547",
                "message_type": "image",
                "media_url": "https://cdn/x.jpg",
                "caption": "look"
            }
        }))
        .unwrap();
        assert_eq!(
            request.content,
            OutboundContent::Media {
                kind: MediaKind::Image,
                link: Some("https://cdn/x.jpg".into()),
                caption: Some("look".into()),
            }
        );
    }

    #[test]
    fn token_request_validation() {
        assert_eq!(
            TokenRequest::from_payload(&json!({"operation": "refresh", "client_id": "a"})),
            Err(TokenRequestError::MissingCredentials)
        );
        assert_eq!(
            TokenRequest::from_payload(&json!({"operation": "revoke"}))
                .unwrap_err()
                .to_string(),
            "Unsupported token operation: revoke"
        );
        let ok = TokenRequest::from_payload(
            &json!({"operation": "refresh", "client_id": "a", "client_secret": "b"}),
        )
        .unwrap();
        assert_eq!(ok.client_id, "a");
    }
}
