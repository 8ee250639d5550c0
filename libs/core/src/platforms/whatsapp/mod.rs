//! Meta-style WhatsApp Cloud API adapter.
//!
//! ```text
//! GET  /webhook/whatsapp/?hub.mode=subscribe&hub.verify_token=..&hub.challenge=..
//! POST /webhook/whatsapp/   entry[].changes[].value.messages[]
//! ```

pub mod creds;
pub mod media_cache;
pub mod sender;

use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::adapter::{
    AdapterError, InboundRequest, OutboundRequest, PlatformAdapter, TokenRequest, WebhookReply,
};
use crate::delivery::Delivery;
use crate::message::{MEDIA_DOWNLOAD_KEY, StandardMessage};
use crate::signature::{SIGNATURE_HEADER, verify_hub_signature};
use self::media_cache::MediaCache;

pub use creds::{GraphTokenExchanger, WhatsAppConfig};
pub use sender::{GraphClient, ResolvedMedia};

/// Message kinds the adapter understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaKind {
    Text,
    Image,
    Audio,
    Video,
    Document,
}

impl WaKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "text" => Some(WaKind::Text),
            "image" => Some(WaKind::Image),
            "audio" => Some(WaKind::Audio),
            "video" => Some(WaKind::Video),
            "document" => Some(WaKind::Document),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WaKind::Text => "text",
            WaKind::Image => "image",
            WaKind::Audio => "audio",
            WaKind::Video => "video",
            WaKind::Document => "document",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            WaKind::Text => "text/plain",
            WaKind::Image => "image/jpeg",
            WaKind::Audio => "audio/ogg",
            WaKind::Video => "video/mp4",
            WaKind::Document => "application/pdf",
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            WaKind::Text => "txt",
            WaKind::Image => "jpg",
            WaKind::Audio => "ogg",
            WaKind::Video => "mp4",
            WaKind::Document => "pdf",
        }
    }
}

/// One `messages[]` element with the contact name of its `value` block.
#[derive(Debug, Clone)]
pub struct RawMessage<'a> {
    pub message: &'a Value,
    pub contact_name: Option<&'a str>,
}

/// Walks `entry[].changes[].value.messages[]` in payload order.
pub fn extract_messages(payload: &Value) -> Vec<RawMessage<'_>> {
    let mut out = Vec::new();
    let Some(entries) = payload.get("entry").and_then(Value::as_array) else {
        return out;
    };
    for entry in entries {
        let Some(changes) = entry.get("changes").and_then(Value::as_array) else {
            continue;
        };
        for change in changes {
            let Some(value) = change.get("value") else {
                continue;
            };
            let contact_name = value
                .pointer("/contacts/0/profile/name")
                .and_then(Value::as_str);
            let Some(messages) = value.get("messages").and_then(Value::as_array) else {
                continue;
            };
            out.extend(messages.iter().map(|message| RawMessage {
                message,
                contact_name,
            }));
        }
    }
    out
}

/// How media elements render their textual `content`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaText {
    /// The caption, or empty.
    Caption,
    /// `"{type} message"`.
    Label,
}

pub struct WhatsAppAdapter {
    graph: Arc<GraphClient>,
    media_cache: MediaCache,
    media_text: MediaText,
}

impl WhatsAppAdapter {
    pub fn new(graph: Arc<GraphClient>) -> Self {
        Self {
            graph,
            media_cache: MediaCache::default(),
            media_text: MediaText::Caption,
        }
    }

    pub fn with_media_text(mut self, media_text: MediaText) -> Self {
        self.media_text = media_text;
        self
    }

    pub fn config(&self) -> &WhatsAppConfig {
        self.graph.config()
    }

    pub fn graph(&self) -> &Arc<GraphClient> {
        &self.graph
    }

    async fn resolve_media(&self, kind: WaKind, media: &Value) -> Option<ResolvedMedia> {
        let media_id = media.get("id").and_then(Value::as_str)?;
        if let Some(hit) = self.media_cache.get(media_id) {
            return Some(hit);
        }
        if self.config().is_mock() {
            return None;
        }
        let mime = media
            .get("mime_type")
            .and_then(Value::as_str)
            .unwrap_or(kind.content_type());
        let filename = media
            .get("filename")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{media_id}.{}", kind.extension()));
        match self.graph.fetch_media(media_id, mime, &filename).await {
            Ok(resolved) => {
                self.media_cache.insert(media_id, resolved.clone());
                Some(resolved)
            }
            Err(err) => {
                let err = AdapterError::UpstreamFetchFailed(err.to_string());
                warn!(error = %err, media_id, "media download failed; continuing without media");
                None
            }
        }
    }

    /// Builds the canonical message for one `messages[]` element.
    pub async fn to_standard(&self, raw: &RawMessage<'_>) -> Result<StandardMessage, AdapterError> {
        let message = raw.message;
        let field = |key: &str| message.get(key).and_then(Value::as_str).unwrap_or_default();
        let kind_tag = field("type");
        let kind = WaKind::parse(kind_tag)
            .ok_or_else(|| AdapterError::UnsupportedMessageType(kind_tag.to_string()))?;
        let from = field("from");
        let id = field("id");
        let timestamp = match message.get("timestamp") {
            Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            _ => 0.0,
        };

        let mut metadata = Map::new();
        metadata.insert(
            "contact_name".into(),
            raw.contact_name.map(Value::from).unwrap_or(Value::Null),
        );
        metadata.insert("message_type".into(), kind.as_str().into());
        metadata.insert("whatsapp_message_id".into(), id.into());

        let (content, media_url) = match kind {
            WaKind::Text => (
                message
                    .pointer("/text/body")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                None,
            ),
            WaKind::Image | WaKind::Audio | WaKind::Video | WaKind::Document => {
                let media = message.get(kind.as_str()).cloned().unwrap_or(Value::Null);
                metadata.insert(
                    "media".into(),
                    json!({
                        "id": media.get("id").cloned().unwrap_or(Value::Null),
                        "mime_type": media.get("mime_type").cloned().unwrap_or(Value::Null),
                        "sha256": media.get("sha256").cloned().unwrap_or(Value::Null),
                    }),
                );
                let content = match self.media_text {
                    MediaText::Caption => media
                        .get("caption")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    MediaText::Label => format!("{} message", kind.as_str()),
                };
                let resolved = self.resolve_media(kind, &media).await;
                let url = resolved.as_ref().map(|r| r.url.clone());
                if let Some(resolved) = resolved {
                    metadata.insert(
                        MEDIA_DOWNLOAD_KEY.into(),
                        serde_json::to_value(&resolved.attachment).unwrap_or(Value::Null),
                    );
                }
                (content, url)
            }
        };

        StandardMessage::builder(self.config().platform.as_str(), from, id, self.config().platform.as_str())
            .source_address(from)
            .timestamp(timestamp)
            .content(content)
            .content_type(kind.content_type())
            .media_url(media_url)
            .metadata(metadata)
            .build()
            .map_err(|err| AdapterError::malformed(err.to_string()))
    }

    pub(crate) fn verification(&self, request: &InboundRequest) -> Option<WebhookReply> {
        let mode = request.query_param("hub.mode")?;
        let expected = self.config().verify_token.as_deref();
        if mode == "subscribe" && expected.is_some() && request.query_param("hub.verify_token") == expected {
            let challenge = request.query_param("hub.challenge").unwrap_or_default();
            Some(WebhookReply::Text(StatusCode::OK, challenge.to_string()))
        } else {
            warn!(platform = %self.config().platform, "webhook verification token mismatch");
            Some(WebhookReply::Text(
                StatusCode::FORBIDDEN,
                "Verification failed".to_string(),
            ))
        }
    }

    pub(crate) fn check_signature(&self, request: &InboundRequest) -> Result<(), AdapterError> {
        match self.config().app_secret.as_deref() {
            Some(secret) => {
                if verify_hub_signature(secret, request.header(SIGNATURE_HEADER), &request.body) {
                    Ok(())
                } else {
                    Err(AdapterError::InvalidSignature(
                        "X-Hub-Signature-256 does not match the body".into(),
                    ))
                }
            }
            None => {
                debug!(platform = %self.config().platform, "no app secret configured; skipping signature check");
                Ok(())
            }
        }
    }

    pub(crate) async fn parse_all(
        &self,
        request: &InboundRequest,
    ) -> Result<Vec<StandardMessage>, AdapterError> {
        let payload = request.json()?;
        let mut messages = Vec::new();
        for raw in extract_messages(&payload) {
            match self.to_standard(&raw).await {
                Ok(message) => messages.push(message),
                Err(err) => warn!(error = %err, code = err.code(), "skipping whatsapp message"),
            }
        }
        Ok(messages)
    }

    pub(crate) async fn refresh_token(&self, request: &TokenRequest) -> Delivery {
        let org_id = request
            .org_id
            .clone()
            .unwrap_or_else(|| self.config().org_id.clone());
        match self
            .graph
            .tokens()
            .bootstrap(&org_id, &request.client_id, &request.client_secret)
            .await
        {
            Ok(creds) => Delivery::success()
                .message("Token refreshed successfully")
                .data(json!({ "org_id": org_id, "expires_at": creds.token_expiry })),
            Err(err) => {
                warn!(error = %err, org_id = %org_id, "token exchange failed");
                Delivery::error_message(format!("Token exchange failed: {err}"))
            }
        }
    }
}

#[async_trait]
impl PlatformAdapter for WhatsAppAdapter {
    fn name(&self) -> &str {
        &self.config().platform
    }

    fn handle_verification(&self, request: &InboundRequest) -> Option<WebhookReply> {
        self.verification(request)
    }

    fn validate_request(&self, request: &InboundRequest) -> Result<(), AdapterError> {
        self.check_signature(request)
    }

    async fn parse_messages(
        &self,
        request: &InboundRequest,
    ) -> Result<Vec<StandardMessage>, AdapterError> {
        self.parse_all(request).await
    }

    async fn send_message(&self, request: &OutboundRequest) -> Result<Delivery, AdapterError> {
        Ok(self.graph.send(request).await)
    }

    async fn generate_token(&self, request: &TokenRequest) -> Result<Delivery, AdapterError> {
        Ok(self.refresh_token(request).await)
    }

    fn format_webhook_response(&self, _processed: &[Delivery]) -> WebhookReply {
        WebhookReply::ok_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CredentialStore, PlatformCredentials, TokenManager};
    use crate::signature::sign_body;
    use http::HeaderMap;
    use std::collections::HashMap;

    fn adapter(api_base: &str) -> WhatsAppAdapter {
        let store = Arc::new(CredentialStore::new());
        store.put(PlatformCredentials::new("default", "whatsapp", "token"));
        let http = reqwest::Client::new();
        let tokens = Arc::new(TokenManager::new(
            "whatsapp",
            store,
            Arc::new(GraphTokenExchanger::new(http.clone(), api_base)),
            3600,
        ));
        let mut config = WhatsAppConfig::new("whatsapp", "PHONE");
        config.api_base = api_base.to_string();
        config.verify_token = Some("VT".into());
        config.app_secret = Some("secret".into());
        WhatsAppAdapter::new(Arc::new(GraphClient::new(http, config, tokens)))
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn verification_echoes_challenge() {
        let adapter = adapter("mock://graph");
        let reply = adapter
            .handle_verification(&InboundRequest::get(query(&[
                ("hub.mode", "subscribe"),
                ("hub.verify_token", "VT"),
                ("hub.challenge", "314159"),
            ])))
            .unwrap();
        assert_eq!(reply, WebhookReply::Text(StatusCode::OK, "314159".into()));

        let denied = adapter
            .handle_verification(&InboundRequest::get(query(&[
                ("hub.mode", "subscribe"),
                ("hub.verify_token", "nope"),
            ])))
            .unwrap();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        assert!(adapter
            .handle_verification(&InboundRequest::get(HashMap::new()))
            .is_none());
    }

    #[test]
    fn signature_is_required_when_secret_is_set() {
        let adapter = adapter("mock://graph");
        let body = br#"{"entry":[]}"#.to_vec();
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, sign_body("secret", &body).parse().unwrap());
        assert!(adapter
            .validate_request(&InboundRequest::post(headers, body.clone()))
            .is_ok());
        let err = adapter
            .validate_request(&InboundRequest::post(HeaderMap::new(), body))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_SIGNATURE");
    }

    #[tokio::test]
    async fn parses_text_and_skips_unknown_kinds() {
        let adapter = adapter("mock://graph");
        let payload = json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "changes": [{
                    "value": {
                        "contacts": [{"profile": {"name": "Amina"}}],
                        "messages": [
                            {"from": "254700000001", "id": "wamid.ABC", "timestamp": "1710000000",
                             "type": "text", "text": {"body": "Hello"}},
                            {"from": "254700000001", "id": "wamid.LOC", "timestamp": "1710000001",
                             "type": "location", "location": {}}
                        ]
                    }
                }]
            }]
        });
        let request = InboundRequest::post(HeaderMap::new(), serde_json::to_vec(&payload).unwrap());
        let messages = adapter.parse_messages(&request).await.unwrap();
        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert_eq!(message.source(), "whatsapp");
        assert_eq!(message.content(), "Hello");
        assert_eq!(message.source_uid(), "254700000001");
        assert_eq!(message.message_id(), "wamid.ABC");
        assert_eq!(message.source_timestamp(), 1_710_000_000.0);
        assert_eq!(message.metadata_str("contact_name"), Some("Amina"));

        let again = adapter.parse_messages(&request).await.unwrap();
        assert_eq!(again, messages);
    }

    #[tokio::test]
    async fn mock_send_short_circuits() {
        let adapter = adapter("mock://graph");
        let delivery = adapter
            .send_message(&OutboundRequest::new(
                "2547",
                crate::adapter::OutboundContent::text("hi"),
            ))
            .await
            .unwrap();
        assert!(delivery.is_success());
        assert_eq!(delivery.message_id.as_deref(), Some("mock:PHONE"));
    }
}
