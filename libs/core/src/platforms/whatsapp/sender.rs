//! Graph API calls made on behalf of a WhatsApp number: outbound sends and
//! the two-step media download.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::warn;

use super::creds::WhatsAppConfig;
use crate::adapter::{MediaKind, OutboundContent, OutboundRequest};
use crate::credentials::{PlatformCredentials, TokenManager, UpstreamError};
use crate::delivery::Delivery;
use crate::message::MediaAttachment;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMedia {
    pub url: String,
    pub attachment: MediaAttachment,
}

pub struct GraphClient {
    http: reqwest::Client,
    config: WhatsAppConfig,
    tokens: Arc<TokenManager>,
}

impl GraphClient {
    pub fn new(http: reqwest::Client, config: WhatsAppConfig, tokens: Arc<TokenManager>) -> Self {
        Self {
            http,
            config,
            tokens,
        }
    }

    pub fn config(&self) -> &WhatsAppConfig {
        &self.config
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/{}/messages",
            self.config.api_base(),
            self.config.phone_number_id
        )
    }

    pub async fn send(&self, request: &OutboundRequest) -> Delivery {
        let payload = match build_send_payload(request) {
            Ok(payload) => payload,
            Err(message) => return Delivery::error_message(message),
        };

        if self.config.is_mock() {
            return Delivery::success()
                .message("Message sent successfully")
                .message_id(format!("mock:{}", self.config.phone_number_id))
                .payload_sent(payload);
        }

        let url = self.messages_url();
        let (http, url, body) = (&self.http, url.as_str(), &payload);
        let result = self
            .tokens
            .with_valid_token(&self.config.org_id, move |creds| {
                post_json(http, url, creds, body)
            })
            .await;

        match result {
            Ok(response) => {
                let id = response
                    .pointer("/messages/0/id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Delivery::success()
                    .message("Message sent successfully")
                    .message_id(id)
                    .response(response)
            }
            Err(UpstreamError::Status { status, body }) => {
                warn!(status, platform = %self.config.platform, "outbound send rejected");
                Delivery::rejected(status, body).message(format!("WhatsApp API error: {status}"))
            }
            Err(UpstreamError::Network(err)) => {
                Delivery::network(&err).message("Failed to reach the WhatsApp API")
            }
            Err(err) => Delivery::error_message(err.to_string()),
        }
    }

    /// `GET /{media_id}` for a signed URL, then downloads the bytes.
    pub async fn fetch_media(
        &self,
        media_id: &str,
        mime: &str,
        filename: &str,
    ) -> Result<ResolvedMedia, UpstreamError> {
        let lookup_url = format!("{}/{}", self.config.api_base(), media_id);
        let max_bytes = self.config.media_max_bytes;
        let http = &self.http;
        self.tokens
            .with_valid_token(&self.config.org_id, move |creds| {
                let lookup_url = lookup_url.clone();
                async move {
                    let meta = get_json(http, &lookup_url, &creds).await?;
                    let url = meta
                        .get("url")
                        .and_then(Value::as_str)
                        .ok_or_else(|| UpstreamError::Network("media lookup returned no url".into()))?
                        .to_string();
                    let bytes = download(http, &url, &creds, max_bytes).await?;
                    let mime = meta
                        .get("mime_type")
                        .and_then(Value::as_str)
                        .unwrap_or(mime);
                    Ok(ResolvedMedia {
                        attachment: MediaAttachment::from_bytes(&bytes, mime, filename),
                        url,
                    })
                }
            })
            .await
    }
}

fn build_send_payload(request: &OutboundRequest) -> Result<Value, String> {
    let mut payload = json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": request.recipient,
        "type": request.content.kind(),
    });
    match &request.content {
        OutboundContent::Text { body } => {
            payload["text"] = json!({ "body": body });
        }
        OutboundContent::Media {
            kind,
            link,
            caption,
        } => {
            let Some(link) = link else {
                return Err(format!("Media URL is required for {} messages", kind.as_str()));
            };
            let mut media = json!({ "link": link });
            if let Some(caption) = caption.as_ref().filter(|_| *kind != MediaKind::Audio) {
                media["caption"] = json!(caption);
            }
            payload[kind.as_str()] = media;
        }
    }
    Ok(payload)
}

async fn post_json(
    http: &reqwest::Client,
    url: &str,
    creds: Arc<PlatformCredentials>,
    payload: &Value,
) -> Result<Value, UpstreamError> {
    let response = http
        .post(url)
        .bearer_auth(&creds.access_token)
        .json(payload)
        .send()
        .await?;
    let status = response.status().as_u16();
    let body = response.text().await?;
    if !(200..300).contains(&status) {
        return Err(UpstreamError::Status { status, body });
    }
    Ok(serde_json::from_str(&body).unwrap_or(Value::Null))
}

async fn get_json(
    http: &reqwest::Client,
    url: &str,
    creds: &PlatformCredentials,
) -> Result<Value, UpstreamError> {
    let response = http.get(url).bearer_auth(&creds.access_token).send().await?;
    let status = response.status().as_u16();
    let body = response.text().await?;
    if !(200..300).contains(&status) {
        return Err(UpstreamError::Status { status, body });
    }
    serde_json::from_str(&body)
        .map_err(|err| UpstreamError::Network(format!("media lookup body is not JSON: {err}")))
}

async fn download(
    http: &reqwest::Client,
    url: &str,
    creds: &PlatformCredentials,
    max_bytes: u64,
) -> Result<Vec<u8>, UpstreamError> {
    let response = http.get(url).bearer_auth(&creds.access_token).send().await?;
    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
        let body = response.text().await.unwrap_or_default();
        return Err(UpstreamError::Status { status, body });
    }
    if response.content_length().is_some_and(|len| len > max_bytes) {
        return Err(UpstreamError::Network(format!(
            "media exceeds {max_bytes} bytes"
        )));
    }
    let bytes = response.bytes().await?;
    if bytes.len() as u64 > max_bytes {
        return Err(UpstreamError::Network(format!(
            "media exceeds {max_bytes} bytes"
        )));
    }
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_without_link_is_rejected() {
        let request = OutboundRequest::new(
            "2547",
            OutboundContent::Media {
                kind: MediaKind::Video,
                link: None,
                caption: None,
            },
        );
        assert_eq!(
            build_send_payload(&request).unwrap_err(),
            "Media URL is required for video messages"
        );
    }

    #[test]
    fn text_payload_shape() {
        let payload = build_send_payload(&OutboundRequest::new("2547", OutboundContent::text("hi")))
            .unwrap();
        assert_eq!(
            payload,
            json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": "2547",
                "type": "text",
                "text": {"body": "hi"}
            })
        );
    }

    #[test]
    fn audio_drops_caption() {
        let payload = build_send_payload(&OutboundRequest::new(
            "2547",
            OutboundContent::Media {
                kind: MediaKind::Audio,
                link: Some("https://cdn/a.ogg".into()),
                caption: Some("ignored".into()),
            },
        ))
        .unwrap();
        assert_eq!(payload["audio"], json!({"link": "https://cdn/a.ogg"}));
    }
}
