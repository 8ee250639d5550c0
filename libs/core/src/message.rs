//! Canonical message envelope produced by every ingest adapter.
//!
//! A [`StandardMessage`] is immutable once built. Construction goes through
//! [`MessageBuilder::build`] (or deserialisation) which enforces the envelope
//! invariants: non-empty identity fields, a non-negative timestamp and a
//! syntactically valid content type.

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use time::{OffsetDateTime, macros::format_description};

pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// Metadata key carrying a downloaded media attachment.
pub const MEDIA_DOWNLOAD_KEY: &str = "media_download";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("source_timestamp must be a finite, non-negative number")]
    InvalidTimestamp,
    #[error("invalid content type: {0}")]
    InvalidContentType(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MessageRecord", into = "MessageRecord")]
pub struct StandardMessage {
    source: String,
    source_uid: String,
    source_address: String,
    message_id: String,
    source_timestamp: f64,
    content: String,
    content_type: String,
    platform: String,
    media_url: Option<String>,
    metadata: Map<String, Value>,
}

/// Plain serde shape of a [`StandardMessage`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessageRecord {
    source: String,
    source_uid: String,
    #[serde(default)]
    source_address: String,
    message_id: String,
    source_timestamp: f64,
    #[serde(default)]
    content: String,
    #[serde(default = "default_content_type")]
    content_type: String,
    platform: String,
    #[serde(default)]
    media_url: Option<String>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}

impl TryFrom<MessageRecord> for StandardMessage {
    type Error = MessageError;

    fn try_from(record: MessageRecord) -> Result<Self, Self::Error> {
        let message = StandardMessage {
            source: record.source,
            source_uid: record.source_uid,
            source_address: record.source_address,
            message_id: record.message_id,
            source_timestamp: record.source_timestamp,
            content: record.content,
            content_type: record.content_type,
            platform: record.platform,
            media_url: record.media_url,
            metadata: record.metadata,
        };
        message.check()?;
        Ok(message)
    }
}

impl From<StandardMessage> for MessageRecord {
    fn from(message: StandardMessage) -> Self {
        MessageRecord {
            source: message.source,
            source_uid: message.source_uid,
            source_address: message.source_address,
            message_id: message.message_id,
            source_timestamp: message.source_timestamp,
            content: message.content,
            content_type: message.content_type,
            platform: message.platform,
            media_url: message.media_url,
            metadata: message.metadata,
        }
    }
}

impl StandardMessage {
    pub fn builder(
        source: impl Into<String>,
        source_uid: impl Into<String>,
        message_id: impl Into<String>,
        platform: impl Into<String>,
    ) -> MessageBuilder {
        MessageBuilder {
            source: source.into(),
            source_uid: source_uid.into(),
            source_address: None,
            message_id: message_id.into(),
            source_timestamp: 0.0,
            content: String::new(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            platform: platform.into(),
            media_url: None,
            metadata: Map::new(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn source_uid(&self) -> &str {
        &self.source_uid
    }

    pub fn source_address(&self) -> &str {
        &self.source_address
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn source_timestamp(&self) -> f64 {
        self.source_timestamp
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn media_url(&self) -> Option<&str> {
        self.media_url.as_deref()
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Looks up a string value in the metadata map.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(MessageRecord::from(self.clone())).unwrap_or(Value::Null)
    }

    pub fn from_value(value: Value) -> Result<Self, MessageFormatError> {
        serde_json::from_value(value).map_err(MessageFormatError)
    }

    /// Renders `source_timestamp` as a UTC `YYYY-MM-DDTHH:MM:SS` string.
    pub fn iso_timestamp(&self) -> String {
        iso_timestamp(self.source_timestamp)
    }

    /// Returns a builder seeded with this message, for deriving a variant.
    pub fn to_builder(&self) -> MessageBuilder {
        MessageBuilder {
            source: self.source.clone(),
            source_uid: self.source_uid.clone(),
            source_address: Some(self.source_address.clone()),
            message_id: self.message_id.clone(),
            source_timestamp: self.source_timestamp,
            content: self.content.clone(),
            content_type: self.content_type.clone(),
            platform: self.platform.clone(),
            media_url: self.media_url.clone(),
            metadata: self.metadata.clone(),
        }
    }

    fn check(&self) -> Result<(), MessageError> {
        if self.message_id.trim().is_empty() {
            return Err(MessageError::EmptyField("message_id"));
        }
        if self.source_uid.trim().is_empty() {
            return Err(MessageError::EmptyField("source_uid"));
        }
        if self.platform.trim().is_empty() {
            return Err(MessageError::EmptyField("platform"));
        }
        if !self.source_timestamp.is_finite() || self.source_timestamp < 0.0 {
            return Err(MessageError::InvalidTimestamp);
        }
        if !is_mime_type(&self.content_type) {
            return Err(MessageError::InvalidContentType(self.content_type.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
#[error("malformed canonical message: {0}")]
pub struct MessageFormatError(#[source] serde_json::Error);

#[derive(Debug, Clone)]
pub struct MessageBuilder {
    source: String,
    source_uid: String,
    source_address: Option<String>,
    message_id: String,
    source_timestamp: f64,
    content: String,
    content_type: String,
    platform: String,
    media_url: Option<String>,
    metadata: Map<String, Value>,
}

impl MessageBuilder {
    pub fn source_address(mut self, address: impl Into<String>) -> Self {
        self.source_address = Some(address.into());
        self
    }

    pub fn timestamp(mut self, seconds: f64) -> Self {
        self.source_timestamp = seconds;
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn media_url(mut self, url: Option<String>) -> Self {
        self.media_url = url.filter(|u| !u.trim().is_empty());
        self
    }

    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<StandardMessage, MessageError> {
        let source_address = self
            .source_address
            .unwrap_or_else(|| self.source_uid.clone());
        let message = StandardMessage {
            source: self.source,
            source_uid: self.source_uid,
            source_address,
            message_id: self.message_id,
            source_timestamp: self.source_timestamp,
            content: self.content,
            content_type: self.content_type,
            platform: self.platform,
            media_url: self.media_url,
            metadata: self.metadata,
        };
        message.check()?;
        Ok(message)
    }
}

/// Media bytes fetched from an upstream platform, carried in message metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    /// Base64 of the raw bytes.
    pub content: String,
    pub mime: String,
    pub filename: String,
    pub size: u64,
}

impl MediaAttachment {
    pub fn from_bytes(bytes: &[u8], mime: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            content: B64.encode(bytes),
            mime: mime.into(),
            filename: filename.into(),
            size: bytes.len() as u64,
        }
    }

    pub fn from_metadata(metadata: &Map<String, Value>) -> Option<Self> {
        metadata
            .get(MEDIA_DOWNLOAD_KEY)
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
    }
}

pub fn iso_timestamp(seconds: f64) -> String {
    let whole = if seconds.is_finite() { seconds.trunc() as i64 } else { 0 };
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    OffsetDateTime::from_unix_timestamp(whole)
        .ok()
        .and_then(|dt| dt.format(&format).ok())
        .unwrap_or_else(|| "1970-01-01T00:00:00".to_string())
}

/// Seconds since the epoch, fractional.
pub fn now_seconds() -> f64 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1e9
}

fn is_token_char(c: char, allow_slash: bool) -> bool {
    c.is_ascii_alphanumeric() || "!#$&^_.+-".contains(c) || (allow_slash && c == '/')
}

/// `type "/" subtype [";" params]`; the subtype may carry extra `/` segments.
pub fn is_mime_type(value: &str) -> bool {
    let essence = value.split(';').next().unwrap_or_default().trim();
    let Some((kind, subtype)) = essence.split_once('/') else {
        return false;
    };
    !kind.is_empty()
        && !subtype.is_empty()
        && !subtype.ends_with('/')
        && kind.chars().all(|c| is_token_char(c, false))
        && subtype.chars().all(|c| is_token_char(c, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> StandardMessage {
        StandardMessage::builder("whatsapp", "254700000001", "wamid.ABC", "whatsapp")
            .timestamp(1_710_000_000.0)
            .content("Hello")
            .meta("contact_name", "Amina")
            .build()
            .unwrap()
    }

    #[test]
    fn round_trips_through_value() {
        let message = sample();
        let restored = StandardMessage::from_value(message.to_value()).unwrap();
        assert_eq!(restored, message);
    }

    #[test]
    fn source_address_defaults_to_uid() {
        assert_eq!(sample().source_address(), "254700000001");
    }

    #[test]
    fn iso_timestamp_is_utc_without_offset() {
        assert_eq!(sample().iso_timestamp(), "2024-03-09T16:00:00");
        assert_eq!(iso_timestamp(1_710_000_000.75), "2024-03-09T16:00:00");
    }

    #[test]
    fn rejects_empty_identity_fields() {
        let err = StandardMessage::builder("whatsapp", "", "id", "whatsapp")
            .build()
            .unwrap_err();
        assert_eq!(err, MessageError::EmptyField("source_uid"));

        let err = StandardMessage::builder("whatsapp", "u", " ", "whatsapp")
            .build()
            .unwrap_err();
        assert_eq!(err, MessageError::EmptyField("message_id"));
    }

    #[test]
    fn rejects_negative_timestamp_and_bad_mime() {
        let err = StandardMessage::builder("s", "u", "m", "p")
            .timestamp(-1.0)
            .build()
            .unwrap_err();
        assert_eq!(err, MessageError::InvalidTimestamp);

        let err = StandardMessage::builder("s", "u", "m", "p")
            .content_type("plain")
            .build()
            .unwrap_err();
        assert!(matches!(err, MessageError::InvalidContentType(_)));
    }

    #[test]
    fn deserialisation_enforces_invariants() {
        let raw = json!({
            "source": "helpline",
            "source_uid": "",
            "message_id": "m",
            "source_timestamp": 1.0,
            "platform": "ceemis"
        });
        assert!(StandardMessage::from_value(raw).is_err());
    }

    #[test]
    fn mime_syntax() {
        assert!(is_mime_type("text/plain"));
        assert!(is_mime_type("application/json; charset=utf-8"));
        assert!(is_mime_type("case/ceemis/create"));
        assert!(!is_mime_type("text/"));
        assert!(!is_mime_type("/plain"));
        assert!(!is_mime_type("text plain"));
    }

    #[test]
    fn media_attachment_reads_back_from_metadata() {
        let attachment = MediaAttachment::from_bytes(b"abc", "image/jpeg", "photo.jpg");
        let mut metadata = Map::new();
        metadata.insert(
            MEDIA_DOWNLOAD_KEY.into(),
            serde_json::to_value(&attachment).unwrap(),
        );
        let restored = MediaAttachment::from_metadata(&metadata).unwrap();
        assert_eq!(restored.content, "YWJj");
        assert_eq!(restored.size, 3);
    }
}
