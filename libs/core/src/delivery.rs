//! Result objects returned by the router, transforms and outbound sends.
//!
//! Expected failures (network errors, partner rejections) are carried as a
//! [`Delivery`] with `status = error` rather than raised.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Success,
    PartialSuccess,
    Error,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Success => "success",
            DeliveryStatus::PartialSuccess => "partial_success",
            DeliveryStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_sent: Option<Value>,
}

impl Delivery {
    fn with_status(status: DeliveryStatus) -> Self {
        Self {
            status,
            message: None,
            message_id: None,
            case_id: None,
            case_reference: None,
            http_status: None,
            code: None,
            error: None,
            details: None,
            note: None,
            data: None,
            response: None,
            response_text: None,
            payload_sent: None,
        }
    }

    pub fn success() -> Self {
        Self::with_status(DeliveryStatus::Success)
    }

    pub fn partial() -> Self {
        Self::with_status(DeliveryStatus::PartialSuccess)
    }

    pub fn failure() -> Self {
        Self::with_status(DeliveryStatus::Error)
    }

    /// Error carrying only a human message.
    pub fn error_message(message: impl Into<String>) -> Self {
        Self::failure().message(message)
    }

    /// Network-level failure reaching a downstream.
    pub fn network(err: impl std::fmt::Display) -> Self {
        Self::failure().error(format!("network: {err}"))
    }

    /// Downstream answered with a non-success status.
    pub fn rejected(status: u16, body: impl Into<String>) -> Self {
        let mut delivery = Self::failure().error(body);
        delivery.http_status = Some(status);
        delivery
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn response(mut self, response: Value) -> Self {
        self.response = Some(response);
        self
    }

    pub fn payload_sent(mut self, payload: Value) -> Self {
        self.payload_sent = Some(payload);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == DeliveryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == DeliveryStatus::Error
    }

    /// Short reason recorded in the message log for failed deliveries.
    pub fn failure_reason(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| self.status.as_str().to_string())
    }

    /// Downstream identifier surfaced back to the caller, if any.
    pub fn downstream_id(&self) -> Option<&str> {
        self.case_reference
            .as_deref()
            .or(self.message_id.as_deref())
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejected_serialises_compactly() {
        let value = Delivery::rejected(503, "down").to_value();
        assert_eq!(
            value,
            json!({"status": "error", "http_status": 503, "error": "down"})
        );
    }

    #[test]
    fn downstream_id_prefers_case_reference() {
        let mut delivery = Delivery::success().message_id("wamid.1");
        assert_eq!(delivery.downstream_id(), Some("wamid.1"));
        delivery.case_reference = Some("lwf1".into());
        assert_eq!(delivery.downstream_id(), Some("lwf1"));
    }
}
