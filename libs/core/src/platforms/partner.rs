//! Ingest adapters for partner case systems. Each accepts one JSON case per
//! request and keeps the whole payload in message metadata so the matching
//! transform can rebuild the partner wire format.

use async_trait::async_trait;
use http::StatusCode;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::adapter::{AdapterError, InboundRequest, PlatformAdapter, WebhookReply};
use crate::delivery::Delivery;
use crate::message::StandardMessage;
use crate::router::Partner;

const PARTNER_SOURCE: &str = "helpline";
const CEEMIS_CREATE_FIELDS: [&str; 5] = ["src", "src_uid", "src_callid", "narrative", "case_category"];

pub struct PartnerAdapter {
    partner: Partner,
}

impl PartnerAdapter {
    pub fn new(partner: Partner) -> Self {
        Self { partner }
    }

    pub fn partner(&self) -> Partner {
        self.partner
    }

    fn payload(&self, request: &InboundRequest) -> Result<Map<String, Value>, AdapterError> {
        match request.json()? {
            Value::Object(map) => Ok(map),
            _ => Err(AdapterError::malformed(format!(
                "{} payload must be a JSON object",
                self.partner.display_name()
            ))),
        }
    }

    fn check_structure(&self, payload: &Map<String, Value>) -> Result<(), AdapterError> {
        match self.partner {
            Partner::Ceemis => {
                if payload.contains_key("ref") {
                    return Ok(());
                }
                let missing: Vec<&str> = CEEMIS_CREATE_FIELDS
                    .into_iter()
                    .filter(|key| !payload.contains_key(*key))
                    .collect();
                if missing.is_empty() {
                    Ok(())
                } else {
                    Err(AdapterError::malformed(format!(
                        "missing required fields: {}",
                        missing.join(", ")
                    )))
                }
            }
            Partner::Cpims => {
                for key in ["cases", "reporters"] {
                    let present = payload
                        .get(key)
                        .and_then(Value::as_array)
                        .is_some_and(|rows| !rows.is_empty());
                    if !present {
                        return Err(AdapterError::malformed(format!(
                            "`{key}` must be a non-empty array"
                        )));
                    }
                }
                Ok(())
            }
            Partner::Eemis => Ok(()),
        }
    }

    fn content_type(&self, payload: &Map<String, Value>) -> &'static str {
        match self.partner {
            Partner::Ceemis if payload.contains_key("ref") => "case/ceemis/update",
            Partner::Ceemis => "case/ceemis/create",
            Partner::Cpims => "case/cpims/abuse",
            Partner::Eemis => "case/eemis/lookup",
        }
    }

    /// Sender and message identity for one partner payload.
    fn identity(&self, payload: &Map<String, Value>) -> (String, String, String) {
        let text = |key: &str| scalar_text(payload.get(key));
        let generated = || Uuid::new_v4().to_string();
        match self.partner {
            Partner::Ceemis => {
                // `ref` names the case, not the delivery; repeat updates share it.
                let message_id = text("src_callid").unwrap_or_else(generated);
                let uid = text("src_uid")
                    .or_else(|| text("ref"))
                    .unwrap_or_else(|| message_id.clone());
                let address = text("src_address").unwrap_or_else(|| uid.clone());
                (uid, address, message_id)
            }
            Partner::Cpims => {
                let case_id = text("id")
                    .or_else(|| scalar_text(payload.pointer_row("cases", 0)))
                    .unwrap_or_else(generated);
                let address = text("reporter_phone")
                    .or_else(|| scalar_text(payload.pointer_row("reporters", 12)))
                    .unwrap_or_else(|| case_id.clone());
                (case_id.clone(), address, case_id)
            }
            Partner::Eemis => {
                let uid = text("national_id").unwrap_or_else(|| "eemis".to_string());
                (uid.clone(), uid, generated())
            }
        }
    }

    fn timestamp(&self, payload: &Map<String, Value>) -> f64 {
        let key = match self.partner {
            Partner::Ceemis => "src_ts",
            Partner::Cpims => "created_on",
            Partner::Eemis => return crate::message::now_seconds(),
        };
        let raw = payload
            .get(key)
            .cloned()
            .or_else(|| payload.pointer_row("cases", 1).cloned());
        let seconds = match raw {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
            _ => 0.0,
        };
        seconds.max(0.0)
    }

    pub(crate) fn to_standard(&self, payload: Map<String, Value>) -> Result<StandardMessage, AdapterError> {
        let (uid, address, message_id) = self.identity(&payload);
        let content = match self.partner {
            Partner::Cpims => scalar_text(payload.get("narrative"))
                .or_else(|| scalar_text(payload.pointer_row("cases", 20))),
            _ => scalar_text(payload.get("narrative")),
        }
        .unwrap_or_default();
        StandardMessage::builder(PARTNER_SOURCE, uid, message_id, self.partner.as_str())
            .source_address(address)
            .timestamp(self.timestamp(&payload))
            .content(content)
            .content_type(self.content_type(&payload))
            .metadata(payload)
            .build()
            .map_err(|err| AdapterError::malformed(err.to_string()))
    }
}

fn scalar_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Positional access into `{key: [[v0, v1, ...]]}` partner rows.
trait PositionalRows {
    fn pointer_row(&self, key: &str, index: usize) -> Option<&Value>;
}

impl PositionalRows for Map<String, Value> {
    fn pointer_row(&self, key: &str, index: usize) -> Option<&Value> {
        self.get(key)?.get(0)?.get(index)
    }
}

#[async_trait]
impl PlatformAdapter for PartnerAdapter {
    fn name(&self) -> &str {
        self.partner.as_str()
    }

    fn validate_request(&self, request: &InboundRequest) -> Result<(), AdapterError> {
        let payload = self.payload(request)?;
        self.check_structure(&payload)
    }

    async fn parse_messages(
        &self,
        request: &InboundRequest,
    ) -> Result<Vec<StandardMessage>, AdapterError> {
        let payload = self.payload(request)?;
        Ok(vec![self.to_standard(payload)?])
    }

    fn format_webhook_response(&self, processed: &[Delivery]) -> WebhookReply {
        let Some(first) = processed.first() else {
            return WebhookReply::ok_json(json!({
                "status": "error",
                "message": format!("No response from {}", self.partner.display_name()),
            }));
        };
        let status = match self.partner {
            Partner::Eemis => first
                .code
                .and_then(|code| StatusCode::from_u16(code).ok())
                .unwrap_or(StatusCode::OK),
            _ => StatusCode::OK,
        };
        WebhookReply::Json(status, first.to_value())
    }
}
