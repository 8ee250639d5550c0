//! Endpoint selection, payload rendering and delivery for canonical messages.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use metrics::counter;
use serde_json::{Map, Value, json};
use tracing::{Instrument, debug, info_span, warn};

use crate::conversation::{SharedConversationStore, conversation_id};
use crate::delivery::Delivery;
use crate::message::{MediaAttachment, StandardMessage};
use crate::message_log::{DeliveryState, LogEntry, SharedMessageLog};

pub const DEFAULT_CASE_CATEGORY_ID: &str = "362484";
const DEFAULT_WALKIN_ADDRESS: &str = "0110110110";

/// Partner systems that receive cases through a transform adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partner {
    Ceemis,
    Cpims,
    Eemis,
}

impl Partner {
    pub const ALL: [Partner; 3] = [Partner::Ceemis, Partner::Cpims, Partner::Eemis];

    pub fn as_str(&self) -> &'static str {
        match self {
            Partner::Ceemis => "ceemis",
            Partner::Cpims => "cpims",
            Partner::Eemis => "eemis",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Partner::Ceemis => "CEEMIS",
            Partner::Cpims => "CPIMS",
            Partner::Eemis => "EEMIS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Cases,
    Messaging,
    Transform(Partner),
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Cases => "cases",
            Endpoint::Messaging => "messaging",
            Endpoint::Transform(partner) => partner.as_str(),
        }
    }
}

/// Total over every `(platform, content_type)` pair.
pub fn select_endpoint(platform: &str, content_type: &str) -> Endpoint {
    let platform = platform.to_ascii_lowercase();
    if platform == "webform" {
        return Endpoint::Cases;
    }
    Partner::ALL
        .into_iter()
        .find(|partner| {
            platform == partner.as_str()
                && content_type.starts_with(&format!("case/{}", partner.as_str()))
        })
        .map(Endpoint::Transform)
        .unwrap_or(Endpoint::Messaging)
}

/// Translates a canonical message into a partner wire format and submits it.
#[async_trait]
pub trait CaseTransform: Send + Sync {
    fn partner(&self) -> Partner;
    async fn submit(&self, message: &StandardMessage) -> Delivery;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointTarget {
    pub url: String,
    pub bearer: Option<String>,
}

impl EndpointTarget {
    pub fn new(url: impl Into<String>, bearer: Option<String>) -> Self {
        Self {
            url: url.into(),
            bearer: bearer.filter(|t| !t.trim().is_empty()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterConfig {
    pub cases: Option<EndpointTarget>,
    pub messaging: Option<EndpointTarget>,
}

pub struct MessageRouter {
    http: reqwest::Client,
    config: RouterConfig,
    conversations: SharedConversationStore,
    log: SharedMessageLog,
    transforms: HashMap<Partner, Arc<dyn CaseTransform>>,
}

impl MessageRouter {
    pub fn new(
        http: reqwest::Client,
        config: RouterConfig,
        conversations: SharedConversationStore,
        log: SharedMessageLog,
    ) -> Self {
        Self {
            http,
            config,
            conversations,
            log,
            transforms: HashMap::new(),
        }
    }

    pub fn with_transform(mut self, transform: Arc<dyn CaseTransform>) -> Self {
        self.transforms.insert(transform.partner(), transform);
        self
    }

    /// Routes `message` and returns the final delivery outcome.
    ///
    /// Delivery runs on its own task: if the caller goes away the downstream
    /// call still completes and its outcome is logged.
    pub async fn route(self: &Arc<Self>, message: &StandardMessage) -> Delivery {
        let router = Arc::clone(self);
        let message = message.clone();
        let span = info_span!(
            "route",
            platform = %message.platform(),
            message_id = %message.message_id()
        );
        let task = tokio::spawn(async move { router.deliver(&message).await }.instrument(span));
        match task.await {
            Ok(delivery) => delivery,
            Err(err) => {
                warn!(error = %err, "delivery task aborted");
                Delivery::error_message(format!("delivery task failed: {err}"))
            }
        }
    }

    async fn deliver(&self, message: &StandardMessage) -> Delivery {
        let endpoint = select_endpoint(message.platform(), message.content_type());
        let conversation = match self
            .conversations
            .get_or_create(message.source_uid(), message.platform())
            .await
        {
            Ok(conversation) => conversation.conversation_id,
            Err(err) => {
                warn!(error = %err, "conversation attach failed");
                conversation_id(message.platform(), message.source_uid())
            }
        };

        let delivery = match endpoint {
            Endpoint::Cases => {
                let payload = render_cases_payload(message);
                self.post(self.config.cases.as_ref(), endpoint, &payload)
                    .await
            }
            Endpoint::Messaging => {
                let payload = render_messaging_payload(message);
                self.post(self.config.messaging.as_ref(), endpoint, &payload)
                    .await
            }
            Endpoint::Transform(partner) => match self.transforms.get(&partner) {
                Some(transform) => transform.submit(message).await,
                None => Delivery::error_message(format!(
                    "{} transform is not configured",
                    partner.display_name()
                )),
            },
        };

        self.record(endpoint, message, &conversation, &delivery).await;
        counter!(
            "ucg_deliveries_total",
            "endpoint" => endpoint.as_str(),
            "status" => delivery.status.as_str()
        )
        .increment(1);
        delivery
    }

    async fn post(
        &self,
        target: Option<&EndpointTarget>,
        endpoint: Endpoint,
        payload: &Value,
    ) -> Delivery {
        let Some(target) = target else {
            warn!(endpoint = endpoint.as_str(), "downstream endpoint not configured");
            return Delivery::error_message(format!(
                "{} endpoint is not configured",
                endpoint.as_str()
            ));
        };
        let mut request = self.http.post(&target.url).json(payload);
        if let Some(token) = &target.bearer {
            request = request.bearer_auth(token);
        }
        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                debug!(endpoint = endpoint.as_str(), status, "downstream responded");
                interpret_response(status, &body)
            }
            Err(err) => {
                warn!(error = %err, endpoint = endpoint.as_str(), "downstream unreachable");
                Delivery::network(err)
            }
        }
    }

    async fn record(
        &self,
        endpoint: Endpoint,
        message: &StandardMessage,
        conversation: &str,
        delivery: &Delivery,
    ) {
        let state = if delivery.is_error() {
            DeliveryState::Failed {
                reason: delivery.failure_reason(),
            }
        } else {
            DeliveryState::Delivered
        };
        let entry = LogEntry::outgoing(
            message,
            conversation,
            endpoint.as_str(),
            state,
            Some(delivery.to_value()),
        );
        if let Err(err) = self.log.append(entry).await {
            warn!(error = %err, "outgoing log entry not recorded");
        }
        if let Err(err) = self.conversations.touch(conversation).await {
            warn!(error = %err, "conversation activity not refreshed");
        }
    }
}

/// Maps a downstream HTTP answer to a delivery result.
pub fn interpret_response(status: u16, body: &str) -> Delivery {
    if !(200..300).contains(&status) {
        return Delivery::rejected(status, body);
    }
    let Ok(json) = serde_json::from_str::<Value>(body) else {
        let mut delivery = Delivery::success();
        delivery.response_text = Some(body.to_string());
        return delivery;
    };
    let mut delivery = Delivery::success();
    if let Some(cases) = json.get("cases").and_then(Value::as_array) {
        let first = cases
            .first()
            .map(|row| row.as_array().and_then(|r| r.first()).unwrap_or(row));
        if let Some(case_id) = first.and_then(scalar_string) {
            delivery.case_reference = Some(format!("lwf{case_id}"));
            delivery.case_id = Some(case_id);
        }
    } else if let Some(id) = json.get("id").and_then(scalar_string) {
        delivery.message_id = Some(id);
    }
    delivery.response = Some(json);
    delivery
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn channel_tag(platform: &str) -> String {
    match platform.to_ascii_lowercase().as_str() {
        "whatsapp" => "whatsApp".to_string(),
        other => other.to_string(),
    }
}

pub fn render_messaging_payload(message: &StandardMessage) -> Value {
    let mut payload = Map::new();
    payload.insert("channel".into(), channel_tag(message.platform()).into());
    payload.insert("timestamp".into(), message.iso_timestamp().into());
    payload.insert("session_id".into(), message.source_uid().into());
    payload.insert("message_id".into(), message.message_id().into());
    payload.insert("from".into(), message.source_address().into());
    payload.insert(
        "message".into(),
        B64.encode(message.content().as_bytes()).into(),
    );
    payload.insert("mime".into(), message.content_type().into());
    if let Some(url) = message.media_url() {
        payload.insert("media_url".into(), url.into());
    }
    if let Some(media) = MediaAttachment::from_metadata(message.metadata()) {
        payload.insert("media_content".into(), media.content.into());
        payload.insert("media_mime".into(), media.mime.into());
        payload.insert("media_filename".into(), media.filename.into());
        payload.insert("media_size".into(), media.size.into());
    }
    Value::Object(payload)
}

fn person<'a>(message: &'a StandardMessage, key: &str) -> Option<&'a Map<String, Value>> {
    message.metadata().get(key).and_then(Value::as_object)
}

fn text_field(map: Option<&Map<String, Value>>, key: &str) -> String {
    map.and_then(|m| m.get(key))
        .and_then(scalar_string)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn or_default(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

fn age_field(map: Option<&Map<String, Value>>) -> String {
    or_default(text_field(map, "age"), "0")
}

fn sex_id(gender: &str) -> &'static str {
    match gender.to_ascii_lowercase().as_str() {
        "male" => "121",
        "female" => "122",
        _ => "",
    }
}

fn capitalised(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn client_record(message: &StandardMessage) -> Value {
    let victim = person(message, "victim");
    json!({
        "fname": or_default(text_field(victim, "name"), "Anonymous Victim"),
        "age_t": "0",
        "age": age_field(victim),
        "dob": "",
        "age_group_id": "361953",
        "location_id": "258783",
        "sex_id": "",
        "landmark": or_default(text_field(victim, "landmark"), "Unknown Landmark"),
        "nationality_id": "",
        "national_id_type_id": "",
        "national_id": "",
        "lang_id": "",
        "tribe_id": "",
        "phone": "",
        "phone2": "",
        "email": "",
        ".id": "86164",
    })
}

fn perpetrator_record(message: &StandardMessage) -> Value {
    let perpetrator = person(message, "perpetrator");
    let gender = text_field(perpetrator, "gender");
    let sex = if gender.is_empty() {
        String::new()
    } else {
        format!("^{}", capitalised(&gender))
    };
    json!({
        "fname": or_default(text_field(perpetrator, "name"), "Unknown Perpetrator"),
        "age_t": "0",
        "age": age_field(perpetrator),
        "dob": "",
        "age_group_id": "361955",
        "age_group": "31-45",
        "location_id": "",
        "sex_id": sex_id(&gender),
        "sex": sex,
        "landmark": "",
        "nationality_id": "",
        "national_id_type_id": "",
        "national_id": "",
        "lang_id": "",
        "tribe_id": "",
        "phone": "",
        "phone2": "",
        "email": "",
        "relationship_id": "",
        "shareshome_id": "",
        "health_id": "",
        "employment_id": "",
        "marital_id": "",
        "guardian_fullname": "",
        "notes": "",
        ".id": "",
    })
}

pub fn render_cases_payload(message: &StandardMessage) -> Value {
    let src_uid = if message.source_uid().starts_with("walkin-") {
        message.source_uid().to_string()
    } else {
        format!("walkin-100-{}", message.source_timestamp().trunc() as i64)
    };
    let src_address = or_default(message.source_address().trim().to_string(), DEFAULT_WALKIN_ADDRESS);
    let narrative = or_default(message.content().trim().to_string(), "No details provided");
    let case_category_id = message
        .metadata()
        .get("case_category_id")
        .and_then(scalar_string)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CASE_CATEGORY_ID.to_string());

    json!({
        "src": "walkin",
        "src_uid": src_uid,
        "src_address": src_address,
        "src_uid2": format!("{src_uid}-2"),
        "src_usr": "100",
        "src_vector": "2",
        "src_callid": message.message_id(),
        "src_ts": format!("{:.3}", message.source_timestamp()),
        "reporters_uuid": client_record(message),
        "clients_case": [client_record(message)],
        "perpetrators_case": [perpetrator_record(message)],
        "attachments_case": [],
        "services": [],
        "knowabout116_id": "",
        "case_category_id": case_category_id,
        "narrative": narrative,
        "plan": "---",
        "justice_id": "",
        "assessment_id": "",
        "priority": "1",
        "status": "1",
        "escalated_to_id": "0",
        "gbv_related": "0",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn whatsapp_text() -> StandardMessage {
        StandardMessage::builder("whatsapp", "254700000001", "wamid.ABC", "whatsapp")
            .timestamp(1_710_000_000.0)
            .content("Hello")
            .build()
            .unwrap()
    }

    #[test]
    fn endpoint_selection() {
        assert_eq!(select_endpoint("webform", "application/json"), Endpoint::Cases);
        assert_eq!(
            select_endpoint("ceemis", "case/ceemis/update"),
            Endpoint::Transform(Partner::Ceemis)
        );
        assert_eq!(
            select_endpoint("cpims", "case/cpims/abuse"),
            Endpoint::Transform(Partner::Cpims)
        );
        assert_eq!(select_endpoint("ceemis", "text/plain"), Endpoint::Messaging);
        assert_eq!(select_endpoint("whatsapp", "case/ceemis/create"), Endpoint::Messaging);
        assert_eq!(select_endpoint("", ""), Endpoint::Messaging);
    }

    #[test]
    fn messaging_payload_matches_wire_shape() {
        let payload = render_messaging_payload(&whatsapp_text());
        assert_eq!(
            payload,
            json!({
                "channel": "whatsApp",
                "timestamp": "2024-03-09T16:00:00",
                "session_id": "254700000001",
                "message_id": "wamid.ABC",
                "from": "254700000001",
                "message": "SGVsbG8=",
                "mime": "text/plain",
            })
        );
    }

    #[test]
    fn cases_payload_fills_required_defaults() {
        let message = StandardMessage::builder("walkin", "walkin-100-1", "c-1", "webform")
            .timestamp(1_710_000_000.5)
            .content("   ")
            .meta("victim", json!({"name": "", "age": ""}))
            .meta("perpetrator", json!({"name": "", "age": "", "gender": "male"}))
            .build()
            .unwrap();
        let payload = render_cases_payload(&message);
        assert_eq!(payload["narrative"], "No details provided");
        assert_eq!(payload["src_uid2"], "walkin-100-1-2");
        assert_eq!(payload["src_ts"], "1710000000.500");
        assert_eq!(payload["case_category_id"], DEFAULT_CASE_CATEGORY_ID);
        assert_eq!(payload["clients_case"][0]["fname"], "Anonymous Victim");
        assert_eq!(payload["clients_case"][0]["landmark"], "Unknown Landmark");
        assert_eq!(payload["clients_case"][0]["age"], "0");
        assert_eq!(payload["perpetrators_case"][0]["fname"], "Unknown Perpetrator");
        assert_eq!(payload["perpetrators_case"][0]["sex_id"], "121");
        assert_eq!(payload["perpetrators_case"][0]["sex"], "^Male");
        assert_eq!(payload["src_address"], "walkin-100-1");
    }

    #[test]
    fn response_interpretation() {
        let cases = interpret_response(200, r#"{"cases":[["31661"]]}"#);
        assert_eq!(cases.case_id.as_deref(), Some("31661"));
        assert_eq!(cases.case_reference.as_deref(), Some("lwf31661"));

        let message = interpret_response(201, r#"{"id": 77}"#);
        assert_eq!(message.message_id.as_deref(), Some("77"));
        assert!(message.case_reference.is_none());

        let text = interpret_response(200, "queued");
        assert_eq!(text.response_text.as_deref(), Some("queued"));

        let failed = interpret_response(503, "unavailable");
        assert!(failed.is_error());
        assert_eq!(failed.http_status, Some(503));
        assert_eq!(failed.error.as_deref(), Some("unavailable"));
    }
}
