//! CEEMIS transform: helpline cases to `multipart/form-data` create or
//! update submissions.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::multipart::{Form, Part};
use serde_json::{Map, Value};
use tracing::{info, warn};
use ucg_core::{CaseTransform, Delivery, Partner, StandardMessage};

use crate::rows::{field, first_object, or_default};

pub const DEFAULT_BASE_URL: &str = "http://ceemis.mglsd.go.ug:8080/api.ceemis/service";
const CREATE_PATH: &str = "create/sauti_case";
const UPDATE_PATH: &str = "update/sauti_case_update";

static CASE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"MGLSD\d+").expect("case id pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CeemisConfig {
    pub base_url: String,
}

impl Default for CeemisConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CeemisAction {
    Create,
    Update { case_id: String },
}

impl CeemisAction {
    /// A payload carrying `ref` updates an existing case.
    pub fn for_payload(payload: &Map<String, Value>) -> Self {
        match payload.get("ref") {
            Some(reference) => Self::Update {
                case_id: extract_case_id(&crate::rows::scalar(reference)),
            },
            None => Self::Create,
        }
    }

    fn path(&self) -> &'static str {
        match self {
            Self::Create => CREATE_PATH,
            Self::Update { .. } => UPDATE_PATH,
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            Self::Create => "created",
            Self::Update { .. } => "updated",
        }
    }
}

/// The `MGLSD…` case id inside `reference`, or the reference unchanged.
pub fn extract_case_id(reference: &str) -> String {
    match CASE_ID.find(reference) {
        Some(found) => found.as_str().to_string(),
        None => {
            warn!(reference, "no MGLSD case id in CEEMIS reference; sending it as is");
            reference.to_string()
        }
    }
}

/// Ordered form fields for `action`.
pub fn form_fields(action: &CeemisAction, payload: &Map<String, Value>) -> Vec<(&'static str, String)> {
    let client = first_object(payload, "clients_case");
    let perpetrator = first_object(payload, "perpetrators_case");
    let text = |key: &str| field(Some(payload), key);
    let phone = {
        let from_client = field(client, "phone");
        if from_client.is_empty() {
            text("src_address")
        } else {
            from_client
        }
    };
    let migrant = [
        ("mw_name", field(client, "fname")),
        ("mw_phone", phone),
        ("mw_email", field(client, "email")),
        ("mw_passport", field(client, "national_id")),
    ];
    let employer = [
        ("emp_name", or_default(field(perpetrator, "fname"), "NA")),
        ("emp_number", or_default(field(perpetrator, "phone"), "NA")),
    ];
    let category = ("comp_category", or_default(text("case_category"), "COMPLAINT"));

    let mut fields = Vec::with_capacity(18);
    match action {
        CeemisAction::Create => {
            fields.extend(migrant);
            fields.push(("mw_sys_id", text("session_id")));
            fields.push(("mw_country", "Uganda".to_string()));
            fields.push(("mw_city", String::new()));
            fields.push(("emp_sector", "Unknown".to_string()));
            fields.extend(employer);
            fields.push(("location", "Uganda".to_string()));
            fields.push(("mw_loca", "Unknown".to_string()));
            fields.push(category);
            fields.push(("mw_narative", or_default(text("narrative"), "Case details")));
        }
        CeemisAction::Update { case_id } => {
            fields.push(("caseid", case_id.clone()));
            fields.push(("status", or_default(text("status"), "2")));
            fields.extend(migrant);
            fields.push(("mw_sys_id", or_default(text("session_id"), "NA")));
            fields.push(("mw_country", "Uganda".to_string()));
            fields.push(("mw_city", "Kampala".to_string()));
            fields.push(("emp_sector", "Housemaid".to_string()));
            fields.extend(employer);
            fields.push(("location", "Kampala".to_string()));
            fields.push(("mw_loca", "Kampala".to_string()));
            fields.push(category);
            fields.push(("mw_narative", or_default(text("narrative"), "Case update")));
        }
    }
    fields
}

/// Every field becomes a filename-less `text/plain` part.
fn multipart(fields: Vec<(&'static str, String)>) -> reqwest::Result<Form> {
    fields.into_iter().try_fold(Form::new(), |form, (name, value)| {
        Ok(form.part(name, Part::text(value).mime_str("text/plain")?))
    })
}

pub struct CeemisTransform {
    http: reqwest::Client,
    config: CeemisConfig,
}

impl CeemisTransform {
    pub fn new(http: reqwest::Client, config: CeemisConfig) -> Self {
        Self { http, config }
    }

    pub fn url_for(&self, action: &CeemisAction) -> String {
        crate::join_url(&self.config.base_url, action.path())
    }

    async fn send(&self, action: &CeemisAction, payload: &Map<String, Value>) -> Delivery {
        let url = self.url_for(action);
        let form = match multipart(form_fields(action, payload)) {
            Ok(form) => form,
            Err(err) => return Delivery::failure().message(format!("Invalid CEEMIS form: {err}")),
        };
        if let CeemisAction::Update { case_id } = action {
            info!(url = %url, case_id = %case_id, "updating CEEMIS case");
        } else {
            info!(url = %url, "creating CEEMIS case");
        }
        let response = match self.http.post(&url).multipart(form).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "CEEMIS unreachable");
                return Delivery::failure().message(format!("Network error: {err}"));
            }
        };
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        interpret_response(action, status, &body)
    }
}

pub fn interpret_response(action: &CeemisAction, status: u16, body: &str) -> Delivery {
    if matches!(status, 200 | 201) {
        return match serde_json::from_str::<Value>(body) {
            Ok(json) => Delivery::success()
                .message(format!("Case successfully {} in CEEMIS", action.verb()))
                .response(json),
            Err(_) => {
                let mut delivery =
                    Delivery::success().message(format!("Case {} in CEEMIS", action.verb()));
                delivery.response_text = Some(body.to_string());
                delivery
            }
        };
    }
    warn!(status, "CEEMIS rejected the case");
    let mut delivery = Delivery::failure()
        .message(format!("CEEMIS API error: {status}"))
        .details(Value::String(body.to_string()));
    delivery.http_status = Some(status);
    delivery
}

#[async_trait]
impl CaseTransform for CeemisTransform {
    fn partner(&self) -> Partner {
        Partner::Ceemis
    }

    async fn submit(&self, message: &StandardMessage) -> Delivery {
        let payload = message.metadata();
        let action = CeemisAction::for_payload(payload);
        let delivery = self.send(&action, payload).await;
        crate::record_submission(Partner::Ceemis, &delivery);
        delivery
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn case_id_is_extracted_or_passed_through() {
        assert_eq!(extract_case_id("MGLSD7093227"), "MGLSD7093227");
        assert_eq!(extract_case_id("ref: MGLSD42/2024"), "MGLSD42");
        assert_eq!(extract_case_id("LEGACY-9"), "LEGACY-9");
    }

    #[test]
    fn action_follows_ref_presence() {
        assert_eq!(CeemisAction::for_payload(&map(json!({"narrative": "x"}))), CeemisAction::Create);
        assert_eq!(
            CeemisAction::for_payload(&map(json!({"ref": "MGLSD1"}))),
            CeemisAction::Update { case_id: "MGLSD1".into() }
        );
    }

    #[test]
    fn create_fields_carry_defaults() {
        let payload = map(json!({
            "src_address": "256700",
            "narrative": "unpaid wages",
            "clients_case": [{"fname": "Aisha", "national_id": "P123"}],
        }));
        let fields: Map<String, Value> = form_fields(&CeemisAction::Create, &payload)
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::String(v)))
            .collect();
        assert_eq!(fields["mw_name"], "Aisha");
        assert_eq!(fields["mw_phone"], "256700");
        assert_eq!(fields["mw_passport"], "P123");
        assert_eq!(fields["mw_country"], "Uganda");
        assert_eq!(fields["emp_sector"], "Unknown");
        assert_eq!(fields["emp_name"], "NA");
        assert_eq!(fields["comp_category"], "COMPLAINT");
        assert!(!fields.contains_key("caseid"));
    }

    #[test]
    fn update_fields_lead_with_case_id() {
        let action = CeemisAction::Update { case_id: "MGLSD5".into() };
        let fields = form_fields(&action, &Map::new());
        assert_eq!(fields[0], ("caseid", "MGLSD5".to_string()));
        assert_eq!(fields[1], ("status", "2".to_string()));
        assert!(fields.contains(&("emp_sector", "Housemaid".to_string())));
        assert!(fields.contains(&("mw_narative", "Case update".to_string())));
    }
}
