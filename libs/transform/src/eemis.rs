//! EEMIS transform: migrant worker passport lookup.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};
use ucg_core::{CaseTransform, Delivery, Partner, StandardMessage};

use crate::rows::{field, scalar};

pub const DEFAULT_BASE_URL: &str = "https://api.eemis.mglsd.go.ug/api";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EemisConfig {
    pub base_url: String,
}

impl Default for EemisConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

fn first_of(record: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .map(|key| field(Some(record), key))
        .find(|value| !value.is_empty())
        .unwrap_or_default()
}

/// Reshapes an EEMIS worker record into the helpline client record.
pub fn client_record(national_id: &str, response: &Value) -> Value {
    let empty = Map::new();
    let record = response
        .get("data")
        .and_then(Value::as_object)
        .or_else(|| response.as_object())
        .unwrap_or(&empty);

    let given = first_of(record, &["first_name", "given_name", "given_names", "other_names"]);
    let family = first_of(record, &["last_name", "surname", "family_name"]);
    let full = first_of(record, &["full_name", "name"]);
    let fname = if given.is_empty() && family.is_empty() {
        full
    } else {
        [given, family]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    };

    let (sex_id, sex) = match first_of(record, &["gender", "sex"]).to_ascii_uppercase().as_str() {
        "M" | "MALE" => ("121", "^Male"),
        "F" | "FEMALE" => ("122", "^Female"),
        _ => ("", ""),
    };
    let id = first_of(record, &["national_id", "nin"]);

    json!({
        "fname": fname,
        "national_id": if id.is_empty() { national_id.to_string() } else { id },
        "passport": first_of(record, &["passport_no", "passport_number", "passport"]),
        "dob": first_of(record, &["date_of_birth", "dob"]),
        "sex_id": sex_id,
        "sex": sex,
        "phone": first_of(record, &["phone", "phone_number", "contact"]),
        "email": first_of(record, &["email"]),
        "nationality": first_of(record, &["nationality", "country"]),
        "destination_country": first_of(record, &["destination_country", "destination"]),
        "employer": first_of(record, &["employer", "employer_name"]),
        "raw": record,
    })
}

/// `{base}/passports/{id}` with the id pushed as a single escaped segment.
pub fn passport_url(base_url: &str, national_id: &str) -> Result<url::Url, url::ParseError> {
    let mut url = url::Url::parse(base_url)?;
    url.path_segments_mut()
        .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .push("passports")
        .push(national_id);
    Ok(url)
}

pub struct EemisTransform {
    http: reqwest::Client,
    config: EemisConfig,
}

impl EemisTransform {
    pub fn new(http: reqwest::Client, config: EemisConfig) -> Self {
        Self { http, config }
    }

    pub async fn lookup(&self, national_id: &str) -> Delivery {
        let national_id = national_id.trim();
        if national_id.is_empty() {
            return Delivery::failure().message("National ID is required").code(400);
        }
        let url = match passport_url(&self.config.base_url, national_id) {
            Ok(url) => url,
            Err(err) => {
                warn!(error = %err, "EEMIS base URL is invalid");
                return Delivery::failure().message(format!("Error: {err}")).code(500);
            }
        };
        debug!(url = %url, "looking up EEMIS passport");
        let response = match self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "EEMIS unreachable");
                return Delivery::failure().message(format!("Error: {err}")).code(500);
            }
        };
        let status = response.status().as_u16();
        if status != 200 {
            warn!(status, "EEMIS lookup failed");
            return Delivery::failure()
                .message(format!("EEMIS API returned status code {status}"))
                .code(status);
        }
        match response.json::<Value>().await {
            Ok(body) => Delivery::success()
                .data(client_record(national_id, &body))
                .code(200),
            Err(err) => Delivery::failure()
                .message(format!("Error: {err}"))
                .code(500),
        }
    }
}

#[async_trait]
impl CaseTransform for EemisTransform {
    fn partner(&self) -> Partner {
        Partner::Eemis
    }

    async fn submit(&self, message: &StandardMessage) -> Delivery {
        let national_id = message
            .metadata()
            .get("national_id")
            .map(scalar)
            .unwrap_or_default();
        let delivery = self.lookup(&national_id).await;
        crate::record_submission(Partner::Eemis, &delivery);
        delivery
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gender_codes_are_mapped() {
        let record = client_record(
            "CM123",
            &json!({"data": {"first_name": "Grace", "surname": "Akello", "gender": "F"}}),
        );
        assert_eq!(record["fname"], "Grace Akello");
        assert_eq!(record["sex_id"], "122");
        assert_eq!(record["sex"], "^Female");
        assert_eq!(record["national_id"], "CM123");

        let record = client_record("CM9", &json!({"name": "Okello", "sex": "m"}));
        assert_eq!(record["fname"], "Okello");
        assert_eq!(record["sex_id"], "121");
    }

    #[test]
    fn national_id_stays_one_path_segment() {
        let url = passport_url("http://eemis.local/api/", "../admin?x=1#y").unwrap();
        assert_eq!(url.path(), "/api/passports/..%2Fadmin%3Fx=1%23y");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);

        let url = passport_url("http://eemis.local/api", "CM900").unwrap();
        assert_eq!(url.as_str(), "http://eemis.local/api/passports/CM900");
    }

    #[tokio::test]
    async fn missing_national_id_is_rejected_locally() {
        let transform = EemisTransform::new(reqwest::Client::new(), EemisConfig::default());
        let delivery = transform.lookup("  ").await;
        assert_eq!(delivery.code, Some(400));
        assert_eq!(delivery.message.as_deref(), Some("National ID is required"));
    }
}
