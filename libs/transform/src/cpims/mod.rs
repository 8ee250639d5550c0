//! CPIMS transform: positional helpline case rows to a CRS case record.

pub mod categories;
pub mod codes;
pub mod geo;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{info, warn};
use ucg_core::{CaseTransform, Delivery, Partner, StandardMessage};

pub use categories::category_item_id;
pub use codes::CodeTable;
pub use geo::{AreaType, GeoArea, GeoError, GeoIndex};

use crate::rows::{Row, or_default};

pub const DEFAULT_ENDPOINT: &str = "https://test.cpims.net/api/v1/crs/";
pub const DEFAULT_GEO_ENDPOINT: &str = "https://test.cpims.net/api/v1/geo/";

const UNKNOWN_AREA: &str = "UNK";
const DEFAULT_CHILD_DOB: &str = "2010-01-01";
const DEFAULT_REPORTER_PHONE: &str = "0700000000";

// Positional fields of `cases[0]`.
mod case {
    pub const ID: usize = 0;
    pub const CREATED_ON: usize = 1;
    pub const CREATED_BY: usize = 2;
    pub const CATEGORY: usize = 15;
    pub const SUB_CATEGORY: usize = 16;
    pub const NATURE: usize = 17;
    pub const INCIDENT_DATE: usize = 18;
    pub const INCIDENT_PLACE: usize = 19;
    pub const NARRATIVE: usize = 20;
    pub const PRIORITY: usize = 35;
    pub const PLAN: usize = 40;
    pub const POLICE_OB: usize = 41;
}

// Positional fields of `reporters[0]`.
mod reporter {
    pub const FULL_NAME: usize = 6;
    pub const EMAIL: usize = 10;
    pub const PHONE: usize = 12;
    pub const SEX: usize = 16;
    pub const COUNTY: usize = 39;
    pub const CONSTITUENCY: usize = 40;
    pub const WARD: usize = 41;
    pub const VILLAGE: usize = 44;
    pub const LANDMARK: usize = 45;
}

// Positional fields of `clients[0]`.
mod client {
    pub const FULL_NAME: usize = 7;
    pub const DOB: usize = 8;
    pub const SEX: usize = 18;
    pub const TRIBE: usize = 20;
    pub const IN_SCHOOL: usize = 22;
    pub const COUNTY: usize = 33;
    pub const CONSTITUENCY: usize = 34;
    pub const WARD: usize = 35;
    pub const VILLAGE: usize = 36;
}

// Positional fields of `perpetrators[0]`.
mod perpetrator {
    pub const FULL_NAME: usize = 6;
    pub const SEX: usize = 16;
    pub const RELATIONSHIP: usize = 30;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpimsConfig {
    pub endpoint: String,
    pub geo_endpoint: String,
    pub token: Option<String>,
    pub default_area_code: Option<String>,
}

impl Default for CpimsConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            geo_endpoint: DEFAULT_GEO_ENDPOINT.to_string(),
            token: None,
            default_area_code: None,
        }
    }
}

/// Whitespace-delimited parts of a person's name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameParts {
    pub first: String,
    pub other: String,
    pub surname: String,
}

/// First token is the first name, the last token the surname, anything
/// between goes to other names. A single token has no surname.
pub fn split_name(full_name: &str) -> NameParts {
    let tokens: Vec<&str> = full_name.split_whitespace().collect();
    match tokens.as_slice() {
        [] => NameParts::default(),
        [only] => NameParts {
            first: only.to_string(),
            ..NameParts::default()
        },
        [first, middle @ .., last] => NameParts {
            first: first.to_string(),
            other: middle.join(" "),
            surname: last.to_string(),
        },
    }
}

/// Numeric strings are Unix seconds rendered as `YYYY-MM-DD`; anything else
/// passes through unchanged.
pub fn format_date(raw: &str) -> String {
    let raw = raw.trim();
    match raw.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() => {
            OffsetDateTime::from_unix_timestamp(seconds.trunc() as i64)
                .ok()
                .and_then(|at| at.format(format_description!("[year]-[month]-[day]")).ok())
                .unwrap_or_else(|| raw.to_string())
        }
        _ => raw.to_string(),
    }
}

/// Like [`format_date`], but an empty or zero value becomes today's date.
fn date_or_today(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() || raw == "0" {
        return format_date(&OffsetDateTime::now_utc().unix_timestamp().to_string());
    }
    format_date(raw)
}

fn text_or_null(value: String) -> Value {
    if value.is_empty() {
        Value::Null
    } else {
        Value::String(value)
    }
}

fn first_non_empty<const N: usize>(candidates: [String; N], default: &str) -> String {
    candidates
        .into_iter()
        .find(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Location names, from the client row when it has them, else the reporter's.
struct Place {
    county: String,
    constituency: String,
    ward: String,
    village: String,
}

impl Place {
    fn from_rows(client_row: &Row<'_>, reporter_row: &Row<'_>) -> Self {
        let pick = |c: usize, r: usize| {
            let from_client = client_row.text(c);
            if from_client.is_empty() {
                reporter_row.text(r)
            } else {
                from_client
            }
        };
        Self {
            county: pick(client::COUNTY, reporter::COUNTY),
            constituency: pick(client::CONSTITUENCY, reporter::CONSTITUENCY),
            ward: pick(client::WARD, reporter::WARD),
            village: pick(client::VILLAGE, reporter::VILLAGE),
        }
    }
}

pub struct CpimsTransform {
    http: reqwest::Client,
    config: CpimsConfig,
    geo: GeoIndex,
}

impl CpimsTransform {
    pub fn new(http: reqwest::Client, config: CpimsConfig) -> Self {
        let geo = GeoIndex::new(
            http.clone(),
            config.geo_endpoint.clone(),
            config.token.clone(),
            config.default_area_code.clone(),
        );
        Self { http, config, geo }
    }

    pub fn config(&self) -> &CpimsConfig {
        &self.config
    }

    pub fn geo(&self) -> &GeoIndex {
        &self.geo
    }

    async fn area(&self, name: &str, area_type: AreaType) -> String {
        self.geo
            .resolve(name, area_type)
            .await
            .unwrap_or_else(|| UNKNOWN_AREA.to_string())
    }

    /// Builds the CRS case record for one helpline case payload.
    pub async fn build_payload(&self, payload: &Map<String, Value>) -> Value {
        let case_row = Row::first(payload, "cases");
        let reporter_row = Row::first(payload, "reporters");
        let client_row = Row::first(payload, "clients");
        let perpetrator_row = Row::first(payload, "perpetrators");
        let has_client = client_row.is_present();

        let place = Place::from_rows(&client_row, &reporter_row);
        let county = self.area(&place.county, AreaType::County).await;
        let constituency = self.area(&place.constituency, AreaType::Constituency).await;
        let ward = match self.geo.resolve(&place.ward, AreaType::Ward).await {
            Some(code) => code,
            None => "UNKNOWN_WARD".to_string(),
        };

        let category_text = case_row.text(case::CATEGORY);
        let category = category_item_id(&category_text)
            .map(str::to_string)
            .unwrap_or_else(|| CodeTable::CaseCategory.map(&category_text));
        let nature = CodeTable::CaseNature.map(&case_row.text(case::NATURE));
        let incident_date = date_or_today(&case_row.text(case::INCIDENT_DATE));
        let incident_place = case_row.text(case::INCIDENT_PLACE);

        let person = |c: usize, r: usize| {
            if has_client {
                client_row.text(c)
            } else {
                reporter_row.text(r)
            }
        };
        let child = split_name(&person(client::FULL_NAME, reporter::FULL_NAME));
        let child_sex = codes::normalize(&person(client::SEX, reporter::SEX)).to_string();
        let reporter_name = split_name(&reporter_row.text(reporter::FULL_NAME));

        let tribe = client_row.text(client::TRIBE);
        let dob = client_row.text(client::DOB);
        let village = place.village.clone();
        let landmark = first_non_empty(
            [reporter_row.text(reporter::LANDMARK), place.ward.clone(), place.county.clone()],
            "Helpline Report",
        );
        let location = first_non_empty([village.clone(), place.ward.clone()], "Unknown");

        let perpetrators = if perpetrator_row.is_present() {
            let name = split_name(&perpetrator_row.text(perpetrator::FULL_NAME));
            json!([{
                "first_name": name.first,
                "surname": name.surname,
                "relationship": CodeTable::Relationship.map(&perpetrator_row.text(perpetrator::RELATIONSHIP)),
                "sex": CodeTable::Sex.map(codes::normalize(&perpetrator_row.text(perpetrator::SEX))),
            }])
        } else {
            json!([])
        };

        let siblings = if has_client {
            json!([{
                "surname": child.surname,
                "dob": date_or_today(&dob),
                "sex": CodeTable::Sex.map(&child_sex),
                "school_name": "",
                "other_names": child.other,
                "first_name": child.first,
                "class": "",
                "remarks": "",
            }])
        } else {
            json!([])
        };

        json!({
            "physical_condition": "PNRM",
            "county": county,
            "sub_county_code": constituency,
            "hh_economic_status": "UINC",
            "other_condition": "CHNM",
            "child_sex": or_default(CodeTable::Sex.map(&child_sex), "SMAL"),
            "reporter_first_name": or_default(reporter_name.first, "Unknown"),
            "ob_number": case_row.text(case::POLICE_OB),
            "longitude": null,
            "recommendation_bic": case_row.text(case::PLAN),
            "family_status": "FSLA",
            "reporter_other_names": reporter_name.other,
            "case_date": date_or_today(&case_row.text(case::CREATED_ON)),
            "child_other_names": child.other,
            "friends": null,
            "organization_unit": "Helpline 116",
            "case_reporter": CodeTable::CaseReporter.lookup("Helpline 116").unwrap_or("CRHE"),
            "child_in_school": text_or_null(client_row.text(client::IN_SCHOOL)),
            "tribe": if tribe.is_empty() { Value::Null } else { CodeTable::Tribe.map(&tribe).into() },
            "sublocation": or_default(place.ward.clone(), "Unknown"),
            "child_surname": or_default(child.surname.clone(), "Unknown"),
            "case_village": or_default(village.clone(), "Unknown Village"),
            "latitude": null,
            "child_first_name": or_default(child.first.clone(), "Unknown"),
            "reporter_telephone": or_default(reporter_row.text(reporter::PHONE), DEFAULT_REPORTER_PHONE),
            "court_number": "",
            "verification_status": "001",
            "child_dob": if dob.is_empty() { DEFAULT_CHILD_DOB.to_string() } else { format_date(&dob) },
            "perpetrator_status": if perpetrator_row.is_present() { "PKNW" } else { "PUNK" },
            "reporter_surname": or_default(reporter_name.surname, "Unknown"),
            "case_narration": or_default(case_row.text(case::NARRATIVE), "Case reported through helpline"),
            "court_name": "",
            "case_landmark": landmark,
            "religion_type": null,
            "long_term_needs": null,
            "immediate_needs": null,
            "mental_condition": "MNRM",
            "police_station": "",
            "risk_level": CodeTable::RiskLevel.lookup(&case_row.text(case::PRIORITY)).unwrap_or("RLMD"),
            "constituency": constituency.chars().take(3).collect::<String>(),
            "hobbies": null,
            "reporter_email": reporter_row.text(reporter::EMAIL),
            "location": location,
            "reporter_county": county,
            "reporter_sub_county": constituency,
            "reporter_ward": ward,
            "reporter_village": or_default(village, "UNKNOWN_VILLAGE"),
            "has_birth_cert": null,
            "user": or_default(case_row.text(case::CREATED_BY), "helpline_user"),
            "area_code": county,
            "case_details": [{
                "place_of_event": incident_place,
                "category": category,
                "nature_of_event": nature,
                "date_of_event": incident_date,
            }],
            "categories": [{
                "case_category": category,
                "case_sub_category": case_row.text(case::SUB_CATEGORY),
                "case_date_event": incident_date,
                "case_nature": nature,
                "case_place_of_event": incident_place,
                "case_id": case_row.text(case::ID),
            }],
            "perpetrators": perpetrators,
            "siblings": siblings,
            "parents": [{}, {}],
            "caregivers": [],
        })
    }

    async fn send(&self, payload: Value) -> Delivery {
        let mut request = self.http.post(&self.config.endpoint).json(&payload);
        if let Some(token) = &self.config.token {
            request = request.header(reqwest::header::AUTHORIZATION, format!("Token {token}"));
        }
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "CPIMS unreachable");
                return Delivery::failure().message(format!("Network error: {err}"));
            }
        };
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        interpret_response(status, &body, self.config.token.is_some(), payload)
    }
}

/// Maps a CRS answer to a delivery result.
pub fn interpret_response(status: u16, body: &str, token_sent: bool, payload: Value) -> Delivery {
    match status {
        200..=299 => match serde_json::from_str::<Value>(body) {
            Ok(json) => Delivery::success()
                .message("Case successfully sent to CPIMS")
                .response(json)
                .payload_sent(payload),
            Err(_) => {
                let mut delivery = Delivery::success()
                    .message("Case sent to CPIMS")
                    .payload_sent(payload);
                delivery.response_text = Some(body.to_string());
                delivery
            }
        },
        401 if token_sent => {
            warn!("CPIMS rejected the configured token");
            let mut delivery = Delivery::failure()
                .message("auth failed")
                .details(Value::String(body.to_string()));
            delivery.http_status = Some(status);
            delivery
        }
        401 => {
            warn!("CPIMS returned 401 to an unauthenticated request");
            let mut delivery = Delivery::partial()
                .message("Payload processed and sent to CPIMS but received 401 response")
                .note("Check if CPIMS endpoint configuration is correct")
                .payload_sent(payload);
            delivery.response_text = Some(body.to_string());
            delivery
        }
        _ => {
            warn!(status, "CPIMS rejected the case");
            let mut delivery = Delivery::failure()
                .message(format!("CPIMS API error: {status}"))
                .details(Value::String(body.to_string()))
                .payload_sent(payload);
            delivery.http_status = Some(status);
            delivery
        }
    }
}

#[async_trait]
impl CaseTransform for CpimsTransform {
    fn partner(&self) -> Partner {
        Partner::Cpims
    }

    async fn submit(&self, message: &StandardMessage) -> Delivery {
        let payload = self.build_payload(message.metadata()).await;
        info!(endpoint = %self.config.endpoint, "sending case to CPIMS");
        let delivery = self.send(payload).await;
        crate::record_submission(Partner::Cpims, &delivery);
        delivery
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_token_names_split_back_to_the_original() {
        for full in ["Jane Doe", "A B"] {
            let parts = split_name(full);
            assert_eq!(format!("{} {}", parts.first, parts.surname), full);
            assert!(parts.other.is_empty());
        }
        let parts = split_name("  Mary  Wanjiru Kamau ");
        assert_eq!(parts.first, "Mary");
        assert_eq!(parts.other, "Wanjiru");
        assert_eq!(parts.surname, "Kamau");
        assert_eq!(split_name("Cher").surname, "");
    }

    #[test]
    fn numeric_dates_are_rendered() {
        assert_eq!(format_date("1710000000"), "2024-03-09");
        assert_eq!(format_date("2024-01-05"), "2024-01-05");
        assert_eq!(format_date(""), "");
        assert_eq!(date_or_today("0").len(), 10);
    }

    #[test]
    fn unauthenticated_401_is_partial() {
        let delivery = interpret_response(401, "nope", false, json!({}));
        assert_eq!(delivery.status.as_str(), "partial_success");
        assert!(delivery.note.is_some());

        let delivery = interpret_response(401, "nope", true, json!({}));
        assert_eq!(delivery.message.as_deref(), Some("auth failed"));
        assert!(delivery.is_error());
    }

    #[test]
    fn other_rejections_keep_the_payload() {
        let delivery = interpret_response(500, "boom", false, json!({"a": 1}));
        assert_eq!(delivery.message.as_deref(), Some("CPIMS API error: 500"));
        assert_eq!(delivery.payload_sent, Some(json!({"a": 1})));
    }
}
