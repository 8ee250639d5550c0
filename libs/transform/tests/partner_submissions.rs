use std::sync::Arc;

use http::HeaderMap;
use serde_json::{Value, json};
use tracing_test::traced_test;
use ucg_core::platforms::PartnerAdapter;
use ucg_core::*;
use ucg_transform::*;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(body: Value) -> InboundRequest {
    InboundRequest::post(HeaderMap::new(), serde_json::to_vec(&body).unwrap())
}

async fn message(partner: Partner, body: Value) -> StandardMessage {
    PartnerAdapter::new(partner)
        .parse_messages(&request(body))
        .await
        .unwrap()
        .remove(0)
}

fn pipeline(transform: Arc<dyn CaseTransform>) -> (Pipeline, SharedMessageLog) {
    let log: SharedMessageLog = Arc::new(MemoryMessageLog::new());
    let conversations: SharedConversationStore =
        Arc::new(MemoryConversationStore::new(Arc::clone(&log)));
    let router = MessageRouter::new(
        reqwest::Client::new(),
        RouterConfig::default(),
        Arc::clone(&conversations),
        Arc::clone(&log),
    )
    .with_transform(transform);
    (
        Pipeline::new(conversations, Arc::clone(&log), Arc::new(router)),
        log,
    )
}

/// Positional row with `values` placed at their indices.
fn row(len: usize, values: &[(usize, &str)]) -> Value {
    let mut row = vec![Value::String(String::new()); len];
    for (index, value) in values {
        row[*index] = Value::String(value.to_string());
    }
    Value::Array(row)
}

fn cpims_case(client_county: &str) -> Value {
    json!({
        "cases": [row(42, &[(0, "5521"), (1, "1710000000"), (15, "Defilement"), (17, "One-off event"), (20, "reported by neighbour")])],
        "reporters": [row(46, &[(6, "Peter Otieno"), (12, "0722000000")])],
        "clients": [row(37, &[(7, "Mary Wanjiru Kamau"), (18, "^Female"), (33, client_county)])],
        "perpetrators": [row(31, &[(6, "John Doe"), (16, "Male"), (30, "Neighbour")])],
    })
}

fn cpims(server: &MockServer, token: Option<&str>, default_area: Option<&str>) -> CpimsTransform {
    CpimsTransform::new(
        reqwest::Client::new(),
        CpimsConfig {
            endpoint: format!("{}/crs/", server.uri()),
            geo_endpoint: format!("{}/geo/", server.uri()),
            token: token.map(str::to_string),
            default_area_code: default_area.map(str::to_string),
        },
    )
}

fn sent_payload(requests: &[wiremock::Request], at: &str) -> Value {
    let request = requests
        .iter()
        .find(|r| r.url.path() == at)
        .expect("request to CPIMS");
    serde_json::from_slice(&request.body).unwrap()
}

#[tokio::test]
async fn ceemis_ref_routes_to_update() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/update/sauti_case_update"))
        .and(body_string_contains("MGLSD7093227"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let transform = Arc::new(CeemisTransform::new(
        reqwest::Client::new(),
        CeemisConfig { base_url: server.uri() },
    ));
    let (pipeline, log) = pipeline(transform);
    let outcomes = pipeline
        .ingest(
            &PartnerAdapter::new(Partner::Ceemis),
            &request(json!({"ref": "MGLSD7093227", "narrative": "employer paid"})),
        )
        .await
        .unwrap();

    let delivery = &outcomes[0].delivery;
    assert!(delivery.is_success());
    assert_eq!(delivery.message.as_deref(), Some("Case successfully updated in CEEMIS"));

    let requests = server.received_requests().await.unwrap();
    let content_type = requests[0].headers.get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("multipart/form-data"));
    let body = String::from_utf8_lossy(&requests[0].body).to_ascii_lowercase();
    let caseid = body.find("name=\"caseid\"").expect("caseid part");
    let part = &body[caseid..];
    assert!(part.contains("content-type: text/plain"));
    assert!(part.contains("mglsd7093227"));
    assert!(!body.contains("filename="));

    let entry = log
        .get(&format!("out:ceemis:{}", outcomes[0].message_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.delivery, DeliveryState::Delivered);
}

#[tokio::test]
async fn ceemis_repeat_updates_for_one_case_are_all_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/update/sauti_case_update"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(2)
        .mount(&server)
        .await;

    let transform = Arc::new(CeemisTransform::new(
        reqwest::Client::new(),
        CeemisConfig { base_url: server.uri() },
    ));
    let (pipeline, _) = pipeline(transform);
    let adapter = PartnerAdapter::new(Partner::Ceemis);

    let mut ids = Vec::new();
    for narrative in ["employer paid", "worker returned home"] {
        let outcomes = pipeline
            .ingest(
                &adapter,
                &request(json!({"ref": "MGLSD7093227", "narrative": narrative})),
            )
            .await
            .unwrap();
        assert_eq!(
            outcomes[0].delivery.message.as_deref(),
            Some("Case successfully updated in CEEMIS")
        );
        ids.push(outcomes[0].message_id.clone());
    }
    assert_ne!(ids[0], ids[1]);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn ceemis_without_ref_creates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/create/sauti_case"))
        .respond_with(ResponseTemplate::new(201).set_body_string("created"))
        .mount(&server)
        .await;
    let transform = CeemisTransform::new(
        reqwest::Client::new(),
        CeemisConfig { base_url: server.uri() },
    );
    let msg = message(
        Partner::Ceemis,
        json!({"src": "call", "src_uid": "u1", "src_callid": "c1", "narrative": "n", "case_category": "WAGES"}),
    )
    .await;

    let delivery = transform.submit(&msg).await;
    assert_eq!(delivery.message.as_deref(), Some("Case created in CEEMIS"));
    assert_eq!(delivery.response_text.as_deref(), Some("created"));
}

#[tokio::test]
async fn ceemis_rejection_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422).set_body_string("bad caseid"))
        .mount(&server)
        .await;
    let transform = CeemisTransform::new(
        reqwest::Client::new(),
        CeemisConfig { base_url: server.uri() },
    );
    let delivery = transform
        .submit(&message(Partner::Ceemis, json!({"ref": "old-ref"})).await)
        .await;
    assert!(delivery.is_error());
    assert_eq!(delivery.message.as_deref(), Some("CEEMIS API error: 422"));
    assert_eq!(delivery.details, Some(json!("bad caseid")));
}

#[tokio::test]
async fn cpims_maps_category_and_county() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/geo/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"area_id": 1, "area_name": "Nairobi", "area_code": "047", "area_type_id": "GPRV"},
            {"area_id": 2, "area_name": "NAIROBI", "area_code": "999", "area_type_id": "GWRD"},
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/crs/"))
        .and(header("authorization", "Token secret"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"case_id": "CP1"})))
        .mount(&server)
        .await;

    let transform = cpims(&server, Some("secret"), None);
    let msg = message(Partner::Cpims, cpims_case("nairobi")).await;
    let delivery = transform.submit(&msg).await;
    assert!(delivery.is_success());
    assert_eq!(delivery.message.as_deref(), Some("Case successfully sent to CPIMS"));

    let sent = sent_payload(&server.received_requests().await.unwrap(), "/crs/");
    assert_eq!(sent["categories"][0]["case_category"], "CCDF");
    assert_eq!(sent["case_details"][0]["nature_of_event"], "OOEV");
    assert_eq!(sent["county"], "047");
    assert_eq!(sent["constituency"], "UNK");
    assert_eq!(sent["child_first_name"], "Mary");
    assert_eq!(sent["child_other_names"], "Wanjiru");
    assert_eq!(sent["child_surname"], "Kamau");
    assert_eq!(sent["child_sex"], "SFEM");
    assert_eq!(sent["reporter_first_name"], "Peter");
    assert_eq!(sent["reporter_telephone"], "0722000000");
    assert_eq!(sent["case_date"], "2024-03-09");
    assert_eq!(sent["perpetrator_status"], "PKNW");
    assert_eq!(sent["perpetrators"][0]["relationship"], "RCNB");
    assert_eq!(sent["case_narration"], "reported by neighbour");
    assert_eq!(sent["risk_level"], "RLMD");
    assert_eq!(sent["child_dob"], "2010-01-01");

    // The geo index is cached after the first case.
    transform.submit(&msg).await;
}

#[tokio::test]
#[traced_test]
async fn cpims_geo_miss_falls_back_and_warns_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/geo/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/crs/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let literal = cpims(&server, None, None);
    let msg = message(Partner::Cpims, cpims_case("Nairobi")).await;
    literal.submit(&msg).await;
    literal.submit(&msg).await;
    let sent = sent_payload(&server.received_requests().await.unwrap(), "/crs/");
    assert_eq!(sent["county"], "Nairobi");
    assert_eq!(sent["area_code"], "Nairobi");

    logs_assert(|lines: &[&str]| {
        let misses = lines
            .iter()
            .filter(|line| line.contains("area not found in CPIMS geo index"))
            .count();
        if misses == 1 {
            Ok(())
        } else {
            Err(format!("expected one miss warning, saw {misses}"))
        }
    });

    let defaulted = cpims(&server, None, Some("000"));
    defaulted.submit(&msg).await;
    let requests = server.received_requests().await.unwrap();
    let last: Value = serde_json::from_slice(&requests.last().unwrap().body).unwrap();
    assert_eq!(last["county"], "000");
}

#[tokio::test]
async fn cpims_unauthenticated_401_is_partial() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/geo/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/crs/"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token required"))
        .mount(&server)
        .await;
    let transform = cpims(&server, None, None);
    let delivery = transform
        .submit(&message(Partner::Cpims, cpims_case("Mombasa")).await)
        .await;
    assert_eq!(delivery.status, DeliveryStatus::PartialSuccess);
    assert_eq!(
        delivery.note.as_deref(),
        Some("Check if CPIMS endpoint configuration is correct")
    );
}

#[tokio::test]
async fn eemis_lookup_reshapes_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/passports/CM900"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "first_name": "Sarah", "last_name": "Nakato", "gender": "F", "passport_no": "B1234"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/passports/UNKNOWN"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let transform = EemisTransform::new(
        reqwest::Client::new(),
        EemisConfig { base_url: server.uri() },
    );

    let found = transform
        .submit(&message(Partner::Eemis, json!({"national_id": "CM900"})).await)
        .await;
    assert_eq!(found.code, Some(200));
    let data = found.data.unwrap();
    assert_eq!(data["fname"], "Sarah Nakato");
    assert_eq!(data["sex_id"], "122");
    assert_eq!(data["passport"], "B1234");

    let missing = transform.lookup("UNKNOWN").await;
    assert_eq!(missing.code, Some(404));
    assert_eq!(
        missing.message.as_deref(),
        Some("EEMIS API returned status code 404")
    );
}

#[tokio::test]
async fn eemis_national_id_cannot_leave_the_passports_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let transform = EemisTransform::new(
        reqwest::Client::new(),
        EemisConfig { base_url: server.uri() },
    );

    transform.lookup("CM9/../../admin?all=1").await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let url = &requests[0].url;
    assert_eq!(url.path(), "/passports/CM9%2F..%2F..%2Fadmin%3Fall=1");
    assert_eq!(url.query(), None);
}
