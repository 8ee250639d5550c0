//! Complaint records submitted through the web form, their in-app
//! notifications, and the submission schema.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::adapter::MediaKind;
use crate::message::now_seconds;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub additional_info: Option<String>,
}

impl Person {
    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "age": self.age,
            "gender": self.gender,
            "additional_info": self.additional_info,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaLink {
    pub kind: MediaKind,
    pub url: String,
}

impl MediaLink {
    /// MIME type assumed for uploaded media of this kind.
    pub fn content_type(&self) -> &'static str {
        match self.kind {
            MediaKind::Image => "image/jpeg",
            MediaKind::Audio => "audio/mpeg",
            MediaKind::Video => "video/mp4",
            MediaKind::Document => "application/pdf",
        }
    }
}

/// A validated submission ready to be stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComplaintForm {
    pub complaint_text: String,
    pub reporter_nickname: Option<String>,
    pub case_category: Option<String>,
    pub case_category_id: Option<String>,
    pub session_id: Option<Uuid>,
    pub victim: Option<Person>,
    pub perpetrator: Option<Person>,
    pub media: Vec<MediaLink>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Complaint {
    pub complaint_id: Uuid,
    pub form: ComplaintForm,
    pub organization_id: Option<String>,
    pub organization_name: Option<String>,
    pub created_at: f64,
    /// Downstream identifier once the case was forwarded.
    pub message_id_ref: Option<String>,
}

impl Complaint {
    pub fn new(form: ComplaintForm) -> Self {
        Self {
            complaint_id: Uuid::new_v4(),
            form,
            organization_id: None,
            organization_name: None,
            created_at: now_seconds(),
            message_id_ref: None,
        }
    }

    pub fn with_organization(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.organization_id = Some(id.into());
        self.organization_name = Some(name.into());
        self
    }

    /// First attached media, image before audio before video.
    pub fn primary_media(&self) -> Option<&MediaLink> {
        [MediaKind::Image, MediaKind::Audio, MediaKind::Video]
            .into_iter()
            .find_map(|kind| self.form.media.iter().find(|m| m.kind == kind))
    }

    pub fn has_media(&self, kind: MediaKind) -> bool {
        self.form.media.iter().any(|m| m.kind == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: Uuid,
    pub complaint_id: Uuid,
    pub message: String,
    pub is_read: bool,
    pub created_at: f64,
}

#[async_trait]
pub trait ComplaintStore: Send + Sync {
    async fn insert(&self, complaint: Complaint) -> Result<Complaint>;
    async fn get(&self, complaint_id: Uuid) -> Result<Option<Complaint>>;
    /// Complaints filed under a web session, oldest first.
    async fn by_session(&self, session_id: Uuid) -> Result<Vec<Complaint>>;
    async fn set_reference(&self, complaint_id: Uuid, reference: &str) -> Result<bool>;
    async fn notify(&self, complaint_id: Uuid, message: &str) -> Result<Notification>;
    async fn notifications(&self, complaint_id: Uuid) -> Result<Vec<Notification>>;
}

pub type SharedComplaintStore = Arc<dyn ComplaintStore>;

#[derive(Default)]
pub struct MemoryComplaintStore {
    complaints: DashMap<Uuid, Complaint>,
    notifications: DashMap<Uuid, Vec<Notification>>,
}

impl MemoryComplaintStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ComplaintStore for MemoryComplaintStore {
    async fn insert(&self, complaint: Complaint) -> Result<Complaint> {
        self.complaints
            .insert(complaint.complaint_id, complaint.clone());
        Ok(complaint)
    }

    async fn get(&self, complaint_id: Uuid) -> Result<Option<Complaint>> {
        Ok(self.complaints.get(&complaint_id).map(|c| c.clone()))
    }

    async fn by_session(&self, session_id: Uuid) -> Result<Vec<Complaint>> {
        let mut found: Vec<Complaint> = self
            .complaints
            .iter()
            .filter(|entry| entry.form.session_id == Some(session_id))
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| a.created_at.total_cmp(&b.created_at));
        Ok(found)
    }

    async fn set_reference(&self, complaint_id: Uuid, reference: &str) -> Result<bool> {
        Ok(match self.complaints.get_mut(&complaint_id) {
            Some(mut complaint) => {
                complaint.message_id_ref = Some(reference.to_string());
                true
            }
            None => false,
        })
    }

    async fn notify(&self, complaint_id: Uuid, message: &str) -> Result<Notification> {
        if !self.complaints.contains_key(&complaint_id) {
            anyhow::bail!("complaint {complaint_id} does not exist");
        }
        let notification = Notification {
            notification_id: Uuid::new_v4(),
            complaint_id,
            message: message.to_string(),
            is_read: false,
            created_at: now_seconds(),
        };
        self.notifications
            .entry(complaint_id)
            .or_default()
            .push(notification.clone());
        Ok(notification)
    }

    async fn notifications(&self, complaint_id: Uuid) -> Result<Vec<Notification>> {
        Ok(self
            .notifications
            .get(&complaint_id)
            .map(|list| list.clone())
            .unwrap_or_default())
    }
}

/// Field errors keyed like the submitted document; nested people carry
/// their own map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormErrors(Map<String, Value>);

impl FormErrors {
    fn add(&mut self, field: &str, message: &str) {
        let slot = self
            .0
            .entry(field.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(list) = slot {
            list.push(message.into());
        }
    }

    fn nest(&mut self, field: &str, inner: FormErrors) {
        if !inner.is_empty() {
            self.0.insert(field.to_string(), Value::Object(inner.0));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

const REQUIRED: &str = "This field is required.";
const NOT_A_STRING: &str = "Not a valid string.";

fn optional_text(
    payload: &Map<String, Value>,
    field: &str,
    errors: &mut FormErrors,
) -> Option<String> {
    match payload.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(_) => {
            errors.add(field, NOT_A_STRING);
            None
        }
    }
}

fn parse_age(value: Option<&Value>, errors: &mut FormErrors) -> Option<u32> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => match n.as_u64().and_then(|v| u32::try_from(v).ok()) {
            Some(age) => Some(age),
            None => {
                errors.add("age", "A valid integer is required.");
                None
            }
        },
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => match s.trim().parse::<u32>() {
            Ok(age) => Some(age),
            Err(_) => {
                errors.add("age", "A valid integer is required.");
                None
            }
        },
        Some(_) => {
            errors.add("age", "A valid integer is required.");
            None
        }
    }
}

fn parse_person(value: Option<&Value>, field: &str, errors: &mut FormErrors) -> Option<Person> {
    let map = match value {
        None | Some(Value::Null) => return None,
        Some(Value::Object(map)) => map,
        Some(_) => {
            errors.add(field, "Invalid data. Expected a dictionary.");
            return None;
        }
    };
    let mut inner = FormErrors::default();
    let person = Person {
        name: optional_text(map, "name", &mut inner).unwrap_or_default(),
        age: parse_age(map.get("age"), &mut inner),
        gender: optional_text(map, "gender", &mut inner).filter(|g| !g.is_empty()),
        additional_info: optional_text(map, "additional_info", &mut inner),
    };
    let ok = inner.is_empty();
    errors.nest(field, inner);
    ok.then_some(person)
}

/// Validates a submission; the payload may be bare or nested under `data`.
pub fn validate_submission(payload: &Value) -> Result<ComplaintForm, FormErrors> {
    let mut errors = FormErrors::default();
    let data = payload
        .get("data")
        .filter(|d| d.is_object())
        .unwrap_or(payload);
    let Some(map) = data.as_object() else {
        errors.add("non_field_errors", "Invalid data. Expected a dictionary.");
        return Err(errors);
    };

    let complaint_text = match map.get("complaint_text") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) => {
            errors.add("complaint_text", "This field may not be null.");
            String::new()
        }
        Some(_) => {
            errors.add("complaint_text", NOT_A_STRING);
            String::new()
        }
        None => {
            errors.add("complaint_text", REQUIRED);
            String::new()
        }
    };

    let session_id = match optional_text(map, "session_id", &mut errors) {
        Some(raw) if !raw.trim().is_empty() => match Uuid::parse_str(raw.trim()) {
            Ok(id) => Some(id),
            Err(_) => {
                errors.add("session_id", "Must be a valid UUID.");
                None
            }
        },
        _ => None,
    };

    let mut media = Vec::new();
    for (field, kind) in [
        ("complaint_image", MediaKind::Image),
        ("complaint_audio", MediaKind::Audio),
        ("complaint_video", MediaKind::Video),
    ] {
        if let Some(link) = optional_text(map, field, &mut errors).filter(|l| !l.trim().is_empty()) {
            match url::Url::parse(link.trim()) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => media.push(MediaLink {
                    kind,
                    url: url.to_string(),
                }),
                _ => errors.add(field, "Enter a valid URL."),
            }
        }
    }

    let form = ComplaintForm {
        complaint_text,
        reporter_nickname: optional_text(map, "reporter_nickname", &mut errors),
        case_category: optional_text(map, "case_category", &mut errors),
        case_category_id: optional_text(map, "case_category_id", &mut errors)
            .filter(|id| !id.trim().is_empty()),
        session_id,
        victim: parse_person(map.get("victim"), "victim", &mut errors),
        perpetrator: parse_person(map.get("perpetrator"), "perpetrator", &mut errors),
        media,
    };

    if errors.is_empty() {
        Ok(form)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_empty_text_and_blank_ages() {
        let form = validate_submission(&json!({
            "complaint_text": "",
            "case_category_id": 362484,
            "victim": {"name": "", "age": ""},
            "perpetrator": {"name": "", "age": "41", "gender": "male"}
        }))
        .unwrap();
        assert_eq!(form.complaint_text, "");
        assert_eq!(form.case_category_id.as_deref(), Some("362484"));
        assert_eq!(form.victim.unwrap().age, None);
        assert_eq!(form.perpetrator.unwrap().age, Some(41));
    }

    #[test]
    fn nested_data_envelope_is_accepted() {
        let form = validate_submission(&json!({"data": {"complaint_text": "help"}})).unwrap();
        assert_eq!(form.complaint_text, "help");
    }

    #[test]
    fn collects_field_errors() {
        let errors = validate_submission(&json!({
            "session_id": "not-a-uuid",
            "victim": {"age": "ten"},
            "complaint_image": "ftp//broken"
        }))
        .unwrap_err()
        .into_value();
        assert_eq!(errors["complaint_text"], json!([REQUIRED]));
        assert_eq!(errors["session_id"], json!(["Must be a valid UUID."]));
        assert_eq!(errors["victim"]["age"], json!(["A valid integer is required."]));
        assert_eq!(errors["complaint_image"], json!(["Enter a valid URL."]));
    }

    #[tokio::test]
    async fn references_and_notifications() {
        let store = MemoryComplaintStore::new();
        let session = Uuid::new_v4();
        let complaint = store
            .insert(Complaint::new(ComplaintForm {
                complaint_text: "x".into(),
                session_id: Some(session),
                ..Default::default()
            }))
            .await
            .unwrap();
        assert!(store.set_reference(complaint.complaint_id, "lwf1").await.unwrap());
        let stored = store.get(complaint.complaint_id).await.unwrap().unwrap();
        assert_eq!(stored.message_id_ref.as_deref(), Some("lwf1"));
        assert_eq!(store.by_session(session).await.unwrap().len(), 1);

        store.notify(complaint.complaint_id, "update").await.unwrap();
        let notes = store.notifications(complaint.complaint_id).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert!(!notes[0].is_read);
        assert!(store.notify(Uuid::new_v4(), "nobody").await.is_err());
    }
}
