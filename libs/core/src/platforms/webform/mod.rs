//! Web-form channel. Submissions arrive from our own authenticated frontend,
//! are stored as complaints, forwarded to the cases endpoint, and answered
//! with a JSON envelope carrying the complaint id.

pub mod complaint;
pub mod taxonomy;

use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use serde_json::{Map, Value, json};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapter::{
    AdapterError, InboundRequest, MediaKind, OutboundContent, OutboundRequest, PlatformAdapter,
    WebhookReply,
};
use crate::delivery::Delivery;
use crate::message::{MessageError, StandardMessage};
use crate::pipeline::Pipeline;
use crate::router::DEFAULT_CASE_CATEGORY_ID;

pub use complaint::{
    Complaint, ComplaintForm, ComplaintStore, FormErrors, MediaLink, MemoryComplaintStore,
    Notification, Person, SharedComplaintStore, validate_submission,
};
pub use taxonomy::{Export, TaxonomyClient, TaxonomyConfig, TaxonomyError};

pub const PLATFORM: &str = "webform";

/// Organisation the submitting token belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitter {
    pub org_id: String,
    pub org_name: String,
}

fn person_value(person: Option<&Person>) -> Value {
    person.map(Person::to_value).unwrap_or_else(|| json!({}))
}

/// Canonical message for a stored complaint.
pub fn message_from_complaint(complaint: &Complaint) -> Result<StandardMessage, MessageError> {
    let form = &complaint.form;
    let media = complaint.primary_media();
    let content_type = media
        .map(MediaLink::content_type)
        .unwrap_or("application/json");
    let session = form
        .session_id
        .unwrap_or_else(Uuid::new_v4)
        .to_string();

    let mut metadata = Map::new();
    metadata.insert("complaint_id".into(), complaint.complaint_id.to_string().into());
    metadata.insert("reporter_nickname".into(), json!(form.reporter_nickname));
    metadata.insert("case_category".into(), json!(form.case_category));
    metadata.insert(
        "case_category_id".into(),
        form.case_category_id
            .as_deref()
            .unwrap_or(DEFAULT_CASE_CATEGORY_ID)
            .into(),
    );
    metadata.insert("victim".into(), person_value(form.victim.as_ref()));
    metadata.insert("perpetrator".into(), person_value(form.perpetrator.as_ref()));
    metadata.insert("has_image".into(), complaint.has_media(MediaKind::Image).into());
    metadata.insert("has_audio".into(), complaint.has_media(MediaKind::Audio).into());
    metadata.insert("has_video".into(), complaint.has_media(MediaKind::Video).into());
    if let Some(org) = &complaint.organization_id {
        metadata.insert("organization_id".into(), org.clone().into());
    }

    StandardMessage::builder(
        "walkin",
        format!(
            "walkin-100-{}-{}",
            complaint.created_at.trunc() as i64,
            complaint.complaint_id.simple()
        ),
        complaint.complaint_id.to_string(),
        PLATFORM,
    )
    .source_address(session)
    .timestamp(complaint.created_at)
    .content(form.complaint_text.clone())
    .content_type(content_type)
    .media_url(media.map(|m| m.url.clone()))
    .metadata(metadata)
    .build()
}

pub struct WebformAdapter {
    complaints: SharedComplaintStore,
    taxonomy: Arc<TaxonomyClient>,
}

impl WebformAdapter {
    pub fn new(complaints: SharedComplaintStore, taxonomy: Arc<TaxonomyClient>) -> Self {
        Self {
            complaints,
            taxonomy,
        }
    }

    pub fn complaints(&self) -> &SharedComplaintStore {
        &self.complaints
    }

    pub fn taxonomy(&self) -> &Arc<TaxonomyClient> {
        &self.taxonomy
    }

    fn internal_failure(context: &str, err: impl std::fmt::Display) -> WebhookReply {
        error!(error = %err, "{context}");
        WebhookReply::Json(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"status": "error", "message": "Processing failed"}),
        )
    }

    /// Validate, store, forward and annotate one submission.
    pub async fn submit(
        &self,
        pipeline: &Pipeline,
        payload: &Value,
        submitter: Option<&Submitter>,
    ) -> WebhookReply {
        let form = match validate_submission(payload) {
            Ok(form) => form,
            Err(errors) => {
                warn!(platform = PLATFORM, "complaint rejected by schema");
                return WebhookReply::Json(
                    StatusCode::BAD_REQUEST,
                    json!({
                        "status": "error",
                        "message": "Invalid complaint data",
                        "errors": errors.into_value(),
                    }),
                );
            }
        };

        let mut complaint = Complaint::new(form);
        if let Some(submitter) = submitter {
            complaint = complaint.with_organization(&submitter.org_id, &submitter.org_name);
        }
        let complaint = match self.complaints.insert(complaint).await {
            Ok(complaint) => complaint,
            Err(err) => return Self::internal_failure("complaint not stored", err),
        };
        let complaint_id = complaint.complaint_id;

        let message = match message_from_complaint(&complaint) {
            Ok(message) => message,
            Err(err) => return Self::internal_failure("complaint not convertible", err),
        };

        let outcome = pipeline.process(self, &message).await;
        let delivery = outcome.delivery;
        if delivery.is_error() {
            warn!(complaint_id = %complaint_id, reason = %delivery.failure_reason(), "complaint forwarding failed");
            return WebhookReply::ok_json(json!({
                "status": "error",
                "complaint_id": complaint_id.to_string(),
                "message": "Complaint recorded but forwarding failed",
                "error": delivery.failure_reason(),
            }));
        }

        if let Some(reference) = delivery.downstream_id() {
            if let Err(err) = self.complaints.set_reference(complaint_id, reference).await {
                warn!(error = %err, complaint_id = %complaint_id, "downstream reference not saved");
            }
        }
        let notification = self
            .complaints
            .notify(
                complaint_id,
                &format!(
                    "Your complaint has been submitted successfully. Reference ID: {complaint_id}"
                ),
            )
            .await;
        info!(complaint_id = %complaint_id, case_reference = ?delivery.case_reference, "complaint forwarded");

        let mut body = json!({
            "status": "success",
            "complaint_id": complaint_id.to_string(),
            "message": "Complaint submitted successfully",
            "response": delivery.to_value(),
        });
        match notification {
            Ok(notification) => {
                body["notification_id"] = notification.notification_id.to_string().into();
            }
            Err(err) => warn!(error = %err, "submission notification not created"),
        }
        if let Some(reference) = &delivery.case_reference {
            body["case_reference"] = reference.clone().into();
        }
        WebhookReply::ok_json(body)
    }

    async fn notify_session(&self, request: &OutboundRequest) -> Delivery {
        let Ok(session_id) = Uuid::parse_str(request.recipient.trim()) else {
            return Delivery::failure().error(format!(
                "No complaint found with session_id: {}",
                request.recipient
            ));
        };
        let complaints = match self.complaints.by_session(session_id).await {
            Ok(found) => found,
            Err(err) => return Delivery::failure().error(err.to_string()),
        };
        let Some(complaint) = complaints.last() else {
            return Delivery::failure().error(format!(
                "No complaint found with session_id: {session_id}"
            ));
        };
        let text = match &request.content {
            OutboundContent::Text { body } if !body.trim().is_empty() => body.clone(),
            OutboundContent::Media {
                caption: Some(caption),
                ..
            } => caption.clone(),
            _ => "Update on your complaint".to_string(),
        };
        match self.complaints.notify(complaint.complaint_id, &text).await {
            Ok(notification) => Delivery::success()
                .message("Notification created successfully")
                .data(json!({"notification_id": notification.notification_id.to_string()})),
            Err(err) => Delivery::failure().error(err.to_string()),
        }
    }
}

#[async_trait]
impl PlatformAdapter for WebformAdapter {
    fn name(&self) -> &str {
        PLATFORM
    }

    fn validate_request(&self, request: &InboundRequest) -> Result<(), AdapterError> {
        let payload = request.json()?;
        let data = payload.get("data").unwrap_or(&payload);
        if data.get("complaint_text").is_some() {
            Ok(())
        } else {
            Err(AdapterError::malformed("missing required field: complaint_text"))
        }
    }

    async fn parse_messages(
        &self,
        request: &InboundRequest,
    ) -> Result<Vec<StandardMessage>, AdapterError> {
        let payload = request.json()?;
        let form = validate_submission(&payload)
            .map_err(|errors| AdapterError::malformed(errors.into_value().to_string()))?;
        let message = message_from_complaint(&Complaint::new(form))
            .map_err(|err| AdapterError::malformed(err.to_string()))?;
        Ok(vec![message])
    }

    async fn send_message(&self, request: &OutboundRequest) -> Result<Delivery, AdapterError> {
        Ok(self.notify_session(request).await)
    }

    fn format_webhook_response(&self, processed: &[Delivery]) -> WebhookReply {
        let responses: Vec<Value> = processed.iter().map(Delivery::to_value).collect();
        WebhookReply::ok_json(json!({
            "status": "success",
            "message": "Form processed successfully",
            "responses": responses,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complaint_message_shape() {
        let form = validate_submission(&json!({
            "complaint_text": "child in danger",
            "case_category_id": "362484",
            "complaint_audio": "https://cdn.example/a.mp3",
            "victim": {"name": "", "age": ""},
            "perpetrator": {"name": "", "age": ""}
        }))
        .unwrap();
        let complaint = Complaint::new(form);
        let message = message_from_complaint(&complaint).unwrap();
        assert_eq!(message.source(), "walkin");
        assert!(message.source_uid().starts_with("walkin-100-"));
        assert_eq!(message.platform(), "webform");
        assert_eq!(message.message_id(), complaint.complaint_id.to_string());
        assert_eq!(message.content_type(), "audio/mpeg");
        assert_eq!(message.media_url(), Some("https://cdn.example/a.mp3"));
        assert_eq!(message.metadata()["has_audio"], json!(true));
        assert_eq!(message.metadata()["victim"]["name"], json!(""));
    }

    #[tokio::test]
    async fn same_second_complaints_get_separate_conversations() {
        use crate::conversation::{ConversationStore, MemoryConversationStore};
        use crate::message_log::MemoryMessageLog;

        let form = validate_submission(&json!({"complaint_text": "help"})).unwrap();
        let mut first = Complaint::new(form.clone());
        let mut second = Complaint::new(form);
        first.created_at = 1_710_000_000.2;
        second.created_at = 1_710_000_000.7;

        let a = message_from_complaint(&first).unwrap();
        let b = message_from_complaint(&second).unwrap();
        assert!(a.source_uid().starts_with("walkin-100-1710000000-"));
        assert_ne!(a.source_uid(), b.source_uid());

        let store = MemoryConversationStore::new(Arc::new(MemoryMessageLog::new()));
        let ca = store.get_or_create(a.source_uid(), a.platform()).await.unwrap();
        let cb = store.get_or_create(b.source_uid(), b.platform()).await.unwrap();
        assert_ne!(ca.conversation_id, cb.conversation_id);
    }
}
