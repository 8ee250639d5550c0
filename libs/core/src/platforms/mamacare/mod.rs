//! Maternal-health chatbot number. Shares the WhatsApp envelope; senders in
//! an active chatbot session are answered in-process instead of being routed.

pub mod dialogue;
pub mod session;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::whatsapp::WhatsAppAdapter;
use crate::adapter::{
    AdapterError, InboundRequest, OutboundContent, OutboundRequest, PlatformAdapter, TokenRequest,
    WebhookReply,
};
use crate::delivery::Delivery;
use crate::message::StandardMessage;

pub use dialogue::{Dialogue, Language, MaternalHealthDialogue, is_activation_keyword};
pub use session::ChatSessions;

pub const PLATFORM: &str = "mamacare";

pub struct MamacareAdapter {
    whatsapp: WhatsAppAdapter,
    dialogue: Arc<dyn Dialogue>,
}

impl MamacareAdapter {
    pub fn new(whatsapp: WhatsAppAdapter, dialogue: Arc<dyn Dialogue>) -> Self {
        Self { whatsapp, dialogue }
    }

    pub fn dialogue(&self) -> &Arc<dyn Dialogue> {
        &self.dialogue
    }

    fn check_envelope(request: &InboundRequest) -> Result<(), AdapterError> {
        let payload = request.json()?;
        if payload.get("object").and_then(Value::as_str) != Some("whatsapp_business_account") {
            return Err(AdapterError::malformed(
                "object must be whatsapp_business_account",
            ));
        }
        let has_entries = payload
            .get("entry")
            .and_then(Value::as_array)
            .is_some_and(|entries| !entries.is_empty());
        if has_entries {
            Ok(())
        } else {
            Err(AdapterError::malformed("entry must be a non-empty array"))
        }
    }
}

#[async_trait]
impl PlatformAdapter for MamacareAdapter {
    fn name(&self) -> &str {
        PLATFORM
    }

    fn handle_verification(&self, request: &InboundRequest) -> Option<WebhookReply> {
        self.whatsapp.verification(request)
    }

    fn validate_request(&self, request: &InboundRequest) -> Result<(), AdapterError> {
        self.whatsapp.check_signature(request)?;
        Self::check_envelope(request)
    }

    async fn parse_messages(
        &self,
        request: &InboundRequest,
    ) -> Result<Vec<StandardMessage>, AdapterError> {
        self.whatsapp.parse_all(request).await
    }

    async fn send_message(&self, request: &OutboundRequest) -> Result<Delivery, AdapterError> {
        Ok(self.whatsapp.graph().send(request).await)
    }

    async fn generate_token(&self, request: &TokenRequest) -> Result<Delivery, AdapterError> {
        Ok(self.whatsapp.refresh_token(request).await)
    }

    async fn intercept(&self, message: &StandardMessage) -> Option<Delivery> {
        let sender = message.source_uid();
        let text = message.content();
        if is_activation_keyword(text) {
            self.dialogue.activate(sender).await;
            info!(platform = PLATFORM, "chatbot session started");
        } else if !self.dialogue.is_active(sender).await {
            debug!(platform = PLATFORM, "sender not in a chatbot session; routing");
            return None;
        }

        let reply = self.dialogue.process(sender, text).await;
        let delivery = self
            .whatsapp
            .graph()
            .send(&OutboundRequest::new(
                message.source_address(),
                OutboundContent::text(reply.clone()),
            ))
            .await;
        Some(delivery.data(json!({ "reply": reply })))
    }

    fn format_webhook_response(&self, _processed: &[Delivery]) -> WebhookReply {
        WebhookReply::ok_empty()
    }
}
