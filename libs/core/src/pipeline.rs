//! Ingest pipeline shared by every platform: validate, parse, attach the
//! conversation, log, then route each message in payload order.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::adapter::{AdapterError, InboundRequest, PlatformAdapter};
use crate::conversation::SharedConversationStore;
use crate::delivery::Delivery;
use crate::message::StandardMessage;
use crate::message_log::{DeliveryState, LogEntry, LogError, SharedMessageLog};
use crate::router::MessageRouter;

/// Per-message progress. Transitions are linear; `Failed` is reachable from
/// any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Received,
    Verified,
    Parsed,
    Routed,
    Delivered,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Delivered | Stage::Failed)
    }

    fn next(self) -> Option<Stage> {
        match self {
            Stage::Received => Some(Stage::Verified),
            Stage::Verified => Some(Stage::Parsed),
            Stage::Parsed => Some(Stage::Routed),
            Stage::Routed => Some(Stage::Delivered),
            Stage::Delivered | Stage::Failed => None,
        }
    }

    pub fn can_advance_to(self, target: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        target == Stage::Failed || self.next() == Some(target)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub message_id: String,
    pub stage: Stage,
    pub delivery: Delivery,
}

/// Stage tracking for one request or one message. `subject` is the platform
/// name before parsing and the message id after.
struct Progress<'a> {
    subject: &'a str,
    stage: Stage,
}

impl<'a> Progress<'a> {
    fn received(subject: &'a str) -> Self {
        Self {
            subject,
            stage: Stage::Received,
        }
    }

    fn parsed(subject: &'a str) -> Self {
        Self {
            subject,
            stage: Stage::Parsed,
        }
    }

    fn advance(&mut self, target: Stage) {
        if self.stage.can_advance_to(target) {
            debug!(subject = self.subject, from = ?self.stage, to = ?target, "stage");
            self.stage = target;
        }
    }

    /// Ends a request that never produced messages.
    fn reject(mut self, err: AdapterError) -> AdapterError {
        warn!(subject = self.subject, stage = ?self.stage, code = err.code(), error = %err, "request rejected");
        self.advance(Stage::Failed);
        err
    }

    fn finish(mut self, delivery: Delivery) -> Outcome {
        let target = if delivery.is_error() {
            Stage::Failed
        } else {
            Stage::Delivered
        };
        self.advance(target);
        Outcome {
            message_id: self.subject.to_string(),
            stage: self.stage,
            delivery,
        }
    }
}

pub struct Pipeline {
    conversations: SharedConversationStore,
    log: SharedMessageLog,
    router: Arc<MessageRouter>,
}

impl Pipeline {
    pub fn new(
        conversations: SharedConversationStore,
        log: SharedMessageLog,
        router: Arc<MessageRouter>,
    ) -> Self {
        Self {
            conversations,
            log,
            router,
        }
    }

    pub fn conversations(&self) -> &SharedConversationStore {
        &self.conversations
    }

    pub fn log(&self) -> &SharedMessageLog {
        &self.log
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Runs the full ingest pipeline for one webhook delivery.
    pub async fn ingest(
        &self,
        adapter: &dyn PlatformAdapter,
        request: &InboundRequest,
    ) -> Result<Vec<Outcome>, AdapterError> {
        let mut progress = Progress::received(adapter.name());
        if let Err(err) = adapter.validate_request(request) {
            return Err(progress.reject(err));
        }
        progress.advance(Stage::Verified);
        let messages = match adapter.parse_messages(request).await {
            Ok(messages) => messages,
            Err(err) => return Err(progress.reject(err)),
        };
        progress.advance(Stage::Parsed);
        let mut outcomes = Vec::with_capacity(messages.len());
        for message in &messages {
            outcomes.push(self.process(adapter, message).await);
        }
        Ok(outcomes)
    }

    /// Handles one parsed message. Failures end this message only.
    pub async fn process(&self, adapter: &dyn PlatformAdapter, message: &StandardMessage) -> Outcome {
        let mut progress = Progress::parsed(message.message_id());

        let conversation = match self
            .conversations
            .get_or_create(message.source_uid(), message.platform())
            .await
        {
            Ok(conversation) => conversation.conversation_id,
            Err(err) => {
                warn!(error = %err, "conversation store unavailable");
                return progress.finish(Delivery::error_message("conversation store unavailable"));
            }
        };

        match self
            .log
            .append(LogEntry::incoming(message, &conversation))
            .await
        {
            Ok(_) => {}
            Err(LogError::Duplicate(key)) => {
                debug!(message_id = %key, "duplicate message ignored");
                progress.advance(Stage::Routed);
                return progress.finish(
                    Delivery::success()
                        .message("duplicate message ignored")
                        .message_id(message.message_id()),
                );
            }
            Err(err) => {
                warn!(error = %err, "incoming message not logged");
                return progress.finish(Delivery::error_message("message log unavailable"));
            }
        }

        progress.advance(Stage::Routed);
        if let Some(reply) = adapter.intercept(message).await {
            let state = if reply.is_error() {
                DeliveryState::Failed {
                    reason: reply.failure_reason(),
                }
            } else {
                DeliveryState::Delivered
            };
            let entry = LogEntry::outgoing(
                message,
                &conversation,
                adapter.name(),
                state,
                Some(reply.to_value()),
            );
            if let Err(err) = self.log.append(entry).await {
                warn!(error = %err, "in-process reply not logged");
            }
            return progress.finish(reply);
        }

        let delivery = self.router.route(message).await;
        progress.finish(delivery)
    }
}
