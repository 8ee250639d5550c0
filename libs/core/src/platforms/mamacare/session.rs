use dashmap::DashSet;
use serde_json::Value;
use tracing::{debug, warn};

use crate::conversation::{SharedConversationStore, conversation_id};
use crate::message::now_seconds;

pub const ACTIVE_KEY: &str = "chatbot_active";
const ACTIVATED_AT_KEY: &str = "activated_at";
const DEACTIVATED_AT_KEY: &str = "deactivated_at";

/// Which senders are talking to the chatbot. The conversation metadata is the
/// record; the set only caches senders known to be active.
pub struct ChatSessions {
    platform: String,
    conversations: SharedConversationStore,
    active: DashSet<String>,
}

impl ChatSessions {
    pub fn new(platform: impl Into<String>, conversations: SharedConversationStore) -> Self {
        Self {
            platform: platform.into(),
            conversations,
            active: DashSet::new(),
        }
    }

    pub async fn is_active(&self, sender: &str) -> bool {
        if self.active.contains(sender) {
            return true;
        }
        let id = conversation_id(&self.platform, sender);
        let stored = match self.conversations.get(&id).await {
            Ok(conversation) => conversation
                .and_then(|c| c.metadata.get(ACTIVE_KEY).and_then(Value::as_bool))
                .unwrap_or(false),
            Err(err) => {
                warn!(error = %err, "chatbot session lookup failed");
                false
            }
        };
        if stored {
            self.active.insert(sender.to_string());
        }
        stored
    }

    pub async fn activate(&self, sender: &str) {
        let id = match self.conversations.get_or_create(sender, &self.platform).await {
            Ok(conversation) => conversation.conversation_id,
            Err(err) => {
                warn!(error = %err, "chatbot session not persisted");
                self.active.insert(sender.to_string());
                return;
            }
        };
        self.write(&id, true, ACTIVATED_AT_KEY).await;
        self.active.insert(sender.to_string());
        debug!(conversation_id = %id, "chatbot session activated");
    }

    pub async fn deactivate(&self, sender: &str) {
        self.active.remove(sender);
        let id = conversation_id(&self.platform, sender);
        self.write(&id, false, DEACTIVATED_AT_KEY).await;
        debug!(conversation_id = %id, "chatbot session deactivated");
    }

    async fn write(&self, id: &str, active: bool, stamp_key: &str) {
        let writes = [
            (ACTIVE_KEY, Value::Bool(active)),
            (stamp_key, Value::from(now_seconds())),
        ];
        for (key, value) in writes {
            if let Err(err) = self.conversations.set_metadata(id, key, value).await {
                warn!(error = %err, key, "chatbot session flag not written");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::MemoryConversationStore;
    use crate::message_log::MemoryMessageLog;
    use std::sync::Arc;

    fn store() -> SharedConversationStore {
        Arc::new(MemoryConversationStore::new(Arc::new(MemoryMessageLog::new())))
    }

    #[tokio::test]
    async fn conversation_metadata_is_the_record() {
        let conversations = store();
        let sessions = ChatSessions::new("mamacare", Arc::clone(&conversations));
        assert!(!sessions.is_active("2547").await);
        sessions.activate("2547").await;
        assert!(sessions.is_active("2547").await);

        // A fresh cache rehydrates from the conversation.
        let rebuilt = ChatSessions::new("mamacare", Arc::clone(&conversations));
        assert!(rebuilt.is_active("2547").await);

        rebuilt.deactivate("2547").await;
        assert!(!rebuilt.is_active("2547").await);
        let conversation = conversations.get("mamacare:2547").await.unwrap().unwrap();
        assert_eq!(conversation.metadata[ACTIVE_KEY], Value::Bool(false));
        assert!(conversation.metadata.contains_key(DEACTIVATED_AT_KEY));
    }
}
