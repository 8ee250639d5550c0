use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::message::now_seconds;
use crate::message_log::{LogEntry, SharedMessageLog};

pub const EPOCH_KEY: &str = "epoch";

/// Thread of messages from one sender on one platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub sender_id: String,
    pub platform: String,
    pub is_active: bool,
    pub created_at: f64,
    pub last_activity: f64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Conversation {
    fn open(sender_id: &str, platform: &str, now: f64) -> Self {
        Self {
            conversation_id: conversation_id(platform, sender_id),
            sender_id: sender_id.to_string(),
            platform: platform.to_string(),
            is_active: true,
            created_at: now,
            last_activity: now,
            metadata: Map::new(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.metadata
            .get(EPOCH_KEY)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    fn stamp(&mut self, now: f64) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }
}

pub fn conversation_id(platform: &str, sender_id: &str) -> String {
    format!("{platform}:{sender_id}")
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Returns the live conversation for the pair, creating or reopening it.
    async fn get_or_create(&self, sender_id: &str, platform: &str) -> Result<Conversation>;
    async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>>;
    /// Refreshes `last_activity` without reopening a closed conversation.
    async fn touch(&self, conversation_id: &str) -> Result<Option<Conversation>>;
    async fn close(&self, conversation_id: &str) -> Result<bool>;
    async fn set_metadata(&self, conversation_id: &str, key: &str, value: Value) -> Result<bool>;
    async fn history(&self, conversation_id: &str, limit: usize) -> Result<Vec<LogEntry>>;
}

pub type SharedConversationStore = Arc<dyn ConversationStore>;

pub struct MemoryConversationStore {
    inner: DashMap<String, Conversation>,
    log: SharedMessageLog,
}

impl MemoryConversationStore {
    pub fn new(log: SharedMessageLog) -> Self {
        Self {
            inner: DashMap::new(),
            log,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn get_or_create(&self, sender_id: &str, platform: &str) -> Result<Conversation> {
        let now = now_seconds();
        let id = conversation_id(platform, sender_id);
        let mut entry = self
            .inner
            .entry(id)
            .or_insert_with(|| Conversation::open(sender_id, platform, now));
        let conversation = entry.value_mut();
        if !conversation.is_active {
            let epoch = conversation.epoch() + 1;
            conversation.is_active = true;
            conversation
                .metadata
                .insert(EPOCH_KEY.into(), Value::from(epoch));
            debug!(conversation_id = %conversation.conversation_id, epoch, "conversation reopened");
        }
        conversation.stamp(now);
        Ok(conversation.clone())
    }

    async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        Ok(self.inner.get(conversation_id).map(|c| c.value().clone()))
    }

    async fn touch(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let now = now_seconds();
        Ok(self.inner.get_mut(conversation_id).map(|mut c| {
            c.stamp(now);
            c.value().clone()
        }))
    }

    async fn close(&self, conversation_id: &str) -> Result<bool> {
        match self.inner.get_mut(conversation_id) {
            Some(mut conversation) if conversation.is_active => {
                conversation.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_metadata(&self, conversation_id: &str, key: &str, value: Value) -> Result<bool> {
        Ok(self
            .inner
            .get_mut(conversation_id)
            .map(|mut c| {
                c.metadata.insert(key.to_string(), value);
            })
            .is_some())
    }

    async fn history(&self, conversation_id: &str, limit: usize) -> Result<Vec<LogEntry>> {
        Ok(self.log.for_conversation(conversation_id, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::StandardMessage;
    use crate::message_log::{MemoryMessageLog, MessageLog};

    fn store() -> (MemoryConversationStore, Arc<MemoryMessageLog>) {
        let log = Arc::new(MemoryMessageLog::new());
        (MemoryConversationStore::new(log.clone()), log)
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_conversation() {
        let (store, _) = store();
        let store = Arc::new(store);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.get_or_create("2547", "whatsapp").await })
            })
            .collect();
        for handle in handles {
            let conversation = handle.await.unwrap().unwrap();
            assert_eq!(conversation.conversation_id, "whatsapp:2547");
        }
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn last_activity_never_goes_backwards() {
        let (store, _) = store();
        let first = store.get_or_create("u", "webform").await.unwrap();
        let second = store.get_or_create("u", "webform").await.unwrap();
        assert!(second.last_activity >= first.last_activity);
        let touched = store.touch("webform:u").await.unwrap().unwrap();
        assert!(touched.last_activity >= second.last_activity);
    }

    #[tokio::test]
    async fn reopen_reuses_id_and_bumps_epoch() {
        let (store, _) = store();
        store.get_or_create("u", "whatsapp").await.unwrap();
        assert!(store.close("whatsapp:u").await.unwrap());
        assert!(!store.close("whatsapp:u").await.unwrap());

        let closed = store.get("whatsapp:u").await.unwrap().unwrap();
        assert!(!closed.is_active);

        let reopened = store.get_or_create("u", "whatsapp").await.unwrap();
        assert!(reopened.is_active);
        assert_eq!(reopened.conversation_id, "whatsapp:u");
        assert_eq!(reopened.epoch(), 1);
    }

    #[tokio::test]
    async fn history_reads_from_the_log() {
        let (store, log) = store();
        let conversation = store.get_or_create("u", "whatsapp").await.unwrap();
        for id in ["m1", "m2"] {
            let message = StandardMessage::builder("whatsapp", "u", id, "whatsapp")
                .build()
                .unwrap();
            log.append(LogEntry::incoming(&message, &conversation.conversation_id))
                .await
                .unwrap();
        }
        let history = store.history("whatsapp:u", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].key, "m1");
    }
}
