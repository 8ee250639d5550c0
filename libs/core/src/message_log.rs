use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::message::{StandardMessage, now_seconds};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Delivered,
    Failed { reason: String },
}

impl DeliveryState {
    pub fn is_failed(&self) -> bool {
        matches!(self, DeliveryState::Failed { .. })
    }
}

/// One append-only record of an inbound or outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub key: String,
    pub direction: Direction,
    pub conversation_id: String,
    pub message: StandardMessage,
    pub recorded_at: f64,
    pub delivery: DeliveryState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default)]
    pub seq: u64,
}

impl LogEntry {
    pub fn incoming(message: &StandardMessage, conversation_id: impl Into<String>) -> Self {
        Self {
            key: message.message_id().to_string(),
            direction: Direction::Incoming,
            conversation_id: conversation_id.into(),
            message: message.clone(),
            recorded_at: now_seconds(),
            delivery: DeliveryState::Pending,
            endpoint: None,
            response: None,
            seq: 0,
        }
    }

    /// Outgoing entries are keyed per endpoint so a message can fan out once
    /// to each downstream without colliding with its incoming record.
    pub fn outgoing(
        message: &StandardMessage,
        conversation_id: impl Into<String>,
        endpoint: &str,
        delivery: DeliveryState,
        response: Option<Value>,
    ) -> Self {
        Self {
            key: outgoing_key(endpoint, message.message_id()),
            direction: Direction::Outgoing,
            conversation_id: conversation_id.into(),
            message: message.clone(),
            recorded_at: now_seconds(),
            delivery,
            endpoint: Some(endpoint.to_string()),
            response,
            seq: 0,
        }
    }
}

pub fn outgoing_key(endpoint: &str, message_id: &str) -> String {
    format!("out:{endpoint}:{message_id}")
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("DUPLICATE_MESSAGE: {0} is already logged")]
    Duplicate(String),
    #[error("message log unavailable: {0}")]
    Backend(#[source] anyhow::Error),
}

impl LogError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, LogError::Duplicate(_))
    }
}

#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Appends `entry`, returning its sequence number. Keys are unique.
    async fn append(&self, entry: LogEntry) -> Result<u64, LogError>;
    async fn get(&self, key: &str) -> Result<Option<LogEntry>, LogError>;
    /// Entries of one conversation in append order, keeping the last `limit`.
    async fn for_conversation(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<LogEntry>, LogError>;
    async fn entries(&self) -> Result<Vec<LogEntry>, LogError>;
}

pub type SharedMessageLog = Arc<dyn MessageLog>;

#[derive(Default)]
pub struct MemoryMessageLog {
    entries: DashMap<String, LogEntry>,
    seq: AtomicU64,
}

impl MemoryMessageLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageLog for MemoryMessageLog {
    async fn append(&self, mut entry: LogEntry) -> Result<u64, LogError> {
        match self.entries.entry(entry.key.clone()) {
            Entry::Occupied(_) => Err(LogError::Duplicate(entry.key)),
            Entry::Vacant(slot) => {
                let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
                entry.seq = seq;
                slot.insert(entry);
                Ok(seq)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<LogEntry>, LogError> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn for_conversation(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<LogEntry>, LogError> {
        let mut found: Vec<LogEntry> = self
            .entries
            .iter()
            .filter(|e| e.value().conversation_id == conversation_id)
            .map(|e| e.value().clone())
            .collect();
        found.sort_by_key(|e| e.seq);
        let skip = found.len().saturating_sub(limit);
        Ok(found.into_iter().skip(skip).collect())
    }

    async fn entries(&self) -> Result<Vec<LogEntry>, LogError> {
        let mut all: Vec<LogEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|e| e.seq);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str) -> StandardMessage {
        StandardMessage::builder("whatsapp", "2547", id, "whatsapp")
            .content("hi")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn duplicate_keys_are_rejected() {
        let log = MemoryMessageLog::new();
        log.append(LogEntry::incoming(&message("m1"), "whatsapp:2547"))
            .await
            .unwrap();
        let err = log
            .append(LogEntry::incoming(&message("m1"), "whatsapp:2547"))
            .await
            .unwrap_err();
        assert!(err.is_duplicate());
        assert!(err.to_string().starts_with("DUPLICATE_MESSAGE"));
        assert_eq!(log.entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn outgoing_entry_does_not_collide_with_incoming() {
        let log = MemoryMessageLog::new();
        let msg = message("m1");
        log.append(LogEntry::incoming(&msg, "whatsapp:2547"))
            .await
            .unwrap();
        log.append(LogEntry::outgoing(
            &msg,
            "whatsapp:2547",
            "messaging",
            DeliveryState::Delivered,
            None,
        ))
        .await
        .unwrap();
        let out = log.get("out:messaging:m1").await.unwrap().unwrap();
        assert_eq!(out.direction, Direction::Outgoing);
    }

    #[tokio::test]
    async fn conversation_entries_keep_append_order_and_limit() {
        let log = MemoryMessageLog::new();
        for id in ["a", "b", "c"] {
            log.append(LogEntry::incoming(&message(id), "whatsapp:2547"))
                .await
                .unwrap();
        }
        log.append(LogEntry::incoming(&message("other"), "whatsapp:9"))
            .await
            .unwrap();
        let keys: Vec<_> = log
            .for_conversation("whatsapp:2547", 2)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, vec!["b", "c"]);
    }
}
