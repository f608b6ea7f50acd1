//! Persisted record types. Field names match the on-disk JSON
//! (`senderId`, `lastUpdated`, ...).

use std::collections::BTreeSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    /// Always plaintext; `encrypted` records whether it crossed the wire
    /// encrypted.
    pub content: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub encrypted: bool,
}

impl Message {
    /// New message with a random id, stamped now.
    pub fn new(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        content: impl Into<String>,
        encrypted: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            content: content.into(),
            timestamp: now_millis(),
            encrypted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub participants: BTreeSet<String>,
    /// Insertion order, never reordered or edited.
    pub messages: Vec<Message>,
    pub last_updated: i64,
}

impl ChatSession {
    pub fn new(id: String, participants: BTreeSet<String>) -> Self {
        Self {
            id,
            participants,
            messages: Vec::new(),
            last_updated: now_millis(),
        }
    }
}
