//! Message types carried over a peer stream.

use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Key announcement, sent by both sides once a connection is up.
    #[serde(rename_all = "camelCase")]
    Hello {
        /// Sender's X25519 public key (standard base64).
        public_key: String,
    },
    /// Chat text. With a nonce, `content` is base64 ciphertext; without
    /// one it is the plaintext itself.
    #[serde(rename_all = "camelCase")]
    Chat {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nonce: Option<String>,
        /// Milliseconds since the Unix epoch, set by the sender.
        timestamp: i64,
    },
}

impl WireMessage {
    pub fn hello(public_key: impl Into<String>) -> Self {
        Self::Hello { public_key: public_key.into() }
    }

    /// Unencrypted chat frame stamped with the current time.
    pub fn plain_chat(content: impl Into<String>) -> Self {
        Self::Chat {
            content: content.into(),
            nonce: None,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Value of the `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Chat { .. } => "chat",
        }
    }
}
