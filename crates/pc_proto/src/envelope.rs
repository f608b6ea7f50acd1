//! Chat frames ↔ encrypted envelopes.
//!
//! The transport only ever sees the ciphertext and nonce; the sender's key
//! is known to the receiver from the earlier `hello` frame.

use pc_crypto::EncryptedEnvelope;

use crate::message::WireMessage;

impl WireMessage {
    /// Chat frame carrying an encrypted envelope. `timestamp` is the
    /// sender's clock in epoch milliseconds.
    pub fn encrypted_chat(envelope: EncryptedEnvelope, timestamp: i64) -> Self {
        Self::Chat {
            content: envelope.ciphertext,
            nonce: Some(envelope.nonce),
            timestamp,
        }
    }

    /// The envelope inside an encrypted chat frame; `None` for plaintext
    /// chat and non-chat frames.
    pub fn envelope(&self) -> Option<EncryptedEnvelope> {
        match self {
            Self::Chat { content, nonce: Some(nonce), .. } => Some(EncryptedEnvelope {
                ciphertext: content.clone(),
                nonce: nonce.clone(),
            }),
            _ => None,
        }
    }
}
