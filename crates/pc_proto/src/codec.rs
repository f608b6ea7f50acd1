//! Wire codec - framing limits, serialisation and validation.
//!
//! `decode` is the only way bytes from a peer become a `WireMessage`, and
//! it rejects anything the core would otherwise have to second-guess:
//! oversized frames, unknown `type` tags, empty chat content, non-positive
//! timestamps and key/nonce fields that are not well-formed base64 of the
//! expected length.

use pc_crypto::{aead::NONCE_LEN, b64_decode, PublicKeyBytes};

use crate::message::WireMessage;

/// Largest frame accepted from a peer, in bytes.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Invalid {kind} frame: {reason}")]
    Invalid { kind: &'static str, reason: String },
}

/// Serialise a message for the wire.
pub fn encode(msg: &WireMessage) -> Result<Vec<u8>, CodecError> {
    let bytes = serde_json::to_vec(msg)?;
    if bytes.len() > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge { len: bytes.len(), max: MAX_FRAME_LEN });
    }
    Ok(bytes)
}

/// Parse and validate a frame received from a peer.
pub fn decode(bytes: &[u8]) -> Result<WireMessage, CodecError> {
    if bytes.len() > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge { len: bytes.len(), max: MAX_FRAME_LEN });
    }
    let msg: WireMessage = serde_json::from_slice(bytes)?;
    validate(&msg)?;
    Ok(msg)
}

fn invalid(kind: &'static str, reason: impl Into<String>) -> CodecError {
    CodecError::Invalid { kind, reason: reason.into() }
}

fn validate(msg: &WireMessage) -> Result<(), CodecError> {
    match msg {
        WireMessage::Hello { public_key } => {
            PublicKeyBytes::from_b64(public_key).map_err(|e| invalid("hello", e.to_string()))?;
        }
        WireMessage::Chat { content, nonce, timestamp } => {
            if content.is_empty() {
                return Err(invalid("chat", "empty content"));
            }
            if *timestamp <= 0 {
                return Err(invalid("chat", format!("timestamp {timestamp} is not positive")));
            }
            if let Some(nonce) = nonce {
                let raw = b64_decode(nonce).map_err(|e| invalid("chat", e.to_string()))?;
                if raw.len() != NONCE_LEN {
                    return Err(invalid(
                        "chat",
                        format!("nonce must be {NONCE_LEN} bytes, got {}", raw.len()),
                    ));
                }
                b64_decode(content).map_err(|e| invalid("chat", e.to_string()))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pc_crypto::CryptoEngine;

    #[test]
    fn encrypted_chat_passes_validation() {
        let alice = CryptoEngine::new().unwrap();
        let bob = CryptoEngine::new().unwrap();
        let env = alice.encrypt("hi bob", &bob.public_key()).unwrap();
        let frame = WireMessage::encrypted_chat(env, 1_700_000_000_000);
        let decoded = decode(&encode(&frame).unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn hello_with_real_key_passes() {
        let alice = CryptoEngine::new().unwrap();
        let bytes = encode(&WireMessage::hello(alice.public_key())).unwrap();
        assert_eq!(decode(&bytes).unwrap().kind(), "hello");
    }

    #[test]
    fn unknown_type_is_rejected() {
        let raw = br#"{"type":"file","content":"x","timestamp":1}"#;
        assert!(matches!(decode(raw), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn non_json_is_rejected() {
        assert!(matches!(decode(b"\xff\xfe"), Err(CodecError::Malformed(_))));
        assert!(matches!(decode(b"hello"), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let raw = vec![b' '; MAX_FRAME_LEN + 1];
        assert!(matches!(decode(&raw), Err(CodecError::FrameTooLarge { .. })));
    }

    #[test]
    fn chat_field_checks() {
        let empty = br#"{"type":"chat","content":"","timestamp":1}"#;
        assert!(matches!(decode(empty), Err(CodecError::Invalid { kind: "chat", .. })));

        let zero_ts = br#"{"type":"chat","content":"x","timestamp":0}"#;
        assert!(matches!(decode(zero_ts), Err(CodecError::Invalid { .. })));

        let short_nonce = br#"{"type":"chat","content":"eA==","nonce":"AAAA","timestamp":1}"#;
        assert!(matches!(decode(short_nonce), Err(CodecError::Invalid { .. })));
    }

    #[test]
    fn plaintext_chat_without_nonce_is_accepted() {
        let raw = br#"{"type":"chat","content":"hello there","timestamp":1700000000000}"#;
        match decode(raw).unwrap() {
            WireMessage::Chat { content, nonce, .. } => {
                assert_eq!(content, "hello there");
                assert!(nonce.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn hello_with_bad_key_is_rejected() {
        let raw = br#"{"type":"hello","publicKey":"c2hvcnQ="}"#;
        assert!(matches!(decode(raw), Err(CodecError::Invalid { kind: "hello", .. })));
    }
}
