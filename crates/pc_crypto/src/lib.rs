//! pc_crypto - PeerChat cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Keys and envelopes cross the API boundary as standard base64 strings.
//!
//! # Module layout
//! - `keys`    - X25519 key pair + public-key newtype, fingerprints
//! - `kdf`     - X25519 agreement + HKDF-SHA256 per-pair key derivation
//! - `aead`    - XChaCha20-Poly1305 encrypt/decrypt with a detached nonce
//! - `engine`  - `CryptoEngine`: encrypt/decrypt between two named parties
//! - `error`   - unified error type

pub mod aead;
pub mod engine;
pub mod error;
pub mod kdf;
pub mod keys;

pub use engine::{CryptoEngine, EncryptedEnvelope};
pub use error::CryptoError;
pub use keys::{KeyPair, PublicKeyBytes};

use base64::{engine::general_purpose::STANDARD, Engine};

/// Encode raw bytes in the base64 alphabet shared by every PeerChat instance.
pub fn b64_encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a standard-alphabet base64 string.
pub fn b64_decode(s: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(STANDARD.decode(s)?)
}
