//! Per-participant encryption engine.
//!
//! There is no persistent session key: every message derives its key fresh
//! from the long-term key pairs of the ordered (sender, recipient) pair and
//! is sealed under a new random 24-byte nonce.

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::{
    aead,
    error::CryptoError,
    kdf,
    keys::{KeyPair, PublicKeyBytes},
};

/// Associated data bound into every message ciphertext.
const MESSAGE_AAD: &[u8] = b"peerchat-v1";

pub const GROUP_KEY_LEN: usize = 32;

/// Output of [`CryptoEngine::encrypt`]. Both fields are standard base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// XChaCha20-Poly1305 ciphertext with the 16-byte tag appended.
    pub ciphertext: String,
    /// 24-byte random nonce.
    pub nonce: String,
}

/// Owns one key pair for the lifetime of the instance.
#[derive(Debug)]
pub struct CryptoEngine {
    keys: KeyPair,
}

impl CryptoEngine {
    /// Build an engine around a freshly generated identity.
    pub fn new() -> Result<Self, CryptoError> {
        Ok(Self { keys: Self::generate_identity()? })
    }

    /// Build an engine around a previously exported identity.
    pub fn from_secret_bytes(secret: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self { keys: KeyPair::from_secret_bytes(secret)? })
    }

    /// Produce a fresh asymmetric key pair from the OS random source.
    pub fn generate_identity() -> Result<KeyPair, CryptoError> {
        KeyPair::generate()
    }

    /// Public key as standard base64 of the raw 32 bytes.
    pub fn public_key(&self) -> String {
        self.keys.public().to_b64()
    }

    pub fn public_key_bytes(&self) -> &PublicKeyBytes {
        self.keys.public()
    }

    pub fn fingerprint(&self) -> String {
        self.keys.public().fingerprint()
    }

    /// Raw secret for persisting this identity. Handle with care.
    pub fn export_secret(&self) -> zeroize::Zeroizing<[u8; 32]> {
        self.keys.secret_bytes()
    }

    /// Encrypt `plaintext` for the holder of `recipient_public_key`.
    pub fn encrypt(
        &self,
        plaintext: &str,
        recipient_public_key: &str,
    ) -> Result<EncryptedEnvelope, CryptoError> {
        let recipient = PublicKeyBytes::from_b64(recipient_public_key)?;
        let sender = self.keys.public();
        let key = kdf::message_key(&self.keys, &recipient, sender, &recipient)?;

        let (nonce, ciphertext) = aead::seal(&key, plaintext.as_bytes(), MESSAGE_AAD)?;

        Ok(EncryptedEnvelope {
            ciphertext: crate::b64_encode(&ciphertext),
            nonce: crate::b64_encode(&nonce),
        })
    }

    /// Recover plaintext sent to us by the holder of `sender_public_key`.
    ///
    /// Wrong key, tampered bytes, malformed encodings and invalid UTF-8 all
    /// produce the same `CryptoError::Decryption`.
    pub fn decrypt(
        &self,
        ciphertext: &str,
        nonce: &str,
        sender_public_key: &str,
    ) -> Result<String, CryptoError> {
        let sender =
            PublicKeyBytes::from_b64(sender_public_key).map_err(|_| CryptoError::Decryption)?;
        let ciphertext = crate::b64_decode(ciphertext).map_err(|_| CryptoError::Decryption)?;
        let nonce = crate::b64_decode(nonce).map_err(|_| CryptoError::Decryption)?;

        let recipient = self.keys.public();
        let key = kdf::message_key(&self.keys, &sender, &sender, recipient)
            .map_err(|_| CryptoError::Decryption)?;

        let plaintext = aead::open(&key, &nonce, &ciphertext, MESSAGE_AAD)?;
        String::from_utf8(plaintext.to_vec()).map_err(|_| CryptoError::Decryption)
    }

    /// New random symmetric key, standard base64.
    pub fn generate_group_key(&self) -> Result<String, CryptoError> {
        let mut key = zeroize::Zeroizing::new([0u8; GROUP_KEY_LEN]);
        OsRng
            .try_fill_bytes(key.as_mut())
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(crate::b64_encode(key.as_ref()))
    }
}
