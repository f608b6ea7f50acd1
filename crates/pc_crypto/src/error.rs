use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("AEAD encryption failed")]
    Encryption,

    /// Single failure kind for every decrypt path: wrong key, tampering,
    /// malformed nonce or ciphertext. Callers cannot tell these apart.
    #[error("Failed to decrypt message")]
    Decryption,

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
