//! Participant key management
//!
//! Each participant has exactly one long-term `KeyPair` (X25519). The
//! public half is shared with peers as standard base64; the secret half
//! stays inside the owning process and is zeroized on drop.

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;

// ── Newtype wrappers ──────────────────────────────────────────────────────────

/// 32-byte X25519 public key, standard-base64 encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKeyBytes(pub [u8; KEY_LEN]);

impl PublicKeyBytes {
    pub fn to_b64(&self) -> String {
        crate::b64_encode(&self.0)
    }

    pub fn from_b64(s: &str) -> Result<Self, CryptoError> {
        let bytes = crate::b64_decode(s)?;
        let arr: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "Public key must be {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Human-readable fingerprint: BLAKE3 of the public key, truncated to
    /// 20 bytes (160 bits), hex-encoded in groups of 4 for display.
    ///
    /// Example: "a1b2 c3d4 e5f6 7890 abcd ef01 2345 6789 0abc def0"
    pub fn fingerprint(&self) -> String {
        let hash = blake3::hash(&self.0);
        let hex = hex::encode(&hash.as_bytes()[..20]);
        hex.as_bytes()
            .chunks(4)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub(crate) fn to_x25519(self) -> X25519Public {
        X25519Public::from(self.0)
    }
}

// ── Key pair ──────────────────────────────────────────────────────────────────

/// Long-term X25519 key pair. `StaticSecret` clears its memory on drop.
pub struct KeyPair {
    public: PublicKeyBytes,
    secret: StaticSecret,
}

impl KeyPair {
    /// Fresh key pair from the OS random source.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut seed = Zeroizing::new([0u8; KEY_LEN]);
        OsRng
            .try_fill_bytes(seed.as_mut())
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(Self::from_secret(StaticSecret::from(*seed)))
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "Secret key must be {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::from_secret(StaticSecret::from(arr)))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKeyBytes(X25519Public::from(&secret).to_bytes());
        Self { public, secret }
    }

    pub fn public(&self) -> &PublicKeyBytes {
        &self.public
    }

    pub fn secret_bytes(&self) -> Zeroizing<[u8; KEY_LEN]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    pub(crate) fn secret(&self) -> &StaticSecret {
        &self.secret
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public.to_b64())
            .finish_non_exhaustive()
    }
}
