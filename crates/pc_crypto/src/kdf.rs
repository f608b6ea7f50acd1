//! Key derivation
//!
//! `message_key` - X25519 agreement between one party's secret and the
//!   other party's public key, expanded with HKDF-SHA256 into a 32-byte
//!   AEAD key. The ordered (sender, recipient) pair of public keys is part
//!   of the HKDF info, so A→B and B→A traffic use different keys.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{
    error::CryptoError,
    keys::{KeyPair, PublicKeyBytes},
};

const KDF_SALT: &[u8] = b"peerchat-box-v1";
const KDF_INFO: &[u8] = b"peerchat-msg-key";

/// Expand `ikm` + `info` into `output.len()` bytes of key material.
pub fn hkdf_expand(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Derive the AEAD key for a message from `sender` to `recipient`.
///
/// `own` is whichever side is running the operation; `peer` is the other
/// side's public key. Returns `InvalidKey` when the agreement is not
/// contributory (low-order peer key).
pub fn message_key(
    own: &KeyPair,
    peer: &PublicKeyBytes,
    sender: &PublicKeyBytes,
    recipient: &PublicKeyBytes,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let shared = own.secret().diffie_hellman(&peer.to_x25519());
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKey("non-contributory key agreement".into()));
    }

    let mut info = Vec::with_capacity(KDF_INFO.len() + 64);
    info.extend_from_slice(KDF_INFO);
    info.extend_from_slice(&sender.0);
    info.extend_from_slice(&recipient.0);

    let mut key = Zeroizing::new([0u8; 32]);
    hkdf_expand(shared.as_bytes(), Some(KDF_SALT), &info, key.as_mut())?;
    Ok(key)
}
