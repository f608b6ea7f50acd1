//! Persistent node identity.
//!
//! The X25519 secret lives in a small JSON file in the data directory,
//! created with owner-only permissions on first use. The stored public key
//! is checked against the one derived from the secret on every load.

use std::path::Path;

use pc_crypto::{b64_decode, b64_encode, CryptoEngine};
use serde::{Deserialize, Serialize};
use tracing::info;
use zeroize::Zeroizing;

use crate::error::NodeError;

const IDENTITY_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityFile {
    version: u32,
    public_key: String,
    secret_key: String,
}

/// Load the identity at `path`, or generate and store a new one.
pub fn load_or_create(path: &Path) -> Result<CryptoEngine, NodeError> {
    if path.exists() {
        return load(path);
    }
    let engine = CryptoEngine::new()?;
    store(path, &engine)?;
    info!(fingerprint = %engine.fingerprint(), "new identity generated");
    Ok(engine)
}

fn load(path: &Path) -> Result<CryptoEngine, NodeError> {
    let bytes = Zeroizing::new(std::fs::read(path).map_err(NodeError::io(path))?);
    let file: IdentityFile = serde_json::from_slice(&bytes)?;
    if file.version != IDENTITY_VERSION {
        return Err(NodeError::Config(format!(
            "unsupported identity version {}",
            file.version
        )));
    }
    let secret = Zeroizing::new(b64_decode(&file.secret_key)?);
    let engine = CryptoEngine::from_secret_bytes(&secret)?;
    if engine.public_key() != file.public_key {
        return Err(NodeError::Config(
            "identity public key does not match its secret".into(),
        ));
    }
    Ok(engine)
}

fn store(path: &Path, engine: &CryptoEngine) -> Result<(), NodeError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(NodeError::io(parent))?;
    }
    let secret = engine.export_secret();
    let file = IdentityFile {
        version: IDENTITY_VERSION,
        public_key: engine.public_key(),
        secret_key: b64_encode(&secret[..]),
    };
    let data = Zeroizing::new(serde_json::to_vec_pretty(&file)?);
    std::fs::write(path, data.as_slice()).map_err(NodeError::io(path))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(NodeError::io(path))?;
    }
    Ok(())
}
