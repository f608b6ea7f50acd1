use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Crypto(#[from] pc_crypto::CryptoError),

    #[error(transparent)]
    Net(#[from] pc_net::NetError),

    #[error(transparent)]
    Store(#[from] pc_store::StoreError),

    #[error(transparent)]
    Codec(#[from] pc_proto::CodecError),

    #[error("No public key known for peer {0}; wait for its hello")]
    UnknownPeerKey(String),

    #[error("Peer {0} announced a different public key than the one on record")]
    KeyChanged(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

impl NodeError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}
