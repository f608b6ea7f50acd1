use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("No connection to peer {0}")]
    NoConnection(String),

    #[error("Failed to connect to peer {peer_id}: {source}")]
    ConnectFailure {
        peer_id: String,
        #[source]
        source: TransportError,
    },

    #[error("Transport error for peer {peer_id}: {source}")]
    Transport {
        peer_id: String,
        #[source]
        source: TransportError,
    },
}
