//! Transport adapter contract.
//!
//! An adapter provides outbound dialing (`Transport::dial`), streams over an
//! established channel (`Channel::open_stream`), byte writes
//! (`PeerStream::write`), and pushes everything that originates remotely
//! into an mpsc queue as `TransportEvent`s.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("peer {0} is unreachable")]
    Unreachable(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("channel closed")]
    Closed,
    #[error("io: {0}")]
    Io(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a channel to `peer_id`. May take arbitrarily long.
    async fn dial(&self, peer_id: &str) -> Result<Arc<dyn Channel>, TransportError>;
}

#[async_trait]
pub trait Channel: Send + Sync {
    fn remote_peer(&self) -> &str;

    async fn open_stream(&self) -> Result<Box<dyn PeerStream>, TransportError>;

    /// Tear down the channel locally. Adapters without a notion of closing
    /// can keep the default.
    fn close(&self) {}
}

#[async_trait]
pub trait PeerStream: Send + Sync {
    /// False once the stream can no longer carry writes.
    fn is_open(&self) -> bool;

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
}

/// Something that happened on the remote side of a channel.
pub enum TransportEvent {
    InboundConnect { peer_id: String, channel: Arc<dyn Channel> },
    Data { peer_id: String, bytes: Vec<u8> },
    Disconnect { peer_id: String },
}

impl TransportEvent {
    pub fn peer_id(&self) -> &str {
        match self {
            Self::InboundConnect { peer_id, .. }
            | Self::Data { peer_id, .. }
            | Self::Disconnect { peer_id } => peer_id,
        }
    }
}

impl std::fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InboundConnect { peer_id, .. } => {
                f.debug_struct("InboundConnect").field("peer_id", peer_id).finish()
            }
            Self::Data { peer_id, bytes } => f
                .debug_struct("Data")
                .field("peer_id", peer_id)
                .field("len", &bytes.len())
                .finish(),
            Self::Disconnect { peer_id } => {
                f.debug_struct("Disconnect").field("peer_id", peer_id).finish()
            }
        }
    }
}
