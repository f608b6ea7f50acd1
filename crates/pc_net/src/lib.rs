//! pc_net - peer connections for PeerChat
//!
//! The network itself is an external collaborator reached through the
//! `Transport` / `Channel` / `PeerStream` traits. This crate owns the
//! bookkeeping on top of it: one connection per peer, lazy stream reopen,
//! and connect/disconnect notifications.
//!
//! # Modules
//! - `transport` - adapter traits and inbound `TransportEvent`s
//! - `registry`  - `PeerSessionRegistry`
//! - `memory`    - in-process transport used by tests and the demo node
//! - `error`     - registry error type

pub mod error;
pub mod memory;
pub mod registry;
pub mod transport;

pub use error::NetError;
pub use memory::{MemoryNetwork, MemoryTransport};
pub use registry::{PeerEvent, PeerSessionRegistry, PeerState};
pub use transport::{Channel, PeerStream, Transport, TransportError, TransportEvent};
