//! pc_node - a PeerChat participant
//!
//! `ChatNode` owns one `CryptoEngine`, one `PeerSessionRegistry` and a
//! shared `ChatSessionStore`, and is the single consumer of its transport's
//! inbound events. Nothing here is process-global: tests and the demo run
//! several nodes side by side.

pub mod config;
pub mod error;
pub mod identity;
pub mod node;

pub use config::NodeConfig;
pub use error::NodeError;
pub use node::ChatNode;
