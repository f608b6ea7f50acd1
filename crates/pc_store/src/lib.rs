//! pc_store - persistent chat history for PeerChat
//!
//! # Storage layout
//! One pretty-printed JSON record per chat session at
//! `<dir>/<session_id>.json`, holding the participants and the full ordered
//! message log. Every mutation rewrites the whole record (written to a
//! temporary sibling, then renamed over the old one) before returning.
//! This keeps the format trivially inspectable, at the cost of O(history)
//! writes per message.

pub mod error;
pub mod models;
pub mod store;

pub use error::StoreError;
pub use models::{ChatSession, Message};
pub use store::ChatSessionStore;
