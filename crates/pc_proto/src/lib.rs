//! pc_proto - Wire types and serialisation for PeerChat
//!
//! Every payload exchanged between peers is a UTF-8 JSON `WireMessage`
//! tagged by its `type` field. Frames are validated here, at the transport
//! boundary, before anything reaches the crypto engine or the store.
//!
//! # Modules
//! - `message`  - the tagged `WireMessage` variants
//! - `envelope` - conversions between chat frames and encrypted envelopes
//! - `codec`    - size limits, JSON framing and field validation

pub mod codec;
pub mod envelope;
pub mod message;

pub use codec::{decode, encode, CodecError, MAX_FRAME_LEN};
pub use message::WireMessage;
