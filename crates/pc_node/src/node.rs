//! `ChatNode`: one participant's view of the network.
//!
//! Outbound: `send_message` encrypts for the peer's announced key, frames
//! the ciphertext, writes it through the registry and records the
//! plaintext in the pair's session.
//!
//! Inbound: `run` drains the transport's event queue one event at a time.
//! `Hello` frames record the sender's public key (a later, different key
//! for the same peer is refused); `Chat` frames are
//! decrypted (or taken verbatim when unencrypted) and appended to the
//! session. A bad frame is logged and dropped without touching the
//! session log or the connection.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use pc_crypto::CryptoEngine;
use pc_net::{PeerSessionRegistry, Transport, TransportEvent};
use pc_proto::WireMessage;
use pc_store::{ChatSessionStore, Message};
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex, Notify};
use tracing::{debug, info, warn};

use crate::error::NodeError;

const MESSAGE_CAPACITY: usize = 256;

pub struct ChatNode {
    peer_id: String,
    crypto: CryptoEngine,
    registry: Arc<PeerSessionRegistry>,
    store: Arc<ChatSessionStore>,
    /// Public keys announced by peers via `Hello`.
    peer_keys: RwLock<HashMap<String, String>>,
    key_updates: Notify,
    /// Serialises find-or-create of pair sessions.
    session_guard: AsyncMutex<()>,
    received: broadcast::Sender<Message>,
}

impl ChatNode {
    pub fn new(
        peer_id: impl Into<String>,
        crypto: CryptoEngine,
        transport: Arc<dyn Transport>,
        store: Arc<ChatSessionStore>,
    ) -> Self {
        let (received, _) = broadcast::channel(MESSAGE_CAPACITY);
        Self {
            peer_id: peer_id.into(),
            crypto,
            registry: Arc::new(PeerSessionRegistry::new(transport)),
            store,
            peer_keys: RwLock::new(HashMap::new()),
            key_updates: Notify::new(),
            session_guard: AsyncMutex::new(()),
            received,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn public_key(&self) -> String {
        self.crypto.public_key()
    }

    pub fn crypto(&self) -> &CryptoEngine {
        &self.crypto
    }

    pub fn registry(&self) -> &Arc<PeerSessionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<ChatSessionStore> {
        &self.store
    }

    /// Every inbound chat message, after it has been stored.
    pub fn subscribe_messages(&self) -> broadcast::Receiver<Message> {
        self.received.subscribe()
    }

    pub fn peer_key(&self, peer_id: &str) -> Option<String> {
        self.peer_keys.read().get(peer_id).cloned()
    }

    /// Wait until `peer_id` has announced its key. False on timeout.
    pub async fn wait_for_peer_key(&self, peer_id: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.key_updates.notified();
            if self.peer_keys.read().contains_key(peer_id) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return false;
            }
        }
    }

    // ── Outbound ─────────────────────────────────────────────────────────────

    /// Connect to `peer_id` and announce our key. False if the connection
    /// could not be established.
    pub async fn connect(&self, peer_id: &str) -> bool {
        if !self.registry.connect(peer_id).await {
            return false;
        }
        if let Err(err) = self.announce(peer_id).await {
            warn!(peer_id, error = %err, "failed to send hello");
        }
        true
    }

    pub fn disconnect(&self, peer_id: &str) {
        self.registry.disconnect(peer_id);
    }

    async fn announce(&self, peer_id: &str) -> Result<(), NodeError> {
        let frame = pc_proto::encode(&WireMessage::hello(self.crypto.public_key()))?;
        self.registry.send(peer_id, &frame).await?;
        Ok(())
    }

    /// Encrypt `text` for `peer_id`, send it, and record it in the pair's
    /// session. Nothing is stored if the send fails.
    pub async fn send_message(&self, peer_id: &str, text: &str) -> Result<Message, NodeError> {
        let key = self
            .peer_key(peer_id)
            .ok_or_else(|| NodeError::UnknownPeerKey(peer_id.to_string()))?;
        let envelope = self.crypto.encrypt(text, &key)?;
        let message = Message::new(self.peer_id.as_str(), peer_id, text, true);
        let frame = WireMessage::encrypted_chat(envelope, message.timestamp);
        self.registry.send(peer_id, &pc_proto::encode(&frame)?).await?;

        let session_id = self.session_with(peer_id).await?;
        self.store.append_message(&session_id, message.clone()).await?;
        debug!(peer_id, session_id = %session_id, "message sent");
        Ok(message)
    }

    /// Ordered conversation with `peer_id`; empty if none exists yet.
    pub fn history(&self, peer_id: &str) -> Vec<Message> {
        self.store
            .find_session(&self.pair(peer_id))
            .map(|id| self.store.get_messages(&id))
            .unwrap_or_default()
    }

    fn pair(&self, peer_id: &str) -> BTreeSet<String> {
        [self.peer_id.clone(), peer_id.to_string()].into_iter().collect()
    }

    async fn session_with(&self, peer_id: &str) -> Result<String, NodeError> {
        let participants = self.pair(peer_id);
        let _guard = self.session_guard.lock().await;
        if let Some(id) = self.store.find_session(&participants) {
            return Ok(id);
        }
        Ok(self.store.create_session(participants).await?)
    }

    // ── Inbound ──────────────────────────────────────────────────────────────

    /// Process transport events until the queue closes.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        info!(peer_id = %self.peer_id, "chat node running");
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        info!(peer_id = %self.peer_id, "transport event queue closed");
    }

    pub async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::InboundConnect { peer_id, channel } => {
                self.registry.on_inbound_connect(&peer_id, channel);
                if let Err(err) = self.announce(&peer_id).await {
                    warn!(peer_id = %peer_id, error = %err, "failed to send hello");
                }
            }
            TransportEvent::Data { peer_id, bytes } => {
                self.registry.touch(&peer_id);
                if let Err(err) = self.handle_frame(&peer_id, &bytes).await {
                    warn!(peer_id = %peer_id, error = %err, "dropping inbound frame");
                }
            }
            TransportEvent::Disconnect { peer_id } => {
                self.registry.on_peer_lost(&peer_id);
            }
        }
    }

    async fn handle_frame(&self, peer_id: &str, bytes: &[u8]) -> Result<(), NodeError> {
        match pc_proto::decode(bytes)? {
            WireMessage::Hello { public_key } => self.record_peer_key(peer_id, public_key)?,
            WireMessage::Chat { content, nonce, timestamp } => {
                self.receive_chat(peer_id, content, nonce, timestamp).await?
            }
        }
        Ok(())
    }

    /// The first key a peer announces is kept for the node's lifetime; a
    /// hello with a different key is rejected and the book is unchanged.
    fn record_peer_key(&self, peer_id: &str, public_key: String) -> Result<(), NodeError> {
        {
            let mut keys = self.peer_keys.write();
            match keys.get(peer_id) {
                Some(known) if *known == public_key => return Ok(()),
                Some(_) => return Err(NodeError::KeyChanged(peer_id.to_string())),
                None => {
                    keys.insert(peer_id.to_string(), public_key);
                }
            }
        }
        debug!(peer_id, "peer key recorded");
        self.key_updates.notify_waiters();
        Ok(())
    }

    async fn receive_chat(
        &self,
        peer_id: &str,
        content: String,
        nonce: Option<String>,
        timestamp: i64,
    ) -> Result<(), NodeError> {
        let (text, encrypted) = match nonce {
            Some(nonce) => {
                let key = self
                    .peer_key(peer_id)
                    .ok_or_else(|| NodeError::UnknownPeerKey(peer_id.to_string()))?;
                (self.crypto.decrypt(&content, &nonce, &key)?, true)
            }
            None => (content, false),
        };
        let mut message = Message::new(peer_id, self.peer_id.as_str(), text, encrypted);
        message.timestamp = timestamp;

        let session_id = self.session_with(peer_id).await?;
        self.store.append_message(&session_id, message.clone()).await?;
        debug!(peer_id, session_id = %session_id, encrypted, "message received");
        let _ = self.received.send(message);
        Ok(())
    }
}
