//! In-process transport.
//!
//! Every node that joins a `MemoryNetwork` gets a `MemoryTransport` for
//! dialing and an mpsc receiver for its inbound `TransportEvent`s. A dial
//! creates a link shared by both channel ends; severing the link closes
//! both ends and reports the disconnect to each side.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::transport::{Channel, PeerStream, Transport, TransportError, TransportEvent};

type Inbox = mpsc::UnboundedSender<TransportEvent>;

#[derive(Default)]
struct NetworkState {
    inboxes: HashMap<String, Inbox>,
    /// Live link per unordered peer pair.
    links: HashMap<(String, String), Arc<AtomicBool>>,
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `peer_id`; replaces an earlier attachment under the same id.
    pub fn join(
        &self,
        peer_id: &str,
    ) -> (Arc<MemoryTransport>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().inboxes.insert(peer_id.to_string(), tx);
        let transport = Arc::new(MemoryTransport {
            local: peer_id.to_string(),
            network: self.clone(),
        });
        (transport, rx)
    }

    /// Detach `peer_id`: later dials to it fail and its links are severed.
    pub fn leave(&self, peer_id: &str) {
        let peers: Vec<String> = {
            let mut state = self.state.lock();
            state.inboxes.remove(peer_id);
            state
                .links
                .keys()
                .filter_map(|(a, b)| {
                    if a == peer_id {
                        Some(b.clone())
                    } else if b == peer_id {
                        Some(a.clone())
                    } else {
                        None
                    }
                })
                .collect()
        };
        for other in peers {
            self.sever(peer_id, &other);
        }
    }

    /// Close the link between `a` and `b`, notifying whichever side is
    /// still attached.
    pub fn sever(&self, a: &str, b: &str) {
        let mut state = self.state.lock();
        let Some(link) = state.links.remove(&pair_key(a, b)) else {
            return;
        };
        link.store(true, Ordering::SeqCst);
        debug!(a, b, "memory link severed");
        if let Some(inbox) = state.inboxes.get(a) {
            let _ = inbox.send(TransportEvent::Disconnect { peer_id: b.to_string() });
        }
        if let Some(inbox) = state.inboxes.get(b) {
            let _ = inbox.send(TransportEvent::Disconnect { peer_id: a.to_string() });
        }
    }

    /// Drop the `a`-`b` link entry if it is still `link`; a newer dial may
    /// already have replaced it.
    fn forget_link(&self, a: &str, b: &str, link: &Arc<AtomicBool>) {
        let mut state = self.state.lock();
        let key = pair_key(a, b);
        if state.links.get(&key).is_some_and(|l| Arc::ptr_eq(l, link)) {
            state.links.remove(&key);
        }
    }

    fn inbox(&self, peer_id: &str) -> Option<Inbox> {
        self.state.lock().inboxes.get(peer_id).cloned()
    }
}

pub struct MemoryTransport {
    local: String,
    network: MemoryNetwork,
}

impl MemoryTransport {
    pub fn local_peer(&self) -> &str {
        &self.local
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn dial(&self, peer_id: &str) -> Result<Arc<dyn Channel>, TransportError> {
        if peer_id == self.local {
            return Err(TransportError::Handshake("cannot dial self".into()));
        }
        let remote_inbox = self
            .network
            .inbox(peer_id)
            .ok_or_else(|| TransportError::Unreachable(peer_id.to_string()))?;
        let local_inbox = self
            .network
            .inbox(&self.local)
            .ok_or_else(|| TransportError::Handshake("local peer left the network".into()))?;

        let closed = Arc::new(AtomicBool::new(false));
        if let Some(old) = self
            .network
            .state
            .lock()
            .links
            .insert(pair_key(&self.local, peer_id), closed.clone())
        {
            old.store(true, Ordering::SeqCst);
        }

        let remote_end = Arc::new(MemoryChannel {
            local: peer_id.to_string(),
            remote: self.local.clone(),
            remote_inbox: local_inbox,
            closed: closed.clone(),
            network: self.network.clone(),
        });
        remote_inbox
            .send(TransportEvent::InboundConnect {
                peer_id: self.local.clone(),
                channel: remote_end,
            })
            .map_err(|_| TransportError::Unreachable(peer_id.to_string()))?;

        Ok(Arc::new(MemoryChannel {
            local: self.local.clone(),
            remote: peer_id.to_string(),
            remote_inbox,
            closed,
            network: self.network.clone(),
        }))
    }
}

/// One end of a link; writes land in the other end's inbox.
pub struct MemoryChannel {
    local: String,
    remote: String,
    remote_inbox: Inbox,
    closed: Arc<AtomicBool>,
    network: MemoryNetwork,
}

#[async_trait]
impl Channel for MemoryChannel {
    fn remote_peer(&self) -> &str {
        &self.remote
    }

    async fn open_stream(&self) -> Result<Box<dyn PeerStream>, TransportError> {
        if self.closed.load(Ordering::SeqCst) || self.remote_inbox.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(Box::new(MemoryStream {
            from: self.local.clone(),
            remote_inbox: self.remote_inbox.clone(),
            closed: self.closed.clone(),
        }))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.network.forget_link(&self.local, &self.remote, &self.closed);
            let _ = self.remote_inbox.send(TransportEvent::Disconnect {
                peer_id: self.local.clone(),
            });
        }
    }
}

struct MemoryStream {
    from: String,
    remote_inbox: Inbox,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl PeerStream for MemoryStream {
    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.remote_inbox.is_closed()
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.remote_inbox
            .send(TransportEvent::Data {
                peer_id: self.from.clone(),
                bytes: bytes.to_vec(),
            })
            .map_err(|_| TransportError::Closed)
    }
}
