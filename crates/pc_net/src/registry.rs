//! Peer connection registry.
//!
//! Per peer: `Disconnected → Connecting → Connected → Disconnected`.
//! At most one connection is registered per peer id; a reconnect (outbound
//! or inbound) replaces the existing entry. The map lock is only held for
//! map operations, never across a transport call, so a slow dial to one
//! peer never delays sends to another.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::{
    error::NetError,
    transport::{Channel, PeerStream, Transport, TransportError},
};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Disconnected,
    Connecting,
    Connected,
}

/// Lifecycle notification, sent once per transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Connected(String),
    Disconnected(String),
}

type StreamSlot = Arc<AsyncMutex<Option<Box<dyn PeerStream>>>>;

struct PeerConnection {
    channel: Arc<dyn Channel>,
    /// Serialises writes to this peer; `None` until first opened.
    stream: StreamSlot,
    last_activity: DateTime<Utc>,
    /// Distinguishes this entry from a later replacement of the same peer.
    generation: u64,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<String, PeerConnection>,
    /// Outstanding connect attempts per peer; never holds an empty set.
    connecting: HashMap<String, HashSet<u64>>,
    next_id: u64,
}

impl RegistryState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn finish_attempt(&mut self, peer_id: &str, attempt: u64) {
        if let Some(attempts) = self.connecting.get_mut(peer_id) {
            attempts.remove(&attempt);
            if attempts.is_empty() {
                self.connecting.remove(peer_id);
            }
        }
    }

    /// Insert or replace; returns true when the peer was not connected before.
    fn install(
        &mut self,
        peer_id: &str,
        channel: Arc<dyn Channel>,
        stream: Option<Box<dyn PeerStream>>,
    ) -> bool {
        let generation = self.next_id();
        let previous = self.connections.insert(
            peer_id.to_string(),
            PeerConnection {
                channel,
                stream: Arc::new(AsyncMutex::new(stream)),
                last_activity: Utc::now(),
                generation,
            },
        );
        previous.is_none()
    }
}

pub struct PeerSessionRegistry {
    transport: Arc<dyn Transport>,
    state: Mutex<RegistryState>,
    events: broadcast::Sender<PeerEvent>,
}

impl PeerSessionRegistry {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            transport,
            state: Mutex::new(RegistryState::default()),
            events,
        }
    }

    /// Receive `PeerEvent`s from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: PeerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Dial `peer_id` and register the connection. Returns false on any
    /// failure; nothing is retried.
    pub async fn connect(&self, peer_id: &str) -> bool {
        match self.try_connect(peer_id).await {
            Ok(()) => true,
            Err(err) => {
                warn!(peer_id, error = %err, "failed to connect to peer");
                false
            }
        }
    }

    /// Like [`connect`](Self::connect), but with the failure reason.
    pub async fn try_connect(&self, peer_id: &str) -> Result<(), NetError> {
        let attempt = {
            let mut state = self.state.lock();
            let id = state.next_id();
            state.connecting.entry(peer_id.to_string()).or_default().insert(id);
            id
        };
        debug!(peer_id, attempt, "dialing peer");

        let result = self.dial_and_open(peer_id).await;

        let mut state = self.state.lock();
        state.finish_attempt(peer_id, attempt);
        let (channel, stream) = result.map_err(|source| NetError::ConnectFailure {
            peer_id: peer_id.to_string(),
            source,
        })?;
        let is_new = state.install(peer_id, channel, Some(stream));
        drop(state);

        info!(peer_id, replaced = !is_new, "connected to peer");
        if is_new {
            self.emit(PeerEvent::Connected(peer_id.to_string()));
        }
        Ok(())
    }

    async fn dial_and_open(
        &self,
        peer_id: &str,
    ) -> Result<(Arc<dyn Channel>, Box<dyn PeerStream>), TransportError> {
        let channel = self.transport.dial(peer_id).await?;
        let opened = channel.open_stream().await;
        match opened {
            Ok(stream) => Ok((channel, stream)),
            Err(err) => {
                // The remote may already have registered us.
                channel.close();
                Err(err)
            }
        }
    }

    /// Register a connection the remote side initiated. Replaces any
    /// existing entry; the stream is opened on first send.
    pub fn on_inbound_connect(&self, peer_id: &str, channel: Arc<dyn Channel>) {
        let is_new = self.state.lock().install(peer_id, channel, None);
        info!(peer_id, replaced = !is_new, "inbound peer connection");
        if is_new {
            self.emit(PeerEvent::Connected(peer_id.to_string()));
        }
    }

    /// Transport reported the peer gone. No-op for unknown peers.
    pub fn on_peer_lost(&self, peer_id: &str) {
        if self.remove(peer_id).is_some() {
            info!(peer_id, "peer disconnected");
            self.emit(PeerEvent::Disconnected(peer_id.to_string()));
        } else {
            debug!(peer_id, "peer lost but not registered");
        }
    }

    /// Close our side of the connection and forget the peer.
    pub fn disconnect(&self, peer_id: &str) {
        if let Some(conn) = self.remove(peer_id) {
            conn.channel.close();
            info!(peer_id, "disconnected from peer");
            self.emit(PeerEvent::Disconnected(peer_id.to_string()));
        }
    }

    fn remove(&self, peer_id: &str) -> Option<PeerConnection> {
        self.state.lock().connections.remove(peer_id)
    }

    /// Write `payload` to the peer's stream, reopening it first if it was
    /// never opened or has gone stale.
    pub async fn send(&self, peer_id: &str, payload: &[u8]) -> Result<(), NetError> {
        let (channel, slot, generation) = {
            let state = self.state.lock();
            let conn = state
                .connections
                .get(peer_id)
                .ok_or_else(|| NetError::NoConnection(peer_id.to_string()))?;
            (conn.channel.clone(), conn.stream.clone(), conn.generation)
        };

        let transport_err = |source| NetError::Transport {
            peer_id: peer_id.to_string(),
            source,
        };

        let mut slot = slot.lock().await;
        let stream = match slot.take() {
            Some(stream) if stream.is_open() => stream,
            _ => {
                debug!(peer_id, "opening stream");
                channel.open_stream().await.map_err(transport_err)?
            }
        };
        let stream = slot.insert(stream);
        stream.write(payload).await.map_err(transport_err)?;
        drop(slot);

        self.touch_generation(peer_id, Some(generation));
        Ok(())
    }

    /// Record activity for a peer (e.g. on inbound data).
    pub fn touch(&self, peer_id: &str) {
        self.touch_generation(peer_id, None);
    }

    fn touch_generation(&self, peer_id: &str, generation: Option<u64>) {
        let mut state = self.state.lock();
        if let Some(conn) = state.connections.get_mut(peer_id) {
            if generation.map_or(true, |g| g == conn.generation) {
                conn.last_activity = Utc::now();
            }
        }
    }

    pub fn connected_peers(&self) -> Vec<String> {
        self.state.lock().connections.keys().cloned().collect()
    }

    pub fn peer_state(&self, peer_id: &str) -> PeerState {
        let state = self.state.lock();
        if state.connections.contains_key(peer_id) {
            PeerState::Connected
        } else if state.connecting.contains_key(peer_id) {
            PeerState::Connecting
        } else {
            PeerState::Disconnected
        }
    }

    pub fn last_activity(&self, peer_id: &str) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .connections
            .get(peer_id)
            .map(|c| c.last_activity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeLog {
        writes: Mutex<Vec<(String, Vec<u8>)>>,
        streams_opened: AtomicUsize,
        stream_epoch: AtomicUsize,
        fail_streams: AtomicBool,
        channels_closed: AtomicUsize,
        gated_dials: AtomicUsize,
    }

    /// Dials to the gated peer wait on the gate matching their dial index;
    /// dials beyond the last gate proceed at once.
    struct FakeTransport {
        unreachable: HashSet<String>,
        gate: Option<(String, Vec<Arc<Notify>>)>,
        log: Arc<FakeLog>,
    }

    struct FakeChannel {
        peer: String,
        label: String,
        log: Arc<FakeLog>,
    }

    struct FakeStream {
        label: String,
        epoch: usize,
        log: Arc<FakeLog>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn dial(&self, peer_id: &str) -> Result<Arc<dyn Channel>, TransportError> {
            let mut label = format!("out:{peer_id}");
            if let Some((gated, gates)) = &self.gate {
                if gated == peer_id {
                    let n = self.log.gated_dials.fetch_add(1, Ordering::SeqCst);
                    label = format!("{label}#{n}");
                    if let Some(notify) = gates.get(n) {
                        notify.notified().await;
                    }
                }
            }
            if self.unreachable.contains(peer_id) {
                return Err(TransportError::Unreachable(peer_id.to_string()));
            }
            Ok(Arc::new(FakeChannel {
                peer: peer_id.to_string(),
                label,
                log: self.log.clone(),
            }))
        }
    }

    #[async_trait]
    impl Channel for FakeChannel {
        fn remote_peer(&self) -> &str {
            &self.peer
        }

        async fn open_stream(&self) -> Result<Box<dyn PeerStream>, TransportError> {
            if self.log.fail_streams.load(Ordering::SeqCst) {
                return Err(TransportError::Handshake("stream refused".into()));
            }
            self.log.streams_opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeStream {
                label: self.label.clone(),
                epoch: self.log.stream_epoch.load(Ordering::SeqCst),
                log: self.log.clone(),
            }))
        }

        fn close(&self) {
            self.log.channels_closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl PeerStream for FakeStream {
        fn is_open(&self) -> bool {
            self.epoch == self.log.stream_epoch.load(Ordering::SeqCst)
        }

        async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
            self.log.writes.lock().push((self.label.clone(), bytes.to_vec()));
            Ok(())
        }
    }

    fn registry_with(
        unreachable: &[&str],
        gate: Option<(String, Vec<Arc<Notify>>)>,
    ) -> (Arc<PeerSessionRegistry>, Arc<FakeLog>) {
        let log = Arc::new(FakeLog::default());
        let transport = FakeTransport {
            unreachable: unreachable.iter().map(|s| s.to_string()).collect(),
            gate,
            log: log.clone(),
        };
        (Arc::new(PeerSessionRegistry::new(Arc::new(transport))), log)
    }

    fn inbound_channel(peer: &str, label: &str, log: &Arc<FakeLog>) -> Arc<dyn Channel> {
        Arc::new(FakeChannel {
            peer: peer.to_string(),
            label: label.to_string(),
            log: log.clone(),
        })
    }

    #[tokio::test]
    async fn send_without_connection_fails() {
        let (registry, _) = registry_with(&[], None);
        let err = registry.send("ghost", b"hi").await.unwrap_err();
        assert!(matches!(err, NetError::NoConnection(p) if p == "ghost"));
    }

    #[tokio::test]
    async fn connect_registers_and_sends() {
        let (registry, log) = registry_with(&[], None);
        assert!(registry.connect("bob").await);
        assert_eq!(registry.connected_peers(), vec!["bob".to_string()]);
        assert_eq!(registry.peer_state("bob"), PeerState::Connected);
        assert!(registry.last_activity("bob").is_some());

        registry.send("bob", b"payload").await.unwrap();
        let writes = log.writes.lock();
        assert_eq!(writes.as_slice(), &[("out:bob".to_string(), b"payload".to_vec())]);
        assert_eq!(log.streams_opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_connect_leaves_no_entry() {
        let (registry, _) = registry_with(&["carol"], None);
        assert!(!registry.connect("carol").await);
        assert!(registry.connected_peers().is_empty());
        assert_eq!(registry.peer_state("carol"), PeerState::Disconnected);

        let err = registry.try_connect("carol").await.unwrap_err();
        assert!(matches!(
            err,
            NetError::ConnectFailure { source: TransportError::Unreachable(_), .. }
        ));
    }

    #[tokio::test]
    async fn stream_handshake_failure_fails_connect() {
        let (registry, log) = registry_with(&[], None);
        log.fail_streams.store(true, Ordering::SeqCst);
        assert!(!registry.connect("bob").await);
        assert_eq!(registry.peer_state("bob"), PeerState::Disconnected);
        assert_eq!(log.channels_closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn peer_lost_is_idempotent_and_notifies_once() {
        let (registry, _) = registry_with(&[], None);
        let mut events = registry.subscribe();

        assert!(registry.connect("bob").await);
        registry.on_peer_lost("bob");
        registry.on_peer_lost("bob");

        assert!(!registry.connected_peers().contains(&"bob".to_string()));
        assert_eq!(events.try_recv().unwrap(), PeerEvent::Connected("bob".into()));
        assert_eq!(events.try_recv().unwrap(), PeerEvent::Disconnected("bob".into()));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn inbound_reconnect_replaces_entry() {
        let (registry, log) = registry_with(&[], None);
        let mut events = registry.subscribe();

        registry.on_inbound_connect("dave", inbound_channel("dave", "first", &log));
        registry.on_inbound_connect("dave", inbound_channel("dave", "second", &log));
        assert_eq!(registry.connected_peers(), vec!["dave".to_string()]);

        registry.send("dave", b"x").await.unwrap();
        assert_eq!(log.writes.lock()[0].0, "second");

        assert_eq!(events.try_recv().unwrap(), PeerEvent::Connected("dave".into()));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_stream_is_reopened() {
        let (registry, log) = registry_with(&[], None);
        assert!(registry.connect("bob").await);
        log.stream_epoch.fetch_add(1, Ordering::SeqCst);

        registry.send("bob", b"after").await.unwrap();
        assert_eq!(log.streams_opened.load(Ordering::SeqCst), 2);
        assert_eq!(log.writes.lock().len(), 1);

        // Fresh stream is reused.
        registry.send("bob", b"again").await.unwrap();
        assert_eq!(log.streams_opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reopen_failure_propagates() {
        let (registry, log) = registry_with(&[], None);
        assert!(registry.connect("bob").await);
        log.stream_epoch.fetch_add(1, Ordering::SeqCst);
        log.fail_streams.store(true, Ordering::SeqCst);

        let err = registry.send("bob", b"lost").await.unwrap_err();
        assert!(matches!(
            err,
            NetError::Transport { source: TransportError::Handshake(_), .. }
        ));
        assert!(log.writes.lock().is_empty());
        // The connection itself stays registered.
        assert_eq!(registry.peer_state("bob"), PeerState::Connected);
    }

    #[tokio::test]
    async fn pending_connect_does_not_block_other_peers() {
        let gate = Arc::new(Notify::new());
        let (registry, log) = registry_with(&[], Some(("slow".into(), vec![gate.clone()])));

        let slow = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.connect("slow").await })
        };
        tokio::task::yield_now().await;
        assert_eq!(registry.peer_state("slow"), PeerState::Connecting);

        assert!(registry.connect("fast").await);
        registry.send("fast", b"not blocked").await.unwrap();
        assert_eq!(log.writes.lock().len(), 1);

        gate.notify_one();
        assert!(slow.await.unwrap());
        assert_eq!(registry.peer_state("slow"), PeerState::Connected);
    }

    #[tokio::test]
    async fn local_disconnect_removes_and_notifies() {
        let (registry, _) = registry_with(&[], None);
        assert!(registry.connect("bob").await);
        let mut events = registry.subscribe();

        registry.disconnect("bob");
        assert_eq!(registry.peer_state("bob"), PeerState::Disconnected);
        assert_eq!(events.try_recv().unwrap(), PeerEvent::Disconnected("bob".into()));
        assert!(matches!(
            registry.send("bob", b"x").await,
            Err(NetError::NoConnection(_))
        ));
    }

    async fn wait_for_gated_dials(log: &FakeLog, n: usize) {
        while log.gated_dials.load(Ordering::SeqCst) < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn concurrent_connects_keep_one_entry_and_last_wins() {
        let first = Arc::new(Notify::new());
        let second = Arc::new(Notify::new());
        let (registry, log) =
            registry_with(&[], Some(("bob".into(), vec![first.clone(), second.clone()])));
        let mut events = registry.subscribe();

        let early = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.connect("bob").await })
        };
        wait_for_gated_dials(&log, 1).await;
        let late = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.connect("bob").await })
        };
        wait_for_gated_dials(&log, 2).await;
        assert_eq!(registry.peer_state("bob"), PeerState::Connecting);

        first.notify_one();
        assert!(early.await.unwrap());
        second.notify_one();
        assert!(late.await.unwrap());

        assert_eq!(registry.connected_peers(), vec!["bob".to_string()]);
        registry.send("bob", b"which").await.unwrap();
        assert_eq!(log.writes.lock()[0].0, "out:bob#1");

        assert_eq!(events.try_recv().unwrap(), PeerEvent::Connected("bob".into()));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_attempt_keeps_older_dial_connecting() {
        let gate = Arc::new(Notify::new());
        let (registry, log) = registry_with(&[], Some(("bob".into(), vec![gate.clone()])));

        let pending = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.connect("bob").await })
        };
        wait_for_gated_dials(&log, 1).await;

        log.fail_streams.store(true, Ordering::SeqCst);
        assert!(!registry.connect("bob").await);
        assert_eq!(registry.peer_state("bob"), PeerState::Connecting);

        log.fail_streams.store(false, Ordering::SeqCst);
        gate.notify_one();
        assert!(pending.await.unwrap());
        assert_eq!(registry.peer_state("bob"), PeerState::Connected);
    }
}
