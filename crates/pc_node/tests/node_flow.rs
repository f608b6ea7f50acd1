use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pc_crypto::CryptoEngine;
use pc_net::{MemoryNetwork, PeerEvent, PeerState, TransportEvent};
use pc_node::{ChatNode, NodeError};
use pc_proto::WireMessage;
use pc_store::ChatSessionStore;
use tempfile::tempdir;

const WAIT: Duration = Duration::from_secs(5);

async fn spawn_node(network: &MemoryNetwork, peer_id: &str, dir: &Path) -> Arc<ChatNode> {
    let store = Arc::new(ChatSessionStore::open(dir).await.unwrap());
    let (transport, events) = network.join(peer_id);
    let node = Arc::new(ChatNode::new(peer_id, CryptoEngine::new().unwrap(), transport, store));
    tokio::spawn(node.clone().run(events));
    node
}

/// A node whose events are fed by hand instead of from a transport.
async fn detached_node(peer_id: &str, dir: &Path) -> ChatNode {
    let network = MemoryNetwork::new();
    let store = Arc::new(ChatSessionStore::open(dir).await.unwrap());
    let (transport, _events) = network.join(peer_id);
    ChatNode::new(peer_id, CryptoEngine::new().unwrap(), transport, store)
}

fn data(peer_id: &str, frame: &WireMessage) -> TransportEvent {
    TransportEvent::Data {
        peer_id: peer_id.to_string(),
        bytes: pc_proto::encode(frame).unwrap(),
    }
}

async fn linked_pair(
    network: &MemoryNetwork,
    dir: &Path,
) -> (Arc<ChatNode>, Arc<ChatNode>) {
    let alice = spawn_node(network, "alice", &dir.join("alice")).await;
    let bob = spawn_node(network, "bob", &dir.join("bob")).await;
    assert!(alice.connect("bob").await);
    assert!(alice.wait_for_peer_key("bob", WAIT).await);
    assert!(bob.wait_for_peer_key("alice", WAIT).await);
    (alice, bob)
}

#[tokio::test]
async fn messages_are_stored_as_plaintext_on_both_sides() {
    let dir = tempdir().unwrap();
    let network = MemoryNetwork::new();
    let (alice, bob) = linked_pair(&network, dir.path()).await;
    let mut bob_inbox = bob.subscribe_messages();

    let sent = alice.send_message("bob", "hello bob").await.unwrap();
    let received = tokio::time::timeout(WAIT, bob_inbox.recv()).await.unwrap().unwrap();

    assert_eq!(received.content, "hello bob");
    assert_eq!(received.sender_id, "alice");
    assert_eq!(received.recipient_id, "bob");
    assert!(received.encrypted);
    assert_eq!(received.timestamp, sent.timestamp);

    assert_eq!(alice.history("bob"), vec![sent]);
    assert_eq!(bob.history("alice"), vec![received]);
}

#[tokio::test]
async fn conversation_survives_restart() {
    let dir = tempdir().unwrap();
    let network = MemoryNetwork::new();
    let (alice, bob) = linked_pair(&network, dir.path()).await;
    let mut bob_inbox = bob.subscribe_messages();

    for text in ["one", "two", "three"] {
        alice.send_message("bob", text).await.unwrap();
        tokio::time::timeout(WAIT, bob_inbox.recv()).await.unwrap().unwrap();
    }

    let reopened = ChatSessionStore::open(dir.path().join("bob")).await.unwrap();
    let sessions = reopened.list_sessions();
    assert_eq!(sessions.len(), 1);
    let texts: Vec<_> = sessions[0].messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(texts, ["one", "two", "three"]);
}

#[tokio::test]
async fn sending_before_hello_is_rejected() {
    let dir = tempdir().unwrap();
    let network = MemoryNetwork::new();
    let alice = spawn_node(&network, "alice", &dir.path().join("alice")).await;

    let err = alice.send_message("bob", "anyone?").await.unwrap_err();
    assert!(matches!(err, NodeError::UnknownPeerKey(peer) if peer == "bob"));
    assert!(alice.history("bob").is_empty());
}

#[tokio::test]
async fn peer_loss_stops_delivery() {
    let dir = tempdir().unwrap();
    let network = MemoryNetwork::new();
    let (alice, _bob) = linked_pair(&network, dir.path()).await;
    let mut events = alice.registry().subscribe();

    network.sever("alice", "bob");
    let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event, PeerEvent::Disconnected("bob".into()));
    assert_eq!(alice.registry().peer_state("bob"), PeerState::Disconnected);

    let err = alice.send_message("bob", "still there?").await.unwrap_err();
    assert!(matches!(err, NodeError::Net(_)));
    assert!(alice.history("bob").is_empty());
}

#[tokio::test]
async fn frame_from_wrong_key_is_dropped() {
    let dir = tempdir().unwrap();
    let bob = detached_node("bob", dir.path()).await;
    let alice = CryptoEngine::new().unwrap();
    let mallory = CryptoEngine::new().unwrap();

    bob.handle_event(data("alice", &WireMessage::hello(alice.public_key()))).await;
    assert_eq!(bob.peer_key("alice"), Some(alice.public_key()));

    // Encrypted for bob, but by someone other than alice.
    let forged = mallory.encrypt("give me your keys", &bob.public_key()).unwrap();
    bob.handle_event(data("alice", &WireMessage::encrypted_chat(forged, 1))).await;
    assert!(bob.history("alice").is_empty());

    let genuine = alice.encrypt("it's really me", &bob.public_key()).unwrap();
    bob.handle_event(data("alice", &WireMessage::encrypted_chat(genuine, 2))).await;
    let history = bob.history("alice");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "it's really me");
    assert_eq!(history[0].timestamp, 2);
}

#[tokio::test]
async fn plaintext_and_garbage_frames() {
    let dir = tempdir().unwrap();
    let bob = detached_node("bob", dir.path()).await;

    bob.handle_event(TransportEvent::Data {
        peer_id: "alice".into(),
        bytes: b"\xff not a frame".to_vec(),
    })
    .await;
    assert!(bob.history("alice").is_empty());

    bob.handle_event(data("alice", &WireMessage::plain_chat("unencrypted hi"))).await;
    let history = bob.history("alice");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "unencrypted hi");
    assert!(!history[0].encrypted);
}

#[tokio::test]
async fn encrypted_chat_without_hello_is_dropped() {
    let dir = tempdir().unwrap();
    let bob = detached_node("bob", dir.path()).await;
    let alice = CryptoEngine::new().unwrap();

    let envelope = alice.encrypt("too early", &bob.public_key()).unwrap();
    bob.handle_event(data("alice", &WireMessage::encrypted_chat(envelope, 1))).await;
    assert!(bob.history("alice").is_empty());
}

#[tokio::test]
async fn changed_hello_key_is_refused() {
    let dir = tempdir().unwrap();
    let bob = detached_node("bob", dir.path()).await;
    let alice = CryptoEngine::new().unwrap();
    let mallory = CryptoEngine::new().unwrap();

    bob.handle_event(data("alice", &WireMessage::hello(alice.public_key()))).await;
    bob.handle_event(data("alice", &WireMessage::hello(mallory.public_key()))).await;
    assert_eq!(bob.peer_key("alice"), Some(alice.public_key()));

    let forged = mallory.encrypt("send me money", &bob.public_key()).unwrap();
    bob.handle_event(data("alice", &WireMessage::encrypted_chat(forged, 1))).await;
    assert!(bob.history("alice").is_empty());

    // Repeating the original key is fine.
    bob.handle_event(data("alice", &WireMessage::hello(alice.public_key()))).await;
    let genuine = alice.encrypt("hi bob", &bob.public_key()).unwrap();
    bob.handle_event(data("alice", &WireMessage::encrypted_chat(genuine, 2))).await;
    let history = bob.history("alice");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "hi bob");
}
