use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use pc_crypto::CryptoEngine;
use pc_net::MemoryNetwork;
use pc_node::config::{default_data_dir, NodeConfig};
use pc_node::{identity, ChatNode};
use pc_store::ChatSessionStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEMO_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "peerchat", author, version, about = "PeerChat encrypted chat node", long_about = None)]
struct Cli {
    /// Data directory (overrides $PEERCHAT_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show (creating if needed) this node's identity
    Identity,
    /// Print a fresh random group key
    GroupKey,
    /// List stored chat sessions
    Sessions,
    /// Print the messages of one session
    History {
        session_id: String,
    },
    /// Run two in-process nodes and exchange encrypted messages
    Demo {
        #[arg(long, default_value = "hello from alice")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let data = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    let config = NodeConfig::load(&data)
        .with_context(|| format!("loading config from {}", data.display()))?;
    init_tracing(&config);

    match cli.command {
        Commands::Identity => identity_command(&data, &config),
        Commands::GroupKey => group_key_command(),
        Commands::Sessions => sessions_command(&data, &config).await,
        Commands::History { session_id } => history_command(&data, &config, &session_id).await,
        Commands::Demo { message } => demo_command(&data, &message).await,
    }
}

fn init_tracing(config: &NodeConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn identity_command(data: &Path, config: &NodeConfig) -> Result<()> {
    let engine = identity::load_or_create(&config.identity_path(data))?;
    println!("Peer ID:     {}", config.peer_id);
    println!("Public key:  {}", engine.public_key());
    println!("Fingerprint: {}", engine.fingerprint());
    Ok(())
}

fn group_key_command() -> Result<()> {
    let engine = CryptoEngine::new()?;
    println!("{}", engine.generate_group_key()?);
    Ok(())
}

async fn sessions_command(data: &Path, config: &NodeConfig) -> Result<()> {
    let store = ChatSessionStore::open(config.sessions_path(data)).await?;
    let mut sessions = store.list_sessions();
    sessions.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
    if sessions.is_empty() {
        println!("No sessions in {}", store.dir().display());
    }
    for session in sessions {
        let participants: Vec<&str> = session.participants.iter().map(String::as_str).collect();
        println!(
            "{}  [{}]  {} messages",
            session.id,
            participants.join(", "),
            session.messages.len()
        );
    }
    Ok(())
}

async fn history_command(data: &Path, config: &NodeConfig, session_id: &str) -> Result<()> {
    let store = ChatSessionStore::open(config.sessions_path(data)).await?;
    let session = store
        .get_session(session_id)
        .ok_or_else(|| anyhow!("no session {session_id}"))?;
    for message in session.messages {
        let marker = if message.encrypted { "enc" } else { "raw" };
        println!("{} [{marker}] {}: {}", message.timestamp, message.sender_id, message.content);
    }
    Ok(())
}

async fn demo_command(data: &Path, text: &str) -> Result<()> {
    let network = MemoryNetwork::new();
    let alice = spawn_demo_node(&network, "alice", &data.join("demo").join("alice")).await?;
    let bob = spawn_demo_node(&network, "bob", &data.join("demo").join("bob")).await?;
    let mut bob_inbox = bob.subscribe_messages();
    let mut alice_inbox = alice.subscribe_messages();

    if !alice.connect("bob").await {
        return Err(anyhow!("alice could not connect to bob"));
    }
    if !alice.wait_for_peer_key("bob", DEMO_TIMEOUT).await
        || !bob.wait_for_peer_key("alice", DEMO_TIMEOUT).await
    {
        return Err(anyhow!("key exchange timed out"));
    }
    info!(alice = %alice.crypto().fingerprint(), bob = %bob.crypto().fingerprint(), "keys exchanged");

    alice.send_message("bob", text).await?;
    let received = tokio::time::timeout(DEMO_TIMEOUT, bob_inbox.recv()).await??;
    println!("bob received:   {}", received.content);

    bob.send_message("alice", &format!("got it: {}", received.content)).await?;
    let reply = tokio::time::timeout(DEMO_TIMEOUT, alice_inbox.recv()).await??;
    println!("alice received: {}", reply.content);

    println!("alice's history with bob:");
    for message in alice.history("bob") {
        println!("  {} -> {}: {}", message.sender_id, message.recipient_id, message.content);
    }
    Ok(())
}

async fn spawn_demo_node(network: &MemoryNetwork, peer_id: &str, dir: &Path) -> Result<Arc<ChatNode>> {
    let store = Arc::new(ChatSessionStore::open(dir).await?);
    let (transport, events) = network.join(peer_id);
    let node = Arc::new(ChatNode::new(peer_id, CryptoEngine::new()?, transport, store));
    tokio::spawn(node.clone().run(events));
    Ok(node)
}
