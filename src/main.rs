//! board: interactive node of the peer-to-peer message board.
//!
//! Reads commands and posts from stdin; see `/usage`.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use gossipboard::console::{Command, USAGE};
use gossipboard::storage::{JsonFileStore, MemoryStore, MessageStore, SledStore};
use gossipboard::sync::{
    Node, NodeConfig, NodeEvent, DEFAULT_EXPIRY_INTERVAL_MS, DEFAULT_TIMEOUT_MS,
};
use gossipboard::transport::DEFAULT_PORT;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Sled,
    Json,
    Memory,
}

#[derive(Parser, Debug)]
#[command(name = "board")]
#[command(about = "Peer-to-peer message board node")]
struct Args {
    /// Display name (defaults to the host name)
    #[arg(long)]
    name: Option<String>,

    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Peer to connect to at startup, as host[:port]; repeatable
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Store location (defaults to ./<name><port>.sled or .json)
    #[arg(long)]
    file: Option<PathBuf>,

    /// Storage backend
    #[arg(long, value_enum, default_value_t = StoreKind::Sled)]
    store: StoreKind,

    /// TTL this node applies to every stored post, in milliseconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS)]
    tout: u64,

    /// Custom timeout attached to this node's posts, in milliseconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS)]
    sendtout: u64,

    /// Period of the expiry sweep, in milliseconds
    #[arg(long, default_value_t = DEFAULT_EXPIRY_INTERVAL_MS)]
    expiry_interval: u64,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

fn default_name() -> String {
    let host = gethostname::gethostname();
    let host = host.to_string_lossy();
    if host.trim().is_empty() {
        "anonymous".to_string()
    } else {
        host.into_owned()
    }
}

fn open_store(args: &Args, name: &str) -> Box<dyn MessageStore> {
    let path_for = |ext: &str| {
        args.file
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("./{}{}.{}", name, args.port, ext)))
    };

    match args.store {
        StoreKind::Memory => {
            info!("Keeping messages in memory only");
            Box::new(MemoryStore::new())
        }
        StoreKind::Json => {
            let path = path_for("json");
            info!("Saving data to {}", path.display());
            Box::new(JsonFileStore::open(&path))
        }
        StoreKind::Sled => {
            let path = path_for("sled");
            match SledStore::open(&path) {
                Ok(store) => {
                    info!("Saving data to {}", path.display());
                    Box::new(store)
                }
                Err(e) => {
                    warn!(
                        "Could not open {} ({}), keeping messages in memory",
                        path.display(),
                        e
                    );
                    Box::new(MemoryStore::new())
                }
            }
        }
    }
}

/// Print what the node reports to the user
fn show_event(event: NodeEvent) {
    match event {
        NodeEvent::PostReceived(post) => println!("{}: {}", post.author, post.content),
        NodeEvent::PostDeleted { post_uuid, author } => {
            println!("[{} deleted {}]", author, post_uuid)
        }
        NodeEvent::PeerReady { id, name } => println!("[{} joined as {}]", name, id),
        NodeEvent::PeerClosed { id, name } => {
            println!("[{} left ({})]", name.as_deref().unwrap_or("<unknown>"), id)
        }
        NodeEvent::PostsExpired { .. } => {}
    }
}

/// Run one console line; returns false once the session should end
async fn run_command(node: &Node, command: Command, post_timeout: &mut u64) -> Result<bool> {
    match command {
        Command::Empty => {}
        Command::Exit => return Ok(false),
        Command::Usage => println!("{}", USAGE),
        Command::Peers => {
            for peer in node.peers().await {
                println!(
                    "{}\t{}\t{}",
                    peer.id,
                    peer.status,
                    peer.name.as_deref().unwrap_or("<handshaking>")
                );
            }
        }
        Command::MyMessages => {
            let messages = node.stored_messages().await?;
            println!("{}", serde_json::to_string_pretty(&messages)?);
        }
        Command::Delete(post_uuid) => {
            node.delete_post(&post_uuid).await?;
            println!("Deleting message {}", post_uuid);
        }
        Command::Timeout => {
            let evicted = node.expire_now().await?;
            println!("Timed out {} messages", evicted);
        }
        Command::Preserve => {
            println!("Updating timeouts for {}", node.name());
            node.preserve_my_posts().await?;
        }
        Command::Connect(address) => {
            node.connect(&address).await?;
        }
        Command::Disconnect(id) => node.disconnect(id).await?,
        Command::Sync(id) => node.sync_with(id).await?,
        Command::SetTimeout(timeout) => {
            *post_timeout = timeout;
            println!("Set message timeout to {} milliseconds", timeout);
        }
        Command::Post(content) => {
            node.post(&content, *post_timeout).await?;
        }
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Respects RUST_LOG, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "info,gossipboard=debug"
    } else {
        "warn,gossipboard=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let name = args.name.clone().unwrap_or_else(default_name);
    let store = open_store(&args, &name);

    let config = NodeConfig::new(&name)
        .with_port(args.port)
        .with_initial_peers(args.peers.clone())
        .with_timeout_ms(args.tout)
        .with_expiry_interval_ms(args.expiry_interval);

    let node = Node::start(config, store)
        .await
        .context("failed to start node")?;
    let mut events = node.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut post_timeout = args.sendtout;

    info!("Board running. Type /usage for help.");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                match Command::parse(&line) {
                    Ok(command) => match run_command(&node, command, &mut post_timeout).await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => error!("{:#}", e),
                    },
                    Err(e) => println!("{}", e),
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => show_event(event),
                    Err(RecvError::Lagged(missed)) => warn!("Missed {} node events", missed),
                    Err(RecvError::Closed) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    node.close().await;
    Ok(())
}
