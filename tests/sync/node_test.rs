// Node Tests
// Tests for anti-entropy sync, connection management, expiry and shutdown

use futures::SinkExt;
use gossipboard::storage::{MemoryStore, MessageStore};
use gossipboard::sync::{
    now_millis, Message, Node, NodeConfig, NodeError, NodeEvent, Post, StoredMessage,
};
use gossipboard::transport::{self, ConnectionId, Inbound};
use std::collections::HashSet;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn config(name: &str) -> NodeConfig {
    NodeConfig::new(name)
        .with_bind_address("127.0.0.1")
        .with_port(0)
}

async fn start_with(config: NodeConfig, store: impl MessageStore + 'static) -> Node {
    Node::start(config, Box::new(store)).await.unwrap()
}

fn posts(uuids: &[&str]) -> MemoryStore {
    MemoryStore::with_records(
        uuids
            .iter()
            .map(|uuid| StoredMessage::Post(Post::new("author", uuid, 600_000).with_uuid(uuid))),
    )
}

async fn link(a: &Node, b: &Node) -> ConnectionId {
    let id = a.connect(&b.local_addr().to_string()).await.unwrap();
    timeout(WAIT, a.until_connected_with(b.name()))
        .await
        .unwrap()
        .unwrap();
    timeout(WAIT, b.until_connected_with(a.name()))
        .await
        .unwrap()
        .unwrap();
    id
}

/// Wait for the first event matching `pred`
async fn next_event<F>(events: &mut tokio::sync::broadcast::Receiver<NodeEvent>, pred: F) -> NodeEvent
where
    F: Fn(&NodeEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event did not arrive in time")
}

// ============================================================================
// ANTI-ENTROPY SYNC
// ============================================================================

#[tokio::test]
async fn test_sync_response_holds_only_missing_records() {
    let d = start_with(config("sync-d"), posts(&["u1", "u2", "u3"])).await;
    let stream = TcpStream::connect(d.local_addr()).await.unwrap();
    let (mut reader, mut writer) = transport::split(stream, 1024 * 1024);

    let hello = Message::Handshake { name: "raw".into() }.to_json().unwrap();
    let request = Message::SyncRequest {
        has_uuids: vec!["u1".into(), "u2".into()],
    }
    .to_json()
    .unwrap();
    writer.send(hello).await.unwrap();
    writer.send(request).await.unwrap();

    let response = timeout(WAIT, async {
        loop {
            match transport::next_inbound(&mut reader).await {
                Some(Inbound::Message(Message::SyncResponse { messages })) => return messages,
                Some(_) => continue,
                None => panic!("connection closed before sync response"),
            }
        }
    })
    .await
    .unwrap();

    let uuids: Vec<&str> = response.iter().filter_map(Message::uuid).collect();
    assert_eq!(uuids, vec!["u3"]);
}

#[tokio::test]
async fn test_sync_with_fills_the_gap() {
    let c = start_with(config("sync-c"), posts(&["u1", "u2"])).await;
    let d = start_with(config("sync-d2"), posts(&["u1", "u2", "u3"])).await;
    let to_d = link(&c, &d).await;

    assert_eq!(c.connection_id_for("sync-d2").await.unwrap(), to_d);
    c.sync_with(to_d).await.unwrap();

    timeout(WAIT, c.until_received_message("u3"))
        .await
        .unwrap()
        .unwrap();
    let held: HashSet<String> = c.stored_messages().await.unwrap().into_keys().collect();
    let expected: HashSet<String> = ["u1", "u2", "u3"].iter().map(|s| s.to_string()).collect();
    assert_eq!(held, expected);
}

#[tokio::test]
async fn test_sync_carries_tombstones() {
    let c = start_with(config("tomb-c"), MemoryStore::new()).await;
    let d = start_with(config("tomb-d"), MemoryStore::new()).await;
    let post = d.post("regret", 600_000).await.unwrap();
    let delete = d.delete_post(&post.uuid).await.unwrap();
    let to_d = link(&c, &d).await;

    c.sync_with(to_d).await.unwrap();

    timeout(WAIT, c.until_received_message(&delete.uuid))
        .await
        .unwrap()
        .unwrap();

    // The tombstone arrived first, so the post can no longer land
    c.handle_message(to_d, Message::Post(post.clone())).await;
    assert!(c.get_message(&post.uuid).await.unwrap().is_none());
}

// ============================================================================
// CONNECTION MANAGEMENT
// ============================================================================

#[tokio::test]
async fn test_unknown_connection_errors() {
    let node = start_with(config("lonely"), MemoryStore::new()).await;
    let nobody = ConnectionId::generate();

    let sync = node.sync_with(nobody).await;
    let send = node
        .send_to(nobody, &Message::Handshake { name: "x".into() })
        .await;
    let disconnect = node.disconnect(nobody).await;

    assert!(matches!(sync, Err(NodeError::NotConnected(id)) if id == nobody));
    assert!(matches!(send, Err(NodeError::NotConnected(_))));
    assert!(matches!(disconnect, Err(NodeError::NotConnected(_))));
    assert!(matches!(
        node.connection_id_for("ghost").await,
        Err(NodeError::UnknownPeer(_))
    ));
    assert!(sync.unwrap_err().is_connection_error());
}

#[tokio::test]
async fn test_unicast_messages_are_not_broadcast() {
    let node = start_with(config("unicast"), MemoryStore::new()).await;

    let result = node
        .broadcast_message(Message::SyncRequest { has_uuids: vec![] })
        .await;

    assert!(matches!(result, Err(NodeError::NotBroadcastable(_))));
}

#[tokio::test]
async fn test_bad_address_is_rejected() {
    let node = start_with(config("dialer"), MemoryStore::new()).await;

    let result = node.connect("localhost:notaport").await;

    assert!(matches!(result, Err(NodeError::Transport(_))));
}

#[tokio::test]
async fn test_disconnect_closes_both_sides() {
    let a = start_with(config("dc-a"), MemoryStore::new()).await;
    let b = start_with(config("dc-b"), MemoryStore::new()).await;
    let mut b_events = b.subscribe();
    let id = link(&a, &b).await;

    a.disconnect(id).await.unwrap();

    assert!(a.peers().await.is_empty());
    let event = next_event(&mut b_events, |e| matches!(e, NodeEvent::PeerClosed { .. })).await;
    match event {
        NodeEvent::PeerClosed { name, .. } => assert_eq!(name.as_deref(), Some("dc-a")),
        _ => unreachable!(),
    }
    assert!(b.peers().await.is_empty());
}

#[tokio::test]
async fn test_initial_peers_are_dialed() {
    let hub = start_with(config("seed"), MemoryStore::new()).await;
    let joiner = start_with(
        config("joiner").with_initial_peer(&hub.local_addr().to_string()),
        MemoryStore::new(),
    )
    .await;

    timeout(WAIT, joiner.until_connected_with("seed"))
        .await
        .unwrap()
        .unwrap();
    timeout(WAIT, hub.until_connected_with("joiner"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(joiner.peer_stats().await.ready_peers, 1);
}

#[tokio::test]
async fn test_unreachable_initial_peer_does_not_fail_start() {
    // Port 1 on loopback is reliably closed
    let node = Node::start(
        config("hopeful").with_initial_peer("127.0.0.1:1"),
        Box::new(MemoryStore::new()),
    )
    .await;

    assert!(node.is_ok());
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let result = Node::start(config(" "), Box::new(MemoryStore::new())).await;

    assert!(matches!(result, Err(NodeError::InvalidConfig(_))));
}

// ============================================================================
// EXPIRY
// ============================================================================

#[tokio::test]
async fn test_expire_now_uses_node_timeout() {
    let node = start_with(
        config("expiry")
            .with_timeout_ms(1_000)
            .with_expiry_interval_ms(3_600_000),
        MemoryStore::new(),
    )
    .await;
    let mut events = node.subscribe();
    let old = now_millis() - 10_000;
    let stale = Post::new("alice", "stale", 600_000).with_times(old, old);
    let fresh = Post::new("alice", "fresh", 600_000);
    node.handle_message(ConnectionId::generate(), Message::Post(stale.clone()))
        .await;
    node.handle_message(ConnectionId::generate(), Message::Post(fresh.clone()))
        .await;

    assert_eq!(node.expire_now().await.unwrap(), 1);

    assert!(node.get_message(&stale.uuid).await.unwrap().is_none());
    assert!(node.get_message(&fresh.uuid).await.unwrap().is_some());
    next_event(&mut events, |e| matches!(e, NodeEvent::PostsExpired { count: 1 })).await;
}

#[tokio::test]
async fn test_expiry_timer_runs() {
    let node = start_with(
        config("ticker")
            .with_timeout_ms(1_000)
            .with_expiry_interval_ms(50),
        MemoryStore::new(),
    )
    .await;
    let mut events = node.subscribe();
    let old = now_millis() - 10_000;
    let stale = Post::new("alice", "stale", 600_000).with_times(old, old);

    node.handle_message(ConnectionId::generate(), Message::Post(stale.clone()))
        .await;

    next_event(&mut events, |e| matches!(e, NodeEvent::PostsExpired { .. })).await;
    assert!(node.get_message(&stale.uuid).await.unwrap().is_none());
}

// ============================================================================
// WAITING AND SHUTDOWN
// ============================================================================

#[tokio::test]
async fn test_waits_resolve_retroactively() {
    let node = start_with(config("retro"), posts(&["u1"])).await;

    timeout(WAIT, node.until_received_message("u1"))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_close_fails_pending_waits() {
    let node = start_with(config("closing"), MemoryStore::new()).await;
    let waiter = {
        let node = node.clone();
        tokio::spawn(async move { node.until_received_message("never").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    node.close().await;

    let result = timeout(WAIT, waiter).await.unwrap().unwrap();
    assert!(matches!(result, Err(NodeError::Closed)));
    assert!(node.is_closed());
}

#[tokio::test]
async fn test_closed_node_refuses_work() {
    let a = start_with(config("gone-a"), MemoryStore::new()).await;
    let b = start_with(config("gone-b"), MemoryStore::new()).await;
    let mut b_events = b.subscribe();
    link(&a, &b).await;

    a.close().await;

    assert!(matches!(a.post("hi", 1000).await, Err(NodeError::Closed)));
    assert!(matches!(
        a.connect(&b.local_addr().to_string()).await,
        Err(NodeError::Closed)
    ));
    assert!(matches!(
        a.until_connected_with("gone-b").await,
        Err(NodeError::Closed)
    ));
    next_event(&mut b_events, |e| matches!(e, NodeEvent::PeerClosed { .. })).await;
}
