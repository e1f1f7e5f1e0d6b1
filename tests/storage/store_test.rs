// Storage Tests
// Tests for tombstones, expiry and refresh across every store backend

use gossipboard::storage::{JsonFileStore, MemoryStore, MessageStore, SledStore};
use gossipboard::sync::{Delete, Post, StoredMessage};
use std::fs;
use tempfile::TempDir;

/// One of each backend; the TempDir keeps the on-disk ones alive
fn all_stores() -> (TempDir, Vec<(&'static str, Box<dyn MessageStore>)>) {
    let dir = TempDir::new().unwrap();
    let stores: Vec<(&'static str, Box<dyn MessageStore>)> = vec![
        ("memory", Box::new(MemoryStore::new())),
        ("sled", Box::new(SledStore::open(dir.path().join("db")).unwrap())),
        ("json", Box::new(JsonFileStore::open(dir.path().join("db.json")))),
    ];
    (dir, stores)
}

fn post(author: &str, uuid: &str) -> StoredMessage {
    StoredMessage::Post(Post::new(author, "content", 60_000).with_uuid(uuid))
}

fn tombstone(author: &str, post_uuid: &str, uuid: &str) -> StoredMessage {
    StoredMessage::Delete(Delete::new(author, post_uuid).with_uuid(uuid))
}

// ============================================================================
// TOMBSTONES
// ============================================================================

#[test]
fn test_tombstone_blocks_later_post() {
    let (_dir, stores) = all_stores();

    for (kind, mut store) in stores {
        assert!(store.save_if_not_deleted(tombstone("alice", "u1", "d1")).unwrap());
        assert!(!store.save_if_not_deleted(post("alice", "u1")).unwrap(), "{}", kind);

        let records = store.list().unwrap();
        assert_eq!(records.len(), 1, "{}", kind);
        assert!(records.contains_key("d1"), "{}", kind);
    }
}

#[test]
fn test_foreign_tombstone_does_not_suppress() {
    let (_dir, stores) = all_stores();

    for (kind, mut store) in stores {
        store.save_if_not_deleted(tombstone("mallory", "u1", "d1")).unwrap();

        assert!(store.save_if_not_deleted(post("alice", "u1")).unwrap(), "{}", kind);
        assert!(store.contains("u1").unwrap(), "{}", kind);
        assert!(!store.has_deleted(&post("alice", "u1")).unwrap(), "{}", kind);
    }
}

#[test]
fn test_delete_removes_only_the_record() {
    let (_dir, stores) = all_stores();

    for (kind, mut store) in stores {
        store.save_if_not_deleted(post("alice", "u1")).unwrap();

        let removed = store.delete("u1").unwrap();

        assert_eq!(removed.map(|r| r.uuid().to_string()), Some("u1".to_string()), "{}", kind);
        assert!(store.delete("u1").unwrap().is_none(), "{}", kind);
        // No tombstone was written, so the post may come back
        assert!(store.save_if_not_deleted(post("alice", "u1")).unwrap(), "{}", kind);
    }
}

// ============================================================================
// EXPIRY
// ============================================================================

#[test]
fn test_custom_timeout_beats_node_timeout() {
    let (_dir, stores) = all_stores();
    let t0 = 1_000_000;

    for (kind, mut store) in stores {
        let short = Post::new("alice", "short", 1000).with_times(t0, t0).with_uuid("u1");
        store.save_if_not_deleted(StoredMessage::Post(short)).unwrap();

        assert_eq!(store.delete_posts_older_than(t0 + 500, 100_000).unwrap(), 0, "{}", kind);
        assert!(store.contains("u1").unwrap(), "{}", kind);

        assert_eq!(store.delete_posts_older_than(t0 + 1500, 100_000).unwrap(), 1, "{}", kind);
        assert!(!store.contains("u1").unwrap(), "{}", kind);
    }
}

#[test]
fn test_node_timeout_beats_custom_timeout() {
    let (_dir, stores) = all_stores();
    let t0 = 1_000_000;

    for (kind, mut store) in stores {
        let long = Post::new("alice", "long", 100_000).with_times(t0, t0).with_uuid("u1");
        store.save_if_not_deleted(StoredMessage::Post(long)).unwrap();

        assert_eq!(store.delete_posts_older_than(t0 + 1500, 1000).unwrap(), 1, "{}", kind);
    }
}

#[test]
fn test_tombstones_never_expire() {
    let (_dir, stores) = all_stores();

    for (kind, mut store) in stores {
        store.save_if_not_deleted(tombstone("alice", "u1", "d1")).unwrap();

        assert_eq!(store.delete_posts_older_than(u64::MAX, 0).unwrap(), 0, "{}", kind);
        assert!(store.contains("d1").unwrap(), "{}", kind);
    }
}

// ============================================================================
// REFRESH
// ============================================================================

#[test]
fn test_refresh_is_author_scoped_and_monotonic() {
    let (_dir, stores) = all_stores();

    for (kind, mut store) in stores {
        let mine = Post::new("alice", "a", 1000).with_times(100, 100).with_uuid("u1");
        let theirs = Post::new("bob", "b", 1000).with_times(100, 100).with_uuid("u2");
        store.save_if_not_deleted(StoredMessage::Post(mine)).unwrap();
        store.save_if_not_deleted(StoredMessage::Post(theirs)).unwrap();

        assert_eq!(store.refresh_author("alice", 500).unwrap(), 1, "{}", kind);
        assert_eq!(store.refresh_author("alice", 300).unwrap(), 0, "{}", kind);

        let refreshed = store.get("u1").unwrap().unwrap();
        assert_eq!(refreshed.as_post().unwrap().refresh_time, 500, "{}", kind);
        let untouched = store.get("u2").unwrap().unwrap();
        assert_eq!(untouched.as_post().unwrap().refresh_time, 100, "{}", kind);
    }
}

#[test]
fn test_refresh_extends_lifetime() {
    let (_dir, stores) = all_stores();

    for (kind, mut store) in stores {
        let post = Post::new("alice", "a", 1000).with_times(0, 0).with_uuid("u1");
        store.save_if_not_deleted(StoredMessage::Post(post)).unwrap();

        store.refresh_author("alice", 1000).unwrap();

        assert_eq!(store.delete_posts_older_than(1500, 100_000).unwrap(), 0, "{}", kind);
        assert_eq!(store.delete_posts_older_than(2500, 100_000).unwrap(), 1, "{}", kind);
    }
}

// ============================================================================
// STATS
// ============================================================================

#[test]
fn test_stats_count_by_kind() {
    let (_dir, stores) = all_stores();

    for (kind, mut store) in stores {
        store.save_if_not_deleted(post("alice", "u1")).unwrap();
        store.save_if_not_deleted(post("alice", "u2")).unwrap();
        store.save_if_not_deleted(tombstone("alice", "u9", "d1")).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.post_count, 2, "{}", kind);
        assert_eq!(stats.delete_count, 1, "{}", kind);
    }
}

// ============================================================================
// PERSISTENCE
// ============================================================================

#[test]
fn test_sled_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");

    {
        let mut store = SledStore::open(&path).unwrap();
        store.save_if_not_deleted(post("alice", "u1")).unwrap();
        store.save_if_not_deleted(tombstone("alice", "u0", "d1")).unwrap();
    }

    let store = SledStore::open(&path).unwrap();
    assert_eq!(store.list().unwrap().len(), 2);
    assert!(store.has_deleted(&post("alice", "u0")).unwrap());
}

#[test]
fn test_json_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("board.json");

    {
        let mut store = JsonFileStore::open(&path);
        store.save_if_not_deleted(post("alice", "u1")).unwrap();
        store.refresh_author("alice", u64::MAX).unwrap();
    }

    let store = JsonFileStore::open(&path);
    let record = store.get("u1").unwrap().unwrap();
    assert_eq!(record.as_post().unwrap().refresh_time, u64::MAX);
}

#[test]
fn test_json_store_corrupt_file_starts_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("board.json");
    fs::write(&path, "{ this is not json").unwrap();

    let mut store = JsonFileStore::open(&path);

    assert!(store.list().unwrap().is_empty());
    store.save_if_not_deleted(post("alice", "u1")).unwrap();
    assert_eq!(JsonFileStore::open(&path).list().unwrap().len(), 1);
}

#[test]
fn test_json_store_missing_file_starts_empty() {
    let dir = TempDir::new().unwrap();

    let store = JsonFileStore::open(dir.path().join("absent.json"));

    assert!(store.list().unwrap().is_empty());
}
