//! End-to-end tests for the transaction core: commit/rollback sequencing,
//! async commit, snapshot isolation, and old-version retention.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use vellum_common::{IsolationLevel, TxnId, TxnStatus};
use vellum_storage::MemoryStorage;
use vellum_transaction::{
    QueuedRedoLog, TransactionEngine, TransactionEngineConfig, VersionedCell,
};

type Engine = TransactionEngine<String>;
type Storage = MemoryStorage<String, VersionedCell<String>>;

fn setup() -> (Arc<Engine>, Storage) {
    let engine = Arc::new(Engine::new(TransactionEngineConfig::default()));
    (engine, Storage::new())
}

fn key(k: &str) -> String {
    k.to_string()
}

#[test]
fn test_commit_and_remove() {
    let (engine, storage) = setup();

    let t1 = engine.begin_transaction(false).unwrap();
    let map = t1.open_map("commit_and_remove", &storage);
    map.put(key("2"), "b".to_string()).unwrap();
    map.put(key("3"), "c".to_string()).unwrap();
    let last = map.last_key().unwrap();
    assert_eq!(last, "3");
    map.remove(&last).unwrap();
    t1.commit().unwrap();

    let t2 = engine.begin_transaction(false).unwrap();
    let map = t2.open_map("commit_and_remove", &storage);
    assert_eq!(*map.get(&key("2")).unwrap(), "b");
    assert!(map.get(&key("3")).is_none());
    assert_eq!(map.count(), 1);
}

#[test]
fn test_async_commit() {
    let log = Arc::new(QueuedRedoLog::new());
    let engine = Arc::new(Engine::with_redo_log(
        TransactionEngineConfig::default(),
        log.clone(),
    ));
    let storage = Storage::new();

    let t3 = engine.begin_transaction(false).unwrap();
    let map = t3.open_map("async_commit", &storage);
    map.put(key("4"), "b4".to_string()).unwrap();
    map.put(key("5"), "c5".to_string()).unwrap();

    let acked = Arc::new(AtomicBool::new(false));
    let flag = acked.clone();
    t3.async_commit(Box::new(move || {
        flag.store(true, Ordering::SeqCst);
    }))
    .unwrap();

    // The call returned before the flush acknowledged.
    assert!(!acked.load(Ordering::SeqCst));
    assert_eq!(t3.status(), TxnStatus::Committing);

    log.ack_all();
    assert!(acked.load(Ordering::SeqCst));
    assert_eq!(t3.status(), TxnStatus::Committed);

    let fresh = engine.begin_transaction(false).unwrap();
    let map = fresh.open_map("async_commit", &storage);
    assert_eq!(*map.get(&key("4")).unwrap(), "b4");
}

#[test]
fn test_repeatable_read_snapshot() {
    let (engine, storage) = setup();

    let init = engine.begin_transaction(false).unwrap();
    init.open_map("rr", &storage)
        .put(key("k"), "v0".to_string())
        .unwrap();
    init.commit().unwrap();

    let t_a = engine.begin(false, IsolationLevel::RepeatableRead).unwrap();
    let map_a = t_a.open_map("rr", &storage);
    assert_eq!(*map_a.get(&key("k")).unwrap(), "v0");

    let t_b = engine.begin_transaction(false).unwrap();
    t_b.open_map("rr", &storage)
        .put(key("k"), "v1".to_string())
        .unwrap();
    t_b.commit().unwrap();

    // Still the snapshot value.
    assert_eq!(*map_a.get(&key("k")).unwrap(), "v0");
    t_a.commit().unwrap();

    let t_c = engine.begin(false, IsolationLevel::RepeatableRead).unwrap();
    assert_eq!(*t_c.open_map("rr", &storage).get(&key("k")).unwrap(), "v1");
}

#[test]
fn test_version_retention_and_gc() {
    let (engine, storage) = setup();

    let init = engine.begin_transaction(false).unwrap();
    init.open_map("gc", &storage)
        .put(key("k"), "v0".to_string())
        .unwrap();
    init.commit().unwrap();
    // No snapshot reader was alive during that commit.
    assert!(engine.old_values().is_empty());

    let pin = engine.begin(false, IsolationLevel::RepeatableRead).unwrap();

    let w1 = engine.begin_transaction(false).unwrap();
    w1.open_map("gc", &storage)
        .put(key("k"), "v1".to_string())
        .unwrap();
    w1.commit().unwrap();
    // The pre-image is retained for the pinning reader.
    assert_eq!(engine.old_values().len(), 1);
    assert_eq!(*pin.open_map("gc", &storage).get(&key("k")).unwrap(), "v0");

    // Once the last snapshot reader ends, the next sweep drops everything.
    pin.commit().unwrap();
    assert!(engine.old_values().is_empty());
}

#[test]
fn test_retention_skip_when_chain_covers_readers() {
    let (engine, storage) = setup();

    let init = engine.begin_transaction(false).unwrap();
    init.open_map("skip", &storage)
        .put(key("k"), "v0".to_string())
        .unwrap();
    init.commit().unwrap();

    let reader = engine.begin(false, IsolationLevel::RepeatableRead).unwrap();

    let w1 = engine.begin_transaction(false).unwrap();
    w1.open_map("skip", &storage)
        .put(key("k"), "v1".to_string())
        .unwrap();
    w1.commit().unwrap();

    let w2 = engine.begin_transaction(false).unwrap();
    w2.open_map("skip", &storage)
        .put(key("k"), "v2".to_string())
        .unwrap();
    w2.commit().unwrap();

    // The second overwrite found a chain head newer than every live
    // snapshot reader and skipped extension; the reader's view holds.
    assert_eq!(
        *reader.open_map("skip", &storage).get(&key("k")).unwrap(),
        "v0"
    );

    // A snapshot begun now still reads the latest committed value.
    let fresh = engine.begin(false, IsolationLevel::RepeatableRead).unwrap();
    assert_eq!(
        *fresh.open_map("skip", &storage).get(&key("k")).unwrap(),
        "v2"
    );
}

#[test]
fn test_rollback_restores_and_releases() {
    let (engine, storage) = setup();

    let init = engine.begin_transaction(false).unwrap();
    init.open_map("rb", &storage)
        .put(key("k"), "keep".to_string())
        .unwrap();
    init.commit().unwrap();

    let txn = engine.begin_transaction(false).unwrap();
    let map = txn.open_map("rb", &storage);
    map.put(key("k"), "discard".to_string()).unwrap();
    map.put(key("new"), "discard-too".to_string()).unwrap();
    assert_eq!(txn.held_lock_count(), 2);

    txn.rollback().unwrap();
    assert_eq!(txn.held_lock_count(), 0);

    let check = engine.begin_transaction(false).unwrap();
    let map = check.open_map("rb", &storage);
    assert_eq!(*map.get(&key("k")).unwrap(), "keep");
    assert!(map.get(&key("new")).is_none());

    // The rolled-back writer's locks are gone; new writers get in freely.
    map.put(key("k"), "next".to_string()).unwrap();
    check.commit().unwrap();
}

#[test]
fn test_counter_spans_ids_and_commit_timestamps() {
    let (engine, storage) = setup();

    let t1 = engine.begin_transaction(false).unwrap();
    t1.open_map("ts", &storage)
        .put(key("k"), "v".to_string())
        .unwrap();
    let t1_id = t1.id();
    t1.commit().unwrap();
    let commit_ts = t1.record().commit_timestamp().unwrap();
    assert!(commit_ts > t1_id);

    let t2 = engine.begin_transaction(false).unwrap();
    assert!(t2.id() > commit_ts);

    engine.init_transaction_id(TxnId::new(9_000));
    let t3 = engine.begin_transaction(false).unwrap();
    assert_eq!(t3.id(), TxnId::new(9_001));
}
