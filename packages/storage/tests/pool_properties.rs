//! Integration tests for the pool and layered cache

use canopy_common::Restartable;
use canopy_storage::{
    ActorId, ChildKey, Draft, History, LayeredCache, Lson, NodeId, NodeKind, Op, Pool, Snapshot,
    StorageContext, StorageError,
};
use serde_json::json;

#[test]
fn test_read_your_writes_before_commit() {
    let mut pool = Pool::new(ActorId(1));
    let root = pool.root();
    root.set(&mut pool, "k", "v").unwrap();

    assert!(pool.has_pending_writes());
    assert_eq!(root.get(&pool, "k").unwrap(), Some(&Lson::Json(json!("v"))));
    assert_eq!(pool.get_base_node(NodeId::root()).unwrap().body.len(), 0);

    pool.commit_layer();
    assert!(!pool.has_pending_writes());
    assert_eq!(pool.get_base_node(NodeId::root()).unwrap().body.len(), 1);
}

#[test]
fn test_idempotent_delete_through_handle() {
    let mut pool = Pool::new(ActorId(1));
    let root = pool.root();
    root.set(&mut pool, "k", 1).unwrap();
    pool.commit_layer();
    pool.take_events();

    assert!(root.delete(&mut pool, "k").unwrap());
    assert!(!root.delete(&mut pool, "k").unwrap());
    assert_eq!(pool.take_events().len(), 1);
}

#[test]
fn test_rolled_back_ids_are_not_found_and_not_reissued() {
    let mut pool = Pool::new(ActorId(1));
    let created = pool
        .root()
        .set(&mut pool, "l", Draft::list([Draft::object::<&str>([])]))
        .unwrap()
        .unwrap();
    let ids = pool.export_draft(created.id()).unwrap().ids();
    pool.rollback_layer();

    for id in &ids {
        assert_eq!(pool.get_node(*id), Err(StorageError::NotFound(*id)));
    }

    let fresh = pool.next_id(NodeKind::List);
    assert!(!ids.contains(&fresh));
}

#[test]
fn test_batch_of_three_list_ids() {
    let mut pool = Pool::new(ActorId(1));
    pool.next_id(NodeKind::Object);

    let ids = pool.ids_mut().batch(|ids| {
        (0..3).map(|_| ids.next_id(NodeKind::List)).collect::<Vec<_>>()
    });
    let n = ids[0].seq();
    let rendered: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    assert_eq!(
        rendered,
        vec![
            format!("L{}:0@1", n),
            format!("L{}:1@1", n),
            format!("L{}:2@1", n)
        ]
    );
}

#[test]
fn test_layered_keys_merge_and_restart() {
    let mut cache = LayeredCache::from_base([("a", 1), ("b", 2), ("c", 3)]);
    cache.set("d", 4);
    cache.set("b", 20);
    cache.delete("a");

    let keys = cache.keys();
    assert_eq!(keys.to_vec(), vec![&"b", &"c", &"d"]);
    // A second pass yields the same sequence
    assert_eq!(keys.restart().count(), 3);
    drop(keys);

    cache.rollback_layer();
    assert_eq!(cache.get(&"a"), Some(&1));
    assert_eq!(cache.get(&"d"), None);
}

#[test]
fn test_history_through_storage_context() {
    fn edit<S: StorageContext>(ctx: &mut S, history: &mut History) {
        history
            .apply(ctx, Op::set(NodeId::root(), "title", "hello"))
            .unwrap();
    }

    let mut pool = Pool::new(ActorId(1));
    let mut history = History::new();
    edit(&mut pool, &mut history);
    history.undo(&mut pool).unwrap();
    assert_eq!(pool.to_json(), json!({}));
}

#[test]
fn test_snapshot_replaces_pool_wholesale() {
    let mut source = Pool::new(ActorId(1));
    let root = source.root();
    let map = root
        .set(&mut source, "m", Draft::map([("x", Draft::from(1))]))
        .unwrap()
        .and_then(|s| s.as_map())
        .unwrap();

    let snapshot: Snapshot = serde_json::from_str(&source.to_snapshot().to_json_string().unwrap())
        .unwrap();
    let replica = Pool::from_snapshot(ActorId(2), &snapshot).unwrap();

    // The same handle resolves against the replacement pool
    assert_eq!(map.get(&replica, "x").unwrap(), Some(&Lson::Json(json!(1))));
    assert_eq!(replica.path_of(map.id()).unwrap(), vec![ChildKey::from("m")]);
}
