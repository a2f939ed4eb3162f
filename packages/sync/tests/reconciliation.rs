//! End-to-end reconciliation between client stores and a server store,
//! driven by hand so every interleaving is deterministic.

use canopy_common::{ActorId, NodeId};
use canopy_storage::{Draft, Lson, Pool, StorageContext};
use canopy_sync::{ClientStore, MemoryTransport, ServerEvent, ServerStore};
use serde_json::json;

type Store = ClientStore<MemoryTransport>;

fn join(server: &mut ServerStore) -> Store {
    let (actor, event) = server.connect();
    let ServerEvent::FullResync { snapshot } = event else {
        panic!("connect must seed with a full resync");
    };
    ClientStore::from_snapshot(actor, &snapshot, MemoryTransport::new()).unwrap()
}

/// Push everything each client has sent through the server and hand the
/// replies back until nothing is in flight
fn pump(server: &mut ServerStore, clients: &mut [&mut Store]) {
    loop {
        let mut moved = false;
        for i in 0..clients.len() {
            for outbound in clients[i].transport_mut().take_sent() {
                moved = true;
                for delivery in server.receive(outbound) {
                    if let Some(target) = clients.iter_mut().find(|c| c.actor() == delivery.to) {
                        target.receive(delivery.event).unwrap();
                    }
                }
            }
        }
        if !moved {
            break;
        }
    }
}

fn base_field(store: &Store, key: &str) -> Option<Lson> {
    store
        .pool()
        .get_base_node(NodeId::root())
        .and_then(|r| r.body.get(&key.into()).cloned())
}

#[test]
fn test_acks_then_reject_leave_last_confirmed_value() {
    let mut pool = Pool::new(ActorId(1));
    pool.root().set(&mut pool, "count", 0).unwrap();
    pool.commit_layer();
    let mut store = ClientStore::new(pool, MemoryTransport::new());

    let root = store.root();
    for n in 1..=3 {
        root.set(&mut store, "count", n).unwrap();
    }
    assert_eq!(store.pending_len(), 3);
    assert_eq!(store.pool().to_json(), json!({ "count": 3 }));

    store.receive(ServerEvent::Ack { seq: 1 }).unwrap();
    store.receive(ServerEvent::Ack { seq: 2 }).unwrap();
    store
        .receive(ServerEvent::Reject {
            seq: 3,
            reason: "stale".into(),
        })
        .unwrap();

    assert!(store.is_synced());
    assert_eq!(base_field(&store, "count"), Some(Lson::Json(json!(2))));
    assert_eq!(store.pool().to_json(), json!({ "count": 2 }));
}

#[test]
fn test_reject_replays_remaining_ops_in_order() {
    let mut store = ClientStore::new(Pool::new(ActorId(1)), MemoryTransport::new());
    let root = store.root();
    root.set(&mut store, "k", 1).unwrap();
    root.set(&mut store, "k", 2).unwrap();

    store
        .receive(ServerEvent::Reject {
            seq: 1,
            reason: "nope".into(),
        })
        .unwrap();

    assert_eq!(store.pool().to_json(), json!({ "k": 2 }));
    assert_eq!(base_field(&store, "k"), None);
    assert_eq!(store.pending_len(), 1);
}

#[test]
fn test_two_clients_converge_through_server() {
    let mut server = ServerStore::new();
    let mut a = join(&mut server);
    let mut b = join(&mut server);

    let root = a.root();
    let todos = root
        .set(&mut a, "todos", Draft::list([]))
        .unwrap()
        .and_then(|s| s.as_list())
        .unwrap();
    pump(&mut server, &mut [&mut a, &mut b]);

    todos.push(&mut a, "from a").unwrap();
    todos.push(&mut b, "from b").unwrap();
    b.root().set(&mut b, "title", "shared").unwrap();
    a.root().set(&mut a, "title", "mine").unwrap();
    pump(&mut server, &mut [&mut a, &mut b]);

    assert!(a.is_synced());
    assert!(b.is_synced());
    assert_eq!(a.pool().to_json(), b.pool().to_json());
    assert_eq!(a.pool().to_json(), server.pool().to_json());
    assert_eq!(todos.len(&a).unwrap(), 2);
}

#[test]
fn test_remote_delete_drops_pending_child_write() {
    let mut server = ServerStore::new();
    let mut a = join(&mut server);
    let mut b = join(&mut server);

    let card = a
        .root()
        .set(&mut a, "card", Draft::object::<&str>([]))
        .unwrap()
        .and_then(|s| s.as_object())
        .unwrap();
    pump(&mut server, &mut [&mut a, &mut b]);

    // b edits the card while a removes it; the server sees a first
    a.root().delete(&mut a, "card").unwrap();
    card.set(&mut b, "label", "urgent").unwrap();
    pump(&mut server, &mut [&mut a, &mut b]);

    assert_eq!(a.pool().to_json(), json!({}));
    assert_eq!(b.pool().to_json(), json!({}));
    assert!(!card.is_attached(&b));
}

#[test]
fn test_undo_converges_for_everyone() {
    let mut server = ServerStore::new();
    let mut a = join(&mut server);
    let mut b = join(&mut server);

    a.root().set(&mut a, "k", 1).unwrap();
    pump(&mut server, &mut [&mut a, &mut b]);
    assert_eq!(b.pool().to_json(), json!({ "k": 1 }));

    assert!(a.undo().unwrap());
    pump(&mut server, &mut [&mut a, &mut b]);
    assert_eq!(a.pool().to_json(), json!({}));
    assert_eq!(b.pool().to_json(), json!({}));
}

#[test]
fn test_full_resync_replaces_state_and_clears_queue() {
    let mut server = ServerStore::new();
    let mut a = join(&mut server);
    a.transport_mut().set_offline(true);
    a.root().set(&mut a, "draft", "unsent").unwrap();
    a.take_events();

    let mut b = join(&mut server);
    b.root().set(&mut b, "title", "fresh").unwrap();
    pump(&mut server, &mut [&mut b]);

    a.receive(server.resync()).unwrap();
    assert!(a.is_synced());
    assert!(!a.history().can_undo());
    assert_eq!(a.pool().to_json(), json!({ "title": "fresh" }));

    let events = a.take_events();
    assert_eq!(events.len(), 2);
}
