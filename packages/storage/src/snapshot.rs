//! Snapshot import and export.
//!
//! A snapshot is the flat list of node records of a pool, root first. Nested
//! structures appear in their parent's body as `{"node": "<id>"}` markers:
//!
//! ```json
//! { "nodes": [
//!     { "id": "root", "body": { "object": { "todos": { "node": "L1:0@1" } } } },
//!     { "id": "L1:0@1", "parent": "root", "body": { "list": [ { "json": "milk" } ] } }
//! ] }
//! ```

use crate::errors::{StorageError, StorageResult};
use crate::node::NodeRecord;
use crate::pool::Pool;
use canopy_common::ActorId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub nodes: Vec<NodeRecord>,
}

impl Snapshot {
    pub fn to_json_string(&self) -> StorageResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| StorageError::InvalidSnapshot(e.to_string()))
    }

    pub fn from_json_str(source: &str) -> StorageResult<Self> {
        serde_json::from_str(source).map_err(|e| StorageError::InvalidSnapshot(e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Pool {
    /// Export the visible tree, root first, remaining nodes in id order
    pub fn to_snapshot(&self) -> Snapshot {
        let mut nodes: Vec<NodeRecord> = self.records().cloned().collect();
        nodes.sort_by(|a, b| b.id.is_root().cmp(&a.id.is_root()).then(a.id.cmp(&b.id)));
        Snapshot { nodes }
    }

    /// Fresh pool whose base is the snapshot
    pub fn from_snapshot(actor: ActorId, snapshot: &Snapshot) -> StorageResult<Self> {
        Pool::from_records(actor, snapshot.nodes.iter().cloned())
    }

    /// Replace base and overlay with the snapshot in place. The id generator
    /// carries over, so ids minted before the reload are never reissued.
    pub fn load_snapshot(&mut self, snapshot: &Snapshot) -> StorageResult<()> {
        let fresh = Pool::from_snapshot(self.actor(), snapshot)?;
        self.replace_nodes(fresh);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lson::Draft;
    use canopy_common::{NodeId, NodeKind};
    use serde_json::json;

    #[test]
    fn test_snapshot_round_trip_keeps_ids() {
        let mut pool = Pool::new(ActorId(1));
        let resolved = pool
            .set_child(
                NodeId::root(),
                "todos",
                Draft::list([Draft::object([("done", Draft::from(false))])]),
            )
            .unwrap();

        let snapshot = pool.to_snapshot();
        assert!(snapshot.nodes[0].id.is_root());
        assert_eq!(snapshot.len(), 3);

        let text = snapshot.to_json_string().unwrap();
        let restored = Pool::from_snapshot(ActorId(2), &Snapshot::from_json_str(&text).unwrap()).unwrap();
        assert_eq!(restored.to_json(), pool.to_json());
        assert!(!restored.has_pending_writes());
        for id in resolved.ids() {
            assert!(restored.is_attached(id));
        }
    }

    #[test]
    fn test_snapshot_wire_shape() {
        let mut pool = Pool::new(ActorId(1));
        pool.set_child(NodeId::root(), "n", 1).unwrap();
        let value = serde_json::to_value(pool.to_snapshot()).unwrap();
        assert_eq!(
            value,
            json!({ "nodes": [ { "id": "root", "body": { "object": { "n": { "json": 1 } } } } ] })
        );
    }

    #[test]
    fn test_restored_pool_does_not_reissue_own_ids() {
        let mut pool = Pool::new(ActorId(4));
        let id = pool
            .set_child(NodeId::root(), "m", Draft::map::<&str>([]))
            .unwrap()
            .node_id()
            .unwrap();

        let mut restored = Pool::from_snapshot(ActorId(4), &pool.to_snapshot()).unwrap();
        let fresh = restored.next_id(NodeKind::Map);
        assert!(fresh > id);
    }

    #[test]
    fn test_load_snapshot_keeps_generator() {
        let mut pool = Pool::new(ActorId(1));
        let discarded = pool
            .set_child(NodeId::root(), "tmp", Draft::list([]))
            .unwrap()
            .node_id()
            .unwrap();

        let mut server = Pool::new(ActorId(0));
        server.set_child(NodeId::root(), "count", 7).unwrap();
        pool.load_snapshot(&server.to_snapshot()).unwrap();

        assert!(!pool.has_pending_writes());
        assert_eq!(pool.to_json(), json!({ "count": 7 }));
        assert!(pool.next_id(NodeKind::List) > discarded);
    }

    #[test]
    fn test_garbage_is_invalid_snapshot() {
        assert!(matches!(
            Snapshot::from_json_str("{ \"nodes\": 3 }"),
            Err(StorageError::InvalidSnapshot(_))
        ));
        assert!(matches!(
            Pool::from_snapshot(ActorId(1), &Snapshot::default()),
            Err(StorageError::InvalidSnapshot(_))
        ));
    }
}
