use crate::lson::{ChildKey, Lson};
use crate::node::NodeRecord;
use crate::pool::Pool;
use canopy_common::NodeId;

/// Visitor for walking the attached tree of a pool
///
/// The default methods walk every reachable node depth first. Override the
/// `visit_*` methods to act on nodes; call the matching `walk_*` function to
/// keep descending.
pub trait Visitor: Sized {
    fn visit_node(&mut self, pool: &Pool, record: &NodeRecord) {
        walk_node(self, pool, record);
    }

    fn visit_slot(&mut self, pool: &Pool, _parent: &NodeRecord, _key: &ChildKey, value: &Lson) {
        walk_slot(self, pool, value);
    }
}

pub fn walk_node<V: Visitor>(visitor: &mut V, pool: &Pool, record: &NodeRecord) {
    for (key, value) in record.body.entries() {
        visitor.visit_slot(pool, record, &key, value);
    }
}

pub fn walk_slot<V: Visitor>(visitor: &mut V, pool: &Pool, value: &Lson) {
    if let Lson::Node(id) = value {
        // Dangling references are skipped; only attached nodes are readable
        if let Ok(child) = pool.get_node(*id) {
            visitor.visit_node(pool, child);
        }
    }
}

/// Walk the subtree rooted at `id`, if it is attached
pub fn visit_from<V: Visitor>(visitor: &mut V, pool: &Pool, id: NodeId) {
    if let Ok(record) = pool.get_node(id) {
        visitor.visit_node(pool, record);
    }
}

/// Collects the ids of a subtree, root first
#[derive(Debug, Default)]
pub struct SubtreeIds {
    pub ids: Vec<NodeId>,
}

impl Visitor for SubtreeIds {
    fn visit_node(&mut self, pool: &Pool, record: &NodeRecord) {
        self.ids.push(record.id);
        walk_node(self, pool, record);
    }
}

pub fn subtree_ids(pool: &Pool, id: NodeId) -> Vec<NodeId> {
    let mut collector = SubtreeIds::default();
    visit_from(&mut collector, pool, id);
    collector.ids
}
