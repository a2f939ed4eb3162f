//! # Node Pool
//!
//! Owns every attached node of one document and routes child reads and writes
//! through them. All records live in a [`LayeredCache`], so the pool inherits
//! its base/overlay split: optimistic writes land in the overlay, and
//! [`commit_layer`](Pool::commit_layer) / [`rollback_layer`](Pool::rollback_layer)
//! confirm or discard them together.
//!
//! ```text
//!   root (O) ──"todos"──► L3:0@1 ──[0]──► O3:1@1 ──"done"──► false
//!                                  └─[1]──► O3:2@1 ──"done"──► true
//! ```
//!
//! A pool is context, not a singleton: callers pass it explicitly, so any
//! number of rooms can be open in one process.

use crate::errors::{StorageError, StorageResult};
use crate::layered::LayeredCache;
use crate::live::LiveObject;
use crate::lson::{ChildKey, Draft, DraftBody, DraftNode, Lson};
use crate::node::{NodeBody, NodeRecord};
use crate::visitor::subtree_ids;
use canopy_common::{ActorId, IdGenerator, NodeId, NodeKind, Restartable};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

/// Notification for one changed child slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub node: NodeId,
    pub key: ChildKey,
    /// Keys from the root down to and including `key`
    pub path: Vec<ChildKey>,
    pub old: Option<Lson>,
    pub new: Option<Lson>,
}

#[derive(Debug, Clone)]
pub struct Pool {
    nodes: LayeredCache<NodeId, NodeRecord>,
    ids: IdGenerator,
    events: Vec<ChangeEvent>,
    quiet: bool,
}

impl Pool {
    /// Create a pool holding only an empty root object
    pub fn new(actor: ActorId) -> Self {
        let root = NodeId::root();
        Self {
            nodes: LayeredCache::from_base([(
                root,
                NodeRecord::new(root, None, NodeBody::empty(NodeKind::Object)),
            )]),
            ids: IdGenerator::new(actor),
            events: Vec::new(),
            quiet: false,
        }
    }

    /// Build a pool whose base holds `records`. The records must form one
    /// tree under the root.
    pub fn from_records(
        actor: ActorId,
        records: impl IntoIterator<Item = NodeRecord>,
    ) -> StorageResult<Self> {
        let records: IndexMap<NodeId, NodeRecord> =
            records.into_iter().map(|r| (r.id, r)).collect();
        validate_tree(&records)?;

        let mut ids = IdGenerator::new(actor);
        for id in records.keys() {
            ids.observe(id);
        }

        Ok(Self {
            nodes: LayeredCache::from_base(records),
            ids,
            events: Vec::new(),
            quiet: false,
        })
    }

    pub fn actor(&self) -> ActorId {
        self.ids.actor()
    }

    pub fn next_id(&mut self, kind: NodeKind) -> NodeId {
        self.ids.next_id(kind)
    }

    pub fn ids(&self) -> &IdGenerator {
        &self.ids
    }

    pub fn ids_mut(&mut self) -> &mut IdGenerator {
        &mut self.ids
    }

    pub fn root(&self) -> LiveObject {
        LiveObject::from_id(NodeId::root())
    }

    pub fn get_node(&self, id: NodeId) -> StorageResult<&NodeRecord> {
        self.nodes.get(&id).ok_or(StorageError::NotFound(id))
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Raw slot value. `Ok(None)` for an unset key, `NotFound` only when the
    /// node itself is gone.
    pub fn get_child(&self, node: NodeId, key: &ChildKey) -> StorageResult<Option<&Lson>> {
        Ok(self.get_node(node)?.body.get(key))
    }

    /// Every attached id, base order first, then ids created optimistically
    pub fn node_ids(&self) -> impl Restartable<Item = &NodeId> + '_ {
        self.nodes.keys()
    }

    pub fn records(&self) -> impl Iterator<Item = &NodeRecord> + '_ {
        self.nodes.iter().map(|(_, record)| record)
    }

    /// Number of attached nodes, root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Write `value` under `key`, attaching any detached structure it holds.
    /// Returns the value with every created node's id filled in.
    pub fn set_child(
        &mut self,
        node: NodeId,
        key: impl Into<ChildKey>,
        value: impl Into<Draft>,
    ) -> StorageResult<Draft> {
        let key = key.into();
        let value = value.into();

        let record = self.get_node(node)?;
        record.body.check_key(&key)?;
        if let (NodeBody::List(items), ChildKey::Index(i)) = (&record.body, &key) {
            if *i >= items.len() {
                return Err(StorageError::IndexOutOfRange {
                    index: *i,
                    len: items.len(),
                });
            }
        }
        self.check_draft(node, &value)?;

        let (slot, resolved) = self.attach(node, value)?;
        let old = self.record_mut(node)?.body.set(&key, slot.clone())?;
        if let Some(Lson::Node(previous)) = &old {
            self.release(*previous);
        }

        debug!(node = %node, key = %key, "Set child");
        self.emit(node, key, old, Some(slot));
        Ok(resolved)
    }

    /// Insert into a list at `index` (which may equal the length)
    pub fn insert_child(
        &mut self,
        list: NodeId,
        index: usize,
        value: impl Into<Draft>,
    ) -> StorageResult<Draft> {
        let value = value.into();
        let len = self.list_len(list)?;
        if index > len {
            return Err(StorageError::IndexOutOfRange { index, len });
        }
        self.check_draft(list, &value)?;

        let (slot, resolved) = self.attach(list, value)?;
        if let NodeBody::List(items) = &mut self.record_mut(list)?.body {
            items.insert(index, slot.clone());
        }

        debug!(node = %list, index, "Inserted child");
        self.emit(list, ChildKey::Index(index), None, Some(slot));
        Ok(resolved)
    }

    /// Remove `key`. Returns `false` when there was nothing to remove, in
    /// which case no event is emitted.
    pub fn delete_child(&mut self, node: NodeId, key: impl Into<ChildKey>) -> StorageResult<bool> {
        let key = key.into();
        let record = self.get_node(node)?;
        record.body.check_key(&key)?;
        if record.body.get(&key).is_none() {
            return Ok(false);
        }

        let old = self.record_mut(node)?.body.remove(&key);
        if let Some(Lson::Node(previous)) = &old {
            self.release(*previous);
        }

        debug!(node = %node, key = %key, "Deleted child");
        self.emit(node, key, old, None);
        Ok(true)
    }

    /// Reorder a list item. Returns `false` when `from == to`.
    pub fn move_child(&mut self, list: NodeId, from: usize, to: usize) -> StorageResult<bool> {
        let len = self.list_len(list)?;
        for index in [from, to] {
            if index >= len {
                return Err(StorageError::IndexOutOfRange { index, len });
            }
        }
        if from == to {
            return Ok(false);
        }

        let mut moved = None;
        if let NodeBody::List(items) = &mut self.record_mut(list)?.body {
            let item = items.remove(from);
            items.insert(to, item.clone());
            moved = Some(item);
        }

        debug!(node = %list, from, to, "Moved child");
        self.emit(list, ChildKey::Index(from), moved.clone(), None);
        self.emit(list, ChildKey::Index(to), None, moved);
        Ok(true)
    }

    pub fn list_len(&self, list: NodeId) -> StorageResult<usize> {
        match &self.get_node(list)?.body {
            NodeBody::List(items) => Ok(items.len()),
            _ => Err(StorageError::KindMismatch {
                id: list,
                expected: NodeKind::List,
            }),
        }
    }

    /// Keys leading from the root to `id`
    pub fn path_of(&self, id: NodeId) -> StorageResult<Vec<ChildKey>> {
        let mut path = Vec::new();
        let mut current = self.get_node(id)?;
        while let Some(parent_id) = current.parent {
            let parent = self.get_node(parent_id)?;
            let key = parent
                .body
                .key_of(current.id)
                .ok_or(StorageError::NotFound(current.id))?;
            path.push(key);
            current = parent;
        }
        path.reverse();
        Ok(path)
    }

    /// `id` followed by each of its ancestors up to the root
    pub fn lineage(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut next = Some(id);
        while let Some(current) = next {
            match self.nodes.get(&current) {
                Some(record) => {
                    out.push(current);
                    next = record.parent;
                }
                None => break,
            }
        }
        out
    }

    /// Detached copy of an attached subtree, ids included
    pub fn export_draft(&self, id: NodeId) -> StorageResult<Draft> {
        let record = self.get_node(id)?;
        let export = |value: &Lson| -> StorageResult<Draft> {
            match value {
                Lson::Json(v) => Ok(Draft::Json(v.clone())),
                Lson::Node(child) => self.export_draft(*child),
            }
        };
        let body = match &record.body {
            NodeBody::Object(fields) => DraftBody::Object(
                fields
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), export(v)?)))
                    .collect::<StorageResult<_>>()?,
            ),
            NodeBody::Map(fields) => DraftBody::Map(
                fields
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), export(v)?)))
                    .collect::<StorageResult<_>>()?,
            ),
            NodeBody::List(items) => {
                DraftBody::List(items.iter().map(export).collect::<StorageResult<_>>()?)
            }
        };
        Ok(Draft::Live(DraftNode {
            id: Some(id),
            body,
        }))
    }

    /// Plain JSON rendering of the visible tree
    pub fn to_json(&self) -> Value {
        self.node_to_json(NodeId::root()).unwrap_or(Value::Null)
    }

    pub fn node_to_json(&self, id: NodeId) -> StorageResult<Value> {
        let record = self.get_node(id)?;
        let render = |value: &Lson| -> StorageResult<Value> {
            match value {
                Lson::Json(v) => Ok(v.clone()),
                Lson::Node(child) => self.node_to_json(*child),
            }
        };
        Ok(match &record.body {
            NodeBody::Object(fields) | NodeBody::Map(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), render(v)?)))
                    .collect::<StorageResult<_>>()?,
            ),
            NodeBody::List(items) => {
                Value::Array(items.iter().map(render).collect::<StorageResult<_>>()?)
            }
        })
    }

    pub fn has_pending_writes(&self) -> bool {
        self.nodes.has_pending_writes()
    }

    pub fn commit_layer(&mut self) {
        self.nodes.commit_layer();
    }

    /// Drop every optimistic write. Ids minted for the discarded nodes are
    /// never handed out again.
    pub fn rollback_layer(&mut self) {
        self.nodes.rollback_layer();
    }

    /// Confirmed record, ignoring optimistic writes
    pub fn get_base_node(&self, id: NodeId) -> Option<&NodeRecord> {
        self.nodes.get_base(&id)
    }

    pub fn take_events(&mut self) -> Vec<ChangeEvent> {
        std::mem::take(&mut self.events)
    }

    /// Suppress change events (used while replaying). Returns the previous
    /// setting.
    pub fn set_quiet(&mut self, quiet: bool) -> bool {
        std::mem::replace(&mut self.quiet, quiet)
    }

    /// Take the nodes of `other`, keeping this pool's id generator
    pub(crate) fn replace_nodes(&mut self, other: Pool) {
        for id in other.nodes.keys().restart() {
            self.ids.observe(id);
        }
        self.nodes = other.nodes;
        self.events.clear();
    }

    fn record_mut(&mut self, id: NodeId) -> StorageResult<&mut NodeRecord> {
        self.nodes.make_mut(&id).ok_or(StorageError::NotFound(id))
    }

    fn emit(&mut self, node: NodeId, key: ChildKey, old: Option<Lson>, new: Option<Lson>) {
        if self.quiet {
            return;
        }
        let mut path = self.path_of(node).unwrap_or_default();
        path.push(key.clone());
        self.events.push(ChangeEvent {
            node,
            key,
            path,
            old,
            new,
        });
    }

    /// Validate a draft against the current tree before anything is written
    fn check_draft(&self, parent: NodeId, draft: &Draft) -> StorageResult<()> {
        let mut seen = HashSet::new();
        self.check_draft_inner(parent, draft, &mut seen)
    }

    fn check_draft_inner(
        &self,
        parent: NodeId,
        draft: &Draft,
        seen: &mut HashSet<NodeId>,
    ) -> StorageResult<()> {
        match draft {
            Draft::Json(_) => Ok(()),
            Draft::Attach(id) => {
                if !self.is_attached(*id) {
                    Err(StorageError::NotFound(*id))
                } else if self.lineage(parent).contains(id) {
                    Err(StorageError::CyclicAttachment {
                        parent,
                        child: *id,
                    })
                } else {
                    Err(StorageError::AlreadyAttached(*id))
                }
            }
            Draft::Live(node) => {
                if let Some(id) = node.id {
                    if id.kind() != node.body.kind() {
                        return Err(StorageError::KindMismatch {
                            id,
                            expected: node.body.kind(),
                        });
                    }
                    if self.is_attached(id) || !seen.insert(id) {
                        return Err(StorageError::DuplicateId(id));
                    }
                }
                node.body
                    .children()
                    .try_for_each(|child| self.check_draft_inner(parent, child, seen))
            }
        }
    }

    /// Register every structure in `draft` beneath `parent` as one id batch
    fn attach(&mut self, parent: NodeId, draft: Draft) -> StorageResult<(Lson, Draft)> {
        self.ids.begin_batch();
        let result = self.materialize(parent, draft);
        self.ids.end_batch();
        result
    }

    fn materialize(&mut self, parent: NodeId, draft: Draft) -> StorageResult<(Lson, Draft)> {
        match draft {
            Draft::Json(v) => Ok((Lson::Json(v.clone()), Draft::Json(v))),
            Draft::Attach(id) => Err(StorageError::AlreadyAttached(id)),
            Draft::Live(DraftNode { id, body }) => {
                let id = match id {
                    Some(id) => {
                        self.ids.observe(&id);
                        id
                    }
                    None => self.ids.next_id(body.kind()),
                };

                let (node_body, resolved) = match body {
                    DraftBody::Object(fields) => {
                        let (slots, drafts) = self.materialize_fields(id, fields)?;
                        (NodeBody::Object(slots), DraftBody::Object(drafts))
                    }
                    DraftBody::Map(fields) => {
                        let (slots, drafts) = self.materialize_fields(id, fields)?;
                        (NodeBody::Map(slots), DraftBody::Map(drafts))
                    }
                    DraftBody::List(items) => {
                        let mut slots = Vec::with_capacity(items.len());
                        let mut drafts = Vec::with_capacity(items.len());
                        for item in items {
                            let (slot, draft) = self.materialize(id, item)?;
                            slots.push(slot);
                            drafts.push(draft);
                        }
                        (NodeBody::List(slots), DraftBody::List(drafts))
                    }
                };

                self.nodes.set(id, NodeRecord::new(id, Some(parent), node_body));
                Ok((
                    Lson::Node(id),
                    Draft::Live(DraftNode {
                        id: Some(id),
                        body: resolved,
                    }),
                ))
            }
        }
    }

    fn materialize_fields(
        &mut self,
        owner: NodeId,
        fields: IndexMap<String, Draft>,
    ) -> StorageResult<(IndexMap<String, Lson>, IndexMap<String, Draft>)> {
        let mut slots = IndexMap::with_capacity(fields.len());
        let mut drafts = IndexMap::with_capacity(fields.len());
        for (key, child) in fields {
            let (slot, draft) = self.materialize(owner, child)?;
            slots.insert(key.clone(), slot);
            drafts.insert(key, draft);
        }
        Ok((slots, drafts))
    }

    /// Detach `id` and its whole subtree
    fn release(&mut self, id: NodeId) {
        let doomed = subtree_ids(self, id);
        debug!(node = %id, released = doomed.len(), "Released subtree");
        for id in doomed {
            self.nodes.delete(id);
        }
    }
}

fn validate_tree(records: &IndexMap<NodeId, NodeRecord>) -> StorageResult<()> {
    let root = records
        .get(&NodeId::root())
        .ok_or_else(|| StorageError::InvalidSnapshot("missing root".into()))?;
    if root.parent.is_some() || root.kind() != NodeKind::Object {
        return Err(StorageError::InvalidSnapshot(
            "root must be a parentless object".into(),
        ));
    }

    for (id, record) in records {
        if record.id.kind() != record.kind() && !id.is_root() {
            return Err(StorageError::KindMismatch {
                id: *id,
                expected: record.kind(),
            });
        }
        if let Some(parent_id) = record.parent {
            let parent = records.get(&parent_id).ok_or_else(|| {
                StorageError::InvalidSnapshot(format!("{} has missing parent {}", id, parent_id))
            })?;
            if parent.body.key_of(*id).is_none() {
                return Err(StorageError::InvalidSnapshot(format!(
                    "{} is not referenced by its parent {}",
                    id, parent_id
                )));
            }
        } else if !id.is_root() {
            return Err(StorageError::InvalidSnapshot(format!(
                "{} has no parent",
                id
            )));
        }
        for child in record.body.child_nodes() {
            let child_record = records.get(&child).ok_or_else(|| {
                StorageError::InvalidSnapshot(format!("{} references missing {}", id, child))
            })?;
            if child_record.parent != Some(*id) {
                return Err(StorageError::InvalidSnapshot(format!(
                    "{} claims a different parent than {}",
                    child, id
                )));
            }
        }
    }

    // Every record is reached from the root through exactly one slot
    let mut seen = HashSet::with_capacity(records.len());
    let mut stack = vec![NodeId::root()];
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            return Err(StorageError::InvalidSnapshot(format!(
                "{} is referenced more than once",
                id
            )));
        }
        if let Some(record) = records.get(&id) {
            stack.extend(record.body.child_nodes());
        }
    }
    if seen.len() != records.len() {
        return Err(StorageError::InvalidSnapshot(format!(
            "{} nodes are unreachable from the root",
            records.len() - seen.len()
        )));
    }
    Ok(())
}
