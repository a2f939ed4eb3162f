//! # Live structures
//!
//! Handles over nodes held by a pool. A handle is just an id: every read and
//! write goes through a [`StorageContext`], so a handle stays valid across a
//! wholesale pool replacement and simply re-resolves against the new pool.
//!
//! ```text
//!   LiveList(L4:0@2) ──get(0)──► StorageContext::pool() ──► NodeRecord
//!                    ──push(v)──► StorageContext::apply_op(Insert)
//! ```

use crate::context::StorageContext;
use crate::errors::{StorageError, StorageResult};
use crate::lson::{ChildKey, Draft, Lson};
use crate::node::NodeBody;
use crate::ops::{Applied, Op};
use crate::pool::Pool;
use canopy_common::{NodeId, NodeKind};
use serde_json::Value;

/// Record with string fields fixed by the application schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LiveObject {
    id: NodeId,
}

/// Ordered sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LiveList {
    id: NodeId,
}

/// Keyed collection with dynamic keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LiveMap {
    id: NodeId,
}

/// Any live handle, dispatched on node kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LiveStructure {
    Object(LiveObject),
    List(LiveList),
    Map(LiveMap),
}

impl LiveStructure {
    /// Handle for an attached node
    pub fn resolve(pool: &Pool, id: NodeId) -> StorageResult<Self> {
        let record = pool.get_node(id)?;
        Ok(match record.kind() {
            NodeKind::Object => LiveStructure::Object(LiveObject { id }),
            NodeKind::List => LiveStructure::List(LiveList { id }),
            NodeKind::Map => LiveStructure::Map(LiveMap { id }),
        })
    }

    pub fn id(&self) -> NodeId {
        match self {
            LiveStructure::Object(o) => o.id,
            LiveStructure::List(l) => l.id,
            LiveStructure::Map(m) => m.id,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            LiveStructure::Object(_) => NodeKind::Object,
            LiveStructure::List(_) => NodeKind::List,
            LiveStructure::Map(_) => NodeKind::Map,
        }
    }

    pub fn as_object(&self) -> Option<LiveObject> {
        match self {
            LiveStructure::Object(o) => Some(*o),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<LiveList> {
        match self {
            LiveStructure::List(l) => Some(*l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<LiveMap> {
        match self {
            LiveStructure::Map(m) => Some(*m),
            _ => None,
        }
    }

    pub fn to_json<S: StorageContext + ?Sized>(&self, ctx: &S) -> StorageResult<Value> {
        ctx.pool().node_to_json(self.id())
    }
}

impl From<LiveStructure> for Draft {
    fn from(live: LiveStructure) -> Self {
        Draft::Attach(live.id())
    }
}

macro_rules! handle_common {
    ($handle:ident, $kind:expr, $variant:ident) => {
        impl $handle {
            /// Handle for an attached node of this kind
            pub fn resolve(pool: &Pool, id: NodeId) -> StorageResult<Self> {
                let record = pool.get_node(id)?;
                if record.kind() != $kind {
                    return Err(StorageError::KindMismatch { id, expected: $kind });
                }
                Ok(Self { id })
            }

            pub fn id(&self) -> NodeId {
                self.id
            }

            /// Whether the node is still attached
            pub fn is_attached<S: StorageContext + ?Sized>(&self, ctx: &S) -> bool {
                ctx.pool().is_attached(self.id)
            }

            pub fn len<S: StorageContext + ?Sized>(&self, ctx: &S) -> StorageResult<usize> {
                Ok(ctx.pool().get_node(self.id)?.body.len())
            }

            pub fn is_empty<S: StorageContext + ?Sized>(&self, ctx: &S) -> StorageResult<bool> {
                Ok(self.len(ctx)? == 0)
            }

            pub fn to_json<S: StorageContext + ?Sized>(&self, ctx: &S) -> StorageResult<Value> {
                ctx.pool().node_to_json(self.id)
            }
        }

        impl From<$handle> for Draft {
            fn from(handle: $handle) -> Self {
                Draft::Attach(handle.id)
            }
        }

        impl From<$handle> for LiveStructure {
            fn from(handle: $handle) -> Self {
                LiveStructure::$variant(handle)
            }
        }
    };
}

handle_common!(LiveObject, NodeKind::Object, Object);
handle_common!(LiveList, NodeKind::List, List);
handle_common!(LiveMap, NodeKind::Map, Map);

impl LiveObject {
    pub(crate) fn from_id(id: NodeId) -> Self {
        Self { id }
    }

    pub fn get<'a, S: StorageContext + ?Sized>(
        &self,
        ctx: &'a S,
        key: &str,
    ) -> StorageResult<Option<&'a Lson>> {
        ctx.pool().get_child(self.id, &ChildKey::from(key))
    }

    /// Nested structure under `key`, if the slot holds one
    pub fn child<S: StorageContext + ?Sized>(
        &self,
        ctx: &S,
        key: &str,
    ) -> StorageResult<Option<LiveStructure>> {
        nested(ctx.pool(), self.get(ctx, key)?)
    }

    /// Write a field. Returns the handle of the structure created, if the
    /// value was one.
    pub fn set<S: StorageContext + ?Sized>(
        &self,
        ctx: &mut S,
        key: &str,
        value: impl Into<Draft>,
    ) -> StorageResult<Option<LiveStructure>> {
        created(ctx, Op::set(self.id, key, value))
    }

    pub fn delete<S: StorageContext + ?Sized>(&self, ctx: &mut S, key: &str) -> StorageResult<bool> {
        Ok(ctx.apply_op(Op::delete(self.id, key))?.changed)
    }

    pub fn keys<S: StorageContext + ?Sized>(&self, ctx: &S) -> StorageResult<Vec<String>> {
        field_keys(ctx.pool(), self.id)
    }
}

impl LiveMap {
    pub fn get<'a, S: StorageContext + ?Sized>(
        &self,
        ctx: &'a S,
        key: &str,
    ) -> StorageResult<Option<&'a Lson>> {
        ctx.pool().get_child(self.id, &ChildKey::from(key))
    }

    pub fn has<S: StorageContext + ?Sized>(&self, ctx: &S, key: &str) -> StorageResult<bool> {
        Ok(self.get(ctx, key)?.is_some())
    }

    pub fn child<S: StorageContext + ?Sized>(
        &self,
        ctx: &S,
        key: &str,
    ) -> StorageResult<Option<LiveStructure>> {
        nested(ctx.pool(), self.get(ctx, key)?)
    }

    pub fn set<S: StorageContext + ?Sized>(
        &self,
        ctx: &mut S,
        key: &str,
        value: impl Into<Draft>,
    ) -> StorageResult<Option<LiveStructure>> {
        created(ctx, Op::set(self.id, key, value))
    }

    pub fn delete<S: StorageContext + ?Sized>(&self, ctx: &mut S, key: &str) -> StorageResult<bool> {
        Ok(ctx.apply_op(Op::delete(self.id, key))?.changed)
    }

    pub fn keys<S: StorageContext + ?Sized>(&self, ctx: &S) -> StorageResult<Vec<String>> {
        field_keys(ctx.pool(), self.id)
    }
}

impl LiveList {
    pub fn get<'a, S: StorageContext + ?Sized>(
        &self,
        ctx: &'a S,
        index: usize,
    ) -> StorageResult<Option<&'a Lson>> {
        ctx.pool().get_child(self.id, &ChildKey::Index(index))
    }

    pub fn child<S: StorageContext + ?Sized>(
        &self,
        ctx: &S,
        index: usize,
    ) -> StorageResult<Option<LiveStructure>> {
        nested(ctx.pool(), self.get(ctx, index)?)
    }

    /// Every item in order
    pub fn items<'a, S: StorageContext + ?Sized>(&self, ctx: &'a S) -> StorageResult<&'a [Lson]> {
        match &ctx.pool().get_node(self.id)?.body {
            NodeBody::List(items) => Ok(items),
            _ => Err(StorageError::KindMismatch {
                id: self.id,
                expected: NodeKind::List,
            }),
        }
    }

    pub fn push<S: StorageContext + ?Sized>(
        &self,
        ctx: &mut S,
        value: impl Into<Draft>,
    ) -> StorageResult<Option<LiveStructure>> {
        let len = self.len(ctx)?;
        self.insert(ctx, len, value)
    }

    pub fn insert<S: StorageContext + ?Sized>(
        &self,
        ctx: &mut S,
        index: usize,
        value: impl Into<Draft>,
    ) -> StorageResult<Option<LiveStructure>> {
        created(ctx, Op::insert(self.id, index, value))
    }

    /// Replace the item at an existing index
    pub fn set<S: StorageContext + ?Sized>(
        &self,
        ctx: &mut S,
        index: usize,
        value: impl Into<Draft>,
    ) -> StorageResult<Option<LiveStructure>> {
        created(ctx, Op::set(self.id, index, value))
    }

    pub fn delete<S: StorageContext + ?Sized>(&self, ctx: &mut S, index: usize) -> StorageResult<bool> {
        Ok(ctx.apply_op(Op::delete(self.id, index))?.changed)
    }

    pub fn move_item<S: StorageContext + ?Sized>(
        &self,
        ctx: &mut S,
        from: usize,
        to: usize,
    ) -> StorageResult<bool> {
        Ok(ctx.apply_op(Op::moved(self.id, from, to))?.changed)
    }
}

fn nested(pool: &Pool, slot: Option<&Lson>) -> StorageResult<Option<LiveStructure>> {
    match slot {
        Some(Lson::Node(id)) => LiveStructure::resolve(pool, *id).map(Some),
        _ => Ok(None),
    }
}

/// Apply `op` and hand back the structure it put into the slot
fn created<S: StorageContext + ?Sized>(ctx: &mut S, op: Op) -> StorageResult<Option<LiveStructure>> {
    let Applied { op, .. } = ctx.apply_op(op)?;
    let top = match &op {
        Op::Set { value, .. } | Op::Insert { value, .. } => value.node_id(),
        _ => None,
    };
    match top {
        Some(id) => LiveStructure::resolve(ctx.pool(), id).map(Some),
        None => Ok(None),
    }
}

fn field_keys(pool: &Pool, id: NodeId) -> StorageResult<Vec<String>> {
    match &pool.get_node(id)?.body {
        NodeBody::Object(fields) | NodeBody::Map(fields) => Ok(fields.keys().cloned().collect()),
        NodeBody::List(_) => Err(StorageError::KindMismatch {
            id,
            expected: NodeKind::Object,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_common::ActorId;
    use serde_json::json;

    #[test]
    fn test_handles_read_through_pool() {
        let mut pool = Pool::new(ActorId(1));
        let root = pool.root();

        let todos = root
            .set(&mut pool, "todos", Draft::list([]))
            .unwrap()
            .and_then(|s| s.as_list())
            .unwrap();
        let first = todos
            .push(&mut pool, Draft::object([("title", Draft::from("milk"))]))
            .unwrap()
            .and_then(|s| s.as_object())
            .unwrap();
        todos.push(&mut pool, "plain").unwrap();

        assert_eq!(todos.len(&pool).unwrap(), 2);
        assert_eq!(first.keys(&pool).unwrap(), vec!["title".to_string()]);
        assert_eq!(
            root.to_json(&pool).unwrap(),
            json!({ "todos": [{ "title": "milk" }, "plain"] })
        );
        assert_eq!(
            todos.child(&pool, 0).unwrap(),
            Some(LiveStructure::Object(first))
        );
        assert_eq!(todos.child(&pool, 1).unwrap(), None);
    }

    #[test]
    fn test_map_has_and_delete() {
        let mut pool = Pool::new(ActorId(1));
        let map = pool
            .root()
            .set(&mut pool, "settings", Draft::map::<&str>([]))
            .unwrap()
            .and_then(|s| s.as_map())
            .unwrap();

        map.set(&mut pool, "theme", "dark").unwrap();
        assert!(map.has(&pool, "theme").unwrap());
        assert!(map.delete(&mut pool, "theme").unwrap());
        assert!(!map.delete(&mut pool, "theme").unwrap());
        assert!(map.is_empty(&pool).unwrap());
    }

    #[test]
    fn test_handle_outlives_node() {
        let mut pool = Pool::new(ActorId(1));
        let root = pool.root();
        let child = root
            .set(&mut pool, "child", Draft::object::<&str>([]))
            .unwrap()
            .unwrap();
        root.delete(&mut pool, "child").unwrap();

        assert!(child.to_json(&pool).unwrap_err().is_not_found());
        let object = child.as_object().unwrap();
        assert!(!object.is_attached(&pool));
    }

    #[test]
    fn test_resolve_checks_kind() {
        let pool = Pool::new(ActorId(1));
        assert_eq!(
            LiveList::resolve(&pool, NodeId::root()),
            Err(StorageError::KindMismatch {
                id: NodeId::root(),
                expected: NodeKind::List
            })
        );
        assert!(LiveObject::resolve(&pool, NodeId::root()).is_ok());
    }

    #[test]
    fn test_attaching_handle_to_itself_fails() {
        let mut pool = Pool::new(ActorId(1));
        let root = pool.root();
        let list = root
            .set(&mut pool, "l", Draft::list([]))
            .unwrap()
            .and_then(|s| s.as_list())
            .unwrap();
        assert_eq!(
            list.push(&mut pool, list),
            Err(StorageError::CyclicAttachment {
                parent: list.id(),
                child: list.id()
            })
        );
    }

    #[test]
    fn test_list_move_and_items() {
        let mut pool = Pool::new(ActorId(1));
        let list = pool
            .root()
            .set(&mut pool, "l", Draft::list(["a".into(), "b".into(), "c".into()]))
            .unwrap()
            .and_then(|s| s.as_list())
            .unwrap();

        assert!(list.move_item(&mut pool, 2, 0).unwrap());
        let items: Vec<_> = list
            .items(&pool)
            .unwrap()
            .iter()
            .filter_map(|v| v.as_json().cloned())
            .collect();
        assert_eq!(items, vec![json!("c"), json!("a"), json!("b")]);
    }
}
