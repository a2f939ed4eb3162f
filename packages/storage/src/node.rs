//! Node records as stored inside a pool.
//!
//! A record owns its child slots but not its child nodes: a nested structure
//! appears as [`Lson::Node`] and lives in its own record. The parent link is a
//! plain id used for path computation only.

use crate::errors::{StorageError, StorageResult};
use crate::lson::{ChildKey, Lson};
use canopy_common::{NodeId, NodeKind};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    /// `None` only for the root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeId>,
    pub body: NodeBody,
}

impl NodeRecord {
    pub fn new(id: NodeId, parent: Option<NodeId>, body: NodeBody) -> Self {
        Self { id, parent, body }
    }

    pub fn kind(&self) -> NodeKind {
        self.body.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeBody {
    Object(IndexMap<String, Lson>),
    List(Vec<Lson>),
    Map(IndexMap<String, Lson>),
}

impl NodeBody {
    pub fn empty(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Object => NodeBody::Object(IndexMap::new()),
            NodeKind::List => NodeBody::List(Vec::new()),
            NodeKind::Map => NodeBody::Map(IndexMap::new()),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeBody::Object(_) => NodeKind::Object,
            NodeBody::List(_) => NodeKind::List,
            NodeBody::Map(_) => NodeKind::Map,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            NodeBody::Object(fields) | NodeBody::Map(fields) => fields.len(),
            NodeBody::List(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reject keys whose shape does not fit this kind
    pub fn check_key(&self, key: &ChildKey) -> StorageResult<()> {
        let fits = matches!(
            (self, key),
            (NodeBody::Object(_), ChildKey::Field(_))
                | (NodeBody::Map(_), ChildKey::Field(_))
                | (NodeBody::List(_), ChildKey::Index(_))
        );
        if fits {
            Ok(())
        } else {
            Err(StorageError::InvalidKey {
                kind: self.kind(),
                key: key.clone(),
            })
        }
    }

    pub fn get(&self, key: &ChildKey) -> Option<&Lson> {
        match (self, key) {
            (NodeBody::Object(fields), ChildKey::Field(name))
            | (NodeBody::Map(fields), ChildKey::Field(name)) => fields.get(name),
            (NodeBody::List(items), ChildKey::Index(i)) => items.get(*i),
            _ => None,
        }
    }

    /// Write a slot, returning the previous occupant. List writes must
    /// target an existing index.
    pub fn set(&mut self, key: &ChildKey, value: Lson) -> StorageResult<Option<Lson>> {
        self.check_key(key)?;
        match (self, key) {
            (NodeBody::Object(fields), ChildKey::Field(name))
            | (NodeBody::Map(fields), ChildKey::Field(name)) => {
                Ok(fields.insert(name.clone(), value))
            }
            (NodeBody::List(items), ChildKey::Index(i)) => {
                let len = items.len();
                let slot = items
                    .get_mut(*i)
                    .ok_or(StorageError::IndexOutOfRange { index: *i, len })?;
                Ok(Some(std::mem::replace(slot, value)))
            }
            _ => unreachable!("key checked above"),
        }
    }

    /// Remove a slot. Lists shift later items down.
    pub fn remove(&mut self, key: &ChildKey) -> Option<Lson> {
        match (self, key) {
            (NodeBody::Object(fields), ChildKey::Field(name))
            | (NodeBody::Map(fields), ChildKey::Field(name)) => fields.shift_remove(name),
            (NodeBody::List(items), ChildKey::Index(i)) if *i < items.len() => {
                Some(items.remove(*i))
            }
            _ => None,
        }
    }

    /// Key under which `child` is held, found by scanning slots
    pub fn key_of(&self, child: NodeId) -> Option<ChildKey> {
        let target = Lson::Node(child);
        match self {
            NodeBody::Object(fields) | NodeBody::Map(fields) => fields
                .iter()
                .find(|(_, v)| **v == target)
                .map(|(k, _)| ChildKey::Field(k.clone())),
            NodeBody::List(items) => items
                .iter()
                .position(|v| *v == target)
                .map(ChildKey::Index),
        }
    }

    /// Every slot with its key, in order
    pub fn entries(&self) -> Vec<(ChildKey, &Lson)> {
        match self {
            NodeBody::Object(fields) | NodeBody::Map(fields) => fields
                .iter()
                .map(|(k, v)| (ChildKey::Field(k.clone()), v))
                .collect(),
            NodeBody::List(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (ChildKey::Index(i), v))
                .collect(),
        }
    }

    /// Ids of directly nested structures
    pub fn child_nodes(&self) -> Vec<NodeId> {
        let values: Box<dyn Iterator<Item = &Lson>> = match self {
            NodeBody::Object(fields) | NodeBody::Map(fields) => Box::new(fields.values()),
            NodeBody::List(items) => Box::new(items.iter()),
        };
        values.filter_map(Lson::as_node).collect()
    }
}
