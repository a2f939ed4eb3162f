//! # Operations
//!
//! An [`Op`] is the unit of change that is applied locally, queued, sent to
//! the server, and replayed during reconciliation.
//!
//! ## Semantics
//!
//! ### Set
//! - Last writer wins per (node, key)
//! - Overwriting a nested structure releases its whole subtree
//!
//! ### Insert
//! - List only; on replay the index is clamped to the current length
//!
//! ### Delete
//! - Removing an absent key is a no-op, not an error
//!
//! ### Move
//! - List reorder; both indices must exist
//!
//! Once applied, an op is stored in its resolved form: every structure it
//! created carries its id, so replaying it on another base recreates the
//! same nodes.

use crate::errors::StorageResult;
use crate::lson::{ChildKey, Draft, Lson};
use crate::pool::Pool;
use canopy_common::NodeId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Op {
    Set {
        node: NodeId,
        key: ChildKey,
        value: Draft,
    },
    Insert {
        node: NodeId,
        index: usize,
        value: Draft,
    },
    Delete {
        node: NodeId,
        key: ChildKey,
    },
    Move {
        node: NodeId,
        from: usize,
        to: usize,
    },
}

/// What an op touches
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Footprint {
    /// A single slot
    Slot(NodeId, ChildKey),
    /// Every slot of a list (inserts and moves shift positions)
    Node(NodeId),
}

impl Footprint {
    pub fn node(&self) -> NodeId {
        match self {
            Footprint::Slot(node, _) | Footprint::Node(node) => *node,
        }
    }
}

/// Result of applying an op
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    /// The op as applied, with created ids filled in
    pub op: Op,
    /// Op restoring the previous state, `None` when nothing changed
    pub inverse: Option<Op>,
    pub changed: bool,
}

impl Op {
    pub fn set(node: NodeId, key: impl Into<ChildKey>, value: impl Into<Draft>) -> Self {
        Op::Set {
            node,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn insert(node: NodeId, index: usize, value: impl Into<Draft>) -> Self {
        Op::Insert {
            node,
            index,
            value: value.into(),
        }
    }

    pub fn delete(node: NodeId, key: impl Into<ChildKey>) -> Self {
        Op::Delete {
            node,
            key: key.into(),
        }
    }

    pub fn moved(node: NodeId, from: usize, to: usize) -> Self {
        Op::Move { node, from, to }
    }

    /// Node the op addresses
    pub fn target(&self) -> NodeId {
        match self {
            Op::Set { node, .. }
            | Op::Insert { node, .. }
            | Op::Delete { node, .. }
            | Op::Move { node, .. } => *node,
        }
    }

    pub fn footprint(&self) -> Footprint {
        match self {
            Op::Set { node, key, .. } | Op::Delete { node, key } => {
                Footprint::Slot(*node, key.clone())
            }
            Op::Insert { node, .. } | Op::Move { node, .. } => Footprint::Node(*node),
        }
    }

    /// Ids of structures this op creates
    pub fn created_ids(&self) -> Vec<NodeId> {
        match self {
            Op::Set { value, .. } | Op::Insert { value, .. } => value.ids(),
            Op::Delete { .. } | Op::Move { .. } => Vec::new(),
        }
    }

    /// Whether every structure this op creates carries its id
    pub fn is_resolved(&self) -> bool {
        match self {
            Op::Set { value, .. } | Op::Insert { value, .. } => value.is_resolved(),
            Op::Delete { .. } | Op::Move { .. } => true,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Op::Set { .. } => "set",
            Op::Insert { .. } => "insert",
            Op::Delete { .. } => "delete",
            Op::Move { .. } => "move",
        }
    }

    /// Apply exactly as written
    pub fn apply(&self, pool: &mut Pool) -> StorageResult<Applied> {
        let inverse = self.inverse(pool)?;
        match self {
            Op::Set { node, key, value } => {
                let resolved = pool.set_child(*node, key.clone(), value.clone())?;
                Ok(Applied {
                    op: Op::Set {
                        node: *node,
                        key: key.clone(),
                        value: resolved,
                    },
                    inverse,
                    changed: true,
                })
            }
            Op::Insert { node, index, value } => {
                let resolved = pool.insert_child(*node, *index, value.clone())?;
                Ok(Applied {
                    op: Op::Insert {
                        node: *node,
                        index: *index,
                        value: resolved,
                    },
                    inverse,
                    changed: true,
                })
            }
            Op::Delete { node, key } => {
                let changed = pool.delete_child(*node, key.clone())?;
                Ok(Applied {
                    op: self.clone(),
                    inverse,
                    changed,
                })
            }
            Op::Move { node, from, to } => {
                let changed = pool.move_child(*node, *from, *to)?;
                Ok(Applied {
                    op: self.clone(),
                    inverse,
                    changed,
                })
            }
        }
    }

    /// Apply on a base that may have moved on since the op was recorded.
    /// List inserts past the end land at the end.
    pub fn replay(&self, pool: &mut Pool) -> StorageResult<Applied> {
        match self {
            Op::Insert { node, index, value } => {
                let len = pool.list_len(*node)?;
                Op::Insert {
                    node: *node,
                    index: (*index).min(len),
                    value: value.clone(),
                }
                .apply(pool)
            }
            _ => self.apply(pool),
        }
    }

    /// The op that undoes this one, computed against the state before it is
    /// applied. `None` when applying would change nothing.
    pub fn inverse(&self, pool: &Pool) -> StorageResult<Option<Op>> {
        Ok(match self {
            Op::Set { node, key, .. } => Some(match pool.get_child(*node, key)? {
                None => Op::Delete {
                    node: *node,
                    key: key.clone(),
                },
                Some(old) => Op::Set {
                    node: *node,
                    key: key.clone(),
                    value: restore(pool, old)?,
                },
            }),
            Op::Insert { node, index, .. } => {
                let len = pool.list_len(*node)?;
                Some(Op::Delete {
                    node: *node,
                    key: ChildKey::Index((*index).min(len)),
                })
            }
            Op::Delete { node, key } => match pool.get_child(*node, key)? {
                None => None,
                Some(old) => {
                    let value = restore(pool, old)?;
                    Some(match key {
                        ChildKey::Index(index) => Op::Insert {
                            node: *node,
                            index: *index,
                            value,
                        },
                        ChildKey::Field(_) => Op::Set {
                            node: *node,
                            key: key.clone(),
                            value,
                        },
                    })
                }
            },
            Op::Move { node, from, to } if from != to => Some(Op::Move {
                node: *node,
                from: *to,
                to: *from,
            }),
            Op::Move { .. } => None,
        })
    }
}

/// Draft that recreates a stored value, subtree ids included
fn restore(pool: &Pool, value: &Lson) -> StorageResult<Draft> {
    match value {
        Lson::Json(v) => Ok(Draft::Json(v.clone())),
        Lson::Node(id) => pool.export_draft(*id),
    }
}
