//! Error types for the storage engine

use crate::lson::ChildKey;
use canopy_common::{IdError, NodeId, NodeKind};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("Node not found: {0}")]
    NotFound(NodeId),

    #[error("Cannot attach {child} beneath {parent}: it is the target or one of its ancestors")]
    CyclicAttachment { parent: NodeId, child: NodeId },

    #[error("Node {0} is already attached")]
    AlreadyAttached(NodeId),

    #[error("Node id {0} is already in use")]
    DuplicateId(NodeId),

    #[error("Key {key} is not valid for a {kind} node")]
    InvalidKey { kind: NodeKind, key: ChildKey },

    #[error("Index {index} out of range for list of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Id {id} does not name a {expected} node")]
    KindMismatch { id: NodeId, expected: NodeKind },

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Invalid node id: {0}")]
    Id(#[from] IdError),
}

impl StorageError {
    /// The referenced node is gone, so the mutation is moot rather than wrong
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
