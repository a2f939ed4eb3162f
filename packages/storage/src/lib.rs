//! # Canopy Storage
//!
//! Optimistic local storage for a shared document tree.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ live handles: LiveObject, LiveList, LiveMap │
//! └─────────────────────────────────────────────┘
//!                     ↓ Op
//! ┌─────────────────────────────────────────────┐
//! │ pool: node records, ids, change events      │
//! │  - attach / release subtrees                │
//! │  - cycle and double-attach checks           │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ layered cache: base (confirmed) + overlay   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **The pool owns every node**: handles are ids, parents are ids
//! 2. **Reads go through the overlay**: a local write is visible at once
//! 3. **Ops are replayable**: recorded ops carry the ids they create
//! 4. **Server authority**: the base only changes on confirmation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use canopy_storage::{Draft, Pool};
//! use canopy_common::ActorId;
//!
//! let mut pool = Pool::new(ActorId(1));
//! let root = pool.root();
//! let todos = root.set(&mut pool, "todos", Draft::list([]))?.and_then(|s| s.as_list());
//!
//! pool.commit_layer();   // confirmed
//! pool.rollback_layer(); // or discarded
//! ```

mod context;
mod errors;
mod history;
mod layered;
mod live;
mod lson;
mod node;
mod ops;
mod pool;
mod snapshot;
pub mod visitor;

pub use context::StorageContext;
pub use errors::{StorageError, StorageResult};
pub use history::{History, HistoryBatch};
pub use layered::LayeredCache;
pub use live::{LiveList, LiveMap, LiveObject, LiveStructure};
pub use lson::{ChildKey, Draft, DraftBody, DraftNode, Lson};
pub use node::{NodeBody, NodeRecord};
pub use ops::{Applied, Footprint, Op};
pub use pool::{ChangeEvent, Pool};
pub use snapshot::Snapshot;

// Re-export id types for convenience
pub use canopy_common::{ActorId, IdGenerator, NodeId, NodeKind};
