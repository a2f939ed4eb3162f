//! Shared primitives for canopy: node identity and restartable iteration.

pub mod error;
pub mod id;
pub mod iter;

pub use error::*;
pub use id::{ActorId, IdGenerator, NodeId, NodeKind};
pub use iter::{chain, chain_all, source, Chain, ChainAll, Restartable, Source};
