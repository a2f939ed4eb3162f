//! # Server Store
//!
//! The authoritative copy of a room. Ops are applied in arrival order; the
//! sender gets an ack or a reject and every other client gets the applied op.
//!
//! ```text
//!   OutboundOp(actor, seq, op)
//!        │
//!        ├─ unresolved / guard refuses / invalid ──► Reject(seq) to actor
//!        ├─ target missing ──────────────────────► Ack(seq) to actor
//!        └─ applied ─────────────────────────────► Ack(seq) to actor
//!                                                  Remote(op) to the others
//! ```

use crate::errors::SyncResult;
use crate::protocol::{Delivery, OutboundOp, ServerEvent};
use canopy_common::{ActorId, NodeId};
use canopy_storage::{ChildKey, Footprint, Op, Pool, Snapshot};
use tracing::{debug, info, instrument, warn};

/// Server-side policy deciding whether an op may be applied
pub trait OpGuard: Send {
    /// `Err(reason)` refuses the op
    fn check(&self, pool: &Pool, actor: ActorId, op: &Op) -> Result<(), String>;
}

/// Root fields no client may write
#[derive(Debug, Clone)]
pub struct ReadOnlyKeys {
    keys: Vec<String>,
}

impl ReadOnlyKeys {
    pub fn new<K: Into<String>>(keys: impl IntoIterator<Item = K>) -> Self {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl OpGuard for ReadOnlyKeys {
    fn check(&self, _pool: &Pool, _actor: ActorId, op: &Op) -> Result<(), String> {
        if let Footprint::Slot(node, ChildKey::Field(key)) = op.footprint() {
            if node.is_root() && self.keys.contains(&key) {
                return Err(format!("{} is read-only", key));
            }
        }
        Ok(())
    }
}

/// Caps the length of every list
#[derive(Debug, Clone, Copy)]
pub struct MaxListLength(pub usize);

impl OpGuard for MaxListLength {
    fn check(&self, pool: &Pool, _actor: ActorId, op: &Op) -> Result<(), String> {
        if let Op::Insert { node, .. } = op {
            if let Ok(len) = pool.list_len(*node) {
                if len >= self.0 {
                    return Err(format!("list {} is full ({} items)", node, len));
                }
            }
        }
        Ok(())
    }
}

pub struct ServerStore {
    pool: Pool,
    clients: Vec<ActorId>,
    next_actor: u32,
    guards: Vec<Box<dyn OpGuard>>,
    /// Number of ops applied so far
    version: u64,
}

impl ServerStore {
    pub fn new() -> Self {
        Self::with_pool(Pool::new(ActorId::SERVER))
    }

    /// Resume from a stored snapshot. Actor ids already present in the
    /// document are not handed out again.
    pub fn from_snapshot(snapshot: &Snapshot) -> SyncResult<Self> {
        Ok(Self::with_pool(Pool::from_snapshot(ActorId::SERVER, snapshot)?))
    }

    fn with_pool(mut pool: Pool) -> Self {
        pool.set_quiet(true);
        let next_actor = pool
            .records()
            .map(|r| r.id.actor().0)
            .max()
            .unwrap_or(0)
            + 1;
        Self {
            pool,
            clients: Vec::new(),
            next_actor,
            guards: Vec::new(),
            version: 0,
        }
    }

    pub fn with_guard(mut self, guard: impl OpGuard + 'static) -> Self {
        self.guards.push(Box::new(guard));
        self
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn snapshot(&self) -> Snapshot {
        self.pool.to_snapshot()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn clients(&self) -> &[ActorId] {
        &self.clients
    }

    /// Register a new client. Returns its actor id and the resync event that
    /// seeds its store.
    pub fn connect(&mut self) -> (ActorId, ServerEvent) {
        let actor = ActorId(self.next_actor);
        self.next_actor += 1;
        self.clients.push(actor);
        info!(actor = %actor, clients = self.clients.len(), "Client connected");
        (actor, self.resync())
    }

    pub fn disconnect(&mut self, actor: ActorId) {
        self.clients.retain(|c| *c != actor);
        info!(actor = %actor, clients = self.clients.len(), "Client disconnected");
    }

    /// Full copy of the room for a client that lost track
    pub fn resync(&self) -> ServerEvent {
        ServerEvent::FullResync {
            snapshot: self.snapshot(),
        }
    }

    #[instrument(skip(self, outbound), fields(actor = %outbound.actor, seq = outbound.seq))]
    pub fn receive(&mut self, outbound: OutboundOp) -> Vec<Delivery> {
        let OutboundOp { actor, seq, op } = outbound;
        match self.apply(actor, &op) {
            Ok(Some(applied)) => {
                let mut deliveries = vec![Delivery {
                    to: actor,
                    event: ServerEvent::Ack { seq },
                }];
                deliveries.extend(self.clients.iter().filter(|c| **c != actor).map(|c| {
                    Delivery {
                        to: *c,
                        event: ServerEvent::Remote {
                            from: actor,
                            ops: vec![applied.clone()],
                        },
                    }
                }));
                deliveries
            }
            Ok(None) => vec![Delivery {
                to: actor,
                event: ServerEvent::Ack { seq },
            }],
            Err(reason) => {
                warn!(reason = %reason, "Rejected op");
                vec![Delivery {
                    to: actor,
                    event: ServerEvent::Reject { seq, reason },
                }]
            }
        }
    }

    /// `Ok(Some(op))` when the op changed the room, `Ok(None)` when it was a
    /// no-op, `Err(reason)` when it is refused
    fn apply(&mut self, actor: ActorId, op: &Op) -> Result<Option<Op>, String> {
        if !op.is_resolved() {
            return Err("op creates structures without ids".to_string());
        }
        for guard in &self.guards {
            guard.check(&self.pool, actor, op)?;
        }

        match op.replay(&mut self.pool) {
            Ok(applied) => {
                self.pool.commit_layer();
                if !applied.changed {
                    return Ok(None);
                }
                self.version += 1;
                debug!(version = self.version, op = op.name(), "Applied op");
                Ok(Some(applied.op))
            }
            Err(err) if err.is_not_found() => {
                self.pool.rollback_layer();
                debug!(error = %err, "Op on missing node acked as no-op");
                Ok(None)
            }
            Err(err) => {
                self.pool.rollback_layer();
                Err(err.to_string())
            }
        }
    }

    /// Visible value of a root field, for inspection
    pub fn root_field(&self, key: &str) -> Option<serde_json::Value> {
        self.pool
            .node_to_json(NodeId::root())
            .ok()
            .and_then(|v| v.get(key).cloned())
    }
}

impl Default for ServerStore {
    fn default() -> Self {
        Self::new()
    }
}
