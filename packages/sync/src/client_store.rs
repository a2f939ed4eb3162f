//! # Client Store
//!
//! One client's optimistic view of a shared document.
//!
//! Local mutations apply to the pool overlay at once and are queued as
//! pending ops. Server events then settle the queue:
//!
//! ```text
//!   local op ──► overlay ──► pending [Local → Sent] ──► transport
//!
//!   Ack(n)        fold ops ≤ n into the base, replay the rest
//!   Reject(n)     drop op n, rebuild the overlay from the base
//!   Remote(ops)   apply ops to the base, replay everything pending
//!   FullResync    replace the base, drop every pending op
//! ```
//!
//! A rebuild always runs `rollback → update base → commit → replay pending`
//! in local order, so later edits survive an earlier rejection and two
//! replicas fed the same server stream end with the same base.

use crate::config::SyncConfig;
use crate::errors::SyncResult;
use crate::protocol::{OutboundOp, ServerEvent};
use crate::transport::Transport;
use crate::visible::VisibleSlots;
use canopy_common::ActorId;
use canopy_storage::{
    Applied, ChangeEvent, Footprint, History, LiveObject, Op, Pool, Snapshot, StorageContext,
    StorageResult,
};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    /// Applied locally, not yet handed to the transport
    Local,
    /// Handed to the transport, waiting for the server
    Sent,
}

/// Op waiting for the server
#[derive(Debug, Clone)]
pub struct PendingOp {
    pub seq: u64,
    /// Resolved form, replayable on any base
    pub op: Op,
    pub footprint: Footprint,
    pub state: PendingState,
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ClientStore<T> {
    pool: Pool,
    pending: VecDeque<PendingOp>,
    next_seq: u64,
    history: History,
    transport: T,
    events: Vec<ChangeEvent>,
    pending_warn_threshold: usize,
}

impl<T: Transport> ClientStore<T> {
    pub fn new(pool: Pool, transport: T) -> Self {
        Self::with_config(pool, transport, &SyncConfig::default())
    }

    pub fn with_config(pool: Pool, transport: T, config: &SyncConfig) -> Self {
        Self {
            pool,
            pending: VecDeque::new(),
            next_seq: 1,
            history: History::with_max_depth(config.history_depth),
            transport,
            events: Vec::new(),
            pending_warn_threshold: config.pending_warn_threshold,
        }
    }

    pub fn from_snapshot(actor: ActorId, snapshot: &Snapshot, transport: T) -> SyncResult<Self> {
        Ok(Self::new(Pool::from_snapshot(actor, snapshot)?, transport))
    }

    pub fn actor(&self) -> ActorId {
        self.pool.actor()
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn root(&self) -> LiveObject {
        self.pool.root()
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingOp> + '_ {
        self.pending.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// No op is waiting for the server
    pub fn is_synced(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Drain change notifications produced since the last call
    pub fn take_events(&mut self) -> Vec<ChangeEvent> {
        self.events.extend(self.pool.take_events());
        std::mem::take(&mut self.events)
    }

    /// Apply a local op, queue it, and try to send it. An op whose target is
    /// gone is dropped as a no-op.
    #[instrument(skip(self, op), fields(op = op.name(), node = %op.target()))]
    pub fn submit(&mut self, op: Op) -> StorageResult<Applied> {
        let applied = match op.apply(&mut self.pool) {
            Ok(applied) => applied,
            Err(err) if err.is_not_found() => {
                debug!(error = %err, "Dropped op on missing node");
                return Ok(Applied {
                    op,
                    inverse: None,
                    changed: false,
                });
            }
            Err(err) => return Err(err),
        };
        self.events.extend(self.pool.take_events());
        if applied.inverse.is_none() {
            return Ok(applied);
        }

        self.history.record(applied.clone());
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push_back(PendingOp {
            seq,
            op: applied.op.clone(),
            footprint: applied.op.footprint(),
            state: PendingState::Local,
            queued_at: Utc::now(),
        });
        if self.pending.len() > self.pending_warn_threshold {
            warn!(pending = self.pending.len(), "Pending queue is growing");
        }
        debug!(seq, "Queued op");

        self.flush();
        Ok(applied)
    }

    /// Send queued ops that have not reached the transport yet, in order.
    /// Stops at the first failure so the server never sees a gap. Returns
    /// how many were sent.
    pub fn flush(&mut self) -> usize {
        let actor = self.pool.actor();
        let mut sent = 0;
        for pending in self
            .pending
            .iter_mut()
            .filter(|p| p.state == PendingState::Local)
        {
            let outbound = OutboundOp {
                actor,
                seq: pending.seq,
                op: pending.op.clone(),
            };
            match self.transport.send_operation(outbound) {
                Ok(()) => {
                    pending.state = PendingState::Sent;
                    sent += 1;
                }
                Err(err) => {
                    debug!(seq = pending.seq, error = %err, "Send deferred");
                    break;
                }
            }
        }
        sent
    }

    /// Group the mutations made in `f` into one undo step
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.history.begin_batch();
        let out = f(self);
        self.history.end_batch();
        out
    }

    /// Undo the last local step. The reverting ops are queued like any other
    /// local mutation.
    pub fn undo(&mut self) -> StorageResult<bool> {
        // Ops applied while the history is out are recorded into the
        // placeholder and dropped with it
        let mut history = std::mem::take(&mut self.history);
        let result = history.undo(self);
        self.history = history;
        result
    }

    pub fn redo(&mut self) -> StorageResult<bool> {
        let mut history = std::mem::take(&mut self.history);
        let result = history.redo(self);
        self.history = history;
        result
    }

    #[instrument(skip(self, event), fields(actor = %self.pool.actor(), event = event.name()))]
    pub fn receive(&mut self, event: ServerEvent) -> SyncResult<()> {
        match event {
            ServerEvent::Ack { seq } => self.on_ack(seq),
            ServerEvent::Reject { seq, reason } => self.on_reject(seq, &reason),
            ServerEvent::FullResync { snapshot } => self.on_full_resync(&snapshot)?,
            ServerEvent::Remote { from, ops } => self.on_remote(from, ops),
        }
        // Replies free outbound capacity, so retry anything still local
        let retried = self.flush();
        if retried > 0 {
            debug!(retried, "Sent deferred ops");
        }
        Ok(())
    }

    fn on_ack(&mut self, seq: u64) {
        let acked = self.pending.iter().take_while(|p| p.seq <= seq).count();
        if acked == 0 {
            debug!(seq, "Ack for nothing pending");
            return;
        }
        let now = Utc::now();
        for pending in self.pending.iter().take(acked) {
            debug!(
                seq = pending.seq,
                age_ms = (now - pending.queued_at).num_milliseconds(),
                "Op confirmed"
            );
        }

        if acked == self.pending.len() {
            // The overlay holds exactly the confirmed ops
            self.pool.commit_layer();
            self.pending.clear();
            return;
        }

        let confirmed: Vec<PendingOp> = self.pending.drain(..acked).collect();
        self.rebuild(|pool| {
            for pending in &confirmed {
                apply_to_base(pool, &pending.op);
            }
        });
    }

    fn on_reject(&mut self, seq: u64, reason: &str) {
        let Some(index) = self.pending.iter().position(|p| p.seq == seq) else {
            debug!(seq, "Reject for unknown op");
            return;
        };
        let Some(rejected) = self.pending.remove(index) else {
            return;
        };
        info!(seq, reason = %reason, remaining = self.pending.len(), "Op rejected");
        self.reconcile(std::slice::from_ref(&rejected.footprint), |_| {});
    }

    fn on_remote(&mut self, from: ActorId, ops: Vec<Op>) {
        debug!(from = %from, count = ops.len(), "Remote ops");
        let footprints: Vec<Footprint> = ops.iter().map(Op::footprint).collect();
        self.reconcile(&footprints, |pool| {
            for op in &ops {
                apply_to_base(pool, op);
            }
        });
    }

    fn on_full_resync(&mut self, snapshot: &Snapshot) -> SyncResult<()> {
        let before = VisibleSlots::capture_all(&self.pool);
        self.pool.load_snapshot(snapshot)?;

        if !self.pending.is_empty() {
            warn!(dropped = self.pending.len(), "Full resync dropped pending ops");
        }
        self.pending.clear();
        self.history.clear();

        let after = VisibleSlots::capture_all(&self.pool);
        self.events.extend(before.diff(&after, &self.pool));
        Ok(())
    }

    /// Rebuild the overlay and report the slots whose visible value changed
    fn reconcile(&mut self, extra: &[Footprint], update_base: impl FnOnce(&mut Pool)) {
        let footprints: Vec<Footprint> = self
            .pending
            .iter()
            .map(|p| p.footprint.clone())
            .chain(extra.iter().cloned())
            .collect();

        let before = VisibleSlots::capture(&self.pool, &footprints);
        self.rebuild(update_base);
        let after = VisibleSlots::capture(&self.pool, &footprints);
        self.events.extend(before.diff(&after, &self.pool));
    }

    fn rebuild(&mut self, update_base: impl FnOnce(&mut Pool)) {
        let quiet = self.pool.set_quiet(true);
        self.pool.rollback_layer();
        update_base(&mut self.pool);
        self.pool.commit_layer();
        for pending in &self.pending {
            if let Err(err) = pending.op.replay(&mut self.pool) {
                if !err.is_not_found() {
                    warn!(seq = pending.seq, error = %err, "Pending op no longer applies");
                }
            }
        }
        self.pool.set_quiet(quiet);
    }
}

impl<T: Transport> StorageContext for ClientStore<T> {
    fn pool(&self) -> &Pool {
        &self.pool
    }

    fn apply_op(&mut self, op: Op) -> StorageResult<Applied> {
        self.submit(op)
    }
}

/// Fold a confirmed op into the base. A missing target means the server
/// treated it as a no-op too.
fn apply_to_base(pool: &mut Pool, op: &Op) {
    if let Err(err) = op.replay(pool) {
        if err.is_not_found() {
            debug!(op = op.name(), "Confirmed op hit a missing node");
        } else {
            warn!(op = op.name(), error = %err, "Confirmed op failed against base");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChannelTransport, MemoryTransport};
    use canopy_common::NodeId;
    use canopy_storage::{Draft, Lson};
    use serde_json::json;

    fn store() -> ClientStore<MemoryTransport> {
        ClientStore::new(Pool::new(ActorId(1)), MemoryTransport::new())
    }

    fn base_value(store: &ClientStore<MemoryTransport>, key: &str) -> Option<Lson> {
        store
            .pool()
            .get_base_node(NodeId::root())
            .and_then(|r| r.body.get(&key.into()).cloned())
    }

    #[test]
    fn test_local_op_is_queued_and_sent() {
        let mut store = store();
        let root = store.root();
        root.set(&mut store, "k", 1).unwrap();

        assert_eq!(store.pending_len(), 1);
        let pending = store.pending().next().unwrap();
        assert_eq!(pending.seq, 1);
        assert_eq!(pending.state, PendingState::Sent);
        assert_eq!(store.transport().sent().len(), 1);
        assert_eq!(store.take_events().len(), 1);
    }

    #[test]
    fn test_noop_is_not_queued() {
        let mut store = store();
        let root = store.root();
        assert!(!root.delete(&mut store, "missing").unwrap());
        assert!(store.is_synced());
    }

    #[test]
    fn test_missing_node_is_silent_noop() {
        let mut store = store();
        let ghost = NodeId::new(canopy_common::NodeKind::Object, ActorId(9), 1, 0);
        let applied = store.submit(Op::set(ghost, "k", 1)).unwrap();
        assert!(!applied.changed);
        assert!(store.is_synced());
    }

    #[test]
    fn test_ack_all_commits_overlay() {
        let mut store = store();
        let root = store.root();
        root.set(&mut store, "a", 1).unwrap();
        root.set(&mut store, "b", 2).unwrap();

        store.receive(ServerEvent::Ack { seq: 2 }).unwrap();
        assert!(store.is_synced());
        assert!(!store.pool().has_pending_writes());
        assert_eq!(base_value(&store, "b"), Some(Lson::Json(json!(2))));
    }

    #[test]
    fn test_partial_ack_keeps_later_ops_in_overlay() {
        let mut store = store();
        let root = store.root();
        root.set(&mut store, "a", 1).unwrap();
        root.set(&mut store, "b", 2).unwrap();

        store.receive(ServerEvent::Ack { seq: 1 }).unwrap();
        assert_eq!(store.pending_len(), 1);
        assert_eq!(base_value(&store, "a"), Some(Lson::Json(json!(1))));
        assert_eq!(base_value(&store, "b"), None);
        assert_eq!(store.pool().to_json(), json!({ "a": 1, "b": 2 }));
    }

    #[test]
    fn test_offline_ops_stay_local_until_flush() {
        let mut store = store();
        store.transport_mut().set_offline(true);
        let root = store.root();
        root.set(&mut store, "a", 1).unwrap();
        root.set(&mut store, "b", 2).unwrap();
        assert!(store.pending().all(|p| p.state == PendingState::Local));
        assert_eq!(store.pool().to_json(), json!({ "a": 1, "b": 2 }));

        store.transport_mut().set_offline(false);
        assert_eq!(store.flush(), 2);
        let seqs: Vec<u64> = store.transport().sent().iter().map(|o| o.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn test_reject_emits_visible_change() {
        let mut store = store();
        let root = store.root();
        root.set(&mut store, "k", 1).unwrap();
        store.take_events();

        store
            .receive(ServerEvent::Reject {
                seq: 1,
                reason: "nope".into(),
            })
            .unwrap();
        let events = store.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].old, Some(Lson::Json(json!(1))));
        assert_eq!(events[0].new, None);
        assert_eq!(store.pool().to_json(), json!({}));
    }

    #[test]
    fn test_remote_op_lands_under_pending() {
        let mut store = store();
        let root = store.root();
        root.set(&mut store, "k", "mine").unwrap();
        store.take_events();

        store
            .receive(ServerEvent::Remote {
                from: ActorId(2),
                ops: vec![
                    Op::set(NodeId::root(), "k", "theirs"),
                    Op::set(NodeId::root(), "other", true),
                ],
            })
            .unwrap();

        // Pending local write still wins on top of the new base
        assert_eq!(store.pool().to_json(), json!({ "k": "mine", "other": true }));
        assert_eq!(base_value(&store, "k"), Some(Lson::Json(json!("theirs"))));
        let events = store.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].path, vec![canopy_storage::ChildKey::from("other")]);
    }

    #[test]
    fn test_undo_is_queued_as_local_op() {
        let mut store = store();
        let root = store.root();
        root.set(&mut store, "k", 1).unwrap();
        assert!(store.undo().unwrap());
        assert_eq!(store.pool().to_json(), json!({}));
        assert_eq!(store.pending_len(), 2);
        assert!(store.history().can_redo());

        assert!(store.redo().unwrap());
        assert_eq!(store.pool().to_json(), json!({ "k": 1 }));
        assert_eq!(store.pending_len(), 3);
    }

    #[test]
    fn test_server_reply_retries_deferred_send() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(1);
        let mut store = ClientStore::new(Pool::new(ActorId(1)), ChannelTransport::new(tx));
        let root = store.root();
        root.set(&mut store, "a", 1).unwrap();
        root.set(&mut store, "b", 2).unwrap();

        let states: Vec<_> = store.pending().map(|p| (p.seq, p.state)).collect();
        assert_eq!(
            states,
            vec![(1, PendingState::Sent), (2, PendingState::Local)]
        );

        assert_eq!(rx.try_recv().unwrap().seq, 1);
        store.receive(ServerEvent::Ack { seq: 1 }).unwrap();

        let states: Vec<_> = store.pending().map(|p| (p.seq, p.state)).collect();
        assert_eq!(states, vec![(2, PendingState::Sent)]);
        assert_eq!(rx.try_recv().unwrap().seq, 2);
    }

    #[test]
    fn test_batch_is_one_undo_step() {
        let mut store = store();
        store.batch(|s| {
            let root = s.root();
            root.set(s, "a", 1).unwrap();
            root.set(s, "b", Draft::list([])).unwrap();
        });
        assert_eq!(store.history().undo_count(), 1);
        store.undo().unwrap();
        assert_eq!(store.pool().to_json(), json!({}));
    }
}
