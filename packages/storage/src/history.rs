//! # History
//!
//! Undo/redo primitives. Only the stacks live here; binding them to commands
//! or shortcuts is left to the application.
//!
//! ## Design
//!
//! - Each op records its inverse, computed before it is applied
//! - Undo applies the inverses and pushes the result onto the redo stack
//! - Redo is the same walk in the other direction
//! - A new recorded op clears the redo stack
//! - Ops recorded between `begin_batch` and `end_batch` undo as one step
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut history = History::new();
//! history.apply(&mut pool, Op::set(NodeId::root(), "title", "draft"))?;
//! history.undo(&mut pool)?;
//! history.redo(&mut pool)?;
//! ```

use crate::context::StorageContext;
use crate::errors::StorageResult;
use crate::ops::{Applied, Op};
use tracing::debug;

/// A group of ops undone and redone together
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryBatch {
    /// Ops in application order
    pub ops: Vec<Op>,

    /// Ops that revert the batch, in the order they must run
    pub inverses: Vec<Op>,

    pub description: Option<String>,
}

impl HistoryBatch {
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn push(&mut self, applied: Applied) {
        if let Some(inverse) = applied.inverse {
            self.ops.push(applied.op);
            self.inverses.insert(0, inverse);
        }
    }
}

#[derive(Debug)]
pub struct History {
    undo_stack: Vec<HistoryBatch>,
    redo_stack: Vec<HistoryBatch>,
    /// Maximum number of undo steps (0 = unlimited)
    max_depth: usize,
    current_batch: Option<HistoryBatch>,
}

impl History {
    pub fn new() -> Self {
        Self::with_max_depth(100)
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_depth,
            current_batch: None,
        }
    }

    /// Apply an op through `ctx` and record it
    pub fn apply<S: StorageContext + ?Sized>(&mut self, ctx: &mut S, op: Op) -> StorageResult<Applied> {
        let applied = ctx.apply_op(op)?;
        self.record(applied.clone());
        Ok(applied)
    }

    /// Record an op that was already applied. Ops that changed nothing are
    /// not recorded.
    pub fn record(&mut self, applied: Applied) {
        if applied.inverse.is_none() {
            return;
        }
        match &mut self.current_batch {
            Some(batch) => batch.push(applied),
            None => {
                let mut batch = HistoryBatch::default();
                batch.push(applied);
                self.push_batch(batch);
            }
        }
    }

    pub fn begin_batch(&mut self) {
        if self.current_batch.is_none() {
            self.current_batch = Some(HistoryBatch::default());
        }
    }

    pub fn end_batch(&mut self) {
        if let Some(batch) = self.current_batch.take() {
            if !batch.is_empty() {
                self.push_batch(batch);
            }
        }
    }

    pub fn set_batch_description(&mut self, description: impl Into<String>) {
        if let Some(batch) = &mut self.current_batch {
            batch.description = Some(description.into());
        }
    }

    fn push_batch(&mut self, batch: HistoryBatch) {
        self.undo_stack.push(batch);
        if self.max_depth > 0 && self.undo_stack.len() > self.max_depth {
            self.undo_stack.remove(0);
        }
        self.redo_stack.clear();
    }

    /// Revert the most recent step. Returns `false` when there is nothing to
    /// undo.
    pub fn undo<S: StorageContext + ?Sized>(&mut self, ctx: &mut S) -> StorageResult<bool> {
        let Some(batch) = self.undo_stack.pop() else {
            return Ok(false);
        };
        let redo = run_inverses(ctx, batch)?;
        if !redo.is_empty() {
            self.redo_stack.push(redo);
        }
        Ok(true)
    }

    pub fn redo<S: StorageContext + ?Sized>(&mut self, ctx: &mut S) -> StorageResult<bool> {
        let Some(batch) = self.redo_stack.pop() else {
            return Ok(false);
        };
        let undo = run_inverses(ctx, batch)?;
        if !undo.is_empty() {
            self.undo_stack.push(undo);
        }
        Ok(true)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.current_batch = None;
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply a batch's inverses and collect what it would take to go back.
/// Inverses whose target has since disappeared are skipped.
fn run_inverses<S: StorageContext + ?Sized>(
    ctx: &mut S,
    batch: HistoryBatch,
) -> StorageResult<HistoryBatch> {
    let mut opposite = HistoryBatch {
        description: batch.description,
        ..HistoryBatch::default()
    };
    for op in batch.inverses {
        match ctx.apply_op(op) {
            Ok(applied) => opposite.push(applied),
            Err(err) if err.is_not_found() => {
                debug!(error = %err, "Skipped history op on missing node");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(opposite)
}
