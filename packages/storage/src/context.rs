use crate::errors::StorageResult;
use crate::ops::{Applied, Op};
use crate::pool::Pool;

/// Anything live handles can read from and write through
///
/// A bare [`Pool`] applies ops directly. A client store applies them
/// optimistically and queues them for the server, so the same handle code
/// works against both.
pub trait StorageContext {
    /// Pool used for reads
    fn pool(&self) -> &Pool;

    /// Apply one outer mutation
    fn apply_op(&mut self, op: Op) -> StorageResult<Applied>;
}

impl StorageContext for Pool {
    fn pool(&self) -> &Pool {
        self
    }

    fn apply_op(&mut self, op: Op) -> StorageResult<Applied> {
        op.apply(self)
    }
}
