//! Outbound seam between a client store and whatever carries ops to the
//! server. Sending is fire and forget: acks come back as [`ServerEvent`]s
//! through a separate path.
//!
//! [`ServerEvent`]: crate::ServerEvent

use crate::errors::TransportError;
use crate::protocol::OutboundOp;
use tokio::sync::mpsc;

pub trait Transport {
    /// Hand one op to the transport. An error leaves the op queued locally
    /// for a later flush.
    fn send_operation(&mut self, op: OutboundOp) -> Result<(), TransportError>;
}

/// Transport over a tokio channel
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<OutboundOp>,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::Sender<OutboundOp>) -> Self {
        Self { tx }
    }
}

impl Transport for ChannelTransport {
    fn send_operation(&mut self, op: OutboundOp) -> Result<(), TransportError> {
        self.tx.try_send(op).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Full,
            mpsc::error::TrySendError::Closed(_) => TransportError::Disconnected,
        })
    }
}

/// Transport that keeps sent ops in memory, for driving a store by hand
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Vec<OutboundOp>,
    offline: bool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every send fails with `Disconnected`
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    pub fn sent(&self) -> &[OutboundOp] {
        &self.sent
    }

    pub fn take_sent(&mut self) -> Vec<OutboundOp> {
        std::mem::take(&mut self.sent)
    }
}

impl Transport for MemoryTransport {
    fn send_operation(&mut self, op: OutboundOp) -> Result<(), TransportError> {
        if self.offline {
            return Err(TransportError::Disconnected);
        }
        self.sent.push(op);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_common::{ActorId, NodeId};
    use canopy_storage::Op;

    fn outbound(seq: u64) -> OutboundOp {
        OutboundOp {
            actor: ActorId(1),
            seq,
            op: Op::delete(NodeId::root(), "k"),
        }
    }

    #[test]
    fn test_channel_transport_reports_full_and_closed() {
        let (tx, rx) = mpsc::channel(1);
        let mut transport = ChannelTransport::new(tx);
        transport.send_operation(outbound(1)).unwrap();
        assert_eq!(
            transport.send_operation(outbound(2)),
            Err(TransportError::Full)
        );
        drop(rx);
        assert_eq!(
            transport.send_operation(outbound(3)),
            Err(TransportError::Disconnected)
        );
    }

    #[test]
    fn test_memory_transport_offline() {
        let mut transport = MemoryTransport::new();
        transport.set_offline(true);
        assert!(transport.send_operation(outbound(1)).is_err());
        transport.set_offline(false);
        transport.send_operation(outbound(2)).unwrap();
        assert_eq!(transport.take_sent().len(), 1);
        assert!(transport.sent().is_empty());
    }
}
