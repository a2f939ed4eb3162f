//! Messages exchanged between client stores and the server store.
//!
//! Encoding and framing belong to the transport; these types only fix what
//! is said.

use canopy_common::ActorId;
use canopy_storage::{Op, Snapshot};
use serde::{Deserialize, Serialize};

/// A local op on its way to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundOp {
    pub actor: ActorId,
    /// Local sequence number, increasing per client
    pub seq: u64,
    pub op: Op,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Every op up to and including `seq` is confirmed
    Ack { seq: u64 },

    /// The op with `seq` was refused and must be dropped
    Reject { seq: u64, reason: String },

    /// Replace all local state
    FullResync { snapshot: Snapshot },

    /// Ops from another client, in server order
    Remote { from: ActorId, ops: Vec<Op> },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Ack { .. } => "ack",
            ServerEvent::Reject { .. } => "reject",
            ServerEvent::FullResync { .. } => "full_resync",
            ServerEvent::Remote { .. } => "remote",
        }
    }
}

/// A server event addressed to one client
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub to: ActorId,
    pub event: ServerEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_common::NodeId;
    use serde_json::json;

    #[test]
    fn test_event_wire_shape() {
        let event = ServerEvent::Reject {
            seq: 3,
            reason: "stale".into(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "type": "reject", "seq": 3, "reason": "stale" })
        );
    }

    #[test]
    fn test_outbound_round_trip() {
        let out = OutboundOp {
            actor: ActorId(2),
            seq: 7,
            op: Op::set(NodeId::root(), "k", 1),
        };
        let text = serde_json::to_string(&out).unwrap();
        let back: OutboundOp = serde_json::from_str(&text).unwrap();
        assert_eq!(back, out);
    }
}
