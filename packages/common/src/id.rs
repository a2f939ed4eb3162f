//! # Node identifiers
//!
//! Every live structure is addressed by a [`NodeId`] minted from an
//! [`IdGenerator`]. An id packs four things:
//!
//! ```text
//!   L  12 : 3 @ 7
//!   │   │   │   └── actor (connection that created the node)
//!   │   │   └────── batch sub-sequence
//!   │   └────────── pool sequence (one step per outer mutation)
//!   └────────────── kind prefix (O = object, L = list, M = map)
//! ```
//!
//! The pool sequence gives a total creation order per actor; the actor makes
//! ids unique across clients editing the same document.

use crate::error::{IdError, IdResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

const ROOT: &str = "root";

/// Structural kind of a live node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Object,
    List,
    Map,
}

impl NodeKind {
    pub fn prefix(self) -> char {
        match self {
            NodeKind::Object => 'O',
            NodeKind::List => 'L',
            NodeKind::Map => 'M',
        }
    }

    pub fn from_prefix(c: char) -> IdResult<Self> {
        match c {
            'O' => Ok(NodeKind::Object),
            'L' => Ok(NodeKind::List),
            'M' => Ok(NodeKind::Map),
            other => Err(IdError::UnknownKind(other)),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Object => write!(f, "object"),
            NodeKind::List => write!(f, "list"),
            NodeKind::Map => write!(f, "map"),
        }
    }
}

/// Identity of one connected client. `0` is reserved for the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ActorId(pub u32);

impl ActorId {
    pub const SERVER: ActorId = ActorId(0);
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique node id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct NodeId {
    kind: NodeKind,
    actor: ActorId,
    seq: u64,
    sub: u32,
}

impl NodeId {
    pub const fn new(kind: NodeKind, actor: ActorId, seq: u64, sub: u32) -> Self {
        Self {
            kind,
            actor,
            seq,
            sub,
        }
    }

    /// The document root. Always an object, never minted by a generator.
    pub const fn root() -> Self {
        Self::new(NodeKind::Object, ActorId::SERVER, 0, 0)
    }

    pub fn is_root(&self) -> bool {
        *self == Self::root()
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn actor(&self) -> ActorId {
        self.actor
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn sub(&self) -> u32 {
        self.sub
    }
}

impl Ord for NodeId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.seq
            .cmp(&other.seq)
            .then(self.sub.cmp(&other.sub))
            .then(self.actor.cmp(&other.actor))
            .then(self.kind.cmp(&other.kind))
    }
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str(ROOT);
        }
        write!(
            f,
            "{}{}:{}@{}",
            self.kind.prefix(),
            self.seq,
            self.sub,
            self.actor
        )
    }
}

impl FromStr for NodeId {
    type Err = IdError;

    fn from_str(s: &str) -> IdResult<Self> {
        if s == ROOT {
            return Ok(Self::root());
        }
        let mut chars = s.chars();
        let kind = NodeKind::from_prefix(chars.next().ok_or(IdError::Empty)?)?;
        let rest = chars.as_str();

        let (counters, actor) = rest
            .split_once('@')
            .ok_or_else(|| IdError::Malformed(s.to_string()))?;
        let (seq, sub) = counters
            .split_once(':')
            .ok_or_else(|| IdError::Malformed(s.to_string()))?;

        Ok(Self::new(
            kind,
            ActorId(actor.parse()?),
            seq.parse()?,
            sub.parse()?,
        ))
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for NodeId {
    type Error = IdError;

    fn try_from(s: String) -> IdResult<Self> {
        s.parse()
    }
}

/// Per-actor id allocator.
///
/// The outer sequence advances once per batch and the sub-sequence counts ids
/// handed out inside that batch. A batch is one outer mutation call: callers
/// bracket it with [`begin_batch`](Self::begin_batch) /
/// [`end_batch`](Self::end_batch). An id requested outside any batch is a
/// batch of its own.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    actor: ActorId,
    seq: u64,
    sub: u32,
    depth: u32,
}

impl IdGenerator {
    pub fn new(actor: ActorId) -> Self {
        Self {
            actor,
            seq: 0,
            sub: 0,
            depth: 0,
        }
    }

    pub fn actor(&self) -> ActorId {
        self.actor
    }

    /// Last outer sequence handed out
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Open a batch. Nested calls join the outermost batch.
    pub fn begin_batch(&mut self) {
        if self.depth == 0 {
            self.seq += 1;
            self.sub = 0;
        }
        self.depth += 1;
    }

    pub fn end_batch(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn in_batch(&self) -> bool {
        self.depth > 0
    }

    /// Run `f` inside one batch
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.begin_batch();
        let out = f(self);
        self.end_batch();
        out
    }

    pub fn next_id(&mut self, kind: NodeKind) -> NodeId {
        if self.depth == 0 {
            self.seq += 1;
            self.sub = 0;
            return NodeId::new(kind, self.actor, self.seq, 0);
        }
        let id = NodeId::new(kind, self.actor, self.seq, self.sub);
        self.sub += 1;
        id
    }

    /// Make sure an id already present in the document is never reissued
    pub fn observe(&mut self, id: &NodeId) {
        if id.actor != self.actor || id.is_root() {
            return;
        }
        if id.seq > self.seq {
            self.seq = id.seq;
            self.sub = id.sub + 1;
        } else if id.seq == self.seq && id.sub >= self.sub {
            self.sub = id.sub + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_shares_outer_sequence() {
        let mut gen = IdGenerator::new(ActorId(3));
        gen.next_id(NodeKind::Object);

        let ids = gen.batch(|g| {
            (0..3)
                .map(|_| g.next_id(NodeKind::List))
                .collect::<Vec<_>>()
        });

        let n = ids[0].seq();
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(id.seq(), n);
            assert_eq!(id.sub(), i as u32);
            assert_eq!(id.to_string(), format!("L{}:{}@3", n, i));
        }
    }

    #[test]
    fn test_unbatched_calls_advance_outer_sequence() {
        let mut gen = IdGenerator::new(ActorId(1));
        let a = gen.next_id(NodeKind::Map);
        let b = gen.next_id(NodeKind::Map);
        assert_eq!(a.seq() + 1, b.seq());
        assert_eq!(a.sub(), 0);
        assert_eq!(b.sub(), 0);
        assert!(a < b);
    }

    #[test]
    fn test_nested_batches_join_outer() {
        let mut gen = IdGenerator::new(ActorId(1));
        gen.begin_batch();
        let a = gen.next_id(NodeKind::Object);
        gen.begin_batch();
        let b = gen.next_id(NodeKind::Object);
        gen.end_batch();
        let c = gen.next_id(NodeKind::Object);
        gen.end_batch();

        assert_eq!(a.seq(), b.seq());
        assert_eq!(b.seq(), c.seq());
        assert_eq!(c.sub(), 2);
        assert!(!gen.in_batch());
    }

    #[test]
    fn test_display_round_trip() {
        let id = NodeId::new(NodeKind::Object, ActorId(9), 41, 2);
        assert_eq!(id.to_string(), "O41:2@9");
        assert_eq!("O41:2@9".parse::<NodeId>().unwrap(), id);
        assert_eq!("root".parse::<NodeId>().unwrap(), NodeId::root());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<NodeId>(), Err(IdError::Empty));
        assert_eq!("X1:0@1".parse::<NodeId>(), Err(IdError::UnknownKind('X')));
        assert!(matches!("O1-0".parse::<NodeId>(), Err(IdError::Malformed(_))));
        assert!(matches!("Oa:0@1".parse::<NodeId>(), Err(IdError::Malformed(_))));
    }

    #[test]
    fn test_serde_as_string() {
        let id = NodeId::new(NodeKind::List, ActorId(2), 5, 0);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"L5:0@2\"");
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_observe_skips_past_existing_ids() {
        let mut gen = IdGenerator::new(ActorId(4));
        gen.observe(&NodeId::new(NodeKind::Object, ActorId(4), 10, 0));
        gen.observe(&NodeId::new(NodeKind::Object, ActorId(5), 99, 0));
        let next = gen.next_id(NodeKind::Object);
        assert_eq!(next.seq(), 11);
    }

    #[test]
    fn test_ordering_uses_sequence_first() {
        let early = NodeId::new(NodeKind::Object, ActorId(9), 1, 5);
        let late = NodeId::new(NodeKind::Object, ActorId(1), 2, 0);
        assert!(early < late);
        let tie_a = NodeId::new(NodeKind::Object, ActorId(1), 2, 0);
        let tie_b = NodeId::new(NodeKind::Object, ActorId(2), 2, 0);
        assert!(tie_a < tie_b);
    }
}
