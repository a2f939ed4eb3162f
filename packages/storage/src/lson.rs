//! # Value model
//!
//! [`Lson`] is what a child slot holds once a value is inside a pool: either a
//! plain JSON value or a reference to another live node. [`Draft`] is what
//! callers hand to a mutation: JSON, a freshly built (detached) structure that
//! the pool will attach, or a handle to an already attached node.

use canopy_common::{NodeId, NodeKind};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Address of a child slot: a field name for objects and maps, a position
/// for lists
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChildKey {
    Index(usize),
    Field(String),
}

impl ChildKey {
    pub fn as_field(&self) -> Option<&str> {
        match self {
            ChildKey::Field(f) => Some(f),
            ChildKey::Index(_) => None,
        }
    }

    pub fn as_index(&self) -> Option<usize> {
        match self {
            ChildKey::Index(i) => Some(*i),
            ChildKey::Field(_) => None,
        }
    }
}

impl fmt::Display for ChildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildKey::Index(i) => write!(f, "[{}]", i),
            ChildKey::Field(name) => write!(f, "{:?}", name),
        }
    }
}

impl From<&str> for ChildKey {
    fn from(s: &str) -> Self {
        ChildKey::Field(s.to_string())
    }
}

impl From<String> for ChildKey {
    fn from(s: String) -> Self {
        ChildKey::Field(s)
    }
}

impl From<usize> for ChildKey {
    fn from(i: usize) -> Self {
        ChildKey::Index(i)
    }
}

/// A stored child value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Lson {
    Json(Value),
    Node(NodeId),
}

impl Lson {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Lson::Json(v) => Some(v),
            Lson::Node(_) => None,
        }
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Lson::Node(id) => Some(*id),
            Lson::Json(_) => None,
        }
    }
}

impl From<Value> for Lson {
    fn from(v: Value) -> Self {
        Lson::Json(v)
    }
}

impl From<NodeId> for Lson {
    fn from(id: NodeId) -> Self {
        Lson::Node(id)
    }
}

/// Input value for a mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Draft {
    Json(Value),
    Live(DraftNode),
    /// An existing attached node. Attaching is one-time, so this only ever
    /// surfaces cycle or double-attach errors.
    Attach(NodeId),
}

/// A detached structure waiting to be attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftNode {
    /// Preassigned id; recorded operations always carry one so replay
    /// recreates the same nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<NodeId>,
    pub body: DraftBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DraftBody {
    Object(IndexMap<String, Draft>),
    List(Vec<Draft>),
    Map(IndexMap<String, Draft>),
}

impl DraftBody {
    pub fn kind(&self) -> NodeKind {
        match self {
            DraftBody::Object(_) => NodeKind::Object,
            DraftBody::List(_) => NodeKind::List,
            DraftBody::Map(_) => NodeKind::Map,
        }
    }

    /// Nested drafts in child order
    pub fn children(&self) -> Box<dyn Iterator<Item = &Draft> + '_> {
        match self {
            DraftBody::Object(fields) | DraftBody::Map(fields) => Box::new(fields.values()),
            DraftBody::List(items) => Box::new(items.iter()),
        }
    }
}

impl Draft {
    pub fn json(value: impl Into<Value>) -> Self {
        Draft::Json(value.into())
    }

    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Draft)>) -> Self {
        Draft::Live(DraftNode {
            id: None,
            body: DraftBody::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        })
    }

    pub fn list(items: impl IntoIterator<Item = Draft>) -> Self {
        Draft::Live(DraftNode {
            id: None,
            body: DraftBody::List(items.into_iter().collect()),
        })
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Draft)>) -> Self {
        Draft::Live(DraftNode {
            id: None,
            body: DraftBody::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        })
    }

    /// Kind of live structure this draft creates, if any
    pub fn kind(&self) -> Option<NodeKind> {
        match self {
            Draft::Live(node) => Some(node.body.kind()),
            Draft::Json(_) | Draft::Attach(_) => None,
        }
    }

    /// Id of the structure at the top of this draft, if it has one
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            Draft::Live(node) => node.id,
            Draft::Attach(id) => Some(*id),
            Draft::Json(_) => None,
        }
    }

    /// Whether every structure in this draft already has an id
    pub fn is_resolved(&self) -> bool {
        match self {
            Draft::Json(_) | Draft::Attach(_) => true,
            Draft::Live(node) => node.id.is_some() && node.body.children().all(Draft::is_resolved),
        }
    }

    /// Every preassigned id in this draft, depth first
    pub fn ids(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        collect_ids(self, &mut out);
        out
    }
}

fn collect_ids(draft: &Draft, out: &mut Vec<NodeId>) {
    if let Draft::Live(node) = draft {
        if let Some(id) = node.id {
            out.push(id);
        }
        for child in node.body.children() {
            collect_ids(child, out);
        }
    }
}

impl From<Value> for Draft {
    fn from(v: Value) -> Self {
        Draft::Json(v)
    }
}

impl From<&str> for Draft {
    fn from(s: &str) -> Self {
        Draft::Json(Value::from(s))
    }
}

impl From<String> for Draft {
    fn from(s: String) -> Self {
        Draft::Json(Value::from(s))
    }
}

impl From<i64> for Draft {
    fn from(n: i64) -> Self {
        Draft::Json(Value::from(n))
    }
}

impl From<i32> for Draft {
    fn from(n: i32) -> Self {
        Draft::Json(Value::from(n))
    }
}

impl From<f64> for Draft {
    fn from(n: f64) -> Self {
        Draft::Json(Value::from(n))
    }
}

impl From<bool> for Draft {
    fn from(b: bool) -> Self {
        Draft::Json(Value::from(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_common::ActorId;
    use serde_json::json;

    #[test]
    fn test_draft_builders() {
        let draft = Draft::object([
            ("title", Draft::from("todo")),
            ("items", Draft::list([Draft::from(1), Draft::from(2)])),
        ]);
        assert_eq!(draft.kind(), Some(NodeKind::Object));
        assert_eq!(draft.node_id(), None);

        let Draft::Live(node) = &draft else {
            panic!("expected live draft");
        };
        assert_eq!(node.body.children().count(), 2);
    }

    #[test]
    fn test_ids_collects_nested() {
        let a = NodeId::new(NodeKind::Object, ActorId(1), 1, 0);
        let b = NodeId::new(NodeKind::List, ActorId(1), 1, 1);
        let draft = Draft::Live(DraftNode {
            id: Some(a),
            body: DraftBody::Object(
                [(
                    "list".to_string(),
                    Draft::Live(DraftNode {
                        id: Some(b),
                        body: DraftBody::List(vec![]),
                    }),
                )]
                .into_iter()
                .collect(),
            ),
        });
        assert_eq!(draft.ids(), vec![a, b]);
        assert!(draft.is_resolved());
        assert!(!Draft::list([Draft::from(1)]).is_resolved());
    }

    #[test]
    fn test_child_key_serde_is_untagged() {
        assert_eq!(serde_json::to_value(ChildKey::from(3usize)).unwrap(), json!(3));
        assert_eq!(serde_json::to_value(ChildKey::from("k")).unwrap(), json!("k"));
        let back: ChildKey = serde_json::from_value(json!("name")).unwrap();
        assert_eq!(back, ChildKey::Field("name".into()));
    }

    #[test]
    fn test_lson_markers() {
        let id = NodeId::new(NodeKind::Map, ActorId(2), 3, 0);
        let value = serde_json::to_value(Lson::Node(id)).unwrap();
        assert_eq!(value, json!({ "node": "M3:0@2" }));
        assert_eq!(
            serde_json::to_value(Lson::Json(json!([1, 2]))).unwrap(),
            json!({ "json": [1, 2] })
        );
    }
}
