//! # Backend Contract
//!
//! The `Backend` trait is the storage plugin contract: put, fetch, and query
//! nodes and edges for one store. Everything else a store does (handles,
//! the transaction mutex, contexts, action batches) lives in `Store`, so a
//! backend only has to get the records right.
//!
//! ## Backends
//!
//! - `VolatileBackend`: in-memory maps, keeps pending data pending
//! - `RedbBackend`: disk-backed ACID storage on redb

mod redb_backend;
mod volatile;

pub use redb_backend::RedbBackend;
pub use volatile::VolatileBackend;

use crate::primitives::{PUT_EDGE_ACTION, PUT_NODE_ACTION};
use crate::{EdgeTriple, GroveError, NodeId, Predicate, StoreEdge, StoreNode, TypeName};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// BACKEND TRAIT
// =============================================================================

/// Pluggable storage for the records of one store.
///
/// Fetches return clones: a caller mutating a fetched record never changes
/// what the backend holds. Absence is `Ok(None)`, not an error.
#[async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// Short name of the backend implementation, used in error messages.
    fn backend_type(&self) -> &'static str;

    /// Insert or replace a node.
    async fn put_node(&self, node: StoreNode) -> Result<(), GroveError>;

    /// Fetch a node by id.
    async fn fetch_node(&self, node_id: &NodeId) -> Result<Option<StoreNode>, GroveError>;

    /// Insert or replace an edge.
    async fn put_edge(&self, edge: StoreEdge) -> Result<(), GroveError>;

    /// Fetch an edge by its specifier.
    async fn fetch_edge(&self, triple: &EdgeTriple) -> Result<Option<StoreEdge>, GroveError>;

    /// All edges matching the query, in backend iteration order.
    async fn query_edges(&self, query: &EdgeQuery) -> Result<Vec<StoreEdge>, GroveError>;

    /// All nodes, optionally restricted to one type, in node id order.
    async fn list_nodes(&self, type_name: Option<&TypeName>)
    -> Result<Vec<StoreNode>, GroveError>;

    /// Every edge under any predicate, in identity order.
    async fn list_edges(&self) -> Result<Vec<StoreEdge>, GroveError>;
}

// =============================================================================
// EDGE QUERIES
// =============================================================================

/// Edge query: the predicate is required, subject and object narrow by
/// exact match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeQuery {
    pub predicate: Predicate,
    pub subject: Option<NodeId>,
    pub object: Option<NodeId>,
}

impl EdgeQuery {
    /// Query every edge with the predicate.
    #[must_use]
    pub fn new(predicate: impl Into<Predicate>) -> Self {
        Self {
            predicate: predicate.into(),
            subject: None,
            object: None,
        }
    }

    /// Narrow to edges leaving `subject`.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<NodeId>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Narrow to edges arriving at `object`.
    #[must_use]
    pub fn object(mut self, object: impl Into<NodeId>) -> Self {
        self.object = Some(object.into());
        self
    }

    /// Whether an edge specifier satisfies the query.
    #[must_use]
    pub fn matches(&self, triple: &EdgeTriple) -> bool {
        triple.predicate == self.predicate
            && self.subject.as_ref().is_none_or(|s| *s == triple.subject)
            && self.object.as_ref().is_none_or(|o| *o == triple.object)
    }
}

// =============================================================================
// ACTION BATCHES
// =============================================================================

/// One entry of an action batch: `{kind: "put node" | "put edge", record}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub kind: String,
    pub record: Value,
}

impl Action {
    /// A `put node` action.
    #[must_use]
    pub fn put_node(node_id: &NodeId, type_name: &TypeName, data: Value) -> Self {
        Self {
            kind: PUT_NODE_ACTION.to_string(),
            record: serde_json::json!({ "nodeId": node_id, "type": type_name, "data": data }),
        }
    }

    /// A `put edge` action.
    #[must_use]
    pub fn put_edge(triple: &EdgeTriple, data: Value) -> Self {
        Self {
            kind: PUT_EDGE_ACTION.to_string(),
            record: serde_json::json!({
                "subject": triple.subject,
                "predicate": triple.predicate,
                "object": triple.object,
                "data": data,
            }),
        }
    }
}

/// Record payload of a `put node` action.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct NodeAction {
    #[serde(rename = "nodeId")]
    pub node_id: NodeId,
    #[serde(rename = "type")]
    pub type_name: TypeName,
    #[serde(default)]
    pub data: Value,
}

/// Record payload of a `put edge` action.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EdgeAction {
    #[serde(flatten)]
    pub triple: EdgeTriple,
    #[serde(default)]
    pub data: Value,
}

/// A decoded action, ready to run.
#[derive(Debug, Clone)]
pub(crate) enum DecodedAction {
    PutNode(NodeAction),
    PutEdge(EdgeAction),
}

impl Action {
    /// Decode the action, rejecting unknown kinds on behalf of `backend`.
    pub(crate) fn decode(self, backend: &str) -> Result<DecodedAction, GroveError> {
        let invalid = |e: serde_json::Error| {
            GroveError::InvalidRecord(format!("'{}' action record: {}", self.kind, e))
        };
        match self.kind.as_str() {
            PUT_NODE_ACTION => serde_json::from_value(self.record.clone())
                .map(DecodedAction::PutNode)
                .map_err(invalid),
            PUT_EDGE_ACTION => serde_json::from_value(self.record.clone())
                .map(DecodedAction::PutEdge)
                .map_err(invalid),
            _ => Err(GroveError::UnknownAction {
                kind: self.kind.clone(),
                backend: backend.to_string(),
            }),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
