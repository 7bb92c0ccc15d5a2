//! # Volatile Backend
//!
//! In-memory record maps. Records are kept exactly as they were put, so
//! pending data stays pending and each fetch hands out a derived clone.
//! Maps are `BTreeMap`s: iteration order is identity order.

use super::{Backend, EdgeQuery};
use crate::{EdgeTriple, GroveError, NodeId, StoreEdge, StoreNode, TypeName};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Ephemeral backend holding records in memory.
#[derive(Debug, Default)]
pub struct VolatileBackend {
    nodes: RwLock<BTreeMap<NodeId, StoreNode>>,
    edges: RwLock<BTreeMap<String, StoreEdge>>,
}

impl VolatileBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    /// Number of stored edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.read().len()
    }
}

#[async_trait]
impl Backend for VolatileBackend {
    fn backend_type(&self) -> &'static str {
        "volatile"
    }

    async fn put_node(&self, node: StoreNode) -> Result<(), GroveError> {
        self.nodes.write().insert(node.node_id().clone(), node);
        Ok(())
    }

    async fn fetch_node(&self, node_id: &NodeId) -> Result<Option<StoreNode>, GroveError> {
        Ok(self.nodes.read().get(node_id).cloned())
    }

    async fn put_edge(&self, edge: StoreEdge) -> Result<(), GroveError> {
        self.edges.write().insert(edge.triple().identity(), edge);
        Ok(())
    }

    async fn fetch_edge(&self, triple: &EdgeTriple) -> Result<Option<StoreEdge>, GroveError> {
        Ok(self.edges.read().get(&triple.identity()).cloned())
    }

    async fn query_edges(&self, query: &EdgeQuery) -> Result<Vec<StoreEdge>, GroveError> {
        Ok(self
            .edges
            .read()
            .values()
            .filter(|edge| query.matches(edge.triple()))
            .cloned()
            .collect())
    }

    async fn list_nodes(
        &self,
        type_name: Option<&TypeName>,
    ) -> Result<Vec<StoreNode>, GroveError> {
        Ok(self
            .nodes
            .read()
            .values()
            .filter(|node| type_name.is_none_or(|t| node.type_name() == t))
            .cloned()
            .collect())
    }

    async fn list_edges(&self) -> Result<Vec<StoreEdge>, GroveError> {
        Ok(self.edges.read().values().cloned().collect())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::record::{RecordData, StoreRecord};
    use crate::StoreId;
    use serde_json::json;

    fn node(id: &str, type_name: &str) -> StoreNode {
        StoreNode::new(
            StoreId(1),
            NodeId::new(id),
            TypeName::new(type_name),
            json!({ "id": id }),
        )
    }

    #[tokio::test]
    async fn put_then_fetch_node() {
        let backend = VolatileBackend::new();
        backend.put_node(node("a", "User")).await.expect("put");

        let mut fetched = backend
            .fetch_node(&NodeId::new("a"))
            .await
            .expect("fetch")
            .expect("present");
        assert_eq!(fetched.data().await.expect("data"), json!({ "id": "a" }));
        assert_eq!(backend.node_count(), 1);
    }

    #[tokio::test]
    async fn absent_records_are_none() {
        let backend = VolatileBackend::new();
        assert!(backend.fetch_node(&NodeId::new("x")).await.expect("fetch").is_none());
        assert!(
            backend
                .fetch_edge(&EdgeTriple::new("a", "p", "b"))
                .await
                .expect("fetch")
                .is_none()
        );
    }

    #[tokio::test]
    async fn pending_records_stay_pending() {
        let backend = VolatileBackend::new();
        let (data, resolver) = RecordData::pending();
        backend
            .put_node(StoreNode::new(
                StoreId(1),
                NodeId::new("p"),
                TypeName::new("User"),
                data,
            ))
            .await
            .expect("put");

        let mut fetched = backend
            .fetch_node(&NodeId::new("p"))
            .await
            .expect("fetch")
            .expect("present");
        assert!(fetched.record_data().is_pending());

        resolver.resolve(json!({ "late": true }));
        assert_eq!(fetched.data().await.expect("data"), json!({ "late": true }));
    }

    #[tokio::test]
    async fn list_nodes_by_type() {
        let backend = VolatileBackend::new();
        backend.put_node(node("a", "User")).await.expect("put");
        backend.put_node(node("b", "Org")).await.expect("put");
        backend.put_node(node("c", "User")).await.expect("put");

        let users = backend
            .list_nodes(Some(&TypeName::new("User")))
            .await
            .expect("list");
        let ids: Vec<&str> = users.iter().map(|n| n.node_id().as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(backend.list_nodes(None).await.expect("list").len(), 3);
    }

    #[tokio::test]
    async fn edges_are_keyed_by_identity() {
        let backend = VolatileBackend::new();
        let triple = EdgeTriple::new("a", "p", "b");
        backend
            .put_edge(StoreEdge::new(StoreId(1), triple.clone(), json!(1)))
            .await
            .expect("put");
        backend
            .put_edge(StoreEdge::new(StoreId(1), triple.clone(), json!(2)))
            .await
            .expect("put");
        assert_eq!(backend.edge_count(), 1);

        let mut edge = backend
            .fetch_edge(&triple)
            .await
            .expect("fetch")
            .expect("present");
        assert_eq!(edge.data().await.expect("data"), json!(2));
    }
}
