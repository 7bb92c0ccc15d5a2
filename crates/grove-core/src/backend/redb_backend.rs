//! # redb-backed Storage
//!
//! A disk-backed backend using the redb embedded database, providing:
//! - ACID transactions (one write transaction per put)
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! Records are framed with postcard. The JSON payload travels inside the
//! frame as a string because postcard is not self-describing. Pending data
//! is resolved before it is written: a persisted record is always resolved.

use super::{Backend, EdgeQuery};
use crate::primitives::EDGE_ID_SEPARATOR;
use crate::{EdgeTriple, GroveError, NodeId, Predicate, StoreEdge, StoreId, StoreNode, TypeName};
use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Table for nodes: node id -> postcard `NodeFrame`
const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Table for edges: edge identity -> postcard `EdgeFrame`
const EDGES: TableDefinition<&str, &[u8]> = TableDefinition::new("edges");

/// Predicate index: `<encoded predicate>|<edge identity>` -> ()
///
/// Encoded components never contain `}`, so `<encoded predicate>}` is an
/// exclusive upper bound for one predicate's keys.
const EDGES_BY_PREDICATE: TableDefinition<&str, ()> = TableDefinition::new("edges_by_predicate");

#[derive(Debug, Serialize, Deserialize)]
struct NodeFrame {
    type_name: String,
    payload: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct EdgeFrame {
    subject: String,
    predicate: String,
    object: String,
    payload: String,
}

fn io_error(e: impl std::fmt::Display) -> GroveError {
    GroveError::IoError(e.to_string())
}

fn serialization_error(e: impl std::fmt::Display) -> GroveError {
    GroveError::SerializationError(e.to_string())
}

/// The index key prefix of a predicate: its identity component plus the separator.
fn predicate_prefix(predicate: &Predicate) -> String {
    // The middle component of any triple's identity is the encoded predicate.
    let probe = EdgeTriple::new("", predicate.clone(), "").identity();
    let encoded = probe.trim_matches(EDGE_ID_SEPARATOR);
    format!("{}{}", encoded, EDGE_ID_SEPARATOR)
}

/// A persistent backend on redb.
pub struct RedbBackend {
    db: Database,
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend").finish_non_exhaustive()
    }
}

impl RedbBackend {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GroveError> {
        let db = Database::create(path.as_ref()).map_err(io_error)?;

        // Initialize tables if they don't exist
        let write_txn = db.begin_write().map_err(io_error)?;
        {
            let _ = write_txn.open_table(NODES).map_err(io_error)?;
            let _ = write_txn.open_table(EDGES).map_err(io_error)?;
            let _ = write_txn.open_table(EDGES_BY_PREDICATE).map_err(io_error)?;
        }
        write_txn.commit().map_err(io_error)?;

        tracing::debug!(path = %path.as_ref().display(), "opened redb backend");
        Ok(Self { db })
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), GroveError> {
        self.db.compact().map_err(io_error)?;
        Ok(())
    }

    /// Number of stored nodes.
    pub fn node_count(&self) -> Result<usize, GroveError> {
        let read_txn = self.db.begin_read().map_err(io_error)?;
        let table = read_txn.open_table(NODES).map_err(io_error)?;
        Ok(table.len().map_err(io_error)? as usize)
    }

    /// Number of stored edges.
    pub fn edge_count(&self) -> Result<usize, GroveError> {
        let read_txn = self.db.begin_read().map_err(io_error)?;
        let table = read_txn.open_table(EDGES).map_err(io_error)?;
        Ok(table.len().map_err(io_error)? as usize)
    }

    fn decode_node(node_id: &str, bytes: &[u8]) -> Result<StoreNode, GroveError> {
        let frame: NodeFrame = postcard::from_bytes(bytes).map_err(serialization_error)?;
        let payload: Value = serde_json::from_str(&frame.payload).map_err(serialization_error)?;
        Ok(StoreNode::new(
            StoreId::UNBOUND,
            NodeId::new(node_id),
            TypeName::new(frame.type_name),
            payload,
        ))
    }

    fn decode_edge(bytes: &[u8]) -> Result<StoreEdge, GroveError> {
        let frame: EdgeFrame = postcard::from_bytes(bytes).map_err(serialization_error)?;
        let payload: Value = serde_json::from_str(&frame.payload).map_err(serialization_error)?;
        Ok(StoreEdge::new(
            StoreId::UNBOUND,
            EdgeTriple::new(frame.subject, frame.predicate, frame.object),
            payload,
        ))
    }
}

#[async_trait]
impl Backend for RedbBackend {
    fn backend_type(&self) -> &'static str {
        "redb"
    }

    async fn put_node(&self, mut node: StoreNode) -> Result<(), GroveError> {
        let payload = node.data().await?;
        let frame = NodeFrame {
            type_name: node.type_name().0.clone(),
            payload: serde_json::to_string(&payload).map_err(serialization_error)?,
        };
        let bytes = postcard::to_allocvec(&frame).map_err(serialization_error)?;

        let write_txn = self.db.begin_write().map_err(io_error)?;
        {
            let mut nodes_table = write_txn.open_table(NODES).map_err(io_error)?;
            nodes_table
                .insert(node.node_id().as_str(), bytes.as_slice())
                .map_err(io_error)?;
        }
        write_txn.commit().map_err(io_error)?;
        Ok(())
    }

    async fn fetch_node(&self, node_id: &NodeId) -> Result<Option<StoreNode>, GroveError> {
        let read_txn = self.db.begin_read().map_err(io_error)?;
        let nodes_table = read_txn.open_table(NODES).map_err(io_error)?;

        match nodes_table.get(node_id.as_str()).map_err(io_error)? {
            Some(bytes) => Ok(Some(Self::decode_node(node_id.as_str(), bytes.value())?)),
            None => Ok(None),
        }
    }

    async fn put_edge(&self, mut edge: StoreEdge) -> Result<(), GroveError> {
        let payload = edge.data().await?;
        let triple = edge.triple();
        let frame = EdgeFrame {
            subject: triple.subject.0.clone(),
            predicate: triple.predicate.0.clone(),
            object: triple.object.0.clone(),
            payload: serde_json::to_string(&payload).map_err(serialization_error)?,
        };
        let bytes = postcard::to_allocvec(&frame).map_err(serialization_error)?;
        let identity = triple.identity();
        let index_key = format!("{}{}", predicate_prefix(&triple.predicate), identity);

        let write_txn = self.db.begin_write().map_err(io_error)?;
        {
            let mut edges_table = write_txn.open_table(EDGES).map_err(io_error)?;
            edges_table
                .insert(identity.as_str(), bytes.as_slice())
                .map_err(io_error)?;
        }
        {
            let mut index_table = write_txn.open_table(EDGES_BY_PREDICATE).map_err(io_error)?;
            index_table
                .insert(index_key.as_str(), ())
                .map_err(io_error)?;
        }
        write_txn.commit().map_err(io_error)?;
        Ok(())
    }

    async fn fetch_edge(&self, triple: &EdgeTriple) -> Result<Option<StoreEdge>, GroveError> {
        let read_txn = self.db.begin_read().map_err(io_error)?;
        let edges_table = read_txn.open_table(EDGES).map_err(io_error)?;

        match edges_table
            .get(triple.identity().as_str())
            .map_err(io_error)?
        {
            Some(bytes) => Ok(Some(Self::decode_edge(bytes.value())?)),
            None => Ok(None),
        }
    }

    async fn query_edges(&self, query: &EdgeQuery) -> Result<Vec<StoreEdge>, GroveError> {
        let prefix = predicate_prefix(&query.predicate);
        let upper = format!("{}}}", prefix.trim_end_matches(EDGE_ID_SEPARATOR));

        let read_txn = self.db.begin_read().map_err(io_error)?;
        let index_table = read_txn.open_table(EDGES_BY_PREDICATE).map_err(io_error)?;
        let edges_table = read_txn.open_table(EDGES).map_err(io_error)?;

        let mut edges = Vec::new();
        for entry in index_table
            .range(prefix.as_str()..upper.as_str())
            .map_err(io_error)?
        {
            let (key, _) = entry.map_err(io_error)?;
            let identity = &key.value()[prefix.len()..];
            let Some(bytes) = edges_table.get(identity).map_err(io_error)? else {
                continue;
            };
            let edge = Self::decode_edge(bytes.value())?;
            if query.matches(edge.triple()) {
                edges.push(edge);
            }
        }
        Ok(edges)
    }

    async fn list_nodes(
        &self,
        type_name: Option<&TypeName>,
    ) -> Result<Vec<StoreNode>, GroveError> {
        let read_txn = self.db.begin_read().map_err(io_error)?;
        let nodes_table = read_txn.open_table(NODES).map_err(io_error)?;

        let mut nodes = Vec::new();
        for entry in nodes_table.iter().map_err(io_error)? {
            let (key, value) = entry.map_err(io_error)?;
            let node = Self::decode_node(key.value(), value.value())?;
            if type_name.is_none_or(|t| node.type_name() == t) {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    async fn list_edges(&self) -> Result<Vec<StoreEdge>, GroveError> {
        let read_txn = self.db.begin_read().map_err(io_error)?;
        let edges_table = read_txn.open_table(EDGES).map_err(io_error)?;

        let mut edges = Vec::new();
        for entry in edges_table.iter().map_err(io_error)? {
            let (_, value) = entry.map_err(io_error)?;
            edges.push(Self::decode_edge(value.value())?);
        }
        Ok(edges)
    }
}

// =============================================================================
// TESTS
// =============================================================================
