//! # Canonical Export Module
//!
//! Deterministic, bit-exact serialization of a store's graph.
//!
//! Backends are free to iterate in any order and redb files are not
//! bit-identical across runs, so verification goes through this export:
//! nodes sorted by id, edges sorted by identity, payloads rendered through
//! their type's accessor (`export_data`) and framed with postcard.
//!
//! Every stored edge is exported, whether or not the engine declares its
//! predicate.

use crate::backend::Action;
use crate::primitives::{FORMAT_VERSION, MAGIC_BYTES, MAX_EXPORT_PAYLOAD_SIZE};
use crate::store::Store;
use crate::{GroveError, TypeName};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn serialization_error(context: &str, e: impl std::fmt::Display) -> GroveError {
    GroveError::SerializationError(format!("{}: {}", context, e))
}

// =============================================================================
// CANONICAL FORMAT
// =============================================================================

/// Header for canonical export files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalHeader {
    /// Magic bytes to identify the format.
    pub magic: [u8; 4],

    /// Format version for compatibility.
    pub version: u8,

    /// Engine the graph was exported from.
    pub engine: String,

    pub node_count: u64,
    pub edge_count: u64,

    /// XOR checksum of the data section.
    pub checksum: u64,
}

impl CanonicalHeader {
    #[must_use]
    pub fn new(engine: &str, node_count: u64, edge_count: u64, checksum: u64) -> Self {
        Self {
            magic: *MAGIC_BYTES,
            version: FORMAT_VERSION,
            engine: engine.to_string(),
            node_count,
            edge_count,
            checksum,
        }
    }

    /// Validate the header.
    ///
    /// Error messages stay generic and do not echo the offending bytes.
    pub fn validate(&self) -> Result<(), GroveError> {
        if &self.magic != MAGIC_BYTES {
            return Err(GroveError::SerializationError(
                "Invalid file format".to_string(),
            ));
        }
        if self.version != FORMAT_VERSION {
            return Err(GroveError::SerializationError(
                "Unsupported file version".to_string(),
            ));
        }
        Ok(())
    }
}

/// A node in canonical format. The payload is compact JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct CanonicalNode {
    pub node_id: String,
    pub type_name: String,
    pub data: String,
}

/// An edge in canonical format, sorted by identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct CanonicalEdge {
    pub identity: String,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub data: String,
}

/// A store's graph in canonical format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalGraph {
    pub nodes: Vec<CanonicalNode>,
    pub edges: Vec<CanonicalEdge>,
}

fn fold_str(mut hash: u64, s: &str, rotation: u32) -> u64 {
    for (i, byte) in s.bytes().enumerate() {
        hash ^= u64::from(byte).rotate_left(rotation.wrapping_add(i as u32) % 64);
    }
    hash.rotate_left(1)
}

impl CanonicalGraph {
    /// Snapshot a store in canonical order.
    pub async fn from_store(store: &Store) -> Result<Self, GroveError> {
        let engine = store.engine();

        let mut nodes = Vec::new();
        for mut node in store.list_nodes(None).await? {
            let raw = node.data().await?;
            let accessor = engine.accessor_for(node.type_name(), node.node_id().as_str())?;
            nodes.push(CanonicalNode {
                node_id: node.node_id().0.clone(),
                type_name: node.type_name().0.clone(),
                data: serde_json::to_string(&accessor.export_data(&raw))
                    .map_err(|e| serialization_error("Node data", e))?,
            });
        }
        nodes.sort();

        let mut edges = Vec::new();
        for mut edge in store.list_edges().await? {
            let data = edge.data().await?;
            let triple = edge.triple();
            edges.push(CanonicalEdge {
                identity: triple.identity(),
                subject: triple.subject.0.clone(),
                predicate: triple.predicate.0.clone(),
                object: triple.object.0.clone(),
                data: serde_json::to_string(&data)
                    .map_err(|e| serialization_error("Edge data", e))?,
            });
        }
        edges.sort();

        Ok(Self { nodes, edges })
    }

    /// Deterministic XOR checksum. Not a cryptographic hash.
    #[must_use]
    pub fn checksum(&self) -> u64 {
        let mut hash: u64 = 0;

        for node in &self.nodes {
            hash = fold_str(hash, &node.node_id, 13);
            hash = fold_str(hash, &node.type_name, 7);
            hash = fold_str(hash, &node.data, 29);
        }

        for edge in &self.edges {
            hash = fold_str(hash, &edge.identity, 17);
            hash = fold_str(hash, &edge.data, 5);
        }

        hash ^ (self.nodes.len() as u64).rotate_left(3) ^ (self.edges.len() as u64).rotate_left(11)
    }

    /// Write every node and edge into `store` as one action batch.
    pub async fn restore(&self, store: &Store) -> Result<usize, GroveError> {
        let mut actions = Vec::with_capacity(self.nodes.len() + self.edges.len());
        for node in &self.nodes {
            let data: Value = serde_json::from_str(&node.data)
                .map_err(|e| serialization_error("Node data", e))?;
            actions.push(Action::put_node(
                &node.node_id.as_str().into(),
                &TypeName::new(node.type_name.as_str()),
                data,
            ));
        }
        for edge in &self.edges {
            let data: Value = serde_json::from_str(&edge.data)
                .map_err(|e| serialization_error("Edge data", e))?;
            let triple = crate::EdgeTriple::new(
                edge.subject.as_str(),
                edge.predicate.as_str(),
                edge.object.as_str(),
            );
            actions.push(Action::put_edge(&triple, data));
        }
        store
            .transact_raw(move |s| Box::pin(async move { s.exec_action_batch(actions).await }))
            .await
    }
}

// =============================================================================
// EXPORT FUNCTIONS
// =============================================================================

/// Export a store to canonical postcard format.
///
/// Format:
/// ```text
/// [header_len: u32 LE] [CanonicalHeader (postcard)] [CanonicalGraph (postcard)]
/// ```
pub async fn export_canonical(store: &Store) -> Result<Vec<u8>, GroveError> {
    let canonical = CanonicalGraph::from_store(store).await?;
    encode(store.engine().key(), &canonical)
}

fn encode(engine: &str, canonical: &CanonicalGraph) -> Result<Vec<u8>, GroveError> {
    let header = CanonicalHeader::new(
        engine,
        canonical.nodes.len() as u64,
        canonical.edges.len() as u64,
        canonical.checksum(),
    );

    let header_bytes = postcard::to_allocvec(&header).map_err(|e| serialization_error("Header", e))?;
    let data_bytes = postcard::to_allocvec(canonical).map_err(|e| serialization_error("Data", e))?;

    let mut result = Vec::with_capacity(4 + header_bytes.len() + data_bytes.len());
    result.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    result.extend_from_slice(&header_bytes);
    result.extend_from_slice(&data_bytes);
    Ok(result)
}

/// Decode a canonical export, checking header, counts and checksum.
pub fn import_canonical(data: &[u8]) -> Result<(CanonicalHeader, CanonicalGraph), GroveError> {
    if data.len() > MAX_EXPORT_PAYLOAD_SIZE {
        return Err(GroveError::SerializationError(format!(
            "Export of {} bytes exceeds maximum allowed {}",
            data.len(),
            MAX_EXPORT_PAYLOAD_SIZE
        )));
    }
    let Some((len_bytes, rest)) = data.split_first_chunk::<4>() else {
        return Err(GroveError::SerializationError("Data too short".to_string()));
    };
    let header_len = u32::from_le_bytes(*len_bytes) as usize;
    if rest.len() < header_len {
        return Err(GroveError::SerializationError(
            "Data too short for header".to_string(),
        ));
    }
    let (header_bytes, data_bytes) = rest.split_at(header_len);

    let header: CanonicalHeader =
        postcard::from_bytes(header_bytes).map_err(|e| serialization_error("Header", e))?;
    header.validate()?;

    let canonical: CanonicalGraph =
        postcard::from_bytes(data_bytes).map_err(|e| serialization_error("Data", e))?;

    let computed = canonical.checksum();
    if computed != header.checksum {
        return Err(GroveError::SerializationError(format!(
            "Checksum mismatch: expected {}, got {}",
            header.checksum, computed
        )));
    }
    if canonical.nodes.len() as u64 != header.node_count {
        return Err(GroveError::SerializationError("Node count mismatch".to_string()));
    }
    if canonical.edges.len() as u64 != header.edge_count {
        return Err(GroveError::SerializationError("Edge count mismatch".to_string()));
    }
    Ok((header, canonical))
}

/// Whether a store currently matches a canonical export.
pub async fn verify_canonical(store: &Store, data: &[u8]) -> Result<bool, GroveError> {
    let (header, imported) = import_canonical(data)?;
    if header.engine != store.engine().key() {
        return Ok(false);
    }
    Ok(CanonicalGraph::from_store(store).await? == imported)
}

/// Canonical checksum of a store, for quick equality checks.
pub async fn canonical_checksum(store: &Store) -> Result<u64, GroveError> {
    Ok(CanonicalGraph::from_store(store).await?.checksum())
}

/// BLAKE3 hash of the canonical export, as 64 hex characters.
#[cfg(feature = "crypto-hash")]
pub async fn canonical_crypto_hash(store: &Store) -> Result<String, GroveError> {
    let data = export_canonical(store).await?;
    Ok(blake3::hash(&data).to_hex().to_string())
}

// =============================================================================
// TESTS
// =============================================================================
