//! # Record Model
//!
//! Stored records pair an immutable specifier with record data.
//!
//! Record data is either `Resolved` or `Pending`. A pending value settles
//! exactly once (through a `PendingResolver` or a spawned future) and every
//! consumer must call `resolve().await` before touching fields. Reads always
//! hand out deep copies, so no two readers alias the same payload.

use crate::{EdgeTriple, GroveError, NodeId, StoreId, TypeName};
use serde_json::{Value, json};
use std::fmt;
use std::future::Future;
use tokio::sync::watch;

type Settled = Option<Result<Value, String>>;

// =============================================================================
// RECORD DATA
// =============================================================================

/// Payload of a stored record.
pub enum RecordData {
    /// The payload is available.
    Resolved(Value),
    /// The payload is still being computed.
    Pending(PendingData),
}

/// Handle on a not-yet-settled payload.
///
/// Cloning the handle yields a derived handle: each clone resolves to its
/// own copy of the settled value.
#[derive(Clone)]
pub struct PendingData {
    rx: watch::Receiver<Settled>,
}

/// Settles a pending payload.
///
/// Dropping the resolver without settling makes every waiter fail with
/// `GroveError::PendingFailed`.
pub struct PendingResolver {
    tx: watch::Sender<Settled>,
}

impl PendingResolver {
    /// Settle the payload with a value.
    pub fn resolve(self, value: Value) {
        // No receivers left means nobody is waiting.
        let _ = self.tx.send(Some(Ok(value)));
    }

    /// Settle the payload with a failure.
    pub fn fail(self, reason: impl Into<String>) {
        let _ = self.tx.send(Some(Err(reason.into())));
    }
}

impl PendingData {
    async fn wait(&mut self) -> Result<Value, GroveError> {
        loop {
            let settled = self.rx.borrow_and_update().clone();
            if let Some(outcome) = settled {
                return outcome.map_err(GroveError::PendingFailed);
            }
            self.rx.changed().await.map_err(|_| {
                GroveError::PendingFailed("resolver dropped before settling".to_string())
            })?;
        }
    }

    fn peek(&self) -> Option<Value> {
        match &*self.rx.borrow() {
            Some(Ok(value)) => Some(value.clone()),
            _ => None,
        }
    }
}

impl RecordData {
    /// Create resolved data.
    #[must_use]
    pub fn resolved(value: Value) -> Self {
        Self::Resolved(value)
    }

    /// Create pending data and the resolver that settles it.
    #[must_use]
    pub fn pending() -> (Self, PendingResolver) {
        let (tx, rx) = watch::channel(None);
        (Self::Pending(PendingData { rx }), PendingResolver { tx })
    }

    /// Create pending data computed by a future on the current tokio runtime.
    /// Fails with `PendingFailed` when called outside a runtime.
    pub fn from_future<F>(future: F) -> Result<Self, GroveError>
    where
        F: Future<Output = Result<Value, GroveError>> + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| GroveError::PendingFailed(format!("no runtime to compute data: {}", e)))?;
        let (data, resolver) = Self::pending();
        runtime.spawn(async move {
            match future.await {
                Ok(value) => resolver.resolve(value),
                Err(e) => resolver.fail(e.to_string()),
            }
        });
        Ok(data)
    }

    /// Whether the data is still in the pending state.
    ///
    /// Data that settled but was not yet resolved in place still counts
    /// as pending.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Wait for the data to settle and replace it in place.
    pub async fn resolve(&mut self) -> Result<&Value, GroveError> {
        if let Self::Pending(pending) = self {
            let value = pending.wait().await?;
            *self = Self::Resolved(value);
        }
        match &*self {
            Self::Resolved(value) => Ok(value),
            Self::Pending(_) => Err(GroveError::PendingFailed(
                "record data did not settle".to_string(),
            )),
        }
    }

    /// Deep copy of the payload if it is available without waiting.
    #[must_use]
    pub fn snapshot(&self) -> Option<Value> {
        match self {
            Self::Resolved(value) => Some(value.clone()),
            Self::Pending(pending) => pending.peek(),
        }
    }
}

impl Clone for RecordData {
    fn clone(&self) -> Self {
        match self {
            Self::Resolved(value) => Self::Resolved(value.clone()),
            Self::Pending(pending) => Self::Pending(pending.clone()),
        }
    }
}

impl fmt::Debug for RecordData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved(value) => f.debug_tuple("Resolved").field(value).finish(),
            Self::Pending(_) => f.write_str("Pending"),
        }
    }
}

impl From<Value> for RecordData {
    fn from(value: Value) -> Self {
        Self::Resolved(value)
    }
}

// =============================================================================
// STORE RECORDS
// =============================================================================

/// Common view over stored nodes and edges.
pub trait StoreRecord {
    /// Handle of the store the record was read from or written to.
    fn store_id(&self) -> StoreId;

    /// Identity string of the record.
    fn identity(&self) -> String;

    /// The identity-defining fields as JSON.
    fn specifier(&self) -> Value;

    /// The record payload.
    fn record_data(&self) -> &RecordData;

    /// Mutable access to the payload, used to resolve it in place.
    fn record_data_mut(&mut self) -> &mut RecordData;

    /// Deep copy of the payload if it is available without waiting.
    fn data_now(&self) -> Option<Value> {
        self.record_data().snapshot()
    }
}

/// A stored node. Identity is the node id.
#[derive(Debug, Clone)]
pub struct StoreNode {
    store_id: StoreId,
    node_id: NodeId,
    type_name: TypeName,
    data: RecordData,
}

impl StoreNode {
    /// Create a node record.
    #[must_use]
    pub fn new(
        store_id: StoreId,
        node_id: NodeId,
        type_name: TypeName,
        data: impl Into<RecordData>,
    ) -> Self {
        Self {
            store_id,
            node_id,
            type_name,
            data: data.into(),
        }
    }

    /// The node id.
    #[must_use]
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// The declared type.
    #[must_use]
    pub fn type_name(&self) -> &TypeName {
        &self.type_name
    }

    /// Resolve the payload and return a deep copy of it.
    pub async fn data(&mut self) -> Result<Value, GroveError> {
        self.data.resolve().await.cloned()
    }

    /// Re-home the record under another store handle.
    #[must_use]
    pub fn in_store(mut self, store_id: StoreId) -> Self {
        self.store_id = store_id;
        self
    }
}

impl StoreRecord for StoreNode {
    fn store_id(&self) -> StoreId {
        self.store_id
    }

    fn identity(&self) -> String {
        self.node_id.0.clone()
    }

    fn specifier(&self) -> Value {
        json!({ "nodeId": self.node_id, "type": self.type_name })
    }

    fn record_data(&self) -> &RecordData {
        &self.data
    }

    fn record_data_mut(&mut self) -> &mut RecordData {
        &mut self.data
    }
}

/// A stored edge. Identity is the encoded triple.
#[derive(Debug, Clone)]
pub struct StoreEdge {
    store_id: StoreId,
    triple: EdgeTriple,
    data: RecordData,
}

impl StoreEdge {
    /// Create an edge record.
    #[must_use]
    pub fn new(store_id: StoreId, triple: EdgeTriple, data: impl Into<RecordData>) -> Self {
        Self {
            store_id,
            triple,
            data: data.into(),
        }
    }

    /// The edge specifier.
    #[must_use]
    pub fn triple(&self) -> &EdgeTriple {
        &self.triple
    }

    /// Resolve the payload and return a deep copy of it.
    pub async fn data(&mut self) -> Result<Value, GroveError> {
        self.data.resolve().await.cloned()
    }

    /// Re-home the record under another store handle.
    #[must_use]
    pub fn in_store(mut self, store_id: StoreId) -> Self {
        self.store_id = store_id;
        self
    }
}

impl StoreRecord for StoreEdge {
    fn store_id(&self) -> StoreId {
        self.store_id
    }

    fn identity(&self) -> String {
        self.triple.identity()
    }

    fn specifier(&self) -> Value {
        json!({
            "subject": self.triple.subject,
            "predicate": self.triple.predicate,
            "object": self.triple.object,
        })
    }

    fn record_data(&self) -> &RecordData {
        &self.data
    }

    fn record_data_mut(&mut self) -> &mut RecordData {
        &mut self.data
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolved_reads_are_independent_copies() {
        let mut node = StoreNode::new(
            StoreId(1),
            NodeId::new("n1"),
            TypeName::new("User"),
            json!({ "name": "alice", "tags": ["a"] }),
        );
        let mut first = node.data().await.expect("data");
        first["tags"] = json!(["mutated"]);
        let second = node.data().await.expect("data");
        assert_eq!(second["tags"], json!(["a"]));
    }

    #[tokio::test]
    async fn pending_data_resolves_in_place() {
        let (data, resolver) = RecordData::pending();
        let mut edge = StoreEdge::new(StoreId(1), EdgeTriple::new("a", "p", "b"), data);
        assert!(edge.record_data().is_pending());
        assert!(edge.data_now().is_none());

        resolver.resolve(json!({ "weight": 3 }));
        let value = edge.data().await.expect("resolve");
        assert_eq!(value, json!({ "weight": 3 }));
        assert!(!edge.record_data().is_pending());
    }

    #[tokio::test]
    async fn clone_of_pending_is_decoupled() {
        let (data, resolver) = RecordData::pending();
        let mut original = data;
        let mut copy = original.clone();
        resolver.resolve(json!({ "n": 1 }));

        let from_copy = copy.resolve().await.expect("copy").clone();
        let from_original = original.resolve().await.expect("original").clone();
        assert_eq!(from_copy, from_original);

        if let RecordData::Resolved(value) = &mut copy {
            value["n"] = json!(2);
        }
        assert_eq!(original.snapshot(), Some(json!({ "n": 1 })));
    }

    #[tokio::test]
    async fn dropped_resolver_fails_waiters() {
        let (mut data, resolver) = RecordData::pending();
        drop(resolver);
        let result = data.resolve().await;
        assert!(matches!(result, Err(GroveError::PendingFailed(_))));
    }

    #[tokio::test]
    async fn failed_resolver_reports_reason() {
        let (mut data, resolver) = RecordData::pending();
        resolver.fail("backend unreachable");
        match data.resolve().await {
            Err(GroveError::PendingFailed(reason)) => assert_eq!(reason, "backend unreachable"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn from_future_settles() {
        let mut data = RecordData::from_future(async { Ok(json!("computed")) }).expect("runtime");
        let value = data.resolve().await.expect("resolve");
        assert_eq!(value, &json!("computed"));
    }

    #[test]
    fn from_future_outside_a_runtime_fails() {
        let result = RecordData::from_future(async { Ok(json!("never")) });
        assert!(matches!(result, Err(GroveError::PendingFailed(_))));
    }

    #[test]
    fn specifiers() {
        let node = StoreNode::new(StoreId(2), NodeId::new("n"), TypeName::new("T"), Value::Null);
        assert_eq!(node.specifier(), json!({ "nodeId": "n", "type": "T" }));
        assert_eq!(node.identity(), "n");

        let edge = StoreEdge::new(StoreId(2), EdgeTriple::new("a", "p", "b"), Value::Null);
        assert_eq!(edge.identity(), "a|p|b");
        assert_eq!(edge.store_id(), StoreId(2));
    }
}
