//! # Store
//!
//! A `Store` is one open backend instance: a process-unique handle, the
//! engine it is bound to, its transaction mutex and the backend holding the
//! records.
//!
//! ## Responsibilities
//!
//! - Stamp its handle on every record it hands out
//! - Run action batches (validated first, then executed concurrently)
//! - Hand out graph contexts and track which context claimed which node
//! - Publish a change sequence that live snapshot streams follow
//! - Tear everything down on `free`
//!
//! After `free`, every operation fails with `StoreFreed`.

use crate::backend::{Action, Backend, DecodedAction, EdgeQuery};
use crate::context::{ContextHandle, GraphContext};
use crate::engine::GraphEngine;
use crate::mutex::TransactionMutex;
use crate::primitives::{RECORD_ID_FIELD, VERSION_FIELD};
use crate::record::RecordData;
use crate::registry::RegistryInner;
use crate::{
    ContextId, EdgeTriple, GroveError, NodeId, StoreEdge, StoreId, StoreNode, TypeName,
};
use futures::future::{self, BoxFuture};
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Per-store settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreConfig {
    /// Upper bound on one raw transaction. `None` waits indefinitely.
    pub transaction_timeout: Option<Duration>,
}

/// One open backend instance.
pub struct Store {
    id: StoreId,
    engine: Arc<GraphEngine>,
    backend: Box<dyn Backend>,
    mutex: TransactionMutex,
    /// Global claim table: node -> context that populated it.
    objects: Mutex<BTreeMap<NodeId, ContextId>>,
    contexts: Mutex<BTreeMap<ContextId, Arc<ContextHandle>>>,
    next_context: AtomicU64,
    changes: watch::Sender<u64>,
    registry: Weak<RegistryInner>,
    freed: AtomicBool,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id)
            .field("engine", &self.engine.key())
            .field("backend", &self.backend.backend_type())
            .field("freed", &self.is_freed())
            .finish_non_exhaustive()
    }
}

impl Store {
    pub(crate) fn new(
        id: StoreId,
        engine: Arc<GraphEngine>,
        backend: Box<dyn Backend>,
        config: StoreConfig,
        registry: Weak<RegistryInner>,
    ) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            id,
            engine,
            backend,
            mutex: TransactionMutex::new(id, config.transaction_timeout),
            objects: Mutex::new(BTreeMap::new()),
            contexts: Mutex::new(BTreeMap::new()),
            next_context: AtomicU64::new(1),
            changes,
            registry,
            freed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn id(&self) -> StoreId {
        self.id
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<GraphEngine> {
        &self.engine
    }

    #[must_use]
    pub fn backend_type(&self) -> &'static str {
        self.backend.backend_type()
    }

    #[must_use]
    pub fn is_freed(&self) -> bool {
        self.freed.load(Ordering::SeqCst)
    }

    fn check_live(&self) -> Result<(), GroveError> {
        if self.is_freed() {
            Err(GroveError::StoreFreed(self.id))
        } else {
            Ok(())
        }
    }

    fn bump(&self) {
        self.changes.send_modify(|version| *version += 1);
    }

    // =========================================================================
    // RECORDS
    // =========================================================================

    /// Insert or replace a node.
    pub async fn put_node(
        &self,
        node_id: impl Into<NodeId>,
        type_name: impl Into<TypeName>,
        data: impl Into<RecordData>,
    ) -> Result<(), GroveError> {
        self.check_live()?;
        let node = StoreNode::new(self.id, node_id.into(), type_name.into(), data);
        self.backend.put_node(node).await?;
        self.bump();
        Ok(())
    }

    /// Fetch a node. Absence is `Ok(None)`.
    pub async fn fetch_node(&self, node_id: &NodeId) -> Result<Option<StoreNode>, GroveError> {
        self.check_live()?;
        Ok(self
            .backend
            .fetch_node(node_id)
            .await?
            .map(|node| node.in_store(self.id)))
    }

    /// Insert or replace an edge.
    pub async fn put_edge(
        &self,
        triple: EdgeTriple,
        data: impl Into<RecordData>,
    ) -> Result<(), GroveError> {
        self.check_live()?;
        self.backend
            .put_edge(StoreEdge::new(self.id, triple, data))
            .await?;
        self.bump();
        Ok(())
    }

    /// Fetch an edge. Absence is `Ok(None)`.
    pub async fn fetch_edge(&self, triple: &EdgeTriple) -> Result<Option<StoreEdge>, GroveError> {
        self.check_live()?;
        Ok(self
            .backend
            .fetch_edge(triple)
            .await?
            .map(|edge| edge.in_store(self.id)))
    }

    /// Edges matching the query, in backend order.
    pub async fn query_edges(&self, query: &EdgeQuery) -> Result<Vec<StoreEdge>, GroveError> {
        self.check_live()?;
        Ok(self
            .backend
            .query_edges(query)
            .await?
            .into_iter()
            .map(|edge| edge.in_store(self.id))
            .collect())
    }

    /// Nodes, optionally of one type, in node id order.
    pub async fn list_nodes(
        &self,
        type_name: Option<&TypeName>,
    ) -> Result<Vec<StoreNode>, GroveError> {
        self.check_live()?;
        Ok(self
            .backend
            .list_nodes(type_name)
            .await?
            .into_iter()
            .map(|node| node.in_store(self.id))
            .collect())
    }

    /// Every edge of the store, in identity order.
    pub async fn list_edges(&self) -> Result<Vec<StoreEdge>, GroveError> {
        self.check_live()?;
        Ok(self
            .backend
            .list_edges()
            .await?
            .into_iter()
            .map(|edge| edge.in_store(self.id))
            .collect())
    }

    /// Run a batch of actions.
    ///
    /// Every action is decoded before any runs, so an unknown kind rejects
    /// the whole batch. The decoded actions then run concurrently, without
    /// ordering among them. Returns the number of actions applied.
    pub async fn exec_action_batch(&self, actions: Vec<Action>) -> Result<usize, GroveError> {
        self.check_live()?;
        let backend_type = self.backend.backend_type();
        let decoded = actions
            .into_iter()
            .map(|action| action.decode(backend_type))
            .collect::<Result<Vec<_>, _>>()?;
        if decoded.is_empty() {
            return Ok(0);
        }

        let count = decoded.len();
        future::try_join_all(decoded.into_iter().map(|action| async move {
            match action {
                DecodedAction::PutNode(node) => {
                    self.backend
                        .put_node(StoreNode::new(self.id, node.node_id, node.type_name, node.data))
                        .await
                }
                DecodedAction::PutEdge(edge) => {
                    self.backend
                        .put_edge(StoreEdge::new(self.id, edge.triple, edge.data))
                        .await
                }
            }
        }))
        .await?;

        self.bump();
        tracing::debug!(store = %self.id, actions = count, "action batch applied");
        Ok(count)
    }

    // =========================================================================
    // CONTEXTS & TRANSACTIONS
    // =========================================================================

    /// A fresh context bound to this store and its engine.
    pub fn new_context(self: &Arc<Self>) -> Result<GraphContext, GroveError> {
        self.check_live()?;
        let id = ContextId(self.next_context.fetch_add(1, Ordering::SeqCst));
        let handle = Arc::new(ContextHandle::new(id));
        self.contexts.lock().insert(id, Arc::clone(&handle));
        Ok(GraphContext::new(Arc::clone(self), handle))
    }

    /// Create a context, run `f` on it, flush it, close it.
    ///
    /// The mutex is not held while `f` runs; only the final flush is
    /// serialized. If `f` fails nothing is flushed.
    pub async fn transact_graph<T, F>(self: &Arc<Self>, f: F) -> Result<T, GroveError>
    where
        F: for<'c> FnOnce(&'c mut GraphContext) -> BoxFuture<'c, Result<T, GroveError>>,
    {
        let mut ctx = self.new_context()?;
        let outcome = match f(&mut ctx).await {
            Ok(value) => ctx.flush().await.map(|_| value),
            Err(e) => Err(e),
        };
        ctx.close();
        outcome
    }

    /// Run `f` under the store's transaction mutex.
    pub async fn transact_raw<T, F>(&self, f: F) -> Result<T, GroveError>
    where
        F: for<'a> FnOnce(&'a Store) -> BoxFuture<'a, Result<T, GroveError>>,
    {
        self.check_live()?;
        self.mutex.submit(|| f(self)).await
    }

    /// Claim a node for a context. A node is claimed by at most one open
    /// context of the store.
    pub(crate) fn claim(&self, node_id: &NodeId, context: ContextId) -> Result<(), GroveError> {
        self.check_live()?;
        let mut objects = self.objects.lock();
        if let Some(owner) = objects.get(node_id) {
            return Err(GroveError::DuplicatePopulation {
                node: node_id.clone(),
                location: format!("{} of {}", owner, self.id),
            });
        }
        objects.insert(node_id.clone(), context);
        Ok(())
    }

    /// Drop one claim of a context.
    pub(crate) fn release_node(&self, node_id: &NodeId, context: ContextId) {
        let mut objects = self.objects.lock();
        if objects.get(node_id) == Some(&context) {
            objects.remove(node_id);
        }
    }

    /// Drop every claim of a closed context.
    pub(crate) fn release(&self, context: ContextId) {
        self.objects.lock().retain(|_, owner| *owner != context);
        self.contexts.lock().remove(&context);
    }

    /// Number of contexts currently open on the store.
    #[must_use]
    pub fn open_contexts(&self) -> usize {
        self.contexts.lock().len()
    }

    // =========================================================================
    // CHANGE FEED
    // =========================================================================

    /// Receiver of the change sequence, bumped after every write.
    #[must_use]
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Live snapshots of the store's nodes, optionally of one type.
    ///
    /// Emits the current snapshot immediately and a new one after each
    /// change; intermediate changes may coalesce. Each record is
    /// `{recordId, version, type, ..data}`. The stream ends once the store
    /// is freed.
    pub fn node_snapshots(self: &Arc<Self>, type_name: Option<TypeName>) -> BoxStream<'static, Vec<Value>> {
        let live = Arc::clone(self);
        let store = Arc::clone(self);
        WatchStream::new(self.changes.subscribe())
            .take_while(move |_| future::ready(!live.is_freed()))
            .then(move |version| {
                let store = Arc::clone(&store);
                let type_name = type_name.clone();
                async move {
                    match store.snapshot_nodes(type_name.as_ref(), version).await {
                        Ok(records) => records,
                        Err(e) => {
                            tracing::warn!(store = %store.id, error = %e, "snapshot failed");
                            Vec::new()
                        }
                    }
                }
            })
            .boxed()
    }

    async fn snapshot_nodes(
        &self,
        type_name: Option<&TypeName>,
        version: u64,
    ) -> Result<Vec<Value>, GroveError> {
        let mut records = Vec::new();
        for mut node in self.list_nodes(type_name).await? {
            let data = node.data().await?;
            let mut record = Map::new();
            record.insert(RECORD_ID_FIELD.to_string(), Value::from(node.node_id().as_str()));
            record.insert(VERSION_FIELD.to_string(), Value::from(version));
            record.insert("type".to_string(), Value::from(node.type_name().as_str()));
            match data {
                Value::Object(fields) => {
                    for (key, value) in fields {
                        record.entry(key).or_insert(value);
                    }
                }
                Value::Null => {}
                other => {
                    record.insert("data".to_string(), other);
                }
            }
            records.push(Value::Object(record));
        }
        Ok(records)
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Free the store.
    ///
    /// Closes every context bound to the store, drops all claims, removes the
    /// store from its registry and stops the transaction mutex. Freeing twice
    /// is `StoreFreed`.
    pub fn free(&self) -> Result<(), GroveError> {
        if self.freed.swap(true, Ordering::SeqCst) {
            return Err(GroveError::StoreFreed(self.id));
        }

        let contexts = std::mem::take(&mut *self.contexts.lock());
        for handle in contexts.values() {
            handle.close();
        }
        self.objects.lock().clear();

        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
        self.mutex.stop();
        // Wake snapshot streams so they observe the free and end.
        self.bump();

        tracing::info!(
            store = %self.id,
            engine = %self.engine.key(),
            contexts = contexts.len(),
            "store freed"
        );
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
