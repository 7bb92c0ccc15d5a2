//! # Graph Context
//!
//! A `GraphContext` is a bounded working set of materialized objects over
//! one store. It owns the `GraphObject`s it populated and writes the dirty
//! ones back with `flush`.
//!
//! Node identity is global to the store: a node populated by one open
//! context cannot be populated by another (or twice by the same one) until
//! the owner closes. Contexts close explicitly, on drop, or when their
//! store is freed.

use crate::accessor::{RecordRef, RelationAccessor};
use crate::backend::Action;
use crate::engine::{Behavior, GraphEngine};
use crate::primitives::NAME_FIELD;
use crate::store::Store;
use crate::{ContextId, EdgeTriple, GroveError, NodeId, Predicate, StoreNode, TypeName};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared open/closed flag of a context, also held by its store.
#[derive(Debug)]
pub(crate) struct ContextHandle {
    id: ContextId,
    closed: AtomicBool,
}

impl ContextHandle {
    pub(crate) fn new(id: ContextId) -> Self {
        Self {
            id,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// =============================================================================
// GRAPH OBJECT
// =============================================================================

/// Typed view of a node, with relation accessors and behavior methods.
pub struct GraphObject {
    node_id: NodeId,
    type_name: TypeName,
    data: Value,
    behavior: Arc<Behavior>,
    store: Arc<Store>,
    dirty: bool,
}

impl fmt::Debug for GraphObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphObject")
            .field("node_id", &self.node_id)
            .field("type_name", &self.type_name)
            .field("data", &self.data)
            .field("behavior", &self.behavior.name())
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl GraphObject {
    pub(crate) fn new(
        node_id: NodeId,
        type_name: TypeName,
        data: Value,
        behavior: Arc<Behavior>,
        store: Arc<Store>,
    ) -> Self {
        Self {
            node_id,
            type_name,
            data,
            behavior,
            store,
            dirty: false,
        }
    }

    #[must_use]
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    #[must_use]
    pub fn type_name(&self) -> &TypeName {
        &self.type_name
    }

    /// The typed data.
    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Mutable typed data. Marks the object dirty.
    pub fn data_mut(&mut self) -> &mut Value {
        self.dirty = true;
        &mut self.data
    }

    /// The `name` field, if the data carries one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.data.get(NAME_FIELD).and_then(Value::as_str)
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// Set a declared field through the type's accessor.
    pub fn set(&mut self, field: &str, value: Value) -> Result<(), GroveError> {
        let engine = Arc::clone(self.store.engine());
        engine
            .accessor_for(&self.type_name, self.node_id.as_str())?
            .set_field(&mut self.data, field, value)?;
        self.dirty = true;
        Ok(())
    }

    /// The relation accessor for a declared predicate.
    pub fn relation(&self, predicate: &Predicate) -> Result<RelationAccessor, GroveError> {
        self.store
            .engine()
            .accessor_for(&self.type_name, self.node_id.as_str())?
            .relation(predicate)
            .cloned()
            .ok_or_else(|| GroveError::UnknownRelation {
                type_name: self.type_name.clone(),
                relation: predicate.to_string(),
            })
    }

    /// Ids of the nodes this object currently points to through `predicate`.
    pub async fn related(&self, predicate: &Predicate) -> Result<Vec<NodeId>, GroveError> {
        self.relation(predicate)?
            .targets(&self.store, &self.node_id)
            .await
    }

    /// Every record this object points to.
    pub async fn refs(&self) -> Result<Vec<RecordRef>, GroveError> {
        self.store
            .engine()
            .accessor_for(&self.type_name, self.node_id.as_str())?
            .gather_refs(&self.store, &self.node_id, &self.data)
            .await
    }

    /// Invoke a behavior method.
    pub fn call(&mut self, method: &str, args: Value) -> Result<Value, GroveError> {
        let behavior = Arc::clone(&self.behavior);
        behavior.invoke(self, method, args)
    }

    /// Name of the behavior layered onto the object.
    #[must_use]
    pub fn behavior_name(&self) -> &str {
        self.behavior.name()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

// =============================================================================
// GRAPH CONTEXT
// =============================================================================

/// Working set of materialized objects over one store.
pub struct GraphContext {
    handle: Arc<ContextHandle>,
    store: Arc<Store>,
    engine: Arc<GraphEngine>,
    objects: BTreeMap<NodeId, GraphObject>,
    /// Population order.
    order: Vec<NodeId>,
    roots: BTreeSet<NodeId>,
    staged_edges: Vec<(EdgeTriple, Value)>,
}

impl fmt::Debug for GraphContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphContext")
            .field("id", &self.handle.id)
            .field("store", &self.store.id())
            .field("objects", &self.order)
            .field("roots", &self.roots)
            .field("staged_edges", &self.staged_edges.len())
            .finish()
    }
}

impl GraphContext {
    pub(crate) fn new(store: Arc<Store>, handle: Arc<ContextHandle>) -> Self {
        let engine = Arc::clone(store.engine());
        Self {
            handle,
            store,
            engine,
            objects: BTreeMap::new(),
            order: Vec::new(),
            roots: BTreeSet::new(),
            staged_edges: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> ContextId {
        self.handle.id
    }

    #[must_use]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<GraphEngine> {
        &self.engine
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Number of populated objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn check_open(&self) -> Result<(), GroveError> {
        if self.is_closed() {
            Err(GroveError::ContextClosed(self.handle.id))
        } else {
            Ok(())
        }
    }

    fn check_not_populated(&self, node_id: &NodeId) -> Result<(), GroveError> {
        if self.objects.contains_key(node_id) {
            return Err(GroveError::DuplicatePopulation {
                node: node_id.clone(),
                location: self.handle.id.to_string(),
            });
        }
        Ok(())
    }

    /// Claim the node, then record the object and its root status.
    fn admit(&mut self, object: GraphObject) -> Result<&mut GraphObject, GroveError> {
        let node_id = object.node_id.clone();
        self.store.claim(&node_id, self.handle.id)?;
        if self.engine.is_root_type(&object.type_name) {
            self.roots.insert(node_id.clone());
        }
        self.order.push(node_id.clone());
        Ok(self.objects.entry(node_id).or_insert(object))
    }

    /// Materialize a stored node into the context.
    ///
    /// The node must not already be populated here or in any other open
    /// context of the store.
    pub async fn populate(&mut self, mut node: StoreNode) -> Result<&mut GraphObject, GroveError> {
        self.check_open()?;
        self.check_not_populated(node.node_id())?;
        let raw = node.data().await?;
        let object =
            self.engine
                .spawn_object(&self.store, node.node_id(), node.type_name(), &raw)?;
        self.admit(object)
    }

    /// Load one node, unless already populated here. Absent nodes are `None`.
    pub async fn load(&mut self, node_id: &NodeId) -> Result<Option<&mut GraphObject>, GroveError> {
        self.check_open()?;
        if self.objects.contains_key(node_id) {
            return Ok(self.objects.get_mut(node_id));
        }
        match self.store.fetch_node(node_id).await? {
            Some(node) => self.populate(node).await.map(Some),
            None => Ok(None),
        }
    }

    /// Load every stored node (optionally of one type) not yet populated
    /// here. Returns the number of newly populated objects.
    pub async fn load_all(&mut self, type_name: Option<&TypeName>) -> Result<usize, GroveError> {
        self.check_open()?;
        let mut loaded = 0;
        for node in self.store.list_nodes(type_name).await? {
            if self.objects.contains_key(node.node_id()) {
                continue;
            }
            self.populate(node).await?;
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Create a new node in the context. It is written on the next flush.
    pub fn create(
        &mut self,
        node_id: impl Into<NodeId>,
        type_name: impl Into<TypeName>,
        data: Value,
    ) -> Result<&mut GraphObject, GroveError> {
        self.check_open()?;
        let node_id = node_id.into();
        let type_name = type_name.into();
        self.check_not_populated(&node_id)?;
        let raw = self
            .engine
            .accessor_for(&type_name, node_id.as_str())?
            .map_in(&node_id, &data)?;
        let mut object = self
            .engine
            .spawn_object(&self.store, &node_id, &type_name, &raw)?;
        object.dirty = true;
        self.admit(object)
    }

    /// Stage an edge. It is written on the next flush.
    ///
    /// When the subject is populated here its type must declare the
    /// predicate.
    pub fn link(
        &mut self,
        subject: impl Into<NodeId>,
        predicate: impl Into<Predicate>,
        object: impl Into<NodeId>,
        data: Value,
    ) -> Result<(), GroveError> {
        self.check_open()?;
        let triple = EdgeTriple::new(subject, predicate, object);
        if let Some(source) = self.objects.get(&triple.subject) {
            source.relation(&triple.predicate)?;
        }
        self.staged_edges.push((triple, data));
        Ok(())
    }

    pub(crate) fn staged_len(&self) -> usize {
        self.staged_edges.len()
    }

    /// Undo objects created and edges staged since `staged_mark`, releasing
    /// their claims.
    pub(crate) fn discard(&mut self, node_ids: &[NodeId], staged_mark: usize) {
        for node_id in node_ids {
            if self.objects.remove(node_id).is_some() {
                self.order.retain(|id| id != node_id);
                self.roots.remove(node_id);
                self.store.release_node(node_id, self.handle.id);
            }
        }
        self.staged_edges.truncate(staged_mark);
    }

    #[must_use]
    pub fn get(&self, node_id: &NodeId) -> Option<&GraphObject> {
        self.objects.get(node_id)
    }

    pub fn get_mut(&mut self, node_id: &NodeId) -> Option<&mut GraphObject> {
        self.objects.get_mut(node_id)
    }

    /// Populated objects in population order.
    pub fn objects(&self) -> impl Iterator<Item = &GraphObject> {
        self.order.iter().filter_map(|id| self.objects.get(id))
    }

    /// The first populated object whose data carries `name`.
    #[must_use]
    pub fn select_named(&self, name: &str) -> Option<&GraphObject> {
        self.objects().find(|o| o.name() == Some(name))
    }

    /// Populated objects of one type, in population order.
    #[must_use]
    pub fn select_all_with_type(&self, type_name: &TypeName) -> Vec<&GraphObject> {
        self.objects().filter(|o| &o.type_name == type_name).collect()
    }

    /// Root objects in population order.
    #[must_use]
    pub fn roots(&self) -> Vec<&GraphObject> {
        self.objects()
            .filter(|o| self.roots.contains(&o.node_id))
            .collect()
    }

    /// Run the engine's `relink` hook over the context. Without a lifecycle
    /// extension this does nothing.
    pub async fn relink(&mut self) -> Result<(), GroveError> {
        self.check_open()?;
        match self.engine.lifecycle() {
            Some(lifecycle) => lifecycle.relink(self).await,
            None => Ok(()),
        }
    }

    /// Write dirty objects and staged edges as one action batch under the
    /// store mutex. Returns the number of records written.
    pub async fn flush(&mut self) -> Result<usize, GroveError> {
        let actions = self.pending_actions()?;
        if actions.is_empty() {
            return Ok(0);
        }
        let written = self
            .store
            .transact_raw(move |store| Box::pin(async move { store.exec_action_batch(actions).await }))
            .await?;
        Ok(self.mark_flushed(written))
    }

    /// Flush from inside `Store::transact_raw`, reusing the permit the
    /// caller already holds. `store` must be the store of this context.
    pub async fn flush_within(&mut self, store: &Store) -> Result<usize, GroveError> {
        if store.id() != self.store.id() {
            return Err(GroveError::InvalidValue {
                path: format!("{}", self.handle.id),
                expected: format!("a transaction on {}", self.store.id()),
            });
        }
        let actions = self.pending_actions()?;
        if actions.is_empty() {
            return Ok(0);
        }
        let written = store.exec_action_batch(actions).await?;
        Ok(self.mark_flushed(written))
    }

    fn pending_actions(&self) -> Result<Vec<Action>, GroveError> {
        self.check_open()?;
        let mut actions = Vec::new();
        for node_id in &self.order {
            let Some(object) = self.objects.get(node_id) else {
                continue;
            };
            if !object.dirty {
                continue;
            }
            let raw = self
                .engine
                .accessor_for(&object.type_name, node_id.as_str())?
                .map_in(node_id, &object.data)?;
            actions.push(Action::put_node(node_id, &object.type_name, raw));
        }
        for (triple, data) in &self.staged_edges {
            actions.push(Action::put_edge(triple, data.clone()));
        }
        Ok(actions)
    }

    fn mark_flushed(&mut self, written: usize) -> usize {
        for object in self.objects.values_mut() {
            object.dirty = false;
        }
        self.staged_edges.clear();
        tracing::debug!(
            store = %self.store.id(),
            context = %self.handle.id,
            records = written,
            "context flushed"
        );
        written
    }

    /// Close the context and release its claims. Idempotent.
    pub fn close(&mut self) {
        self.handle.close();
        self.store.release(self.handle.id);
    }
}

impl Drop for GraphContext {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// TESTS
// =============================================================================
