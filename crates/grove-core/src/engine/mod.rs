//! # Engine / Type Registry
//!
//! A `GraphEngine` holds the schema of one graph: type -> accessor, the top
//! predicate that marks roots, an extension bag keyed by capability name,
//! and per-type behavior overrides.
//!
//! Engines live in an `EngineRegistry`. An entry is either ready or
//! deferred: a deferred entry holds its loader and is upgraded to a ready
//! entry by the first `load`. Concurrent loads of one key share a single
//! loader run.
//!
//! ## Behavior resolution
//!
//! `spawn_object` picks, in order:
//! 1. the behavior attached to the type itself
//! 2. the behavior of the nearest ancestor through `extends`
//! 3. the type's default behavior (logged as a warning)

mod behavior;
mod schema;

pub use behavior::{Behavior, MethodFn};
pub use schema::{EngineSpec, FieldDef, FieldType, RelationDecl, ShapeKind, TypeDef};

use crate::accessor::NodeAccessor;
use crate::backend::VolatileBackend;
use crate::builder::BuildPlan;
use crate::context::{GraphContext, GraphObject};
use crate::primitives::LIFECYCLE_EXTENSION;
use crate::registry::StoreRegistry;
use crate::store::Store;
use crate::{GroveError, NodeId, Predicate, TypeName};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

// =============================================================================
// EXTENSIONS
// =============================================================================

/// Graph construction hooks, installed as the `lifecycle` extension.
#[async_trait]
pub trait Lifecycle: Send + Sync + fmt::Debug {
    /// Populate a fresh graph into `ctx` from build options.
    async fn build_new(&self, ctx: &mut GraphContext, opts: &Value) -> Result<Value, GroveError>;

    /// Re-resolve cross references among the roots of a populated context.
    async fn relink(&self, _ctx: &mut GraphContext) -> Result<(), GroveError> {
        Ok(())
    }
}

/// A capability installed on an engine.
#[derive(Debug, Clone)]
pub enum Extension {
    Lifecycle(Arc<dyn Lifecycle>),
    /// Opaque configuration for collaborators outside the store.
    Config(Value),
}

/// Lifecycle that reads build options as a `BuildPlan`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlanLifecycle;

#[async_trait]
impl Lifecycle for PlanLifecycle {
    async fn build_new(&self, ctx: &mut GraphContext, opts: &Value) -> Result<Value, GroveError> {
        let plan: BuildPlan = serde_json::from_value(opts.clone())
            .map_err(|e| GroveError::InvalidRecord(format!("build plan: {}", e)))?;
        let builder = plan.to_builder(Arc::clone(ctx.engine()))?;
        let root = builder.create(ctx)?;
        Ok(json!({ "root": root, "nodes": builder.len() }))
    }
}

// =============================================================================
// GRAPH ENGINE
// =============================================================================

/// Schema and capability bag of one graph.
pub struct GraphEngine {
    spec: EngineSpec,
    accessors: BTreeMap<TypeName, NodeAccessor>,
    extensions: RwLock<BTreeMap<String, Extension>>,
    name_behaviors: RwLock<BTreeMap<TypeName, Arc<Behavior>>>,
}

impl fmt::Debug for GraphEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphEngine")
            .field("key", &self.spec.key)
            .field("top", &self.spec.top)
            .field("types", &self.accessors.keys().collect::<Vec<_>>())
            .field("extensions", &self.extensions.read().keys().cloned().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl GraphEngine {
    /// Validate a schema and build the engine.
    pub fn new(spec: EngineSpec) -> Result<Self, GroveError> {
        spec.validate()?;
        let accessors = spec
            .types
            .iter()
            .map(|def| (def.name.clone(), NodeAccessor::from_def(def)))
            .collect();
        Ok(Self {
            spec,
            accessors,
            extensions: RwLock::new(BTreeMap::new()),
            name_behaviors: RwLock::new(BTreeMap::new()),
        })
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.spec.key
    }

    /// The predicate whose declaration makes a type a root type.
    #[must_use]
    pub fn top(&self) -> &Predicate {
        &self.spec.top
    }

    #[must_use]
    pub fn spec(&self) -> &EngineSpec {
        &self.spec
    }

    /// Declared type names, in lexical order.
    pub fn type_names(&self) -> impl Iterator<Item = &TypeName> {
        self.accessors.keys()
    }

    #[must_use]
    pub fn accessor(&self, type_name: &TypeName) -> Option<&NodeAccessor> {
        self.accessors.get(type_name)
    }

    /// The accessor of a type, or `UnknownType` naming the record at `path`.
    pub fn accessor_for(&self, type_name: &TypeName, path: &str) -> Result<&NodeAccessor, GroveError> {
        self.accessors
            .get(type_name)
            .ok_or_else(|| GroveError::UnknownType {
                type_name: type_name.clone(),
                path: path.to_string(),
            })
    }

    /// Whether nodes of the type are roots.
    #[must_use]
    pub fn is_root_type(&self, type_name: &TypeName) -> bool {
        self.accessor(type_name)
            .is_some_and(|a| a.declares(&self.spec.top))
    }

    /// Install (or replace) an extension under a capability name.
    pub fn extend(&self, name: impl Into<String>, extension: Extension) {
        let name = name.into();
        tracing::debug!(engine = %self.spec.key, extension = %name, "extension installed");
        self.extensions.write().insert(name, extension);
    }

    /// The installed `lifecycle` extension, if any.
    #[must_use]
    pub fn lifecycle(&self) -> Option<Arc<dyn Lifecycle>> {
        match self.extensions.read().get(LIFECYCLE_EXTENSION) {
            Some(Extension::Lifecycle(lifecycle)) => Some(Arc::clone(lifecycle)),
            _ => None,
        }
    }

    /// Configuration stored under a capability name.
    #[must_use]
    pub fn extension_config(&self, name: &str) -> Option<Value> {
        match self.extensions.read().get(name) {
            Some(Extension::Config(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Attach the behavior of a type. A second attach for the type fails.
    pub fn attach_behavior(&self, type_name: &TypeName, behavior: Behavior) -> Result<(), GroveError> {
        self.accessor_for(type_name, self.key())?;
        let mut behaviors = self.name_behaviors.write();
        if behaviors.contains_key(type_name) {
            return Err(GroveError::DuplicateBehavior {
                engine: self.spec.key.clone(),
                type_name: type_name.clone(),
            });
        }
        behaviors.insert(type_name.clone(), Arc::new(behavior));
        Ok(())
    }

    /// Resolve the behavior used for objects of a type.
    #[must_use]
    pub fn behavior_for(&self, type_name: &TypeName) -> Arc<Behavior> {
        let behaviors = self.name_behaviors.read();
        let mut current = Some(type_name);
        // extends chains are validated acyclic
        while let Some(name) = current {
            if let Some(behavior) = behaviors.get(name) {
                return Arc::clone(behavior);
            }
            current = self.spec.type_def(name).and_then(|def| def.extends.as_ref());
        }
        tracing::warn!(
            engine = %self.spec.key,
            type_name = %type_name,
            "no behavior attached for type or its ancestors, using the default"
        );
        Arc::new(Behavior::default_for(type_name))
    }

    /// Materialize a raw record into a typed object bound to `store`.
    pub fn spawn_object(
        &self,
        store: &Arc<Store>,
        node_id: &NodeId,
        type_name: &TypeName,
        raw: &Value,
    ) -> Result<GraphObject, GroveError> {
        let accessor = self.accessor_for(type_name, node_id.as_str())?;
        let data = accessor.map_out(node_id, raw)?;
        Ok(GraphObject::new(
            node_id.clone(),
            type_name.clone(),
            data,
            self.behavior_for(type_name),
            Arc::clone(store),
        ))
    }

    /// Build a new graph into `store` through the `lifecycle` extension.
    ///
    /// Runs `lifecycle.build_new` inside `store.transact_graph`, so the
    /// populated context is flushed when the hook returns.
    pub async fn build_from_store(&self, opts: Value, store: &Arc<Store>) -> Result<Value, GroveError> {
        let lifecycle = self.require_lifecycle()?;
        store
            .transact_graph(move |ctx| {
                Box::pin(async move { lifecycle.build_new(ctx, &opts).await })
            })
            .await
    }

    /// `build_from_store` against a fresh volatile store opened in `registry`.
    pub async fn build_using_volatile(
        self: &Arc<Self>,
        registry: &StoreRegistry,
        opts: Value,
    ) -> Result<(Arc<Store>, Value), GroveError> {
        self.require_lifecycle()?;
        let store = registry.open(Arc::clone(self), Box::new(VolatileBackend::new()));
        let outcome = self.build_from_store(opts, &store).await?;
        Ok((store, outcome))
    }

    fn require_lifecycle(&self) -> Result<Arc<dyn Lifecycle>, GroveError> {
        self.lifecycle().ok_or_else(|| GroveError::MissingExtension {
            engine: self.spec.key.clone(),
            extension: LIFECYCLE_EXTENSION.to_string(),
        })
    }
}

// =============================================================================
// ENGINE REGISTRY
// =============================================================================

type EngineLoader = Arc<dyn Fn() -> BoxFuture<'static, Result<GraphEngine, GroveError>> + Send + Sync>;

#[derive(Clone)]
enum EngineSlot {
    Ready(Arc<GraphEngine>),
    Deferred {
        loader: EngineLoader,
        cell: Arc<OnceCell<Arc<GraphEngine>>>,
    },
}

/// Owned table of engines keyed by engine key.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    slots: Arc<RwLock<BTreeMap<String, EngineSlot>>>,
}

impl fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}

impl EngineRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a ready engine.
    pub fn register(&self, engine: GraphEngine) -> Result<Arc<GraphEngine>, GroveError> {
        let engine = Arc::new(engine);
        let mut slots = self.slots.write();
        if slots.contains_key(engine.key()) {
            return Err(GroveError::DuplicateEngine(engine.key().to_string()));
        }
        slots.insert(engine.key().to_string(), EngineSlot::Ready(Arc::clone(&engine)));
        tracing::debug!(engine = %engine.key(), "engine registered");
        Ok(engine)
    }

    /// Register an engine that is loaded on first `load`.
    pub fn register_deferred<F, Fut>(&self, key: impl Into<String>, loader: F) -> Result<(), GroveError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<GraphEngine, GroveError>> + Send + 'static,
    {
        let key = key.into();
        let mut slots = self.slots.write();
        if slots.contains_key(&key) {
            return Err(GroveError::DuplicateEngine(key));
        }
        let boxed: EngineLoader =
            Arc::new(move || -> BoxFuture<'static, Result<GraphEngine, GroveError>> {
                Box::pin(loader())
            });
        tracing::debug!(engine = %key, "deferred engine registered");
        slots.insert(
            key,
            EngineSlot::Deferred {
                loader: boxed,
                cell: Arc::new(OnceCell::new()),
            },
        );
        Ok(())
    }

    /// A loaded engine.
    ///
    /// A registered but not yet loaded key is `EngineNotLoaded`; an unknown
    /// key is `EngineNotFound`.
    pub fn get(&self, key: &str) -> Result<Arc<GraphEngine>, GroveError> {
        match self.slots.read().get(key) {
            Some(EngineSlot::Ready(engine)) => Ok(Arc::clone(engine)),
            Some(EngineSlot::Deferred { cell, .. }) => cell
                .get()
                .cloned()
                .ok_or_else(|| GroveError::EngineNotLoaded(key.to_string())),
            None => Err(GroveError::EngineNotFound(key.to_string())),
        }
    }

    /// Load an engine, running a deferred loader at most once.
    pub async fn load(&self, key: &str) -> Result<Arc<GraphEngine>, GroveError> {
        let slot = self
            .slots
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| GroveError::EngineNotFound(key.to_string()))?;

        let (loader, cell) = match slot {
            EngineSlot::Ready(engine) => return Ok(engine),
            EngineSlot::Deferred { loader, cell } => (loader, cell),
        };

        let engine = cell
            .get_or_try_init(|| async {
                let engine = loader().await?;
                if engine.key() != key {
                    return Err(GroveError::InvalidEngine(format!(
                        "loader for '{}' produced engine '{}'",
                        key,
                        engine.key()
                    )));
                }
                tracing::info!(engine = %key, "deferred engine loaded");
                Ok(Arc::new(engine))
            })
            .await?
            .clone();

        let mut slots = self.slots.write();
        if let Some(slot) = slots
            .get_mut(key)
            .filter(|slot| matches!(slot, EngineSlot::Deferred { .. }))
        {
            *slot = EngineSlot::Ready(Arc::clone(&engine));
        }
        Ok(engine)
    }

    /// Whether any entry, ready or deferred, exists for the key.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.slots.read().contains_key(key)
    }

    /// Registered keys in lexical order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.slots.read().keys().cloned().collect()
    }

    /// Install an extension on a loaded engine.
    pub fn extend(&self, key: &str, name: impl Into<String>, extension: Extension) -> Result<(), GroveError> {
        self.get(key)?.extend(name, extension);
        Ok(())
    }

    /// Attach a behavior on a loaded engine.
    pub fn attach_behavior(
        &self,
        key: &str,
        type_name: impl Into<TypeName>,
        behavior: Behavior,
    ) -> Result<(), GroveError> {
        self.get(key)?.attach_behavior(&type_name.into(), behavior)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn spec(key: &str) -> EngineSpec {
        serde_json::from_value(json!({
            "key": key,
            "top": "Top",
            "types": [
                {
                    "name": "Directory",
                    "relations": [{ "predicate": "Top", "target": "User" }]
                },
                {
                    "name": "User",
                    "fields": [{ "name": "name", "type": { "kind": "string" } }]
                },
                { "name": "Admin", "extends": "User" }
            ]
        }))
        .expect("spec")
    }

    #[test]
    fn root_types_declare_top() {
        let engine = GraphEngine::new(spec("social")).expect("engine");
        assert!(engine.is_root_type(&TypeName::new("Directory")));
        assert!(!engine.is_root_type(&TypeName::new("User")));
        assert!(!engine.is_root_type(&TypeName::new("Missing")));
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = EngineRegistry::new();
        registry
            .register(GraphEngine::new(spec("social")).expect("engine"))
            .expect("first");
        let second = registry.register(GraphEngine::new(spec("social")).expect("engine"));
        assert!(matches!(second, Err(GroveError::DuplicateEngine(_))));
    }

    #[tokio::test]
    async fn deferred_engine_distinguishes_not_loaded() {
        let registry = EngineRegistry::new();
        registry
            .register_deferred("lazy", || async { GraphEngine::new(spec("lazy")) })
            .expect("register");

        assert!(matches!(registry.get("lazy"), Err(GroveError::EngineNotLoaded(_))));
        assert!(matches!(registry.get("nope"), Err(GroveError::EngineNotFound(_))));

        let loaded = registry.load("lazy").await.expect("load");
        assert_eq!(loaded.key(), "lazy");
        let again = registry.get("lazy").expect("ready");
        assert!(Arc::ptr_eq(&loaded, &again));
    }

    #[tokio::test]
    async fn concurrent_loads_run_loader_once() {
        let runs = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let registry = EngineRegistry::new();
        let counter = Arc::clone(&runs);
        registry
            .register_deferred("lazy", move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    GraphEngine::new(spec("lazy"))
                }
            })
            .expect("register");

        let (a, b) = tokio::join!(registry.load("lazy"), registry.load("lazy"));
        assert!(Arc::ptr_eq(&a.expect("a"), &b.expect("b")));
        assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn loader_with_wrong_key_is_rejected() {
        let registry = EngineRegistry::new();
        registry
            .register_deferred("lazy", || async { GraphEngine::new(spec("other")) })
            .expect("register");
        assert!(matches!(
            registry.load("lazy").await,
            Err(GroveError::InvalidEngine(_))
        ));
    }

    #[test]
    fn attach_behavior_twice_fails() {
        let registry = EngineRegistry::new();
        registry
            .register(GraphEngine::new(spec("social")).expect("engine"))
            .expect("register");
        registry
            .attach_behavior("social", "User", Behavior::new("UserBehavior"))
            .expect("first attach");
        let second = registry.attach_behavior("social", "User", Behavior::new("Other"));
        assert!(matches!(second, Err(GroveError::DuplicateBehavior { .. })));
    }

    #[test]
    fn behavior_is_inherited_through_extends() {
        let engine = GraphEngine::new(spec("social")).expect("engine");
        engine
            .attach_behavior(&TypeName::new("User"), Behavior::new("UserBehavior"))
            .expect("attach");
        assert_eq!(engine.behavior_for(&TypeName::new("Admin")).name(), "UserBehavior");
        assert_eq!(engine.behavior_for(&TypeName::new("Directory")).name(), "Directory");
    }

    #[test]
    fn lifecycle_extension_is_looked_up_by_name() {
        let engine = GraphEngine::new(spec("social")).expect("engine");
        assert!(engine.lifecycle().is_none());
        engine.extend("ui", Extension::Config(json!({ "theme": "dark" })));
        assert!(engine.lifecycle().is_none());
        assert_eq!(engine.extension_config("ui"), Some(json!({ "theme": "dark" })));

        engine.extend(LIFECYCLE_EXTENSION, Extension::Lifecycle(Arc::new(PlanLifecycle)));
        assert!(engine.lifecycle().is_some());
    }
}
