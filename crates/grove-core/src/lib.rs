//! # grove-core
//!
//! In-process graph object store: THE STORE.
//!
//! Records are nodes (id, type, data) and edges (subject, predicate,
//! object, data) held by a pluggable `Backend`. A `GraphEngine` declares
//! the types and relations of a graph; stores bound to it materialize
//! records into typed `GraphObject`s inside a `GraphContext`, serialize
//! graph transactions through a per-store mutex, and publish live record
//! snapshots through `RecordFilter` pipelines.
//!
//! ## Architectural Constraints
//!
//! - Single process: no network, no remote exposure
//! - Registries are owned values passed explicitly, never globals
//! - Not-found is `Ok(None)`; misuse is a `GroveError`

// =============================================================================
// MODULES
// =============================================================================

pub mod accessor;
pub mod backend;
pub mod builder;
pub mod context;
pub mod engine;
pub mod export;
pub mod mutex;
pub mod primitives;
pub mod publication;
pub mod record;
pub mod registry;
pub mod store;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    ContextId, EdgeTriple, ErrorCategory, GroveError, NodeId, Predicate, StoreId, TypeName,
};

// =============================================================================
// RE-EXPORTS: Records and Backends
// =============================================================================

pub use backend::{Action, Backend, EdgeQuery, RedbBackend, VolatileBackend};
pub use record::{PendingResolver, RecordData, StoreEdge, StoreNode, StoreRecord};

// =============================================================================
// RE-EXPORTS: Stores
// =============================================================================

pub use mutex::TransactionMutex;
pub use registry::StoreRegistry;
pub use store::{Store, StoreConfig};

// =============================================================================
// RE-EXPORTS: Engines and Materialization
// =============================================================================

pub use accessor::{Accessor, NodeAccessor, RecordRef, RelationAccessor};
pub use builder::{BuildPlan, BuilderNodeId, BuilderOp, BuilderRef, GraphBuilder, PlanLink};
pub use context::{GraphContext, GraphObject};
pub use engine::{
    Behavior, EngineRegistry, EngineSpec, Extension, FieldDef, FieldType, GraphEngine, Lifecycle,
    PlanLifecycle, RelationDecl, ShapeKind, TypeDef,
};

// =============================================================================
// RE-EXPORTS: Publications and Export
// =============================================================================

pub use export::{
    CanonicalGraph, CanonicalHeader, canonical_checksum, export_canonical, import_canonical,
    verify_canonical,
};
pub use publication::{FilterArgs, RecordFilter, SortKey};
