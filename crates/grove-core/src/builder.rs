//! # Graph Builder
//!
//! Builds a brand-new graph one typed node at a time before any of it is
//! written.
//!
//! Every builder node exposes a capability table derived from its type:
//! `with<Type>` and `get<Type>` for each outward relation target, and
//! `set<Field>` for each declared struct field. `invoke` dispatches by
//! operation name.
//!
//! ## Ghosts
//!
//! `get<Type>(name)` on a name that is not attached yet records a ghost
//! carrying the lookup failure. A later `with<Type>(name)` under the same
//! parent resolves it. `create` fails with the first ghost still unresolved
//! before writing anything, which is what makes forward references work.

use crate::engine::GraphEngine;
use crate::context::GraphContext;
use crate::primitives::{NAME_FIELD, PATH_SEPARATOR};
use crate::{GroveError, NodeId, Predicate, TypeName};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Index of a node within its builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuilderNodeId(usize);

/// A reference produced by builder operations: a node, or a ghost standing
/// in for a node that is not attached yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderRef {
    Node(BuilderNodeId),
    Ghost(usize),
}

/// One entry of a builder node's capability table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuilderOp {
    /// Create and attach a child of the type.
    With(TypeName),
    /// Resolve an attached child of the type by name.
    Get(TypeName),
    /// Set a declared field.
    Set(String),
}

#[derive(Debug, Clone)]
struct BuilderNode {
    parent: Option<BuilderNodeId>,
    name: String,
    type_name: TypeName,
    data: Value,
    links: Vec<(Predicate, BuilderRef)>,
}

#[derive(Debug, Clone)]
struct Ghost {
    parent: BuilderNodeId,
    type_name: TypeName,
    name: String,
    error: GroveError,
    resolved: Option<BuilderNodeId>,
}

/// Incremental constructor of a new graph.
pub struct GraphBuilder {
    engine: Arc<GraphEngine>,
    nodes: Vec<BuilderNode>,
    ghosts: Vec<Ghost>,
}

impl fmt::Debug for GraphBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphBuilder")
            .field("engine", &self.engine.key())
            .field("nodes", &self.nodes)
            .field("ghosts", &self.ghosts)
            .finish()
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl GraphBuilder {
    /// Start a graph at a root node.
    pub fn new(
        engine: Arc<GraphEngine>,
        type_name: impl Into<TypeName>,
        name: impl Into<String>,
        data: Value,
    ) -> Result<Self, GroveError> {
        let mut builder = Self {
            engine,
            nodes: Vec::new(),
            ghosts: Vec::new(),
        };
        builder.push_node(None, type_name.into(), name.into(), data)?;
        Ok(builder)
    }

    /// The root node.
    #[must_use]
    pub fn root(&self) -> BuilderNodeId {
        BuilderNodeId(0)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node(&self, id: BuilderNodeId) -> Result<&BuilderNode, GroveError> {
        self.nodes.get(id.0).ok_or_else(|| {
            GroveError::InvalidRecord(format!("builder node #{} does not exist", id.0))
        })
    }

    fn node_mut(&mut self, id: BuilderNodeId) -> Result<&mut BuilderNode, GroveError> {
        self.nodes.get_mut(id.0).ok_or_else(|| {
            GroveError::InvalidRecord(format!("builder node #{} does not exist", id.0))
        })
    }

    /// Declared type of a node.
    pub fn type_of(&self, id: BuilderNodeId) -> Result<&TypeName, GroveError> {
        Ok(&self.node(id)?.type_name)
    }

    /// Slash-joined name path from the root. Also the node id `create` writes.
    pub fn path(&self, id: BuilderNodeId) -> Result<String, GroveError> {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(at) = current {
            let node = self.node(at)?;
            names.push(node.name.as_str());
            current = node.parent;
        }
        names.reverse();
        Ok(names.join(&PATH_SEPARATOR.to_string()))
    }

    fn push_node(
        &mut self,
        parent: Option<BuilderNodeId>,
        type_name: TypeName,
        name: String,
        data: Value,
    ) -> Result<BuilderNodeId, GroveError> {
        if name.is_empty() || name.contains(PATH_SEPARATOR) {
            return Err(GroveError::InvalidValue {
                path: name,
                expected: format!("a non-empty name without '{}'", PATH_SEPARATOR),
            });
        }
        let accessor = self.engine.accessor_for(&type_name, &name)?;
        let mut data = accessor.map_in(&NodeId::new(name.as_str()), &data)?;
        if let Value::Object(map) = &mut data {
            map.entry(NAME_FIELD.to_string())
                .or_insert_with(|| Value::from(name.as_str()));
        }
        let id = BuilderNodeId(self.nodes.len());
        self.nodes.push(BuilderNode {
            parent,
            name,
            type_name,
            data,
            links: Vec::new(),
        });
        Ok(id)
    }

    /// The predicate of `parent`'s type pointing at `target`. A type with
    /// several relations to `target` must be linked explicitly.
    fn relation_to(&self, parent: BuilderNodeId, target: &TypeName) -> Result<Predicate, GroveError> {
        let parent_type = self.type_of(parent)?;
        let path = self.path(parent)?;
        let candidates: Vec<&Predicate> = self
            .engine
            .accessor_for(parent_type, &path)?
            .relations()
            .iter()
            .filter(|r| &r.target == target)
            .map(|r| &r.predicate)
            .collect();
        match candidates.as_slice() {
            [predicate] => Ok((*predicate).clone()),
            [] => Err(GroveError::UnknownRelation {
                type_name: parent_type.clone(),
                relation: format!("to '{}'", target),
            }),
            several => Err(GroveError::InvalidValue {
                path,
                expected: format!(
                    "one relation from '{}' to '{}', found {}",
                    parent_type,
                    target,
                    several.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(", ")
                ),
            }),
        }
    }

    /// The child of `parent` named `name`, whatever its type. Names are
    /// unique under a parent since they form the node id.
    fn attached(&self, parent: BuilderNodeId, name: &str) -> Option<BuilderNodeId> {
        self.nodes
            .iter()
            .enumerate()
            .find(|(_, n)| n.parent == Some(parent) && n.name == name)
            .map(|(i, _)| BuilderNodeId(i))
    }

    /// Capability table of a node, keyed by operation name.
    pub fn operations(&self, id: BuilderNodeId) -> Result<BTreeMap<String, BuilderOp>, GroveError> {
        let type_name = self.type_of(id)?;
        let accessor = self.engine.accessor_for(type_name, &self.path(id)?)?;
        let mut ops = BTreeMap::new();
        for relation in accessor.relations() {
            ops.insert(
                format!("with{}", relation.target),
                BuilderOp::With(relation.target.clone()),
            );
            ops.insert(
                format!("get{}", relation.target),
                BuilderOp::Get(relation.target.clone()),
            );
        }
        if let crate::accessor::Accessor::Struct(body) = accessor.body() {
            for field in body.field_names() {
                ops.insert(format!("set{}", capitalize(field)), BuilderOp::Set(field.to_string()));
            }
        }
        Ok(ops)
    }

    /// Dispatch a capability-table operation by name.
    ///
    /// - `with<Type>`: `arg` is a name, or `{name, data}`; returns the child
    /// - `get<Type>`: `arg` is a name; returns the child or a ghost
    /// - `set<Field>`: `arg` is the value; returns `None`
    pub fn invoke(
        &mut self,
        id: BuilderNodeId,
        op: &str,
        arg: Value,
    ) -> Result<Option<BuilderRef>, GroveError> {
        let ops = self.operations(id)?;
        let Some(found) = ops.get(op) else {
            return Err(GroveError::UnknownMethod {
                type_name: self.type_of(id)?.clone(),
                method: op.to_string(),
            });
        };
        match found {
            BuilderOp::With(type_name) => {
                let (name, data) = match arg {
                    Value::String(name) => (name, Value::Null),
                    Value::Object(mut map) => {
                        let name = map
                            .remove(NAME_FIELD)
                            .and_then(|v| v.as_str().map(str::to_string))
                            .ok_or_else(|| GroveError::InvalidValue {
                                path: op.to_string(),
                                expected: "a name".to_string(),
                            })?;
                        (name, map.remove("data").unwrap_or(Value::Null))
                    }
                    _ => {
                        return Err(GroveError::InvalidValue {
                            path: op.to_string(),
                            expected: "a name or {name, data}".to_string(),
                        });
                    }
                };
                let child = self.with_child(id, type_name.clone(), name, data)?;
                Ok(Some(BuilderRef::Node(child)))
            }
            BuilderOp::Get(type_name) => {
                let name = arg.as_str().ok_or_else(|| GroveError::InvalidValue {
                    path: op.to_string(),
                    expected: "a name".to_string(),
                })?;
                Ok(Some(self.get_child(id, type_name.clone(), name)?))
            }
            BuilderOp::Set(field) => {
                self.set_field(id, field, arg)?;
                Ok(None)
            }
        }
    }

    /// Create a child of `type_name` under `parent` and link it through the
    /// parent's relation to that type. Resolves matching ghosts.
    pub fn with_child(
        &mut self,
        parent: BuilderNodeId,
        type_name: impl Into<TypeName>,
        name: impl Into<String>,
        data: Value,
    ) -> Result<BuilderNodeId, GroveError> {
        let type_name = type_name.into();
        let name = name.into();
        let predicate = self.relation_to(parent, &type_name)?;
        if let Some(existing) = self.attached(parent, &name) {
            return Err(GroveError::DuplicateChild {
                parent: self.path(parent)?,
                type_name: self.type_of(existing)?.clone(),
                name,
            });
        }

        let child = self.push_node(Some(parent), type_name.clone(), name.clone(), data)?;
        self.node_mut(parent)?
            .links
            .push((predicate, BuilderRef::Node(child)));

        for ghost in &mut self.ghosts {
            if ghost.resolved.is_none()
                && ghost.parent == parent
                && ghost.type_name == type_name
                && ghost.name == name
            {
                ghost.resolved = Some(child);
            }
        }
        Ok(child)
    }

    /// Resolve an attached child by name, or record a ghost for it.
    pub fn get_child(
        &mut self,
        parent: BuilderNodeId,
        type_name: impl Into<TypeName>,
        name: &str,
    ) -> Result<BuilderRef, GroveError> {
        let type_name = type_name.into();
        // Several relations to the type still allow a lookup by name.
        match self.relation_to(parent, &type_name) {
            Ok(_) | Err(GroveError::InvalidValue { .. }) => {}
            Err(e) => return Err(e),
        }
        if let Some(child) = self.attached(parent, name) {
            let found = self.type_of(child)?;
            if found != &type_name {
                return Err(GroveError::InvalidValue {
                    path: self.path(child)?,
                    expected: format!("a '{}', found a '{}'", type_name, found),
                });
            }
            return Ok(BuilderRef::Node(child));
        }
        let parent_path = self.path(parent)?;
        let error = GroveError::UnresolvedReference {
            reference: format!("{}{}{}", parent_path, PATH_SEPARATOR, name),
            reason: format!(
                "no '{}' named '{}' is attached under '{}'",
                type_name, name, parent_path
            ),
        };
        self.ghosts.push(Ghost {
            parent,
            type_name,
            name: name.to_string(),
            error,
            resolved: None,
        });
        Ok(BuilderRef::Ghost(self.ghosts.len() - 1))
    }

    /// Set a declared field of a node through its type's accessor.
    pub fn set_field(&mut self, id: BuilderNodeId, field: &str, value: Value) -> Result<(), GroveError> {
        let engine = Arc::clone(&self.engine);
        let node = self.node_mut(id)?;
        engine
            .accessor_for(&node.type_name, &node.name)?
            .set_field(&mut node.data, field, value)
    }

    /// Link `from` to a node or ghost through a declared predicate.
    pub fn link(
        &mut self,
        from: BuilderNodeId,
        predicate: impl Into<Predicate>,
        to: BuilderRef,
    ) -> Result<(), GroveError> {
        let predicate = predicate.into();
        let from_type = self.type_of(from)?;
        let relation = self
            .engine
            .accessor_for(from_type, &self.path(from)?)?
            .relation(&predicate)
            .ok_or_else(|| GroveError::UnknownRelation {
                type_name: from_type.clone(),
                relation: predicate.to_string(),
            })?;
        let to_type = match to {
            BuilderRef::Node(id) => self.type_of(id)?,
            BuilderRef::Ghost(index) => self
                .ghosts
                .get(index)
                .map(|g| &g.type_name)
                .ok_or_else(|| GroveError::InvalidRecord(format!("ghost #{} does not exist", index)))?,
        };
        if to_type != &relation.target {
            return Err(GroveError::InvalidValue {
                path: format!("{}{}{}", self.path(from)?, PATH_SEPARATOR, predicate),
                expected: format!("a '{}'", relation.target),
            });
        }
        self.node_mut(from)?.links.push((predicate, to));
        Ok(())
    }

    /// The node a reference stands for, or the ghost's recorded error.
    pub fn resolve(&self, reference: BuilderRef) -> Result<BuilderNodeId, GroveError> {
        match reference {
            BuilderRef::Node(id) => Ok(id),
            BuilderRef::Ghost(index) => {
                let ghost = self.ghosts.get(index).ok_or_else(|| {
                    GroveError::InvalidRecord(format!("ghost #{} does not exist", index))
                })?;
                ghost.resolved.ok_or_else(|| ghost.error.clone())
            }
        }
    }

    /// Write every node and link into `ctx`. Returns the root's node id.
    ///
    /// Fails with the first unresolved ghost's error before writing anything.
    /// Any other failure undoes what this call already put into `ctx`.
    pub fn create(&self, ctx: &mut GraphContext) -> Result<NodeId, GroveError> {
        if let Some(ghost) = self.ghosts.iter().find(|g| g.resolved.is_none()) {
            return Err(ghost.error.clone());
        }

        let ids = (0..self.nodes.len())
            .map(|i| self.path(BuilderNodeId(i)).map(NodeId::new))
            .collect::<Result<Vec<_>, _>>()?;

        let staged_mark = ctx.staged_len();
        let mut created = Vec::with_capacity(ids.len());
        if let Err(e) = self.write_into(ctx, &ids, &mut created) {
            ctx.discard(&created, staged_mark);
            tracing::debug!(
                engine = %self.engine.key(),
                undone = created.len(),
                error = %e,
                "builder graph rolled back"
            );
            return Err(e);
        }
        tracing::debug!(
            engine = %self.engine.key(),
            nodes = self.nodes.len(),
            "builder graph created"
        );
        Ok(ids.first().cloned().unwrap_or_else(|| NodeId::new("")))
    }

    fn write_into(
        &self,
        ctx: &mut GraphContext,
        ids: &[NodeId],
        created: &mut Vec<NodeId>,
    ) -> Result<(), GroveError> {
        for (node, id) in self.nodes.iter().zip(ids) {
            ctx.create(id.clone(), node.type_name.clone(), node.data.clone())?;
            created.push(id.clone());
        }
        for (node, id) in self.nodes.iter().zip(ids) {
            for (predicate, target) in &node.links {
                let target = self.resolve(*target)?;
                let object = ids.get(target.0).ok_or_else(|| {
                    GroveError::InvalidRecord(format!("builder node #{} does not exist", target.0))
                })?;
                ctx.link(id.clone(), predicate.clone(), object.clone(), Value::Null)?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// BUILD PLANS
// =============================================================================

/// Serializable description of a graph to build.
///
/// Children are attached with `with<Type>`. A link names a sibling (a child
/// of the same parent; for the root, one of its own children) and may point
/// forward to a sibling declared later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildPlan {
    #[serde(rename = "type")]
    pub type_name: TypeName,
    pub name: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub children: Vec<BuildPlan>,
    #[serde(default)]
    pub links: Vec<PlanLink>,
}

/// A forward link of a plan node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanLink {
    pub predicate: Predicate,
    pub target_type: TypeName,
    pub target: String,
}

impl BuildPlan {
    /// Drive a builder through the plan, depth first.
    pub fn to_builder(&self, engine: Arc<GraphEngine>) -> Result<GraphBuilder, GroveError> {
        let mut builder = GraphBuilder::new(
            engine,
            self.type_name.clone(),
            self.name.clone(),
            self.data.clone(),
        )?;
        let root = builder.root();
        self.apply(&mut builder, root, None)?;
        Ok(builder)
    }

    fn apply(
        &self,
        builder: &mut GraphBuilder,
        node: BuilderNodeId,
        parent: Option<BuilderNodeId>,
    ) -> Result<(), GroveError> {
        let scope = parent.unwrap_or(node);
        for link in &self.links {
            let target = builder.get_child(scope, link.target_type.clone(), &link.target)?;
            builder.link(node, link.predicate.clone(), target)?;
        }
        for child in &self.children {
            let id = builder.with_child(
                node,
                child.type_name.clone(),
                child.name.clone(),
                child.data.clone(),
            )?;
            child.apply(builder, id, Some(node))?;
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::engine::EngineSpec;
    use serde_json::json;

    fn engine() -> Arc<GraphEngine> {
        let spec: EngineSpec = serde_json::from_value(json!({
            "key": "org",
            "top": "Top",
            "types": [
                {
                    "name": "Company",
                    "relations": [
                        { "predicate": "Top", "target": "Team" },
                        { "predicate": "employs", "target": "Person" }
                    ]
                },
                {
                    "name": "Team",
                    "fields": [{ "name": "budget", "type": { "kind": "number" } }],
                    "relations": [{ "predicate": "lead", "target": "Person" }]
                },
                {
                    "name": "Person",
                    "fields": [{ "name": "email", "type": { "kind": "string" } }],
                    "relations": [{ "predicate": "reportsTo", "target": "Person" }]
                },
                {
                    "name": "Board",
                    "relations": [
                        { "predicate": "chair", "target": "Person" },
                        { "predicate": "members", "target": "Person" }
                    ]
                }
            ]
        }))
        .expect("spec");
        Arc::new(GraphEngine::new(spec).expect("engine"))
    }

    #[test]
    fn operations_follow_the_schema() {
        let builder = GraphBuilder::new(engine(), "Team", "core", Value::Null).expect("builder");
        let ops = builder.operations(builder.root()).expect("ops");
        let names: Vec<&String> = ops.keys().collect();
        assert_eq!(names, vec!["getPerson", "setBudget", "withPerson"]);
    }

    #[test]
    fn paths_join_names() {
        let mut builder = GraphBuilder::new(engine(), "Company", "acme", Value::Null).expect("builder");
        let team = builder
            .with_child(builder.root(), "Team", "core", Value::Null)
            .expect("team");
        assert_eq!(builder.path(team).expect("path"), "acme/core");
    }

    #[test]
    fn duplicate_child_is_rejected() {
        let mut builder = GraphBuilder::new(engine(), "Company", "acme", Value::Null).expect("builder");
        let root = builder.root();
        builder.with_child(root, "Person", "ann", Value::Null).expect("first");
        assert!(matches!(
            builder.with_child(root, "Person", "ann", Value::Null),
            Err(GroveError::DuplicateChild { .. })
        ));
    }

    #[test]
    fn same_name_of_another_type_is_a_duplicate_child() {
        let mut builder = GraphBuilder::new(engine(), "Company", "acme", Value::Null).expect("builder");
        let root = builder.root();
        builder.with_child(root, "Team", "core", Value::Null).expect("team");
        let result = builder.with_child(root, "Person", "core", Value::Null);
        assert!(
            matches!(&result, Err(GroveError::DuplicateChild { type_name, name, .. })
                if type_name.as_str() == "Team" && name == "core"),
            "unexpected {:?}",
            result
        );
        assert_eq!(builder.len(), 2);
        assert!(matches!(
            builder.get_child(root, "Person", "core"),
            Err(GroveError::InvalidValue { .. })
        ));
    }

    #[test]
    fn names_cannot_contain_the_path_separator() {
        let mut builder = GraphBuilder::new(engine(), "Company", "acme", Value::Null).expect("builder");
        let root = builder.root();
        assert!(matches!(
            builder.with_child(root, "Team", "core/ops", Value::Null),
            Err(GroveError::InvalidValue { .. })
        ));
    }

    #[test]
    fn ambiguous_relation_to_a_type_is_rejected() {
        let mut builder = GraphBuilder::new(engine(), "Board", "board", Value::Null).expect("builder");
        let root = builder.root();
        assert!(matches!(
            builder.with_child(root, "Person", "ann", Value::Null),
            Err(GroveError::InvalidValue { .. })
        ));
        assert!(matches!(
            builder.get_child(root, "Person", "ann"),
            Ok(BuilderRef::Ghost(_))
        ));
    }

    #[tokio::test]
    async fn failed_create_releases_what_it_wrote() {
        use crate::backend::VolatileBackend;
        use crate::registry::StoreRegistry;

        let engine = engine();
        let registry = StoreRegistry::new();
        let store = registry.open(Arc::clone(&engine), Box::new(VolatileBackend::new()));
        let mut other = store.new_context().expect("context");
        other.create("acme/core", "Team", json!({})).expect("claim");

        let mut builder = GraphBuilder::new(engine, "Company", "acme", Value::Null).expect("builder");
        let root = builder.root();
        let core = builder.with_child(root, "Team", "core", Value::Null).expect("team");
        builder.with_child(core, "Person", "ann", Value::Null).expect("person");

        let mut ctx = store.new_context().expect("context");
        assert!(matches!(
            builder.create(&mut ctx),
            Err(GroveError::DuplicatePopulation { .. })
        ));
        assert!(ctx.is_empty());
        assert!(ctx.roots().is_empty());
        assert_eq!(ctx.flush().await.expect("flush"), 0);

        other.create("acme", "Company", json!({})).expect("released");
    }

    #[test]
    fn ghost_resolves_when_attached_later() {
        let mut builder = GraphBuilder::new(engine(), "Company", "acme", Value::Null).expect("builder");
        let root = builder.root();
        let ghost = builder
            .invoke(root, "getPerson", json!("bob"))
            .expect("get")
            .expect("ref");
        assert!(matches!(ghost, BuilderRef::Ghost(_)));
        assert!(matches!(
            builder.resolve(ghost),
            Err(GroveError::UnresolvedReference { .. })
        ));

        let bob = builder
            .invoke(root, "withPerson", json!("bob"))
            .expect("with")
            .expect("ref");
        assert_eq!(builder.resolve(ghost).expect("resolved"), builder.resolve(bob).expect("node"));
    }

    #[test]
    fn unknown_operation_is_rejected() {
        let mut builder = GraphBuilder::new(engine(), "Person", "ann", Value::Null).expect("builder");
        let root = builder.root();
        assert!(matches!(
            builder.invoke(root, "withTeam", json!("x")),
            Err(GroveError::UnknownMethod { .. })
        ));
    }

    #[test]
    fn set_operation_checks_types() {
        let mut builder = GraphBuilder::new(engine(), "Team", "core", Value::Null).expect("builder");
        let root = builder.root();
        builder.invoke(root, "setBudget", json!(10)).expect("set");
        assert!(matches!(
            builder.invoke(root, "setBudget", json!("lots")),
            Err(GroveError::InvalidValue { .. })
        ));
    }

    #[test]
    fn link_checks_target_type() {
        let mut builder = GraphBuilder::new(engine(), "Company", "acme", Value::Null).expect("builder");
        let root = builder.root();
        let team = builder.with_child(root, "Team", "core", Value::Null).expect("team");
        assert!(matches!(
            builder.link(root, "employs", BuilderRef::Node(team)),
            Err(GroveError::InvalidValue { .. })
        ));
    }

    #[test]
    fn plans_deserialize_with_camel_case_links() {
        let plan: BuildPlan = serde_json::from_value(json!({
            "type": "Company",
            "name": "acme",
            "children": [
                {
                    "type": "Person",
                    "name": "ann",
                    "links": [{ "predicate": "reportsTo", "targetType": "Person", "target": "bob" }]
                },
                { "type": "Person", "name": "bob" }
            ]
        }))
        .expect("plan");
        let builder = plan.to_builder(engine()).expect("builder");
        assert_eq!(builder.len(), 3);
    }
}
