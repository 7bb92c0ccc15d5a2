//! # Accessor Layer
//!
//! Accessors translate between the raw JSON a backend stores and the typed
//! view a `GraphObject` exposes:
//!
//! - `map_out`: raw -> typed (defaults applied, types checked)
//! - `map_in`: typed -> raw (types checked, required fields enforced,
//!   nulls of optional fields dropped)
//! - `gather_refs`: every record identity a node points to
//! - `export_data`: declared fields in declaration order, extras after
//!
//! A `NodeAccessor` wraps a body accessor and adds one `RelationAccessor` per
//! declared predicate. Relation traversal always asks the store; nothing is
//! cached, so results reflect the store at access time.

use crate::backend::EdgeQuery;
use crate::engine::{FieldDef, FieldType, ShapeKind, TypeDef};
use crate::store::Store;
use crate::{EdgeTriple, GroveError, NodeId, Predicate, StoreEdge, TypeName};
use serde_json::{Map, Value};

// =============================================================================
// BODY ACCESSORS
// =============================================================================

/// Kind of a scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Number,
    Boolean,
}

impl ScalarKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }
}

/// Polymorphic mapping over one composite or scalar shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Accessor {
    Scalar(ScalarKind),
    Json,
    /// Node id of a node of the given type.
    Ref(TypeName),
    Struct(StructAccessor),
    List(Box<Accessor>),
}

/// Accessor of a struct-like field container.
#[derive(Debug, Clone, PartialEq)]
pub struct StructAccessor {
    fields: Vec<FieldAccessor>,
}

#[derive(Debug, Clone, PartialEq)]
struct FieldAccessor {
    name: String,
    accessor: Accessor,
    default: Option<Value>,
    required: bool,
}

impl StructAccessor {
    fn from_fields(fields: &[FieldDef]) -> Self {
        Self {
            fields: fields
                .iter()
                .map(|f| FieldAccessor {
                    name: f.name.clone(),
                    accessor: Accessor::from_field_type(&f.field_type),
                    default: f.default.clone(),
                    required: f.required,
                })
                .collect(),
        }
    }

    /// Names of the declared fields, in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    fn field(&self, name: &str) -> Option<&FieldAccessor> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn is_declared(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

fn field_path(path: &str, field: &str) -> String {
    format!("{}.{}", path, field)
}

fn item_path(path: &str, index: usize) -> String {
    format!("{}[{}]", path, index)
}

fn as_object<'v>(value: &'v Value, path: &str) -> Result<Option<&'v Map<String, Value>>, GroveError> {
    match value {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map)),
        _ => Err(GroveError::InvalidValue {
            path: path.to_string(),
            expected: "object".to_string(),
        }),
    }
}

fn as_array<'v>(value: &'v Value, path: &str) -> Result<&'v [Value], GroveError> {
    match value {
        Value::Null => Ok(&[]),
        Value::Array(items) => Ok(items),
        _ => Err(GroveError::InvalidValue {
            path: path.to_string(),
            expected: "array".to_string(),
        }),
    }
}

impl Accessor {
    /// Accessor for a declared field type.
    #[must_use]
    pub fn from_field_type(field_type: &FieldType) -> Self {
        match field_type {
            FieldType::String => Self::Scalar(ScalarKind::String),
            FieldType::Number => Self::Scalar(ScalarKind::Number),
            FieldType::Boolean => Self::Scalar(ScalarKind::Boolean),
            FieldType::Json => Self::Json,
            FieldType::Ref { target } => Self::Ref(target.clone()),
            FieldType::Struct { fields } => Self::Struct(StructAccessor::from_fields(fields)),
            FieldType::List { item } => Self::List(Box::new(Self::from_field_type(item))),
        }
    }

    /// Name of the shape, as reported by `NotImplemented`.
    #[must_use]
    pub fn shape_name(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "Scalar",
            Self::Json => "Json",
            Self::Ref(_) => "Ref",
            Self::Struct(_) => "Struct",
            Self::List(_) => "List",
        }
    }

    fn expected(&self) -> String {
        match self {
            Self::Scalar(kind) => kind.name().to_string(),
            Self::Json => "json".to_string(),
            Self::Ref(target) => format!("node id of a '{}'", target),
            Self::Struct(_) => "object".to_string(),
            Self::List(_) => "array".to_string(),
        }
    }

    fn check_leaf(&self, value: &Value, path: &str) -> Result<(), GroveError> {
        let ok = match self {
            Self::Scalar(kind) => value.is_null() || kind.accepts(value),
            Self::Ref(_) => value.is_null() || value.is_string(),
            _ => true,
        };
        if ok {
            Ok(())
        } else {
            Err(GroveError::InvalidValue {
                path: path.to_string(),
                expected: self.expected(),
            })
        }
    }

    /// Raw stored value -> typed value.
    pub fn map_out(&self, raw: &Value, path: &str) -> Result<Value, GroveError> {
        match self {
            Self::Struct(body) => {
                let source = as_object(raw, path)?;
                let mut out = Map::new();
                for field in &body.fields {
                    let value = source.and_then(|m| m.get(&field.name));
                    match (value, &field.default) {
                        (None | Some(Value::Null), Some(default)) => {
                            out.insert(field.name.clone(), default.clone());
                        }
                        (None, None) => {}
                        (Some(value), _) => {
                            let mapped =
                                field.accessor.map_out(value, &field_path(path, &field.name))?;
                            out.insert(field.name.clone(), mapped);
                        }
                    }
                }
                for (key, value) in source.into_iter().flatten() {
                    if !body.is_declared(key) {
                        out.insert(key.clone(), value.clone());
                    }
                }
                Ok(Value::Object(out))
            }
            Self::List(item) => as_array(raw, path)?
                .iter()
                .enumerate()
                .map(|(i, v)| item.map_out(v, &item_path(path, i)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            _ => {
                self.check_leaf(raw, path)?;
                Ok(raw.clone())
            }
        }
    }

    /// Typed value -> raw value for storage.
    pub fn map_in(&self, typed: &Value, path: &str) -> Result<Value, GroveError> {
        match self {
            Self::Struct(body) => {
                let source = as_object(typed, path)?;
                let mut out = Map::new();
                for field in &body.fields {
                    match source.and_then(|m| m.get(&field.name)) {
                        None | Some(Value::Null) if field.required => {
                            return Err(GroveError::InvalidValue {
                                path: field_path(path, &field.name),
                                expected: format!("required {}", field.accessor.expected()),
                            });
                        }
                        None | Some(Value::Null) => {}
                        Some(value) => {
                            let mapped =
                                field.accessor.map_in(value, &field_path(path, &field.name))?;
                            out.insert(field.name.clone(), mapped);
                        }
                    }
                }
                for (key, value) in source.into_iter().flatten() {
                    if !body.is_declared(key) {
                        out.insert(key.clone(), value.clone());
                    }
                }
                Ok(Value::Object(out))
            }
            Self::List(item) => as_array(typed, path)?
                .iter()
                .enumerate()
                .map(|(i, v)| item.map_in(v, &item_path(path, i)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            _ => {
                self.check_leaf(typed, path)?;
                Ok(typed.clone())
            }
        }
    }

    /// Collect the node ids held in `Ref` positions of `value`.
    pub fn gather_refs(&self, value: &Value, out: &mut Vec<NodeId>) {
        match self {
            Self::Ref(_) => {
                if let Some(id) = value.as_str() {
                    out.push(NodeId::new(id));
                }
            }
            Self::Struct(body) => {
                if let Value::Object(map) = value {
                    for field in &body.fields {
                        if let Some(v) = map.get(&field.name) {
                            field.accessor.gather_refs(v, out);
                        }
                    }
                }
            }
            Self::List(item) => {
                if let Value::Array(items) = value {
                    for v in items {
                        item.gather_refs(v, out);
                    }
                }
            }
            Self::Scalar(_) | Self::Json => {}
        }
    }

    /// Copy of `value` with struct fields in declaration order, extras after.
    #[must_use]
    pub fn export_data(&self, value: &Value) -> Value {
        match (self, value) {
            (Self::Struct(body), Value::Object(map)) => {
                let mut out = Map::new();
                for field in &body.fields {
                    if let Some(v) = map.get(&field.name) {
                        out.insert(field.name.clone(), field.accessor.export_data(v));
                    }
                }
                for (key, v) in map {
                    if !body.is_declared(key) {
                        out.insert(key.clone(), v.clone());
                    }
                }
                Value::Object(out)
            }
            (Self::List(item), Value::Array(items)) => {
                Value::Array(items.iter().map(|v| item.export_data(v)).collect())
            }
            _ => value.clone(),
        }
    }

    /// Set one field of a struct body in place.
    ///
    /// Only `Struct` bodies have settable fields; any other shape is
    /// `NotImplemented` naming the shape.
    pub fn set_field(
        &self,
        type_name: &TypeName,
        data: &mut Value,
        field: &str,
        value: Value,
    ) -> Result<(), GroveError> {
        let Self::Struct(body) = self else {
            return Err(GroveError::NotImplemented(format!(
                "setting fields of a '{}' body",
                self.shape_name()
            )));
        };
        let declared = body.field(field).ok_or_else(|| GroveError::UnknownField {
            type_name: type_name.clone(),
            field: field.to_string(),
        })?;
        let mapped = declared
            .accessor
            .map_in(&value, &field_path(type_name.as_str(), field))?;

        if data.is_null() {
            *data = Value::Object(Map::new());
        }
        match data {
            Value::Object(map) => {
                map.insert(field.to_string(), mapped);
                Ok(())
            }
            _ => Err(GroveError::InvalidValue {
                path: type_name.to_string(),
                expected: "object".to_string(),
            }),
        }
    }
}

// =============================================================================
// NODE & RELATION ACCESSORS
// =============================================================================

/// A record identity discovered by `NodeAccessor::gather_refs`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecordRef {
    Node(NodeId),
    Edge(EdgeTriple),
}

/// Live view of the `predicate` edges leaving one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationAccessor {
    pub predicate: Predicate,
    pub target: TypeName,
}

impl RelationAccessor {
    /// The edges currently stored for `subject` and this predicate.
    pub async fn edges(&self, store: &Store, subject: &NodeId) -> Result<Vec<StoreEdge>, GroveError> {
        store
            .query_edges(&EdgeQuery::new(self.predicate.clone()).subject(subject.clone()))
            .await
    }

    /// Object ids of the current edges.
    pub async fn targets(&self, store: &Store, subject: &NodeId) -> Result<Vec<NodeId>, GroveError> {
        Ok(self
            .edges(store, subject)
            .await?
            .into_iter()
            .map(|edge| edge.triple().object.clone())
            .collect())
    }
}

/// Accessor of a node: a body plus one relation accessor per predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeAccessor {
    type_name: TypeName,
    body: Accessor,
    relations: Vec<RelationAccessor>,
}

impl NodeAccessor {
    /// Build the accessor of a declared type.
    #[must_use]
    pub fn from_def(def: &TypeDef) -> Self {
        let body = match def.shape {
            ShapeKind::Struct => Accessor::Struct(StructAccessor::from_fields(&def.fields)),
            ShapeKind::List => Accessor::List(Box::new(
                def.item
                    .as_ref()
                    .map(Accessor::from_field_type)
                    .unwrap_or(Accessor::Json),
            )),
        };
        Self {
            type_name: def.name.clone(),
            body,
            relations: def
                .relations
                .iter()
                .map(|r| RelationAccessor {
                    predicate: r.predicate.clone(),
                    target: r.target.clone(),
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &TypeName {
        &self.type_name
    }

    #[must_use]
    pub fn body(&self) -> &Accessor {
        &self.body
    }

    /// Declared relations, in declaration order.
    #[must_use]
    pub fn relations(&self) -> &[RelationAccessor] {
        &self.relations
    }

    /// The relation accessor for a predicate.
    #[must_use]
    pub fn relation(&self, predicate: &Predicate) -> Option<&RelationAccessor> {
        self.relations.iter().find(|r| &r.predicate == predicate)
    }

    /// Whether the type declares a relation with the predicate.
    #[must_use]
    pub fn declares(&self, predicate: &Predicate) -> bool {
        self.relation(predicate).is_some()
    }

    pub fn map_out(&self, node_id: &NodeId, raw: &Value) -> Result<Value, GroveError> {
        self.body.map_out(raw, node_id.as_str())
    }

    pub fn map_in(&self, node_id: &NodeId, typed: &Value) -> Result<Value, GroveError> {
        self.body.map_in(typed, node_id.as_str())
    }

    pub fn set_field(&self, data: &mut Value, field: &str, value: Value) -> Result<(), GroveError> {
        self.body.set_field(&self.type_name, data, field, value)
    }

    #[must_use]
    pub fn export_data(&self, raw: &Value) -> Value {
        self.body.export_data(raw)
    }

    /// Every record the node points to: ref fields, then for each relation
    /// its live edges and their objects. Duplicates are reported once.
    pub async fn gather_refs(
        &self,
        store: &Store,
        node_id: &NodeId,
        raw: &Value,
    ) -> Result<Vec<RecordRef>, GroveError> {
        let mut ids = Vec::new();
        self.body.gather_refs(raw, &mut ids);
        let mut refs: Vec<RecordRef> = ids.into_iter().map(RecordRef::Node).collect();

        for relation in &self.relations {
            for edge in relation.edges(store, node_id).await? {
                let triple = edge.triple().clone();
                refs.push(RecordRef::Node(triple.object.clone()));
                refs.push(RecordRef::Edge(triple));
            }
        }

        let mut seen = std::collections::BTreeSet::new();
        refs.retain(|r| seen.insert(r.clone()));
        Ok(refs)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_def() -> TypeDef {
        serde_json::from_value(json!({
            "name": "User",
            "fields": [
                { "name": "name", "type": { "kind": "string" }, "required": true },
                { "name": "age", "type": { "kind": "number" }, "default": 0 },
                { "name": "manager", "type": { "kind": "ref", "target": "User" } },
                { "name": "tags", "type": { "kind": "list", "item": { "kind": "string" } } }
            ],
            "relations": [{ "predicate": "knows", "target": "User" }]
        }))
        .expect("type def")
    }

    fn accessor() -> NodeAccessor {
        NodeAccessor::from_def(&user_def())
    }

    #[test]
    fn map_out_applies_defaults_and_keeps_extras() {
        let out = accessor()
            .map_out(&NodeId::new("u1"), &json!({ "extra": 1, "name": "ann" }))
            .expect("map out");
        assert_eq!(out, json!({ "name": "ann", "age": 0, "extra": 1 }));
        let keys: Vec<&String> = out.as_object().expect("object").keys().collect();
        assert_eq!(keys, vec!["name", "age", "extra"]);
    }

    #[test]
    fn map_out_rejects_wrong_scalar() {
        let err = accessor()
            .map_out(&NodeId::new("u1"), &json!({ "name": 3 }))
            .expect_err("type mismatch");
        match err {
            GroveError::InvalidValue { path, expected } => {
                assert_eq!(path, "u1.name");
                assert_eq!(expected, "string");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn map_in_enforces_required_and_drops_nulls() {
        let nodes = accessor();
        let missing = nodes.map_in(&NodeId::new("u1"), &json!({ "age": 3 }));
        assert!(matches!(missing, Err(GroveError::InvalidValue { .. })));

        let raw = nodes
            .map_in(&NodeId::new("u1"), &json!({ "name": "ann", "manager": null }))
            .expect("map in");
        assert_eq!(raw, json!({ "name": "ann" }));
    }

    #[test]
    fn list_items_are_checked_with_index_paths() {
        let err = accessor()
            .map_out(&NodeId::new("u1"), &json!({ "name": "a", "tags": ["x", 2] }))
            .expect_err("bad item");
        match err {
            GroveError::InvalidValue { path, .. } => assert_eq!(path, "u1.tags[1]"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn export_orders_declared_fields_first() {
        let exported = accessor().export_data(&json!({ "z": 1, "age": 4, "name": "b" }));
        let keys: Vec<&String> = exported.as_object().expect("object").keys().collect();
        assert_eq!(keys, vec!["name", "age", "z"]);
    }

    #[test]
    fn set_field_checks_declaration_and_type() {
        let nodes = accessor();
        let mut data = Value::Null;
        nodes
            .set_field(&mut data, "name", json!("carl"))
            .expect("set");
        assert_eq!(data, json!({ "name": "carl" }));

        assert!(matches!(
            nodes.set_field(&mut data, "nickname", json!("c")),
            Err(GroveError::UnknownField { .. })
        ));
        assert!(matches!(
            nodes.set_field(&mut data, "age", json!("old")),
            Err(GroveError::InvalidValue { .. })
        ));
    }

    #[test]
    fn set_field_on_list_body_is_not_implemented() {
        let def: TypeDef = serde_json::from_value(json!({
            "name": "Tags",
            "shape": "list",
            "item": { "kind": "string" }
        }))
        .expect("type def");
        let nodes = NodeAccessor::from_def(&def);
        let mut data = json!([]);
        match nodes.set_field(&mut data, "first", json!("x")) {
            Err(GroveError::NotImplemented(msg)) => assert!(msg.contains("List")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn ref_fields_are_gathered() {
        let mut ids = Vec::new();
        accessor()
            .body()
            .gather_refs(&json!({ "name": "a", "manager": "boss" }), &mut ids);
        assert_eq!(ids, vec![NodeId::new("boss")]);
    }

    #[test]
    fn relations_are_declared() {
        let nodes = accessor();
        assert!(nodes.declares(&Predicate::new("knows")));
        assert!(!nodes.declares(&Predicate::new("Top")));
        assert_eq!(nodes.relations().len(), 1);
    }
}
