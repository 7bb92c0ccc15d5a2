//! # Engine Schema
//!
//! The serializable description of a graph engine: its key, the top
//! predicate that marks roots, and the declared types with their fields and
//! outward relations. Schemas are plain serde data, loadable from TOML or
//! JSON, and validated before an engine is built from them.

use crate::{GroveError, Predicate, TypeName};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Declarative description of a `GraphEngine`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSpec {
    /// Registry key of the engine.
    pub key: String,
    /// The predicate whose declaration makes a type a root type.
    pub top: Predicate,
    /// Declared types.
    #[serde(default)]
    pub types: Vec<TypeDef>,
}

/// Composite shape of a type's body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    /// Named fields.
    #[default]
    Struct,
    /// A homogeneous list of items.
    List,
}

/// One declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    pub name: TypeName,
    #[serde(default)]
    pub shape: ShapeKind,
    /// Fields of a `Struct` body.
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    /// Item type of a `List` body.
    #[serde(default)]
    pub item: Option<FieldType>,
    /// Outward relations: edges whose subject is a node of this type.
    #[serde(default)]
    pub relations: Vec<RelationDecl>,
    /// Parent type for behavior inheritance.
    #[serde(default)]
    pub extends: Option<TypeName>,
}

/// One field of a struct body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Applied by `map_out` when the stored record lacks the field.
    #[serde(default)]
    pub default: Option<Value>,
    /// Whether `map_in` rejects a missing or null value.
    #[serde(default)]
    pub required: bool,
}

/// The declared type of a field or list item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    /// Any JSON value, unchecked.
    Json,
    /// The node id of a node of the target type.
    Ref { target: TypeName },
    /// A nested struct.
    Struct { fields: Vec<FieldDef> },
    /// A nested list.
    List { item: Box<FieldType> },
}

/// A relation declared by a type: `predicate` edges to nodes of `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDecl {
    pub predicate: Predicate,
    pub target: TypeName,
}

impl EngineSpec {
    /// Look up a declared type.
    #[must_use]
    pub fn type_def(&self, name: &TypeName) -> Option<&TypeDef> {
        self.types.iter().find(|t| &t.name == name)
    }

    /// Check the schema for internal consistency.
    ///
    /// - type names are unique
    /// - at least one type declares the top predicate
    /// - every relation target, ref target and parent type is declared
    /// - `extends` chains are acyclic
    /// - a `List` body declares its item type
    pub fn validate(&self) -> Result<(), GroveError> {
        let invalid = |msg: String| GroveError::InvalidEngine(format!("{}: {}", self.key, msg));

        let mut names = BTreeSet::new();
        for def in &self.types {
            if !names.insert(&def.name) {
                return Err(invalid(format!("type '{}' declared twice", def.name)));
            }
        }

        if !self
            .types
            .iter()
            .any(|t| t.relations.iter().any(|r| r.predicate == self.top))
        {
            return Err(invalid(format!(
                "no type declares the top predicate '{}'",
                self.top
            )));
        }

        for def in &self.types {
            for relation in &def.relations {
                if !names.contains(&relation.target) {
                    return Err(invalid(format!(
                        "relation '{}' of '{}' targets unknown type '{}'",
                        relation.predicate, def.name, relation.target
                    )));
                }
            }
            if let Some(parent) = &def.extends {
                if !names.contains(parent) {
                    return Err(invalid(format!(
                        "'{}' extends unknown type '{}'",
                        def.name, parent
                    )));
                }
            }
            match def.shape {
                ShapeKind::Struct => {
                    for field in &def.fields {
                        check_field_type(&field.field_type, &names).map_err(|t| {
                            invalid(format!(
                                "field '{}' of '{}' references unknown type '{}'",
                                field.name, def.name, t
                            ))
                        })?;
                    }
                }
                ShapeKind::List => {
                    let item = def.item.as_ref().ok_or_else(|| {
                        invalid(format!("list type '{}' declares no item type", def.name))
                    })?;
                    check_field_type(item, &names).map_err(|t| {
                        invalid(format!("items of '{}' reference unknown type '{}'", def.name, t))
                    })?;
                }
            }
            self.check_ancestry(def).map_err(invalid)?;
        }
        Ok(())
    }

    fn check_ancestry(&self, def: &TypeDef) -> Result<(), String> {
        let mut seen = BTreeSet::new();
        let mut current = def;
        while let Some(parent) = &current.extends {
            if !seen.insert(parent) {
                return Err(format!("'{}' has a cyclic extends chain", def.name));
            }
            match self.type_def(parent) {
                Some(next) => current = next,
                None => break,
            }
        }
        Ok(())
    }
}

fn check_field_type(field_type: &FieldType, names: &BTreeSet<&TypeName>) -> Result<(), TypeName> {
    match field_type {
        FieldType::Ref { target } if !names.contains(target) => Err(target.clone()),
        FieldType::Struct { fields } => fields
            .iter()
            .try_for_each(|f| check_field_type(&f.field_type, names)),
        FieldType::List { item } => check_field_type(item, names),
        _ => Ok(()),
    }
}

// =============================================================================
// TESTS
// =============================================================================
