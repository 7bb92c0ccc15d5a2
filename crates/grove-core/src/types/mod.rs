//! # Core Type Definitions
//!
//! Identifiers and the error type shared by every Grove module:
//! - Store handles (`StoreId`) and context handles (`ContextId`)
//! - Record identifiers (`NodeId`, `TypeName`, `Predicate`, `EdgeTriple`)
//! - Error types (`GroveError`, `ErrorCategory`)
//!
//! ## Identity
//!
//! Node identity is the `NodeId` alone and is global to a store.
//! Edge identity is the percent-encoded `subject|predicate|object` string,
//! so it is directional and predicate-specific.

use crate::primitives::EDGE_ID_SEPARATOR;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// STORE & CONTEXT HANDLES
// =============================================================================

/// Process-unique handle of an open store.
///
/// Handles are allocated by a `StoreRegistry` starting at 1 and are never
/// reused for a different store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StoreId(pub u64);

impl StoreId {
    /// Placeholder carried by records a backend builds before the owning
    /// store stamps its own handle on them.
    pub const UNBOUND: Self = Self(0);
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store#{}", self.0)
    }
}

/// Handle of a graph context, unique within its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context#{}", self.0)
    }
}

// =============================================================================
// RECORD IDENTIFIERS
// =============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new identifier from a string.
            #[must_use]
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Get the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identity of a node within a store.
    NodeId
);

string_id!(
    /// Name of a type declared by a `GraphEngine`.
    TypeName
);

string_id!(
    /// Name of a relation between two nodes.
    Predicate
);

/// The specifier of an edge: a directed, predicate-labelled pair of nodes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeTriple {
    pub subject: NodeId,
    pub predicate: Predicate,
    pub object: NodeId,
}

impl EdgeTriple {
    /// Create a new edge triple.
    #[must_use]
    pub fn new(
        subject: impl Into<NodeId>,
        predicate: impl Into<Predicate>,
        object: impl Into<NodeId>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }

    /// The edge identity: each component percent-encoded, joined by `|`.
    #[must_use]
    pub fn identity(&self) -> String {
        let mut id = percent_encode(self.subject.as_str());
        id.push(EDGE_ID_SEPARATOR);
        id.push_str(&percent_encode(self.predicate.as_str()));
        id.push(EDGE_ID_SEPARATOR);
        id.push_str(&percent_encode(self.object.as_str()));
        id
    }

    /// Parse an edge identity produced by [`EdgeTriple::identity`].
    pub fn from_identity(identity: &str) -> Result<Self, GroveError> {
        let parts: Vec<&str> = identity.split(EDGE_ID_SEPARATOR).collect();
        let [subject, predicate, object] = parts.as_slice() else {
            return Err(GroveError::InvalidRecord(format!(
                "edge identity '{}' must have exactly three components",
                identity
            )));
        };
        Ok(Self {
            subject: NodeId(percent_decode(subject)?),
            predicate: Predicate(percent_decode(predicate)?),
            object: NodeId(percent_decode(object)?),
        })
    }
}

impl fmt::Display for EdgeTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -[{}]-> {}", self.subject, self.predicate, self.object)
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn percent_encode(component: &str) -> String {
    urlencoding::encode(component).into_owned()
}

fn percent_decode(component: &str) -> Result<String, GroveError> {
    urlencoding::decode(component)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| GroveError::InvalidRecord(format!("identity is not UTF-8: {}", e)))
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Coarse classification of a `GroveError`.
///
/// None of the categories is retried by the store; retry policy belongs to
/// the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Duplicate population, registration, attachment, or double free.
    IdentityViolation,
    /// A forward reference that was never resolved.
    UnresolvedReference,
    /// A schema or configuration gap (missing extension, unknown type...).
    UnimplementedExtension,
    /// The caller used an API out of order or with invalid input.
    Usage,
    /// The backend or serialization layer failed.
    Storage,
}

/// Errors that can occur in the Grove store.
#[derive(Debug, Clone, Error)]
pub enum GroveError {
    /// A node identity was populated twice (in one context or across contexts).
    #[error("Node '{node}' is already populated in {location}")]
    DuplicatePopulation { node: NodeId, location: String },

    /// An engine key was registered twice.
    #[error("Engine '{0}' is already registered")]
    DuplicateEngine(String),

    /// A behavior was attached twice for the same engine and type.
    #[error("Behavior for type '{type_name}' is already attached on engine '{engine}'")]
    DuplicateBehavior { engine: String, type_name: TypeName },

    /// A builder node was attached twice under the same parent.
    #[error("'{name}' of type '{type_name}' is already attached under '{parent}'")]
    DuplicateChild {
        parent: String,
        type_name: TypeName,
        name: String,
    },

    /// The store was already freed.
    #[error("Store {0} has been freed")]
    StoreFreed(StoreId),

    /// A forward reference was still unresolved at commit time.
    #[error("Unresolved reference '{reference}': {reason}")]
    UnresolvedReference { reference: String, reason: String },

    /// A composite shape or operation exists in the schema but is not supported.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// An engine lacks an extension required by the requested operation.
    #[error("Engine '{engine}' has no '{extension}' extension")]
    MissingExtension { engine: String, extension: String },

    /// An action batch contained an unknown action kind.
    #[error("Unknown action kind '{kind}' for backend '{backend}'")]
    UnknownAction { kind: String, backend: String },

    /// A record references a type the engine does not declare.
    #[error("Unknown type '{type_name}' for record '{path}'")]
    UnknownType { type_name: TypeName, path: String },

    /// The engine key is known but its deferred load has not completed.
    #[error("Engine '{0}' is registered but not loaded; use the async loader")]
    EngineNotLoaded(String),

    /// No engine is registered under the key.
    #[error("No such engine: '{0}'")]
    EngineNotFound(String),

    /// The engine specification is inconsistent.
    #[error("Invalid engine specification: {0}")]
    InvalidEngine(String),

    /// No open store has the handle.
    #[error("No open store with handle {0}")]
    StoreNotFound(StoreId),

    /// The type does not declare the field.
    #[error("Type '{type_name}' has no field '{field}'")]
    UnknownField { type_name: TypeName, field: String },

    /// The type does not declare the relation.
    #[error("Type '{type_name}' has no relation '{relation}'")]
    UnknownRelation { type_name: TypeName, relation: String },

    /// The object's behavior has no such method.
    #[error("Behavior of type '{type_name}' has no method '{method}'")]
    UnknownMethod { type_name: TypeName, method: String },

    /// A value does not match the declared field type.
    #[error("Invalid value at '{path}': expected {expected}")]
    InvalidValue { path: String, expected: String },

    /// A raw record has the wrong shape.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The record filter was already built.
    #[error("Record filter '{0}' is already built")]
    FilterAlreadyBuilt(String),

    /// The record filter must be built first.
    #[error("Record filter '{0}' is not built")]
    FilterNotBuilt(String),

    /// The context was closed (explicitly or by freeing its store).
    #[error("{0} is closed")]
    ContextClosed(ContextId),

    /// The store's transaction mutex was stopped.
    #[error("Transaction mutex of {0} is stopped")]
    MutexStopped(StoreId),

    /// A transaction exceeded the configured timeout.
    #[error("Transaction on {store} timed out after {millis} ms")]
    TransactionTimeout { store: StoreId, millis: u64 },

    /// A pending record failed or was abandoned before settling.
    #[error("Pending record data failed: {0}")]
    PendingFailed(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl GroveError {
    /// Classify the error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::DuplicatePopulation { .. }
            | Self::DuplicateEngine(_)
            | Self::DuplicateBehavior { .. }
            | Self::DuplicateChild { .. }
            | Self::StoreFreed(_) => ErrorCategory::IdentityViolation,
            Self::UnresolvedReference { .. } => ErrorCategory::UnresolvedReference,
            Self::NotImplemented(_)
            | Self::MissingExtension { .. }
            | Self::UnknownAction { .. }
            | Self::UnknownType { .. } => ErrorCategory::UnimplementedExtension,
            Self::EngineNotLoaded(_)
            | Self::EngineNotFound(_)
            | Self::InvalidEngine(_)
            | Self::StoreNotFound(_)
            | Self::UnknownField { .. }
            | Self::UnknownRelation { .. }
            | Self::UnknownMethod { .. }
            | Self::InvalidValue { .. }
            | Self::InvalidRecord(_)
            | Self::FilterAlreadyBuilt(_)
            | Self::FilterNotBuilt(_)
            | Self::ContextClosed(_)
            | Self::MutexStopped(_) => ErrorCategory::Usage,
            Self::TransactionTimeout { .. }
            | Self::PendingFailed(_)
            | Self::SerializationError(_)
            | Self::IoError(_) => ErrorCategory::Storage,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_identity_is_directional() {
        let forward = EdgeTriple::new("a", "knows", "b");
        let backward = EdgeTriple::new("b", "knows", "a");
        assert_ne!(forward.identity(), backward.identity());
    }

    #[test]
    fn edge_identity_is_predicate_specific() {
        let knows = EdgeTriple::new("a", "knows", "b");
        let likes = EdgeTriple::new("a", "likes", "b");
        assert_ne!(knows.identity(), likes.identity());
    }

    #[test]
    fn edge_identity_escapes_separator() {
        let triple = EdgeTriple::new("a|b", "p", "c d");
        assert_eq!(triple.identity(), "a%7Cb|p|c%20d");
        let parsed = EdgeTriple::from_identity(&triple.identity()).expect("parse");
        assert_eq!(parsed, triple);
    }

    #[test]
    fn edge_identity_rejects_wrong_arity() {
        let result = EdgeTriple::from_identity("a|b");
        assert!(matches!(result, Err(GroveError::InvalidRecord(_))));
    }

    #[test]
    fn edge_identity_handles_multibyte_text() {
        let triple = EdgeTriple::new("ümlaut", "→", "日本");
        let parsed = EdgeTriple::from_identity(&triple.identity()).expect("parse");
        assert_eq!(parsed, triple);
    }

    #[test]
    fn edge_identity_rejects_escapes_that_are_not_utf8() {
        let result = EdgeTriple::from_identity("a%FF|p|b");
        assert!(matches!(result, Err(GroveError::InvalidRecord(_))));
    }

    #[test]
    fn error_categories() {
        assert_eq!(
            GroveError::DuplicateEngine("x".into()).category(),
            ErrorCategory::IdentityViolation
        );
        assert_eq!(
            GroveError::NotImplemented("List".into()).category(),
            ErrorCategory::UnimplementedExtension
        );
        assert_eq!(
            GroveError::UnresolvedReference {
                reference: "r".into(),
                reason: "missing".into()
            }
            .category(),
            ErrorCategory::UnresolvedReference
        );
    }
}
