//! # Behaviors
//!
//! A behavior is the method table layered onto a materialized object at
//! spawn time. Methods are looked up by name and invoked explicitly; the
//! object's field set is never extended.

use crate::context::GraphObject;
use crate::{GroveError, TypeName};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A behavior method: receives the object and the call arguments.
pub type MethodFn = Arc<dyn Fn(&mut GraphObject, Value) -> Result<Value, GroveError> + Send + Sync>;

/// Named method table for one type.
#[derive(Clone)]
pub struct Behavior {
    name: String,
    methods: BTreeMap<String, MethodFn>,
}

impl Behavior {
    /// An empty behavior.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: BTreeMap::new(),
        }
    }

    /// The behavior every type falls back to: no methods.
    #[must_use]
    pub fn default_for(type_name: &TypeName) -> Self {
        Self::new(type_name.as_str())
    }

    /// Add (or replace) a method.
    #[must_use]
    pub fn with_method<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&mut GraphObject, Value) -> Result<Value, GroveError> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(method));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    /// Method names in lexical order.
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Invoke a method on `object`.
    pub fn invoke(
        &self,
        object: &mut GraphObject,
        method: &str,
        args: Value,
    ) -> Result<Value, GroveError> {
        let f = self
            .methods
            .get(method)
            .ok_or_else(|| GroveError::UnknownMethod {
                type_name: object.type_name().clone(),
                method: method.to_string(),
            })?;
        f(object, args)
    }
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Behavior")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}
