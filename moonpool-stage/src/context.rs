//! Call-scoped invocation context.
//!
//! A fresh [`InvocationContext`] is built for every execution and handed to
//! the method handler by reference. It replaces ambient per-thread state:
//! the sticky headers copied from the caller, the reference being invoked,
//! and the node the execution is bound to all travel explicitly.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::invocation::{Headers, Invocation};
use crate::node::NodeHandle;
use crate::types::{MethodId, RemoteReference};

/// Property bag for one in-flight execution.
///
/// Never shared between invocations; dropped when the execution completes.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    reference: RemoteReference,
    method_id: MethodId,
    node: NodeHandle,
    properties: HashMap<String, Value>,
}

impl InvocationContext {
    /// Create an empty context bound to `node`.
    pub fn new(reference: RemoteReference, method_id: MethodId, node: NodeHandle) -> Self {
        Self {
            reference,
            method_id,
            node,
            properties: HashMap::new(),
        }
    }

    /// Copy the caller headers whose names are in `sticky` into the context.
    ///
    /// Headers outside the sticky set are ignored here. Nothing is copied
    /// when either side is empty.
    pub fn with_sticky_headers(mut self, headers: Option<&Headers>, sticky: &HashSet<String>) -> Self {
        let Some(headers) = headers else {
            return self;
        };
        if headers.is_empty() || sticky.is_empty() {
            return self;
        }
        for (name, value) in headers {
            if sticky.contains(name) {
                self.properties.insert(name.clone(), value.clone());
            }
        }
        self
    }

    /// The reference being invoked.
    pub fn reference(&self) -> &RemoteReference {
        &self.reference
    }

    /// The method being invoked.
    pub fn method_id(&self) -> MethodId {
        self.method_id
    }

    /// The node this execution is bound to.
    pub fn node(&self) -> &NodeHandle {
        &self.node
    }

    /// Read a property.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Set a property for the rest of this execution.
    pub fn set_property(&mut self, name: impl Into<String>, value: Value) {
        self.properties.insert(name.into(), value);
    }

    /// All properties.
    pub fn properties(&self) -> &HashMap<String, Value> {
        &self.properties
    }

    /// Carry this context's properties into an outgoing call so sticky
    /// headers keep flowing along a call chain. Headers already present on
    /// `invocation` win.
    pub fn propagate(&self, mut invocation: Invocation) -> Invocation {
        if self.properties.is_empty() {
            return invocation;
        }
        let headers = invocation.headers.get_or_insert_with(Headers::new);
        for (name, value) in &self.properties {
            headers
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        invocation
    }
}
