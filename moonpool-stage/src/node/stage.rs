//! Stage: one node's execution runtime, wired and ready to serve.

use std::any::Any;
use std::sync::Arc;

use futures::future::join_all;
use tokio::runtime::Handle;

use crate::dispatch::{Actor, DispatchTable, Method};
use crate::error::{AlreadyRegistered, ConfigError};
use crate::invocation::{Invocation, Message};
use crate::objects::LocalEntry;
use crate::runtime::{Execution, Forwarder};
use crate::types::{MethodId, RemoteReference};

use super::config::NodeConfig;
use super::handle::{NodeHandle, NodeState};

/// Builder for [`Stage`] with fluent API.
///
/// # Example
///
/// ```rust,ignore
/// let (forwarder, outbound) = ChannelForwarder::new();
///
/// let stage = Stage::builder()
///     .config(NodeConfig::builder().node_id("node-1").build()?)
///     .register_actor::<Greeter>()
///     .forwarder(forwarder)
///     .build()?;
///
/// stage.start();
/// stage.on_invocation(invocation);
/// ```
pub struct StageBuilder {
    config: NodeConfig,
    dispatch: DispatchTable,
    forwarder: Option<Arc<dyn Forwarder>>,
    runtime: Option<Handle>,
}

impl StageBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
            dispatch: DispatchTable::new(),
            forwarder: None,
            runtime: None,
        }
    }

    /// Set the node configuration.
    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an actor type.
    pub fn register_actor<A: Actor>(mut self) -> Self {
        self.dispatch.register_actor::<A>();
        self
    }

    /// Register a handler on a non-actor addressable type.
    pub fn register_method<T: Any + Send>(mut self, id: MethodId, method: Method<T>) -> Self {
        self.dispatch.register_method::<T>(id, method);
        self
    }

    /// Set the outbound pipeline (required).
    pub fn forwarder(mut self, forwarder: impl Forwarder) -> Self {
        self.forwarder = Some(Arc::new(forwarder));
        self
    }

    /// Spawn jobs onto `runtime` instead of the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the stage. It starts in [`NodeState::Starting`].
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid, no forwarder was set,
    /// or no runtime was given and none is current.
    pub fn build(self) -> Result<Stage, ConfigError> {
        self.config.validate()?;
        let forwarder = self.forwarder.ok_or(ConfigError::MissingForwarder)?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| ConfigError::NoRuntime)?,
        };

        let node = NodeHandle::new(self.config);
        tracing::info!(
            "Stage created: node_id={}, max_queue_size={}, max_hops={}",
            node.node_id(),
            node.config().max_queue_size(),
            node.config().max_hops()
        );

        let execution = Execution::new(node.clone(), Arc::new(self.dispatch), forwarder, runtime);
        Ok(Stage {
            node,
            execution: Arc::new(execution),
        })
    }
}

impl Default for StageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A node's execution runtime.
#[derive(Debug, Clone)]
pub struct Stage {
    node: NodeHandle,
    execution: Arc<Execution>,
}

impl Stage {
    /// Start building a stage.
    pub fn builder() -> StageBuilder {
        StageBuilder::new()
    }

    /// Begin accepting activations.
    pub fn start(&self) {
        self.node.set_state(NodeState::Running);
    }

    /// Stop activating, deactivate every local entry, then mark the node
    /// stopped. Entries finish the jobs queued ahead of their deactivation.
    pub async fn stop(&self) {
        self.node.set_state(NodeState::Stopping);

        let references = self.execution.objects().references();
        let deactivated = join_all(
            references
                .iter()
                .map(|reference| self.execution.deactivate(reference)),
        )
        .await
        .into_iter()
        .filter(|retired| *retired)
        .count();

        self.node.set_state(NodeState::Stopped);
        tracing::info!(
            "Stage stopped: node_id={}, deactivated={}",
            self.node.node_id(),
            deactivated
        );
    }

    /// Route an inbound invocation. See [`Execution::on_invocation`].
    pub fn on_invocation(&self, invocation: Invocation) {
        self.execution.on_invocation(invocation);
    }

    /// Feed a pipeline message. See [`Execution::on_read`].
    pub fn on_read(&self, message: Message) {
        self.execution.on_read(message);
    }

    /// Host an already-constructed object (e.g. an observer) on this node.
    pub fn register_object<T: Any + Send>(
        &self,
        reference: RemoteReference,
        object: T,
    ) -> Result<Arc<LocalEntry>, AlreadyRegistered> {
        self.execution.register_object(reference, Box::new(object))
    }

    /// The execution stage.
    pub fn execution(&self) -> &Arc<Execution> {
        &self.execution
    }

    /// The node handle.
    pub fn node(&self) -> &NodeHandle {
        &self.node
    }

    /// Current lifecycle state.
    pub fn state(&self) -> NodeState {
        self.node.state()
    }
}
