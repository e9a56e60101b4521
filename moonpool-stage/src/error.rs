//! Error types for the invocation dispatch layer.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::objects::EntryState;
use crate::types::{ActorType, MethodId, RemoteReference};

/// Failure delivered to a caller through an invocation's completion handle.
///
/// This is the only error kind a two-way caller ever observes. It is
/// `Clone` and serializable so the transport can carry it back to a remote
/// caller.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum InvocationError {
    /// The invoked method's handler returned an error.
    #[error("application error: {0}")]
    Application(String),

    /// No handler is registered for this method on the target type.
    #[error("unknown method {method} on actor type {actor_type}")]
    UnknownMethod {
        /// Type of the target.
        actor_type: ActorType,
        /// Requested method.
        method: MethodId,
    },

    /// No factory is registered for the actor type.
    #[error("unknown actor type: {0}")]
    UnknownActorType(ActorType),

    /// The parameters could not be decoded by the handler.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The actor's activation hook failed.
    #[error("activation failed: {0}")]
    ActivationFailed(String),

    /// The target's job queue is at capacity.
    #[error("queue for {reference} is full (max: {max_queue_size})")]
    QueueFull {
        /// The overloaded target.
        reference: RemoteReference,
        /// The configured bound.
        max_queue_size: usize,
    },

    /// Forwarding would exceed the hop bound (routing loop protection).
    #[error("too many hops: {hops} (max: {max})")]
    TooManyHops {
        /// Hops already taken.
        hops: u32,
        /// Configured bound.
        max: u32,
    },

    /// The outbound pipeline refused the forwarded invocation.
    #[error("forward failed: {0}")]
    Forward(String),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),

    /// The completion handle was dropped before being resolved.
    #[error("invocation abandoned before completion")]
    Abandoned,
}

impl InvocationError {
    /// Build an application error from anything displayable.
    pub fn application(err: impl std::fmt::Display) -> Self {
        InvocationError::Application(err.to_string())
    }
}

impl From<serde_json::Error> for InvocationError {
    fn from(err: serde_json::Error) -> Self {
        InvocationError::InvalidArguments(err.to_string())
    }
}

/// Rejection from the per-reference serializer.
///
/// Hands the rejected job back so the caller can resolve whatever it owns.
pub struct QueueFull<J> {
    /// The job that was not admitted.
    pub job: J,
    /// The bound that was hit.
    pub max_queue_size: usize,
}

impl<J> fmt::Debug for QueueFull<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueFull")
            .field("max_queue_size", &self.max_queue_size)
            .finish_non_exhaustive()
    }
}

impl<J> fmt::Display for QueueFull<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job queue full (max: {})", self.max_queue_size)
    }
}

impl<J> std::error::Error for QueueFull<J> {}

/// A reference already has a local entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("reference already registered: {0}")]
pub struct AlreadyRegistered(pub RemoteReference);

/// Errors from the outbound forwarding stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForwardError {
    /// The outbound pipeline has shut down.
    #[error("outbound pipeline closed")]
    Closed,

    /// The outbound pipeline rejected the message.
    #[error("outbound pipeline rejected message: {0}")]
    Rejected(String),
}

/// Invalid local entry lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid entry state transition from {from:?} to {to:?}")]
pub struct EntryStateError {
    /// Current state.
    pub from: EntryState,
    /// Requested state.
    pub to: EntryState,
}

/// Errors related to node configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The node id is empty.
    #[error("node id cannot be empty")]
    EmptyNodeId,

    /// `max_queue_size` must admit at least one pending job.
    #[error("max_queue_size must be at least 1")]
    ZeroQueueSize,

    /// The configuration source could not be parsed.
    #[error("invalid configuration: {0}")]
    Parse(String),

    /// No tokio runtime was supplied and none is current.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// A stage needs an outbound forwarder.
    #[error("no forwarder configured")]
    MissingForwarder,
}
