//! Node lifecycle state and the shared node handle.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::config::NodeConfig;

/// Coarse lifecycle of the node process.
///
/// # State Transitions
///
/// ```text
/// Starting → Running → Stopping → Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Booting; not yet accepting activations.
    Starting,
    /// Serving invocations and activating actors.
    Running,
    /// Draining; existing entries still execute, no new activations.
    Stopping,
    /// Fully stopped.
    Stopped,
}

impl NodeState {
    /// True only while new actors may be activated on this node.
    pub fn accepts_activations(&self) -> bool {
        matches!(self, NodeState::Running)
    }

    fn as_u8(self) -> u8 {
        match self {
            NodeState::Starting => 0,
            NodeState::Running => 1,
            NodeState::Stopping => 2,
            NodeState::Stopped => 3,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => NodeState::Starting,
            1 => NodeState::Running,
            2 => NodeState::Stopping,
            _ => NodeState::Stopped,
        }
    }
}

#[derive(Debug)]
struct NodeShared {
    config: NodeConfig,
    state: AtomicU8,
}

/// Cheaply clonable handle to the node an execution is bound to.
///
/// Supplies the node-scoped services the execution layer reads: the
/// configuration (sticky headers, bounds) and the lifecycle state.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    inner: Arc<NodeShared>,
}

impl NodeHandle {
    /// Create a handle in the `Starting` state.
    pub fn new(config: NodeConfig) -> Self {
        Self {
            inner: Arc::new(NodeShared {
                config,
                state: AtomicU8::new(NodeState::Starting.as_u8()),
            }),
        }
    }

    /// This node's id.
    pub fn node_id(&self) -> &str {
        self.inner.config.node_id()
    }

    /// The node configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Move the node to `state`.
    pub fn set_state(&self, state: NodeState) {
        let previous = NodeState::from_u8(self.inner.state.swap(state.as_u8(), Ordering::AcqRel));
        if previous != state {
            tracing::info!(node = %self.node_id(), ?previous, current = ?state, "node state changed");
        }
    }
}
