//! Per-node configuration for a [`Stage`](super::Stage).
//!
//! Holds the knobs the execution layer reads on every invocation: the
//! sticky header allow-list, the per-reference queue bound, and the hop
//! bound for forwarded invocations.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default bound on pending jobs per reference.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;

/// Default bound on forwards before an invocation is failed.
pub const DEFAULT_MAX_HOPS: u32 = 2;

/// Per-node configuration.
///
/// # Example
///
/// ```rust
/// use moonpool_stage::NodeConfig;
///
/// let config = NodeConfig::builder()
///     .node_id("node-1")
///     .sticky_header("trace-id")
///     .max_queue_size(128)
///     .build()
///     .expect("valid config");
///
/// assert_eq!(config.node_id(), "node-1");
/// assert!(config.sticky_headers().contains("trace-id"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    node_id: String,
    sticky_headers: HashSet<String>,
    max_queue_size: usize,
    max_hops: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "local".to_string(),
            sticky_headers: HashSet::new(),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_hops: DEFAULT_MAX_HOPS,
        }
    }
}

impl NodeConfig {
    /// Start building a node configuration.
    pub fn builder() -> NodeConfigBuilder {
        NodeConfigBuilder::default()
    }

    /// Parse and validate a JSON configuration. Missing fields take defaults.
    pub fn from_json(source: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig =
            serde_json::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.is_empty() {
            return Err(ConfigError::EmptyNodeId);
        }
        if self.max_queue_size == 0 {
            return Err(ConfigError::ZeroQueueSize);
        }
        Ok(())
    }

    /// This node's identifier, used in logs and spans.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Header names propagated from caller to callee.
    pub fn sticky_headers(&self) -> &HashSet<String> {
        &self.sticky_headers
    }

    /// Maximum pending jobs per reference before new jobs are rejected.
    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    /// Maximum hops an invocation may take before it is failed.
    pub fn max_hops(&self) -> u32 {
        self.max_hops
    }
}

/// Builder for [`NodeConfig`].
#[derive(Debug, Clone, Default)]
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    /// Set the node id.
    pub fn node_id(mut self, node_id: impl Into<String>) -> Self {
        self.config.node_id = node_id.into();
        self
    }

    /// Add one sticky header name.
    pub fn sticky_header(mut self, name: impl Into<String>) -> Self {
        self.config.sticky_headers.insert(name.into());
        self
    }

    /// Replace the sticky header set.
    pub fn sticky_headers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.sticky_headers = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the per-reference queue bound.
    pub fn max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.config.max_queue_size = max_queue_size;
        self
    }

    /// Set the hop bound.
    pub fn max_hops(mut self, max_hops: u32) -> Self {
        self.config.max_hops = max_hops;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<NodeConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
