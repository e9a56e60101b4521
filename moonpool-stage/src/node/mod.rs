//! Node-scoped services: configuration, lifecycle state, and the stage.

mod config;
mod handle;
mod stage;

pub use config::{NodeConfig, NodeConfigBuilder, DEFAULT_MAX_HOPS, DEFAULT_MAX_QUEUE_SIZE};
pub use handle::{NodeHandle, NodeState};
pub use stage::{Stage, StageBuilder};
