//! Execution runtime: routing, the per-reference serializer, and forwarding.

mod execution;
mod forward;
mod serializer;

pub use execution::Execution;
pub use forward::{ChannelForwarder, Forwarder, Undelivered};
pub use serializer::{ExecutionSerializer, Job, JobFuture};
