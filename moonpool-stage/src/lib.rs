//! # moonpool-stage
//!
//! Invocation dispatch for location-transparent virtual actors.
//!
//! A node receives [`Invocation`]s addressed to [`RemoteReference`]s and
//! decides, locally, whether to execute each one against a hosted entry,
//! activate the actor first, or forward the invocation to the rest of the
//! cluster. Callers never learn which happened; they only see the result on
//! the invocation's completion handle.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Stage (node runtime)                                       │
//! │   NodeConfig + NodeState, start() / stop()                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Execution (router)                                         │
//! │   on_invocation: local entry │ activation job │ forward     │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │  LocalObjects                │  ExecutionSerializer         │
//! │   reference → LocalEntry     │   per-reference FIFO,        │
//! │   get-or-register            │   one job at a time          │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │  DispatchTable                                              │
//! │   (target type, method id) → handler, actor factories       │
//! └─────────────────────────────────────────────────────────────┘
//!            │ forwarded invocations, pass-through messages
//!            ▼
//!       Forwarder (placement / transport)
//! ```
//!
//! ## Guarantees
//!
//! - At most one job runs per reference at a time, in arrival order.
//! - An actor is activated at most once per entry, on first use.
//! - Every two-way completion handle is resolved exactly once.
//! - Routing never blocks; handlers run on the shared tokio pool.
//!
//! ## Quick Start
//!
//! ```ignore
//! use moonpool_stage::{ChannelForwarder, Invocation, NodeConfig, Stage};
//!
//! let (forwarder, outbound) = ChannelForwarder::new();
//! let stage = Stage::builder()
//!     .config(NodeConfig::builder().node_id("node-1").sticky_header("trace-id").build()?)
//!     .register_actor::<Greeter>()
//!     .forwarder(forwarder)
//!     .build()?;
//! stage.start();
//!
//! let (invocation, response) = Invocation::request(greeter_ref, GREET, vec![]);
//! stage.on_invocation(invocation);
//! let greeting = response.await?;
//! ```

#![deny(missing_docs)]

pub mod context;
pub mod dispatch;
pub mod error;
pub mod invocation;
pub mod node;
pub mod objects;
pub mod runtime;
pub mod types;

pub use context::InvocationContext;
pub use dispatch::{Actor, DispatchTable, Method, MethodFuture, Methods, Target};
pub use error::{
    AlreadyRegistered, ConfigError, EntryStateError, ForwardError, InvocationError, QueueFull,
};
pub use invocation::{
    Completion, Headers, Invocation, InvocationResult, Message, PendingResponse,
};
pub use node::{NodeConfig, NodeConfigBuilder, NodeHandle, NodeState, Stage, StageBuilder};
pub use objects::{EntryState, LocalEntry, LocalObjects};
pub use runtime::{ChannelForwarder, Execution, ExecutionSerializer, Forwarder, Job, Undelivered};
pub use types::{ActorType, MethodId, ReferenceKind, RemoteReference};

// Re-exported for `Actor` implementations.
pub use async_trait::async_trait;
