//! Outbound side of the execution stage.
//!
//! Invocations that cannot run here, and every non-invocation message, are
//! written to a [`Forwarder`]. Placement and transport live behind it.

use tokio::sync::mpsc;

use crate::error::ForwardError;
use crate::invocation::Message;

/// A message the forwarder could not accept, handed back with the reason.
#[derive(Debug, thiserror::Error)]
#[error("message not forwarded: {error}")]
pub struct Undelivered {
    /// The message, returned so its completion can still be resolved.
    pub message: Message,
    /// Why it was refused.
    pub error: ForwardError,
}

/// Next stage of the node pipeline.
///
/// `write` must not block: implementations queue the message and return.
pub trait Forwarder: Send + Sync + 'static {
    /// Hand `message` to the outbound pipeline.
    fn write(&self, message: Message) -> Result<(), Undelivered>;
}

/// Forwarder backed by an unbounded tokio channel.
///
/// The receiver is the outbound pipeline: a transport task, a router for
/// another in-process node, or a test asserting on what left the node.
#[derive(Debug, Clone)]
pub struct ChannelForwarder {
    tx: mpsc::UnboundedSender<Message>,
}

impl ChannelForwarder {
    /// Create the forwarder and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Forwarder for ChannelForwarder {
    fn write(&self, message: Message) -> Result<(), Undelivered> {
        self.tx.send(message).map_err(|err| Undelivered {
            message: err.0,
            error: ForwardError::Closed,
        })
    }
}
