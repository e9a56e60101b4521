//! Invocation messages and their completion handles.
//!
//! An [`Invocation`] is the unit of work delivered by the transport to the
//! execution layer. Two-way invocations carry a [`Completion`], a
//! single-assignment result cell whose other half ([`PendingResponse`]) is
//! held by the caller.
//!
//! # Exactly-once completion
//!
//! `Completion::succeed` and `Completion::fail` take `self`, so resolving a
//! handle twice does not compile. Dropping a handle without resolving it
//! resolves the caller with [`InvocationError::Abandoned`]: a two-way caller
//! always observes exactly one outcome.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::InvocationError;
use crate::types::{MethodId, RemoteReference};

/// Caller-supplied invocation headers.
pub type Headers = HashMap<String, Value>;

/// Outcome of a two-way invocation.
pub type InvocationResult = Result<Value, InvocationError>;

/// Write side of a two-way invocation's result.
pub struct Completion {
    tx: Option<oneshot::Sender<InvocationResult>>,
}

impl Completion {
    /// Create a connected completion/response pair.
    pub fn channel() -> (Completion, PendingResponse) {
        let (tx, rx) = oneshot::channel();
        (Completion { tx: Some(tx) }, PendingResponse { rx })
    }

    /// Resolve the invocation with a success value.
    pub fn succeed(self, value: Value) {
        self.resolve(Ok(value));
    }

    /// Resolve the invocation with a failure.
    pub fn fail(self, error: InvocationError) {
        self.resolve(Err(error));
    }

    /// Resolve with either outcome.
    pub fn complete(self, result: InvocationResult) {
        self.resolve(result);
    }

    /// True once the caller has dropped its [`PendingResponse`].
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }

    fn resolve(mut self, result: InvocationResult) {
        if let Some(tx) = self.tx.take() {
            // The caller may have given up; that is its decision, not an error here.
            let _ = tx.send(result);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(InvocationError::Abandoned));
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("resolved", &self.tx.is_none())
            .finish()
    }
}

/// Read side of a two-way invocation's result.
///
/// Resolves to the value or error the target produced. If the completion
/// handle vanished without a resolution the future yields
/// [`InvocationError::Abandoned`].
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<InvocationResult>,
}

impl PendingResponse {
    /// Non-blocking check for a result that has already arrived.
    pub fn try_result(&mut self) -> Option<InvocationResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(InvocationError::Abandoned)),
        }
    }
}

impl Future for PendingResponse {
    type Output = InvocationResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(InvocationError::Abandoned)))
    }
}

/// An addressed, asynchronous method call.
///
/// # Structure
///
/// ```text
/// Invocation { to_reference, method_id, params, headers, completion, hops }
/// ```
///
/// # Invariants
///
/// - An invocation is one-way exactly when it carries no completion.
/// - `hops` only grows, by exactly one per forward.
#[derive(Debug)]
pub struct Invocation {
    /// The target of the call.
    pub to_reference: RemoteReference,
    /// Method discriminant on the target type.
    pub method_id: MethodId,
    /// Method parameters.
    pub params: Vec<Value>,
    /// Caller headers, if any.
    pub headers: Option<Headers>,
    /// Result handle. `None` makes the call one-way.
    pub completion: Option<Completion>,
    /// Number of times this invocation was forwarded instead of executed.
    pub hops: u32,
}

impl Invocation {
    /// Build a two-way invocation and the future its caller awaits.
    pub fn request(
        to_reference: RemoteReference,
        method_id: MethodId,
        params: Vec<Value>,
    ) -> (Invocation, PendingResponse) {
        let (completion, pending) = Completion::channel();
        let invocation = Invocation {
            to_reference,
            method_id,
            params,
            headers: None,
            completion: Some(completion),
            hops: 0,
        };
        (invocation, pending)
    }

    /// Build a one-way invocation. No completion handle exists.
    pub fn one_way(to_reference: RemoteReference, method_id: MethodId, params: Vec<Value>) -> Self {
        Invocation {
            to_reference,
            method_id,
            params,
            headers: None,
            completion: None,
            hops: 0,
        }
    }

    /// Attach caller headers.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Set the hop counter (used by transports re-materializing a forwarded call).
    pub fn with_hops(mut self, hops: u32) -> Self {
        self.hops = hops;
        self
    }

    /// True when the caller does not await a result.
    pub fn is_one_way(&self) -> bool {
        self.completion.is_none()
    }

    /// Take the completion handle, leaving the invocation one-way.
    pub fn take_completion(&mut self) -> Option<Completion> {
        self.completion.take()
    }

    /// Resolve the invocation with `result` if it is two-way.
    ///
    /// Returns `false` for one-way invocations, which never produce a result.
    pub fn complete(&mut self, result: InvocationResult) -> bool {
        match self.take_completion() {
            Some(completion) => {
                completion.complete(result);
                true
            }
            None => false,
        }
    }
}

/// Messages flowing through the node's pipeline.
///
/// The execution stage consumes invocations and passes every other
/// message through untouched.
#[derive(Debug)]
pub enum Message {
    /// A method call for the execution stage.
    Invocation(Invocation),
    /// Anything else, passed through as an opaque payload.
    Other(Value),
}
