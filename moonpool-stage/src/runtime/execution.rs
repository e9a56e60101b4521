//! The execution stage: routes inbound invocations to local entries.
//!
//! # Routing
//!
//! ```text
//! on_invocation(inv)
//!   ├─ local entry exists         → entry.run(invoke job)
//!   ├─ actor ref, node Running    → serializer.offer(ref, activation job)
//!   └─ otherwise                  → hops += 1, forwarder.write(inv)
//! ```
//!
//! Routing never blocks and never fails: every outcome reaches the caller
//! through the invocation's completion handle. Activation and invoke jobs
//! share the reference's serializer slot, so an activation job that runs
//! the triggering invocation inline keeps arrival order.

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::Instrument;

use crate::context::InvocationContext;
use crate::dispatch::{DispatchTable, Target};
use crate::error::{AlreadyRegistered, InvocationError, QueueFull};
use crate::invocation::{Invocation, Message};
use crate::node::NodeHandle;
use crate::objects::{EntryState, LocalEntry, LocalObjects};
use crate::types::RemoteReference;

use super::forward::Forwarder;
use super::serializer::{ExecutionSerializer, Job, JobFuture};

/// Per-node invocation dispatcher.
pub struct Execution {
    node: NodeHandle,
    objects: LocalObjects,
    serializer: Arc<ExecutionSerializer<RemoteReference>>,
    dispatch: Arc<DispatchTable>,
    forwarder: Arc<dyn Forwarder>,
}

enum JobKind {
    Invoke(Arc<LocalEntry>),
    Activate,
}

/// An invocation waiting in a reference's serializer slot.
struct InvocationJob {
    execution: Arc<Execution>,
    invocation: Invocation,
    kind: JobKind,
}

impl Job for InvocationJob {
    fn run(self: Box<Self>) -> JobFuture {
        let InvocationJob {
            execution,
            invocation,
            kind,
        } = *self;
        Box::pin(async move { execution.execute(kind, invocation).await })
    }
}

impl Execution {
    /// Create an execution stage for `node` that spawns jobs onto `runtime`.
    pub fn new(
        node: NodeHandle,
        dispatch: Arc<DispatchTable>,
        forwarder: Arc<dyn Forwarder>,
        runtime: Handle,
    ) -> Self {
        let serializer = Arc::new(ExecutionSerializer::new(runtime));
        Self {
            node,
            objects: LocalObjects::new(Arc::clone(&serializer)),
            serializer,
            dispatch,
            forwarder,
        }
    }

    /// Pipeline entry point. Invocations are routed; any other message is
    /// passed through to the forwarder untouched.
    pub fn on_read(self: &Arc<Self>, message: Message) {
        match message {
            Message::Invocation(invocation) => self.on_invocation(invocation),
            other => self.write(other),
        }
    }

    /// Route one inbound invocation. Returns immediately.
    pub fn on_invocation(self: &Arc<Self>, invocation: Invocation) {
        let reference = &invocation.to_reference;
        tracing::debug!(
            "Routing invocation {} to {} (hops: {})",
            invocation.method_id,
            reference,
            invocation.hops
        );

        if let Some(entry) = self.objects.find(reference) {
            self.submit(JobKind::Invoke(entry), invocation);
        } else if reference.is_actor() && self.node.state().accepts_activations() {
            self.submit(JobKind::Activate, invocation);
        } else {
            self.forward(invocation);
        }
    }

    /// Deactivate the local entry for `reference`.
    ///
    /// Runs in the entry's serializer slot after everything already queued
    /// ahead of it; invocations queued behind it are forwarded. Returns
    /// false when there was no live entry.
    pub async fn deactivate(self: &Arc<Self>, reference: &RemoteReference) -> bool {
        let Some(entry) = self.objects.find(reference) else {
            return false;
        };

        let (tx, rx) = oneshot::channel();
        let execution = Arc::clone(self);
        let retiring = Arc::clone(&entry);
        let job = async move {
            let retired = execution.retire(&retiring).await;
            let _ = tx.send(retired);
        };
        if entry.run(job, usize::MAX).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Host an already-constructed object under `reference`.
    ///
    /// Used for observers, which are never activated on demand.
    pub fn register_object(
        &self,
        reference: RemoteReference,
        target: Target,
    ) -> Result<Arc<LocalEntry>, AlreadyRegistered> {
        self.objects.register_object(reference, target)
    }

    /// The local entry for `reference`, if any.
    pub fn local_entry(&self, reference: &RemoteReference) -> Option<Arc<LocalEntry>> {
        self.objects.find(reference)
    }

    /// The local entry registry.
    pub fn objects(&self) -> &LocalObjects {
        &self.objects
    }

    /// The per-reference serializer.
    pub fn serializer(&self) -> &ExecutionSerializer<RemoteReference> {
        &self.serializer
    }

    /// The node this stage is bound to.
    pub fn node(&self) -> &NodeHandle {
        &self.node
    }

    fn submit(self: &Arc<Self>, kind: JobKind, invocation: Invocation) {
        let max_queue_size = self.node.config().max_queue_size();
        let reference = invocation.to_reference.clone();
        let entry = match &kind {
            JobKind::Invoke(entry) => Some(Arc::clone(entry)),
            JobKind::Activate => None,
        };
        let job = InvocationJob {
            execution: Arc::clone(self),
            invocation,
            kind,
        };

        let offered = match entry {
            Some(entry) => entry.run(job, max_queue_size),
            None => self.serializer.offer(reference.clone(), job, max_queue_size),
        };
        if let Err(QueueFull {
            job,
            max_queue_size,
        }) = offered
        {
            let mut invocation = job.invocation;
            let error = InvocationError::QueueFull {
                reference: reference.clone(),
                max_queue_size,
            };
            if invocation.complete(Err(error)) {
                tracing::warn!("Queue full for {}, invocation rejected", reference);
            } else {
                tracing::warn!("Queue full for {}, one-way invocation dropped", reference);
            }
        }
    }

    /// Send `invocation` back to the pipeline, counting the hop.
    fn forward(&self, mut invocation: Invocation) {
        let max = self.node.config().max_hops();
        if invocation.hops >= max {
            let hops = invocation.hops;
            let reference = invocation.to_reference.clone();
            if invocation.complete(Err(InvocationError::TooManyHops { hops, max })) {
                tracing::warn!("Hop limit reached for {} ({} hops), invocation failed", reference, hops);
            } else {
                tracing::warn!("Hop limit reached for {} ({} hops), one-way invocation dropped", reference, hops);
            }
            return;
        }

        invocation.hops += 1;
        tracing::debug!(
            "Forwarding {} to {} (hops: {})",
            invocation.method_id,
            invocation.to_reference,
            invocation.hops
        );
        self.write(Message::Invocation(invocation));
    }

    fn write(&self, message: Message) {
        let Err(undelivered) = self.forwarder.write(message) else {
            return;
        };
        match undelivered.message {
            Message::Invocation(mut invocation) => {
                let reason = undelivered.error.to_string();
                let reference = invocation.to_reference.clone();
                if !invocation.complete(Err(InvocationError::Forward(reason))) {
                    tracing::warn!(
                        "Forward of one-way invocation to {} failed: {}",
                        reference,
                        undelivered.error
                    );
                }
            }
            Message::Other(_) => {
                tracing::warn!("Dropping pass-through message: {}", undelivered.error);
            }
        }
    }

    async fn execute(self: Arc<Self>, kind: JobKind, invocation: Invocation) {
        let entry = match kind {
            JobKind::Invoke(entry) if entry.state() != EntryState::Failed => entry,
            // Queued behind a failed activation: retry it here, still in order.
            JobKind::Invoke(_) | JobKind::Activate => {
                match self.activation_entry(&invocation.to_reference) {
                    Some(entry) => entry,
                    None => {
                        self.forward(invocation);
                        return;
                    }
                }
            }
        };
        self.perform_invocation(invocation, &entry).await;
    }

    /// The entry an activating invocation runs on, or `None` once the node
    /// stopped activating. The node state is read under the registry lock so
    /// `Stage::stop` cannot miss an entry registered concurrently.
    fn activation_entry(&self, reference: &RemoteReference) -> Option<Arc<LocalEntry>> {
        let node = &self.node;
        let (entry, created) = self
            .objects
            .get_or_register(reference.clone(), || node.state().accepts_activations())?;
        if created {
            tracing::debug!("Registered local entry: {}", entry.reference());
        }
        Some(entry)
    }

    async fn perform_invocation(&self, mut invocation: Invocation, entry: &Arc<LocalEntry>) {
        let span = tracing::debug_span!(
            "invocation",
            node = %self.node.node_id(),
            reference = %invocation.to_reference,
            method = %invocation.method_id,
            one_way = invocation.is_one_way(),
        );

        async move {
            if entry.state().is_terminal() {
                tracing::debug!("Entry deactivated, forwarding");
                self.forward(invocation);
                return;
            }

            let mut target = entry.lock_target().await;
            let instance = match self.ensure_activated(entry, &mut target).await {
                Ok(instance) => instance,
                Err(error) => {
                    tracing::warn!("Activation failed for {}: {}", entry.reference(), error);
                    if let Err(e) = entry.set_state(EntryState::Failed) {
                        tracing::warn!("{}", e);
                    }
                    self.objects.remove(entry);
                    invocation.complete(Err(error));
                    return;
                }
            };

            let ctx = InvocationContext::new(
                invocation.to_reference.clone(),
                invocation.method_id,
                self.node.clone(),
            )
            .with_sticky_headers(invocation.headers.as_ref(), self.node.config().sticky_headers());
            let params = std::mem::take(&mut invocation.params);

            let result = self
                .dispatch
                .invoke(&mut **instance, &ctx, invocation.method_id, params)
                .await;
            drop(target);

            match invocation.take_completion() {
                Some(completion) => completion.complete(result),
                None => {
                    if let Err(error) = result {
                        tracing::debug!("One-way invocation failed: {}", error);
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Construct the target on first use.
    async fn ensure_activated<'a>(
        &self,
        entry: &LocalEntry,
        slot: &'a mut Option<Target>,
    ) -> Result<&'a mut Target, InvocationError> {
        let instance = match slot.take() {
            Some(existing) => existing,
            None => {
                let instance = self.dispatch.activate(entry.reference()).await?;
                if let Err(e) = entry.set_state(EntryState::Activated) {
                    tracing::warn!("{}", e);
                }
                tracing::debug!("Activated: {}", entry.reference());
                instance
            }
        };
        Ok(slot.insert(instance))
    }

    /// Run the deactivate hook, mark the entry retired and unregister it.
    async fn retire(&self, entry: &Arc<LocalEntry>) -> bool {
        if entry.state().is_terminal() {
            return false;
        }

        let mut target = entry.lock_target().await;
        if let Some(mut instance) = target.take() {
            if let Err(error) = self
                .dispatch
                .deactivate(entry.reference(), &mut *instance)
                .await
            {
                tracing::warn!("Deactivate hook failed for {}: {}", entry.reference(), error);
            }
        }
        drop(target);

        if let Err(e) = entry.set_state(EntryState::Deactivated) {
            tracing::warn!("{}", e);
        }
        self.objects.remove(entry);
        tracing::info!("Deactivated: {}", entry.reference());
        true
    }
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution")
            .field("node", &self.node.node_id())
            .field("objects", &self.objects.len())
            .field("dispatch", &self.dispatch)
            .finish_non_exhaustive()
    }
}
