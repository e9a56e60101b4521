//! Local entry: one reference's slot on this node.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::dispatch::Target;
use crate::error::{EntryStateError, QueueFull};
use crate::runtime::{ExecutionSerializer, Job};
use crate::types::RemoteReference;

/// Local entry lifecycle.
///
/// # State Transitions
///
/// ```text
/// Uninitialized → Activated → Deactivated
///       ↓
///     Failed
/// ```
///
/// `Deactivated` and `Failed` are terminal: the entry is removed from the
/// registry and a later invocation gets a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryState {
    /// Registered, target not constructed yet.
    Uninitialized,
    /// Target constructed; executing invocations.
    Activated,
    /// Retired. Queued invocations are forwarded.
    Deactivated,
    /// Activation failed. Queued invocations retry activation locally.
    Failed,
}

impl EntryState {
    /// Check if a transition to `next` is valid.
    pub fn can_transition_to(&self, next: EntryState) -> bool {
        use EntryState::*;
        matches!(
            (self, next),
            (Uninitialized, Activated)
                | (Uninitialized, Deactivated)
                | (Uninitialized, Failed)
                | (Activated, Deactivated)
        )
    }

    /// True for the final states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryState::Deactivated | EntryState::Failed)
    }
}

/// Holds at most one target instance for one reference.
///
/// The target lives behind an async mutex that is only locked by jobs
/// running in this entry's serializer slot, so it never contends.
pub struct LocalEntry {
    reference: RemoteReference,
    state: Mutex<EntryState>,
    target: tokio::sync::Mutex<Option<Target>>,
    serializer: Arc<ExecutionSerializer<RemoteReference>>,
}

impl LocalEntry {
    pub(crate) fn new(
        reference: RemoteReference,
        state: EntryState,
        target: Option<Target>,
        serializer: Arc<ExecutionSerializer<RemoteReference>>,
    ) -> Self {
        Self {
            reference,
            state: Mutex::new(state),
            target: tokio::sync::Mutex::new(target),
            serializer,
        }
    }

    /// The reference this entry hosts.
    pub fn reference(&self) -> &RemoteReference {
        &self.reference
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EntryState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `next` if the transition is valid.
    pub fn set_state(&self, next: EntryState) -> Result<(), EntryStateError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == next {
            return Ok(());
        }
        if !state.can_transition_to(next) {
            return Err(EntryStateError {
                from: *state,
                to: next,
            });
        }
        *state = next;
        Ok(())
    }

    /// Queue `job` behind whatever this entry is running.
    pub fn run<J: Job>(&self, job: J, max_queue_size: usize) -> Result<(), QueueFull<J>> {
        self.serializer
            .offer(self.reference.clone(), job, max_queue_size)
    }

    /// Jobs waiting for this entry.
    pub fn pending(&self) -> usize {
        self.serializer.pending(&self.reference)
    }

    pub(crate) async fn lock_target(&self) -> tokio::sync::MutexGuard<'_, Option<Target>> {
        self.target.lock().await
    }
}

impl fmt::Debug for LocalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalEntry")
            .field("reference", &self.reference)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
