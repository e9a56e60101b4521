//! Registry of local entries, keyed by reference.
//!
//! # Get-or-register
//!
//! ```text
//! lock(entries)
//!   found            → Some((entry, false))
//!   absent, !admit() → None
//!   absent           → insert Uninitialized entry → Some((entry, true))
//! unlock
//! ```
//!
//! The lookup, the admission check and the insert happen under one lock, so
//! concurrent callers for the same reference always end up holding the same
//! entry, and a [`references`](LocalObjects::references) snapshot taken after
//! admission closes sees every entry admitted before it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::dispatch::Target;
use crate::error::AlreadyRegistered;
use crate::runtime::ExecutionSerializer;
use crate::types::RemoteReference;

use super::entry::{EntryState, LocalEntry};

type Entries = HashMap<RemoteReference, Arc<LocalEntry>>;

/// All local entries hosted by this node.
#[derive(Debug)]
pub struct LocalObjects {
    entries: Mutex<Entries>,
    serializer: Arc<ExecutionSerializer<RemoteReference>>,
    created: AtomicU64,
}

impl LocalObjects {
    /// Create an empty registry whose entries run on `serializer`.
    pub fn new(serializer: Arc<ExecutionSerializer<RemoteReference>>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            serializer,
            created: AtomicU64::new(0),
        }
    }

    /// Look up the entry for `reference`.
    pub fn find(&self, reference: &RemoteReference) -> Option<Arc<LocalEntry>> {
        self.lock().get(reference).cloned()
    }

    /// Return the entry for `reference`, registering an `Uninitialized` one
    /// if none exists and `admit` allows it. The flag is true when this call
    /// created the entry.
    pub fn get_or_register(
        &self,
        reference: RemoteReference,
        admit: impl FnOnce() -> bool,
    ) -> Option<(Arc<LocalEntry>, bool)> {
        let mut entries = self.lock();
        if let Some(entry) = entries.get(&reference) {
            return Some((Arc::clone(entry), false));
        }
        if !admit() {
            return None;
        }

        let entry = Arc::new(LocalEntry::new(
            reference.clone(),
            EntryState::Uninitialized,
            None,
            Arc::clone(&self.serializer),
        ));
        entries.insert(reference, Arc::clone(&entry));
        self.created.fetch_add(1, Ordering::Relaxed);
        Some((entry, true))
    }

    /// Host an already-constructed object (e.g. an observer) under `reference`.
    pub fn register_object(
        &self,
        reference: RemoteReference,
        target: Target,
    ) -> Result<Arc<LocalEntry>, AlreadyRegistered> {
        let mut entries = self.lock();
        if entries.contains_key(&reference) {
            return Err(AlreadyRegistered(reference));
        }

        let entry = Arc::new(LocalEntry::new(
            reference.clone(),
            EntryState::Activated,
            Some(target),
            Arc::clone(&self.serializer),
        ));
        entries.insert(reference, Arc::clone(&entry));
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(entry)
    }

    /// Unregister `entry`. A newer entry for the same reference is left alone.
    pub fn remove(&self, entry: &Arc<LocalEntry>) -> bool {
        let mut entries = self.lock();
        match entries.get(entry.reference()) {
            Some(current) if Arc::ptr_eq(current, entry) => {
                entries.remove(entry.reference());
                true
            }
            _ => false,
        }
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Entries ever registered, including removed ones.
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Snapshot of the registered references.
    pub fn references(&self) -> Vec<RemoteReference> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
