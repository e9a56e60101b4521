//! Per-key FIFO job serializer over the shared tokio pool.
//!
//! # Single-flight
//!
//! ```text
//! offer(k, job)
//!   ├─ k idle    → mark running, spawn drain(k, job)
//!   └─ k running → push to k's queue (or reject at max_queue_size)
//!
//! drain(k, job):
//!   loop {
//!     spawn(job).await        // panics stay inside the JoinHandle
//!     job = pop(k) else { remove k; break }
//!   }
//! ```
//!
//! A key present in the map is running; its queue holds the jobs waiting
//! behind the running one. Jobs of one key never overlap and run in offer
//! order; jobs of different keys run concurrently on the runtime's workers.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;

use crate::error::QueueFull;

/// Boxed future produced by a [`Job`].
pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A unit of work run by the serializer.
pub trait Job: Send + 'static {
    /// Turn the job into the future that performs it.
    fn run(self: Box<Self>) -> JobFuture;
}

impl<F> Job for F
where
    F: Future<Output = ()> + Send + 'static,
{
    fn run(self: Box<Self>) -> JobFuture {
        Box::into_pin(self)
    }
}

#[derive(Default)]
struct KeyQueue {
    pending: VecDeque<Box<dyn Job>>,
}

type Queues<K> = Arc<Mutex<HashMap<K, KeyQueue>>>;

/// Runs at most one job per key at a time, in offer order.
pub struct ExecutionSerializer<K> {
    runtime: Handle,
    queues: Queues<K>,
}

impl<K> ExecutionSerializer<K>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + 'static,
{
    /// Create a serializer that spawns onto `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Submit `job` for `key`.
    ///
    /// Starts it right away if nothing runs for `key`; otherwise queues it
    /// behind the running job. Rejects it, handing it back, when
    /// `max_queue_size` jobs are already waiting.
    pub fn offer<J: Job>(&self, key: K, job: J, max_queue_size: usize) -> Result<(), QueueFull<J>> {
        let mut queues = lock(&self.queues);
        if let Some(queue) = queues.get_mut(&key) {
            if queue.pending.len() >= max_queue_size {
                return Err(QueueFull {
                    job,
                    max_queue_size,
                });
            }
            queue.pending.push_back(Box::new(job));
            return Ok(());
        }

        queues.insert(key.clone(), KeyQueue::default());
        drop(queues);

        let first: Box<dyn Job> = Box::new(job);
        self.runtime
            .spawn(drain(Arc::clone(&self.queues), key, first));
        Ok(())
    }

    /// Number of jobs waiting behind the running one for `key`.
    pub fn pending(&self, key: &K) -> usize {
        lock(&self.queues)
            .get(key)
            .map_or(0, |queue| queue.pending.len())
    }

    /// True while a job runs for `key`.
    pub fn is_running(&self, key: &K) -> bool {
        lock(&self.queues).contains_key(key)
    }

    /// Number of keys with a running job.
    pub fn active_keys(&self) -> usize {
        lock(&self.queues).len()
    }
}

impl<K> fmt::Debug for ExecutionSerializer<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let active = lock(&self.queues).len();
        f.debug_struct("ExecutionSerializer")
            .field("active_keys", &active)
            .finish()
    }
}

async fn drain<K>(queues: Queues<K>, key: K, first: Box<dyn Job>)
where
    K: Eq + Hash + fmt::Debug + Send + 'static,
{
    let mut next = Some(first);
    while let Some(job) = next {
        if let Err(err) = tokio::spawn(job.run()).await {
            if err.is_panic() {
                tracing::error!(key = ?key, "serialized job panicked");
            } else {
                tracing::debug!(key = ?key, "serialized job cancelled");
            }
        }
        next = pop_or_release(&queues, &key);
    }
}

/// Take the next waiting job, or remove the key when none is left.
fn pop_or_release<K: Eq + Hash>(queues: &Queues<K>, key: &K) -> Option<Box<dyn Job>> {
    let mut queues = lock(queues);
    let next = queues.get_mut(key).and_then(|queue| queue.pending.pop_front());
    if next.is_none() {
        queues.remove(key);
    }
    next
}

fn lock<K>(queues: &Mutex<HashMap<K, KeyQueue>>) -> MutexGuard<'_, HashMap<K, KeyQueue>> {
    queues.lock().unwrap_or_else(PoisonError::into_inner)
}
