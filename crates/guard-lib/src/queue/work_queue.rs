//! Deduplicating, rate-limited work queue
//!
//! Items move through three sets:
//! - `dirty`: needs processing (queued, or re-marked while in flight)
//! - `processing`: handed to a worker and not yet marked done
//! - `items`: FIFO of dirty items that are not in flight
//!
//! An item is never handed to two workers at once. Adding an item that is
//! in flight only marks it dirty; `done` puts it back on the FIFO.

use super::ExponentialBackoff;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

struct QueueState<T> {
    items: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    /// Requeue counts, kept until the item is forgotten
    failures: HashMap<T, u32>,
    shutting_down: bool,
}

impl<T> Default for QueueState<T> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            failures: HashMap::new(),
            shutting_down: false,
        }
    }
}

struct Inner<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    backoff: ExponentialBackoff,
}

/// Multi-consumer work queue shared by the event source and the workers
pub struct WorkQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
{
    /// Empty queue; `backoff` sets the delays of [`add_rate_limited`](Self::add_rate_limited)
    pub fn new(backoff: ExponentialBackoff) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                backoff,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        // Every mutation is a single set/map call, so a poisoned lock still
        // holds consistent state.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark an item as needing processing
    pub fn add(&self, item: T) {
        let mut state = self.lock();
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            return;
        }
        state.items.push_back(item);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Add an item once `delay` has elapsed
    pub fn add_after(&self, item: T, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Requeue an item with a delay that grows with its failure count
    pub fn add_rate_limited(&self, item: T) {
        let delay = {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            let failures = state.failures.entry(item.clone()).or_insert(0);
            let delay = self.inner.backoff.delay(*failures);
            *failures += 1;
            delay
        };
        debug!(item = ?item, delay_ms = delay.as_millis() as u64, "Requeueing with backoff");
        self.add_after(item, delay);
    }

    /// Number of rate-limited requeues since the item was last forgotten
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.lock().failures.get(item).copied().unwrap_or(0)
    }

    /// Stop tracking failures for an item
    pub fn forget(&self, item: &T) {
        self.lock().failures.remove(item);
    }

    /// Wait for the next item, `None` once the queue is shut down
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(item) = state.items.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    let more = !state.items.is_empty();
                    drop(state);
                    if more {
                        // Pass the wakeup on so idle workers drain the backlog
                        self.inner.notify.notify_one();
                    }
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark an item as processed, re-queueing it if it was re-added meanwhile
    pub fn done(&self, item: &T) {
        let mut state = self.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) && !state.shutting_down {
            state.items.push_back(item.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Stop delivering items and wake every waiting worker
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    /// True once [`shut_down`](Self::shut_down) has been called
    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Number of items waiting to be handed out
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// True when no item is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of items currently held by workers
    pub fn in_flight(&self) -> usize {
        self.lock().processing.len()
    }
}
