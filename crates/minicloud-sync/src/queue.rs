//! Transfer queue state machine
//!
//! Both [`Uploader`](crate::Uploader) and [`Downloader`](crate::Downloader)
//! keep their pending items in a [`QueueState`]. The state decides when a
//! worker may run and hands items to it one at a time; the queues own the
//! transfer logic and the events.
//!
//! ## Design Notes
//!
//! - At most one worker exists per queue. Each worker gets a generation
//!   number and its own cancellation token, so a worker that outlives a
//!   `stop()` can never pop items that belong to a later `start()`.
//! - Items are popped when their transfer starts. A failed item is gone;
//!   `resume()` continues with the one after it.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

/// Handle of the single worker allowed to drain a queue
#[derive(Debug, Clone)]
pub struct Worker {
    generation: u64,
    cancel: CancellationToken,
}

impl Worker {
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// What a worker should do next
#[derive(Debug)]
pub enum Next<T, D> {
    /// Transfer `item`, defaulting its destination to `target`
    Item { item: T, target: D },
    /// The queue is empty; the worker has been released
    Drained,
    /// The worker was stopped
    Cancelled,
}

/// Outcome of [`QueueState::resume`]
#[derive(Debug)]
pub enum Resume {
    /// A new worker must be spawned
    Start(Worker),
    /// The queue was halted with nothing left; report completion
    Drained,
    /// Nothing to do: a worker runs or the queue was not halted
    Ignored,
}

struct Inner<T, D> {
    items: VecDeque<T>,
    target: Option<D>,
    worker: Option<Worker>,
    halted: bool,
    generation: u64,
}

/// Pending items of one queue plus its worker bookkeeping
pub struct QueueState<T, D> {
    inner: Mutex<Inner<T, D>>,
}

impl<T, D: Clone> Default for QueueState<T, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, D: Clone> QueueState<T, D> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                target: None,
                worker: None,
                halted: false,
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T, D>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: T) {
        self.lock().items.push_back(item);
    }

    /// Number of items not yet started
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// True while a worker is draining the queue
    pub fn is_running(&self) -> bool {
        self.lock().worker.is_some()
    }

    /// True after a failure until `resume()` or `stop()`
    pub fn is_halted(&self) -> bool {
        self.lock().halted
    }

    /// Claims the worker slot if the queue is idle and non-empty
    ///
    /// # Arguments
    /// * `target` - Default destination for items that carry none
    pub fn try_start(&self, target: D) -> Option<Worker> {
        let mut inner = self.lock();
        if inner.worker.is_some() || inner.items.is_empty() {
            return None;
        }
        inner.target = Some(target);
        inner.halted = false;
        Some(Self::claim(&mut inner))
    }

    fn claim(inner: &mut Inner<T, D>) -> Worker {
        inner.generation += 1;
        let worker = Worker {
            generation: inner.generation,
            cancel: CancellationToken::new(),
        };
        inner.worker = Some(worker.clone());
        worker
    }

    fn owns(inner: &Inner<T, D>, worker: &Worker) -> bool {
        inner
            .worker
            .as_ref()
            .is_some_and(|w| w.generation == worker.generation)
    }

    /// Pops the next item for `worker`
    pub fn next(&self, worker: &Worker) -> Next<T, D> {
        let mut inner = self.lock();
        if worker.is_cancelled() || !Self::owns(&inner, worker) {
            return Next::Cancelled;
        }
        let target = inner.target.clone();
        match (inner.items.pop_front(), target) {
            (Some(item), Some(target)) => Next::Item { item, target },
            _ => {
                inner.worker = None;
                Next::Drained
            }
        }
    }

    /// Releases the worker after a failed item and halts the queue
    pub fn halt(&self, worker: &Worker) {
        let mut inner = self.lock();
        if Self::owns(&inner, worker) {
            inner.worker = None;
            inner.halted = true;
        }
    }

    /// Restarts a halted queue with the next pending item
    pub fn resume(&self) -> Resume {
        let mut inner = self.lock();
        if inner.worker.is_some() || !inner.halted {
            return Resume::Ignored;
        }
        inner.halted = false;
        if inner.items.is_empty() || inner.target.is_none() {
            return Resume::Drained;
        }
        Resume::Start(Self::claim(&mut inner))
    }

    /// Cancels the worker and discards every pending item
    ///
    /// # Returns
    /// `true` if a worker was running
    pub fn stop(&self) -> bool {
        let mut inner = self.lock();
        inner.items.clear();
        inner.halted = false;
        match inner.worker.take() {
            Some(worker) => {
                worker.cancel.cancel();
                true
            }
            None => false,
        }
    }
}
