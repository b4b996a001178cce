//! Typed publish/subscribe bus
//!
//! Replies from the remote client, transfer progress and sync results are all
//! delivered through an [`EventBus`]. Each component owns one bus per event
//! family and callers subscribe to the buses they care about.
//!
//! ## Design Notes
//!
//! - `subscribe`/`unsubscribe` only record the change in a side buffer. The
//!   buffer is merged into the live list before and after every `publish`,
//!   and `publish` iterates over a snapshot, so a listener added or removed
//!   from inside a callback takes effect for the next `publish` only.
//! - Listeners run on the publishing thread, in registration order.
//! - A listener that returns an error or panics is logged and skipped; the
//!   remaining listeners still receive the event.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{error, warn};

/// Receiver of events of type `E`
pub trait Listener<E>: Send + Sync {
    fn handle_event(&self, event: &E) -> anyhow::Result<()>;
}

struct FnListener<F>(F);

impl<E, F> Listener<E> for FnListener<F>
where
    F: Fn(&E) -> anyhow::Result<()> + Send + Sync,
{
    fn handle_event(&self, event: &E) -> anyhow::Result<()> {
        (self.0)(event)
    }
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type Entry<E> = (SubscriptionId, Arc<dyn Listener<E>>);

struct Pending<E> {
    add: Vec<Entry<E>>,
    remove: Vec<SubscriptionId>,
}

impl<E> Default for Pending<E> {
    fn default() -> Self {
        Self {
            add: Vec::new(),
            remove: Vec::new(),
        }
    }
}

/// Publish/subscribe bus for events of type `E`
pub struct EventBus<E> {
    listeners: Mutex<Vec<Entry<E>>>,
    pending: Mutex<Pending<E>>,
    next_id: AtomicU64,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            pending: Mutex::new(Pending::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers `listener`; it receives events from the next `publish` on
    pub fn subscribe(&self, listener: Arc<dyn Listener<E>>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add
            .push((id, listener));
        id
    }

    /// Registers a closure as a listener
    pub fn subscribe_fn<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
        E: 'static,
    {
        self.subscribe(Arc::new(FnListener(f)))
    }

    /// Removes a listener; the current `publish`, if any, still reaches it
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove
            .push(id);
    }

    /// Number of registered listeners, counting pending changes
    pub fn len(&self) -> usize {
        self.apply_pending();
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `event` to every registered listener
    ///
    /// # Returns
    /// The number of listeners that failed
    pub fn publish(&self, event: &E) -> usize {
        self.apply_pending();

        let snapshot: Vec<Entry<E>> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut failures = 0;
        for (id, listener) in &snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| listener.handle_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    warn!(listener = %id, error = %e, "Event listener failed");
                }
                Err(_) => {
                    failures += 1;
                    error!(listener = %id, "Event listener panicked");
                }
            }
        }

        self.apply_pending();
        failures
    }

    fn apply_pending(&self) {
        let Pending { add, remove } = std::mem::take(
            &mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if add.is_empty() && remove.is_empty() {
            return;
        }

        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        listeners.extend(add);
        listeners.retain(|(id, _)| !remove.contains(id));
    }
}

impl<E> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field(
                "listeners",
                &self
                    .listeners
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .len(),
            )
            .finish()
    }
}
