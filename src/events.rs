//! Registry change notifications
//!
//! The bus is constructed once and shared by reference. Delivery is
//! synchronous and unbatched: `publish` returns only after every subscriber
//! has seen the event. A subscriber that reports `Delivery::Gone` (or panics)
//! is dropped and the remaining subscribers still receive the event.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::models::{OutputLine, ProcessId, ProcessStatus};

/// A mutation of the process registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Added { id: ProcessId },
    LogAppended { id: ProcessId, line: OutputLine },
    StatusChanged { id: ProcessId, status: ProcessStatus },
    CancelRequested { id: ProcessId },
    Removed { id: ProcessId },
}

impl RegistryEvent {
    pub fn id(&self) -> ProcessId {
        match self {
            Self::Added { id }
            | Self::LogAppended { id, .. }
            | Self::StatusChanged { id, .. }
            | Self::CancelRequested { id }
            | Self::Removed { id } => *id,
        }
    }
}

/// What a subscriber reports back after handling an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Continue,
    /// The subscriber's target no longer exists; stop delivering to it
    Gone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&RegistryEvent) -> Delivery + Send + Sync>;

#[derive(Default)]
struct BusState {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, Callback)>,
}

#[derive(Default)]
pub struct EventBus {
    state: Mutex<BusState>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&RegistryEvent) -> Delivery + Send + Sync + 'static,
    {
        let mut state = lock_or_recover(&self.state);
        state.next_id += 1;
        let id = SubscriptionId(state.next_id);
        state.subscribers.push((id, Arc::new(callback)));
        id
    }

    /// Subscribe on behalf of `target`, holding it only weakly.
    /// Once the target is dropped the subscription removes itself.
    pub fn subscribe_weak<T, F>(&self, target: &Arc<T>, callback: F) -> SubscriptionId
    where
        T: Send + Sync + 'static,
        F: Fn(&T, &RegistryEvent) + Send + Sync + 'static,
    {
        let weak: Weak<T> = Arc::downgrade(target);
        self.subscribe(move |event| match weak.upgrade() {
            Some(target) => {
                callback(&target, event);
                Delivery::Continue
            }
            None => Delivery::Gone,
        })
    }

    /// Forward events into an existing channel, wrapped by `wrap`.
    /// Hanging up the receiver ends the subscription.
    pub fn subscribe_sender<T>(
        &self,
        tx: Sender<T>,
        wrap: fn(RegistryEvent) -> T,
    ) -> SubscriptionId
    where
        T: Send + 'static,
    {
        self.subscribe(move |event| match tx.send(wrap(event.clone())) {
            Ok(()) => Delivery::Continue,
            Err(_) => Delivery::Gone,
        })
    }

    /// Subscribe with a fresh channel; dropping the receiver ends the subscription
    pub fn subscribe_channel(&self) -> (SubscriptionId, Receiver<RegistryEvent>) {
        let (tx, rx) = mpsc::channel();
        (self.subscribe_sender(tx, |event| event), rx)
    }

    /// Returns false if the subscription was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = lock_or_recover(&self.state);
        let before = state.subscribers.len();
        state.subscribers.retain(|(sid, _)| *sid != id);
        state.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        lock_or_recover(&self.state).subscribers.len()
    }

    /// Deliver `event` to every subscriber, in subscription order
    pub fn publish(&self, event: &RegistryEvent) {
        // Snapshot so callbacks can (un)subscribe without deadlocking
        let subscribers: Vec<(SubscriptionId, Callback)> =
            lock_or_recover(&self.state).subscribers.clone();

        let mut gone = Vec::new();
        for (id, callback) in subscribers {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Delivery::Continue) => {}
                Ok(Delivery::Gone) => {
                    tracing::debug!(subscription = id.0, "subscriber target gone");
                    gone.push(id);
                }
                Err(_) => {
                    tracing::warn!(subscription = id.0, "subscriber panicked, dropping it");
                    gone.push(id);
                }
            }
        }

        if !gone.is_empty() {
            lock_or_recover(&self.state)
                .subscribers
                .retain(|(id, _)| !gone.contains(id));
        }
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
