//! Collection subscriptions and event fan-out.
//!
//! Every [`Subscription`] owns its own bounded queue, so a slow consumer
//! only ever loses its own events. The registry holds the delivering end of
//! each queue; dropping that end is what closes the queue, which makes
//! closing naturally exactly-once.
//!
//! A queue never holds more than `capacity` events. Delivering into a full
//! queue discards its oldest event and counts it in
//! [`Subscription::dropped`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, warn};

use mwrpc_core::{ClientError, ClientResult};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct QueueState {
    events: VecDeque<Value>,
    capacity: usize,
    dropped: u64,
    unreported: u64,
    closed: bool,
}

/// One subscriber's events, shared by its registry entry and its handle.
#[derive(Debug)]
struct Queue {
    state: Mutex<QueueState>,
    ready: Notify,
}

impl Queue {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::new(),
                capacity: capacity.max(1),
                dropped: 0,
                unreported: 0,
                closed: false,
            }),
            ready: Notify::new(),
        }
    }

    fn push(&self, value: Value) {
        let mut state = lock(&self.state);
        if state.events.len() == state.capacity {
            state.events.pop_front();
            state.dropped += 1;
            state.unreported += 1;
        }
        state.events.push_back(value);
        drop(state);
        self.ready.notify_one();
    }

    fn close(&self) {
        lock(&self.state).closed = true;
        self.ready.notify_one();
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    channels: HashMap<String, Vec<Channel>>,
    next_key: u64,
    closed: bool,
}

/// Registry entry for one subscriber. Dropping it closes the queue.
#[derive(Debug)]
struct Channel {
    key: u64,
    queue: Arc<Queue>,
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.queue.close();
    }
}

/// Collection name to subscriber channels.
///
/// Cloning yields another handle to the same registry.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a channel for `collection` and returns its handle.
    ///
    /// `capacity` is the exact queue bound; 0 is treated as 1. Fails with a
    /// connection-closed error once [`close_all`](Self::close_all) has run.
    pub fn register(&self, collection: &str, capacity: usize) -> ClientResult<Subscription> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(ClientError::closed("subscriptions are closed"));
        }

        state.next_key += 1;
        let key = state.next_key;
        let queue = Arc::new(Queue::new(capacity));
        state
            .channels
            .entry(collection.to_string())
            .or_default()
            .push(Channel {
                key,
                queue: Arc::clone(&queue),
            });

        debug!(collection = %collection, key, capacity, "subscription registered");

        Ok(Subscription {
            queue,
            closer: SubscriptionCloser {
                collection: collection.to_string(),
                key,
                registry: Arc::downgrade(&self.state),
            },
        })
    }

    /// Delivers `value` to every subscriber of `collection`.
    ///
    /// Never blocks. Returns the number of subscribers reached.
    pub fn deliver(&self, collection: &str, value: Value) -> usize {
        let state = lock(&self.state);
        let Some(channels) = state.channels.get(collection) else {
            return 0;
        };

        for channel in channels {
            channel.queue.push(value.clone());
        }
        channels.len()
    }

    /// Removes one subscriber. Returns false if it was already gone.
    pub fn remove(&self, collection: &str, key: u64) -> bool {
        remove(&self.state, collection, key)
    }

    /// Closes every subscription and refuses new ones.
    ///
    /// Returns the number of channels closed by this call; a second call
    /// closes nothing.
    pub fn close_all(&self) -> usize {
        let mut state = lock(&self.state);
        state.closed = true;
        let closed = state.channels.values().map(Vec::len).sum();
        state.channels.clear();
        if closed > 0 {
            debug!(count = closed, "closed all subscriptions");
        }
        closed
    }

    /// Number of open subscriptions on `collection`.
    pub fn subscriber_count(&self, collection: &str) -> usize {
        lock(&self.state)
            .channels
            .get(collection)
            .map_or(0, Vec::len)
    }

    /// Number of open subscriptions across all collections.
    pub fn total(&self) -> usize {
        lock(&self.state).channels.values().map(Vec::len).sum()
    }
}

/// Returns true if a subscribe call's result acknowledges the subscription:
/// `true`, or a non-empty subscription id.
pub(crate) fn is_subscribe_ack(result: &Value) -> bool {
    match result {
        Value::Bool(ack) => *ack,
        Value::String(id) => !id.is_empty(),
        _ => false,
    }
}

fn remove(state: &Mutex<RegistryState>, collection: &str, key: u64) -> bool {
    let mut state = lock(state);
    let Some(channels) = state.channels.get_mut(collection) else {
        return false;
    };
    let before = channels.len();
    channels.retain(|channel| channel.key != key);
    let removed = channels.len() != before;
    if channels.is_empty() {
        state.channels.remove(collection);
    }
    removed
}

/// Closes one [`Subscription`] from anywhere, including while another task
/// is blocked in [`Subscription::recv`].
#[derive(Debug, Clone)]
pub struct SubscriptionCloser {
    collection: String,
    key: u64,
    registry: Weak<Mutex<RegistryState>>,
}

impl SubscriptionCloser {
    /// Stops delivery to the subscription. Idempotent.
    pub fn close(&self) {
        if let Some(state) = self.registry.upgrade()
            && remove(&state, &self.collection, self.key)
        {
            debug!(collection = %self.collection, key = self.key, "subscription closed");
        }
    }
}

/// A live subscription to one collection.
///
/// Dropping the handle closes it.
#[derive(Debug)]
pub struct Subscription {
    queue: Arc<Queue>,
    closer: SubscriptionCloser,
}

impl Subscription {
    /// The subscribed collection.
    pub fn collection(&self) -> &str {
        &self.closer.collection
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the subscription or its connection is closed and
    /// every queued event has been read.
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            if let Some(next) = self.next_event() {
                return next;
            }
            // Single consumer: a push between the check and here leaves a permit.
            self.queue.ready.notified().await;
        }
    }

    /// Returns a queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Value> {
        self.next_event().flatten()
    }

    /// Number of events discarded because this subscriber fell behind.
    pub fn dropped(&self) -> u64 {
        lock(&self.queue.state).dropped
    }

    /// Returns true once the subscription no longer receives new events.
    pub fn is_closed(&self) -> bool {
        lock(&self.queue.state).closed
    }

    /// Stops delivery to this subscription. Idempotent.
    ///
    /// Events already queued can still be drained with [`recv`](Self::recv).
    /// Sibling subscriptions on the same collection are unaffected.
    pub fn close(&self) {
        self.closer.close();
    }

    /// Returns a handle that closes this subscription from another task.
    pub fn closer(&self) -> SubscriptionCloser {
        self.closer.clone()
    }

    /// `Some(Some(event))`, `Some(None)` when closed and drained, `None` when
    /// the queue is empty but still open.
    fn next_event(&self) -> Option<Option<Value>> {
        let mut state = lock(&self.queue.state);
        if state.unreported > 0 {
            let skipped = std::mem::take(&mut state.unreported);
            warn!(
                collection = %self.closer.collection,
                skipped,
                total = state.dropped,
                "subscriber fell behind, oldest events dropped"
            );
        }
        match state.events.pop_front() {
            Some(value) => Some(Some(value)),
            None if state.closed => Some(None),
            None => None,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}
