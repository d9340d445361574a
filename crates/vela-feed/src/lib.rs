//! Broadcast feeds for chain-internal event streams.
//!
//! A [`Feed`] is a single-producer, multi-consumer broadcast channel. Each
//! consumer picks one of two buffering policies at subscription time:
//!
//! - [`Feed::subscribe`] — every published value is queued and delivered in
//!   publish order. The consumer must drain the queue or unsubscribe.
//! - [`Feed::subscribe_keep_last`] — at most one undelivered value is held;
//!   a newer publish overwrites it. Slow consumers observe a monotonically
//!   ordered subsequence of publishes and can never wedge the producer.
//!
//! Publishing never blocks and never fails. Closing the feed (explicitly or
//! by dropping it) closes every outstanding consumer handle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{mpsc, Notify};

/// Single-producer multi-consumer broadcast channel.
pub struct Feed<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    consumers: Mutex<Consumers<T>>,
}

struct Consumers<T> {
    next_id: u64,
    closed: bool,
    slots: HashMap<u64, Slot<T>>,
}

enum Slot<T> {
    Live(mpsc::UnboundedSender<T>),
    KeepLast(Arc<KeepLastSlot<T>>),
}

struct KeepLastSlot<T> {
    value: Mutex<Option<T>>,
    notify: Notify,
    closed: AtomicBool,
}

impl<T> KeepLastSlot<T> {
    fn new() -> Self {
        Self {
            value: Mutex::new(None),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn put(&self, value: T) {
        *self.value.lock().expect("keep-last slot poisoned") = Some(value);
        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

impl<T: Clone> Feed<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                consumers: Mutex::new(Consumers {
                    next_id: 0,
                    closed: false,
                    slots: HashMap::new(),
                }),
            }),
        }
    }

    /// Broadcast `value` to every consumer. Never blocks on consumers:
    /// live consumers get it queued, keep-last consumers get their pending
    /// slot overwritten. Consumers whose handle was dropped are pruned.
    pub fn publish(&self, value: T) {
        let mut consumers = self.shared.consumers.lock().expect("feed consumer list poisoned");
        consumers.slots.retain(|_, slot| match slot {
            Slot::Live(tx) => tx.send(value.clone()).is_ok(),
            Slot::KeepLast(slot) => {
                slot.put(value.clone());
                true
            }
        });
    }

    /// Attach a consumer that observes every published value in order.
    pub fn subscribe(&self) -> FeedSubscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut consumers = self.shared.consumers.lock().expect("feed consumer list poisoned");
        let id = consumers.next_id;
        consumers.next_id += 1;
        if !consumers.closed {
            consumers.slots.insert(id, Slot::Live(tx));
        }
        FeedSubscription {
            id,
            shared: Arc::downgrade(&self.shared),
            kind: RecvKind::Live(rx),
            detached: false,
        }
    }

    /// Attach a consumer that only retains the most recent undelivered value.
    pub fn subscribe_keep_last(&self) -> FeedSubscription<T> {
        let slot = Arc::new(KeepLastSlot::new());
        let mut consumers = self.shared.consumers.lock().expect("feed consumer list poisoned");
        let id = consumers.next_id;
        consumers.next_id += 1;
        if consumers.closed {
            slot.close();
        } else {
            consumers.slots.insert(id, Slot::KeepLast(Arc::clone(&slot)));
        }
        FeedSubscription {
            id,
            shared: Arc::downgrade(&self.shared),
            kind: RecvKind::KeepLast(slot),
            detached: false,
        }
    }

    /// Close the feed: every consumer handle yields `None` once drained,
    /// and future subscriptions start out closed.
    pub fn close(&self) {
        let mut consumers = self.shared.consumers.lock().expect("feed consumer list poisoned");
        consumers.closed = true;
        for (_, slot) in consumers.slots.drain() {
            if let Slot::KeepLast(slot) = slot {
                slot.close();
            }
            // Live senders close their receiver by being dropped here.
        }
    }
}

impl<T: Clone> Default for Feed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Feed<T> {
    fn drop(&mut self) {
        let mut consumers = match self.shared.consumers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        consumers.closed = true;
        for (_, slot) in consumers.slots.drain() {
            if let Slot::KeepLast(slot) = slot {
                slot.close();
            }
        }
    }
}

enum RecvKind<T> {
    Live(mpsc::UnboundedReceiver<T>),
    KeepLast(Arc<KeepLastSlot<T>>),
}

/// Consumer handle returned by [`Feed::subscribe`] and
/// [`Feed::subscribe_keep_last`]. Dropping the handle unsubscribes.
pub struct FeedSubscription<T> {
    id: u64,
    shared: Weak<Shared<T>>,
    kind: RecvKind<T>,
    detached: bool,
}

impl<T> FeedSubscription<T> {
    /// Receive the next value, or `None` once the feed is closed and the
    /// consumer's buffer is drained (or after [`unsubscribe`]).
    ///
    /// [`unsubscribe`]: FeedSubscription::unsubscribe
    pub async fn recv(&mut self) -> Option<T> {
        if self.detached {
            return None;
        }
        match &mut self.kind {
            RecvKind::Live(rx) => rx.recv().await,
            RecvKind::KeepLast(slot) => loop {
                if let Some(value) = slot.value.lock().expect("keep-last slot poisoned").take() {
                    return Some(value);
                }
                if slot.closed.load(Ordering::Acquire) {
                    return None;
                }
                slot.notify.notified().await;
            },
        }
    }

    /// Detach from the feed. Idempotent; no values are delivered afterwards.
    pub fn unsubscribe(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        if let Some(shared) = self.shared.upgrade() {
            let mut consumers = match shared.consumers.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            consumers.slots.remove(&self.id);
        }
    }
}

impl<T> Drop for FeedSubscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
