//! Event Bus (spec.md §4.4): ordered, fan-out broadcast of lock/message/admin
//! events to live subscribers.
//!
//! Within a single subscription, delivery order matches commit order; across
//! subscriptions there is no cross-ordering guarantee. Each subscription has
//! a bounded FIFO (default capacity from `Config::bus_queue_capacity`); on
//! overflow the bus drops the *oldest* queued event and marks the
//! subscription `lossy`, rather than blocking the publisher or dropping the
//! new event.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriterChangeKind {
    Acquired,
    Released,
    Forced,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    LockState { lock_value: u8, holder: Option<String>, writer_enabled: bool, ts: DateTime<Utc> },
    MessageCreated { id: u64, author: String, body: String, ts: DateTime<Utc> },
    MessageUpdated { id: u64, author: String, body: String, ts: DateTime<Utc> },
    MessageDeleted { id: u64, ts: DateTime<Utc> },
    AdminToggle { admin: String, enabled: bool, ts: DateTime<Utc> },
    WriterChanged { event: WriterChangeKind, principal: String, ts: DateTime<Utc> },
}

impl From<crate::writer_lock::LockSnapshot> for Event {
    fn from(s: crate::writer_lock::LockSnapshot) -> Self {
        Event::LockState { lock_value: s.lock_value, holder: s.holder, writer_enabled: s.writer_enabled, ts: s.ts }
    }
}

/// One delivered item: the event plus whether this subscription has dropped
/// anything since the last delivery (spec.md §4.4's sticky `lossy` flag).
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    #[serde(flatten)]
    pub event: Event,
    pub lossy: bool,
}

struct Subscriber {
    queue: Mutex<VecDeque<Event>>,
    capacity: usize,
    lossy: AtomicBool,
    notify: Notify,
}

impl Subscriber {
    fn push(&self, event: Event) {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.lossy.store(true, Ordering::Relaxed);
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Delivery> {
        let mut queue = self.queue.lock().unwrap();
        let event = queue.pop_front()?;
        let lossy = self.lossy.swap(false, Ordering::Relaxed);
        Some(Delivery { event, lossy })
    }
}

/// A live subscription handle. Holds only a weak (by-id) relationship back
/// to the bus — dropping it does not remove the subscriber, `unsubscribe`
/// does (spec.md §3.3: "subscribers hold back-references only as weak
/// identifiers, never as owning references to the bus").
pub struct Subscription {
    pub id: Uuid,
    bus: Arc<EventBus>,
    subscriber: Arc<Subscriber>,
}

impl Subscription {
    /// Wait for and return the next event. Resolves immediately if one is
    /// already queued.
    pub async fn recv(&self) -> Delivery {
        loop {
            if let Some(delivery) = self.subscriber.pop() {
                return delivery;
            }
            self.subscriber.notify.notified().await;
        }
    }

    pub fn unsubscribe(self) {
        self.bus.remove(self.id);
    }
}

pub struct EventBus {
    subscribers: Mutex<HashMap<Uuid, Arc<Subscriber>>>,
    default_capacity: usize,
    last_reconciled: Mutex<Option<(u8, Option<String>, bool)>>,
}

impl EventBus {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            default_capacity,
            last_reconciled: Mutex::new(None),
        }
    }

    /// Register a new subscriber. Per spec.md §4.4, the caller (the Command
    /// Router) is responsible for immediately seeding the synthetic initial
    /// `lock_state` event via `seed` — the bus itself has no dependency on
    /// the Writer Lock to avoid a reference cycle between the two.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = Uuid::new_v4();
        let subscriber = Arc::new(Subscriber {
            queue: Mutex::new(VecDeque::new()),
            capacity: self.default_capacity,
            lossy: AtomicBool::new(false),
            notify: Notify::new(),
        });
        self.subscribers.lock().unwrap().insert(id, subscriber.clone());
        Subscription { id, bus: self.clone(), subscriber }
    }

    /// Deliver one event to exactly one subscriber (used for the initial
    /// snapshot on subscribe).
    pub fn seed(&self, id: Uuid, event: Event) {
        if let Some(subscriber) = self.subscribers.lock().unwrap().get(&id) {
            subscriber.push(event);
        }
    }

    fn remove(&self, id: Uuid) {
        self.subscribers.lock().unwrap().remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Fan an event out to every live subscriber. Snapshots the subscriber
    /// list under the registry lock then releases it before pushing, so a
    /// slow subscriber never delays the publisher or blocks subscribe/
    /// unsubscribe (spec.md §5, read-mostly discipline).
    pub fn publish(&self, event: Event) {
        let snapshot: Vec<Arc<Subscriber>> = self.subscribers.lock().unwrap().values().cloned().collect();
        for subscriber in snapshot {
            subscriber.push(event.clone());
        }
    }

    /// Periodic reconciliation (spec.md §4.4): re-emit `lock_state` only if
    /// it differs from the last reconciled value, so a healthy bus does not
    /// spam subscribers with redundant snapshots every tick. Timestamps are
    /// excluded from the comparison — only `lock_value`/`holder`/
    /// `writer_enabled` determine whether the state actually changed.
    pub fn reconcile_lock_state(&self, snapshot: crate::writer_lock::LockSnapshot) {
        let key = (snapshot.lock_value, snapshot.holder.clone(), snapshot.writer_enabled);
        let mut last = self.last_reconciled.lock().unwrap();
        if last.as_ref() == Some(&key) {
            return;
        }
        *last = Some(key);
        drop(last);
        self.publish(Event::from(snapshot));
    }
}
