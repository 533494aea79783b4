//! In-process event bus with consumer-group delivery.
//!
//! [`EventBus`] is the central publish/subscribe hub, shared via
//! `Arc<EventBus>` across the application. Unlike a plain broadcast channel
//! it delivers with queue semantics: each `(subject, group)` pair holds a
//! FIFO of undelivered events, competing consumers in the same group each
//! receive a message at most once per delivery, and a nacked (or dropped)
//! delivery is requeued with its delivery count incremented.
//!
//! Delivery is at-least-once; consumers deduplicate by dispatch-token
//! comparison at the store. Events published before a group subscribes are
//! not seen by that group -- the scheduler's store polling converges state
//! regardless of bus delivery.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;

use crate::subject::Subject;

/// An event on the bus: a subject plus a JSON payload record, stamped by the
/// publisher.
#[derive(Debug, Clone)]
pub struct Event {
    pub subject: Subject,
    pub payload: serde_json::Value,
    pub published_at: DateTime<Utc>,
}

impl Event {
    pub fn new(subject: Subject, payload: serde_json::Value) -> Self {
        Self {
            subject,
            payload,
            published_at: Utc::now(),
        }
    }

    /// Build an event from a typed payload record.
    pub fn from_message<T: Serialize>(subject: Subject, message: &T) -> Self {
        let payload = serde_json::to_value(message)
            .expect("event payload records serialize infallibly");
        Self::new(subject, payload)
    }
}

struct QueuedEvent {
    event: Event,
    /// Times this event has already been delivered to the group.
    deliveries: u32,
}

struct GroupQueue {
    subject: Subject,
    group: String,
    queue: VecDeque<QueuedEvent>,
    notify: Arc<Notify>,
}

#[derive(Default)]
struct BusInner {
    groups: Vec<GroupQueue>,
}

/// In-process event bus. See the module docs for the delivery contract.
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an event to every consumer group registered on its subject.
    ///
    /// With no registered groups the event is silently dropped.
    pub fn publish(&self, event: Event) {
        let mut inner = self.inner.lock().expect("bus mutex poisoned");
        for group in inner
            .groups
            .iter_mut()
            .filter(|g| g.subject == event.subject)
        {
            group.queue.push_back(QueuedEvent {
                event: event.clone(),
                deliveries: 0,
            });
            group.notify.notify_one();
        }
    }

    /// Join a consumer group on a subject.
    ///
    /// Subscriptions with the same `(subject, group)` share one queue and
    /// compete for messages; distinct groups each see every event.
    pub fn subscribe(self: &Arc<Self>, subject: Subject, group: &str) -> Subscription {
        let mut inner = self.inner.lock().expect("bus mutex poisoned");
        let key = inner
            .groups
            .iter()
            .position(|g| g.subject == subject && g.group == group);
        let key = match key {
            Some(key) => key,
            None => {
                inner.groups.push(GroupQueue {
                    subject,
                    group: group.to_string(),
                    queue: VecDeque::new(),
                    notify: Arc::new(Notify::new()),
                });
                inner.groups.len() - 1
            }
        };
        let notify = Arc::clone(&inner.groups[key].notify);
        drop(inner);

        Subscription {
            bus: Arc::clone(self),
            key,
            notify,
        }
    }

    fn pop(self: &Arc<Self>, key: usize, max: usize) -> Vec<Delivery> {
        let mut inner = self.inner.lock().expect("bus mutex poisoned");
        let group = &mut inner.groups[key];
        let mut batch = Vec::new();
        while batch.len() < max {
            let Some(queued) = group.queue.pop_front() else {
                break;
            };
            batch.push(Delivery {
                event: Some(queued.event),
                deliveries: queued.deliveries + 1,
                bus: Arc::clone(self),
                key,
                settled: false,
            });
        }
        batch
    }

    fn requeue(&self, key: usize, event: Event, deliveries: u32) {
        let mut inner = self.inner.lock().expect("bus mutex poisoned");
        let group = &mut inner.groups[key];
        group.queue.push_front(QueuedEvent { event, deliveries });
        group.notify.notify_one();
    }
}

/// Membership of one consumer group.
pub struct Subscription {
    bus: Arc<EventBus>,
    key: usize,
    notify: Arc<Notify>,
}

impl Subscription {
    /// Fetch up to `max` pending deliveries, waiting at most `timeout` for
    /// the first one. Returns an empty batch on timeout.
    pub async fn fetch(&self, max: usize, timeout: Duration) -> Vec<Delivery> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let batch = self.bus.pop(self.key, max);
            if !batch.is_empty() {
                return batch;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(deadline) => return Vec::new(),
            }
        }
    }
}

/// One delivered event. Must be settled with [`ack`](Delivery::ack) or
/// [`nack`](Delivery::nack); dropping an unsettled delivery requeues it,
/// so a consumer that dies mid-message does not lose it.
pub struct Delivery {
    event: Option<Event>,
    /// 1-based count of deliveries to this group, including this one.
    pub deliveries: u32,
    bus: Arc<EventBus>,
    key: usize,
    settled: bool,
}

impl Delivery {
    pub fn event(&self) -> &Event {
        self.event.as_ref().expect("event present until settled")
    }

    /// Acknowledge: the event is done and will not be redelivered.
    pub fn ack(mut self) {
        self.settled = true;
        self.event = None;
    }

    /// Negative-acknowledge: requeue for redelivery at the head of the
    /// group's queue, carrying the incremented delivery count.
    pub fn nack(mut self) {
        self.settled = true;
        if let Some(event) = self.event.take() {
            self.bus.requeue(self.key, event, self.deliveries);
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.settled {
            if let Some(event) = self.event.take() {
                self.bus.requeue(self.key, event, self.deliveries);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
