//! One subscriber's outbound queue and resume state. The queue is bounded;
//! the hub only ever enqueues, and only the connection's own SSE stream
//! drains, so contention stays inside this mutex.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use metrics::counter;
use tokio::sync::Notify;

use crate::model::{IntelligenceEvent, Priority};

/// What a connection wants to see: optional ward scope plus an optional
/// category allow-list. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    pub subject_key: Option<String>,
    pub categories: Option<Vec<String>>,
}

impl SubscriptionFilter {
    pub fn matches(&self, event: &IntelligenceEvent) -> bool {
        if let Some(subject) = &self.subject_key {
            if *subject != event.subject_key {
                return false;
            }
        }
        if let Some(categories) = &self.categories {
            if !categories.iter().any(|c| *c == event.category) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Active,
    Draining,
    Closed,
}

/// Item on the wire: a real event or a liveness heartbeat.
#[derive(Debug, Clone)]
pub enum FeedItem {
    Event(Arc<IntelligenceEvent>),
    Heartbeat,
}

#[derive(Debug)]
struct QueueInner {
    state: ConnectionState,
    queue: VecDeque<FeedItem>,
    /// Highest event id ever enqueued; guards against replay/live races
    /// delivering the same id twice.
    last_enqueued_id: u64,
    last_delivered_id: u64,
    last_drain: Instant,
    dropped: u64,
}

#[derive(Debug)]
pub struct FeedConnection {
    id: u64,
    filter: SubscriptionFilter,
    capacity: usize,
    inner: Mutex<QueueInner>,
    notify: Notify,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionStats {
    pub id: u64,
    pub queued: usize,
    pub last_delivered_id: u64,
    pub dropped: u64,
}

impl FeedConnection {
    pub fn new(id: u64, filter: SubscriptionFilter, capacity: usize) -> Self {
        Self {
            id,
            filter,
            capacity: capacity.max(1),
            inner: Mutex::new(QueueInner {
                state: ConnectionState::Connecting,
                queue: VecDeque::new(),
                last_enqueued_id: 0,
                last_delivered_id: 0,
                last_drain: Instant::now(),
                dropped: 0,
            }),
            notify: Notify::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn filter(&self) -> &SubscriptionFilter {
        &self.filter
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub(super) fn activate(&self) {
        let mut inner = self.lock();
        if inner.state == ConnectionState::Connecting {
            inner.state = ConnectionState::Active;
        }
    }

    /// Offer an event. Never blocks the producer: when the queue is full the
    /// policy evicts or drops instead.
    ///
    /// - full + incoming low/medium: evict the oldest low event, else drop
    ///   the incoming one;
    /// - full + incoming high: evict the oldest low, else the oldest medium,
    ///   else (queue all-high) drop the incoming high and count it.
    pub fn enqueue(&self, event: Arc<IntelligenceEvent>) {
        let mut inner = self.lock();
        match inner.state {
            ConnectionState::Closed => return,
            // Draining connections flush what they have; only critical
            // events are still admitted.
            ConnectionState::Draining if event.priority != Priority::High => return,
            _ => {}
        }
        if event.id <= inner.last_enqueued_id {
            return; // already seen via backlog replay
        }

        if inner.queue.len() >= self.capacity && !self.make_room(&mut inner, event.priority) {
            inner.dropped += 1;
            counter!("feed_dropped_events_total", "priority" => priority_label(event.priority))
                .increment(1);
            return;
        }

        inner.last_enqueued_id = event.id;
        inner.queue.push_back(FeedItem::Event(event));
        drop(inner);
        self.notify.notify_one();
    }

    /// Liveness heartbeat; skipped when the queue is full (a full queue
    /// already proves the connection has pending traffic).
    pub(super) fn enqueue_heartbeat(&self) {
        let mut inner = self.lock();
        if inner.state != ConnectionState::Active || inner.queue.len() >= self.capacity {
            return;
        }
        inner.queue.push_back(FeedItem::Heartbeat);
        drop(inner);
        self.notify.notify_one();
    }

    /// Evict one queued item to admit an incoming one. Returns false when
    /// nothing of lower standing can be removed.
    fn make_room(&self, inner: &mut QueueInner, incoming: Priority) -> bool {
        let evict_order: &[Priority] = match incoming {
            Priority::High => &[Priority::Low, Priority::Medium],
            _ => &[Priority::Low],
        };
        for target in evict_order {
            let pos = inner.queue.iter().position(|item| {
                matches!(item, FeedItem::Event(e) if e.priority == *target)
            });
            if let Some(pos) = pos {
                let _ = inner.queue.remove(pos);
                inner.dropped += 1;
                counter!("feed_dropped_events_total", "priority" => priority_label(*target))
                    .increment(1);
                return true;
            }
        }
        false
    }

    /// Await the next outbound item. Returns `None` once the connection has
    /// drained to Closed.
    pub async fn next(&self) -> Option<FeedItem> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.lock();
                if let Some(item) = inner.queue.pop_front() {
                    inner.last_drain = Instant::now();
                    if let FeedItem::Event(e) = &item {
                        inner.last_delivered_id = e.id;
                    }
                    return Some(item);
                }
                match inner.state {
                    ConnectionState::Closed => return None,
                    ConnectionState::Draining => {
                        inner.state = ConnectionState::Closed;
                        return None;
                    }
                    _ => {}
                }
            }
            notified.await;
        }
    }

    /// Stop accepting non-critical events; remaining items still flush.
    pub fn begin_drain(&self) {
        let mut inner = self.lock();
        if inner.state == ConnectionState::Closed {
            return;
        }
        inner.state = ConnectionState::Draining;
        drop(inner);
        self.notify.notify_one();
    }

    /// Terminal: no further delivery.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.state = ConnectionState::Closed;
        inner.queue.clear();
        drop(inner);
        self.notify.notify_one();
    }

    pub fn last_delivered_id(&self) -> u64 {
        self.lock().last_delivered_id
    }

    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    /// Time since the subscriber last drained anything.
    pub fn idle_for(&self) -> Duration {
        self.lock().last_drain.elapsed()
    }

    /// Idle means stalled: there is pending traffic but the consumer has
    /// not drained within the timeout.
    pub(super) fn is_stalled(&self, idle_timeout: Duration) -> bool {
        let inner = self.lock();
        !inner.queue.is_empty() && inner.last_drain.elapsed() > idle_timeout
    }

    pub fn stats(&self) -> ConnectionStats {
        let inner = self.lock();
        ConnectionStats {
            id: self.id,
            queued: inner.queue.len(),
            last_delivered_id: inner.last_delivered_id,
            dropped: inner.dropped,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner.lock().expect("feed connection mutex poisoned")
    }
}

fn priority_label(p: Priority) -> &'static str {
    match p {
        Priority::Low => "low",
        Priority::Medium => "medium",
        Priority::High => "high",
    }
}
