//! # Feed hub
//! Fan-out point for intelligence events. Producers call [`FeedHub::publish`]
//! and are never blocked; each subscriber owns a bounded queue drained only
//! by its own SSE stream. A bounded ring buffer of recent events backs
//! reconnect/resume cursors.

pub mod connection;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, gauge};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::FeedConfig;
use crate::model::{IntelligenceEvent, Priority};

pub use connection::{ConnectionState, FeedConnection, FeedItem, SubscriptionFilter};

#[derive(Debug)]
struct HubInner {
    /// Next event id to assign; the sequence is hub-global and monotonic.
    next_event_id: u64,
    next_connection_id: u64,
    ring: VecDeque<Arc<IntelligenceEvent>>,
    connections: HashMap<u64, Arc<FeedConnection>>,
}

pub struct FeedHub {
    cfg: FeedConfig,
    inner: Mutex<HubInner>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub retained_events: usize,
    pub last_event_id: u64,
    pub per_connection: Vec<connection::ConnectionStats>,
}

impl FeedHub {
    pub fn new(cfg: FeedConfig) -> Self {
        Self {
            cfg,
            inner: Mutex::new(HubInner {
                next_event_id: 1,
                next_connection_id: 1,
                ring: VecDeque::new(),
                connections: HashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.cfg
    }

    /// Publish one event: assign its id, retain it for resume, and fan it
    /// out to every matching connection. Never blocks the producer.
    pub fn publish(
        &self,
        category: impl Into<String>,
        priority: Priority,
        subject_key: impl Into<String>,
        payload: serde_json::Value,
    ) -> u64 {
        let (event, targets) = {
            let mut inner = self.lock();
            let id = inner.next_event_id;
            inner.next_event_id += 1;

            let event = Arc::new(IntelligenceEvent {
                id,
                category: category.into(),
                payload,
                priority,
                subject_key: subject_key.into(),
                created_at: Utc::now(),
            });

            inner.ring.push_back(Arc::clone(&event));
            self.trim_ring(&mut inner);

            let targets: Vec<Arc<FeedConnection>> = inner
                .connections
                .values()
                .filter(|c| c.filter().matches(&event))
                .cloned()
                .collect();
            (event, targets)
        };

        counter!("feed_events_published_total", "priority" => priority_label(priority))
            .increment(1);
        for conn in targets {
            conn.enqueue(Arc::clone(&event));
        }
        event.id
    }

    /// Register a subscriber. A resume cursor replays retained events with
    /// `id > last_event_id` that match the filter; no cursor means "from
    /// now" with no backlog. Events older than the ring's retention are
    /// gone; the client must treat the gap as possibly-missed events.
    pub fn subscribe(
        &self,
        filter: SubscriptionFilter,
        last_event_id: Option<u64>,
    ) -> Arc<FeedConnection> {
        let mut inner = self.lock();
        let id = inner.next_connection_id;
        inner.next_connection_id += 1;

        let conn = Arc::new(FeedConnection::new(
            id,
            filter,
            self.cfg.queue_capacity,
        ));

        // Age-expired events must not be replayable even when nothing has
        // been published since they aged out.
        self.trim_ring(&mut inner);
        if let Some(cursor) = last_event_id {
            for event in inner.ring.iter() {
                if event.id > cursor && conn.filter().matches(event) {
                    conn.enqueue(Arc::clone(event));
                }
            }
        }
        conn.activate();

        inner.connections.insert(id, Arc::clone(&conn));
        gauge!("feed_connections").set(inner.connections.len() as f64);
        counter!("feed_connections_opened_total").increment(1);
        info!(connection = id, resume = ?last_event_id, "feed subscriber connected");
        conn
    }

    /// Remove a subscriber (client disconnect or server-side close).
    pub fn disconnect(&self, connection_id: u64) {
        let removed = {
            let mut inner = self.lock();
            let removed = inner.connections.remove(&connection_id);
            gauge!("feed_connections").set(inner.connections.len() as f64);
            removed
        };
        if let Some(conn) = removed {
            conn.close();
            counter!("feed_connections_closed_total").increment(1);
            info!(connection = connection_id, "feed subscriber disconnected");
        }
    }

    /// Server-side shutdown: every connection drains its backlog and closes.
    pub fn drain_all(&self) {
        let conns: Vec<Arc<FeedConnection>> =
            self.lock().connections.values().cloned().collect();
        for conn in conns {
            conn.begin_drain();
        }
    }

    /// One heartbeat/reaper pass: inject a heartbeat into every active
    /// queue and force-close subscribers that have stopped draining.
    pub fn heartbeat_tick(&self) {
        let conns: Vec<Arc<FeedConnection>> =
            self.lock().connections.values().cloned().collect();
        let idle_timeout = self.cfg.idle_timeout();
        for conn in conns {
            if conn.is_stalled(idle_timeout) {
                debug!(connection = conn.id(), "idle subscriber force-closed");
                counter!("feed_connections_idle_closed_total").increment(1);
                self.disconnect(conn.id());
                continue;
            }
            conn.enqueue_heartbeat();
        }
    }

    pub fn stats(&self) -> HubStats {
        let inner = self.lock();
        HubStats {
            connections: inner.connections.len(),
            retained_events: inner.ring.len(),
            last_event_id: inner.next_event_id.saturating_sub(1),
            per_connection: inner.connections.values().map(|c| c.stats()).collect(),
        }
    }

    /// Ring is bounded by count and by age, whichever trims more.
    fn trim_ring(&self, inner: &mut HubInner) {
        while inner.ring.len() > self.cfg.ring_capacity {
            inner.ring.pop_front();
        }
        let cutoff = Utc::now() - chrono::Duration::seconds(self.cfg.ring_retention_secs as i64);
        while let Some(front) = inner.ring.front() {
            if front.created_at < cutoff {
                inner.ring.pop_front();
            } else {
                break;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubInner> {
        self.inner.lock().expect("feed hub mutex poisoned")
    }
}

/// Spawn the fixed-interval heartbeat/idle-reaper loop.
pub fn spawn_heartbeat(hub: Arc<FeedHub>) -> JoinHandle<()> {
    let interval = Duration::from_secs(hub.cfg.heartbeat_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            hub.heartbeat_tick();
        }
    })
}

fn priority_label(p: Priority) -> &'static str {
    match p {
        Priority::Low => "low",
        Priority::Medium => "medium",
        Priority::High => "high",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> FeedHub {
        FeedHub::new(FeedConfig::default())
    }

    fn publish_n(hub: &FeedHub, n: u64) {
        for i in 0..n {
            hub.publish(
                "analysis",
                Priority::Medium,
                "jubilee-hills",
                serde_json::json!({"n": i}),
            );
        }
    }

    #[test]
    fn ids_are_monotonic_from_one() {
        let hub = hub();
        let a = hub.publish("a", Priority::Low, "w", serde_json::json!({}));
        let b = hub.publish("a", Priority::Low, "w", serde_json::json!({}));
        assert_eq!((a, b), (1, 2));
    }

    #[test]
    fn subscriber_without_cursor_gets_no_backlog() {
        let hub = hub();
        publish_n(&hub, 5);
        let conn = hub.subscribe(SubscriptionFilter::default(), None);
        assert_eq!(conn.queued(), 0);
    }

    #[test]
    fn resume_replays_only_newer_matching_events() {
        let hub = hub();
        publish_n(&hub, 10); // ids 1..=10
        hub.publish(
            "alert",
            Priority::High,
            "banjara-hills",
            serde_json::json!({}),
        ); // id 11, different ward

        let conn = hub.subscribe(
            SubscriptionFilter {
                subject_key: Some("jubilee-hills".into()),
                categories: None,
            },
            Some(4),
        );
        // ids 5..=10 match; 11 is another ward.
        assert_eq!(conn.queued(), 6);
    }

    #[test]
    fn ring_is_bounded_by_capacity() {
        let cfg = FeedConfig {
            ring_capacity: 8,
            ..FeedConfig::default()
        };
        let hub = FeedHub::new(cfg);
        publish_n(&hub, 20);
        let stats = hub.stats();
        assert_eq!(stats.retained_events, 8);
        assert_eq!(stats.last_event_id, 20);

        // Only the retained tail is replayable.
        let conn = hub.subscribe(SubscriptionFilter::default(), Some(0));
        assert_eq!(conn.queued(), 8);
    }

    #[test]
    fn ring_expires_by_age() {
        let hub = FeedHub::new(FeedConfig {
            ring_retention_secs: 1,
            ..FeedConfig::default()
        });
        publish_n(&hub, 3); // ids 1..=3
        std::thread::sleep(Duration::from_millis(1100));

        // Aged-out events are gone for resume purposes even before the
        // next publish touches the ring.
        let conn = hub.subscribe(SubscriptionFilter::default(), Some(0));
        assert_eq!(conn.queued(), 0);

        // A fresh publish leaves only itself retained.
        publish_n(&hub, 1); // id 4
        assert_eq!(hub.stats().retained_events, 1);
    }

    #[test]
    fn fan_out_respects_filters() {
        let hub = hub();
        let all = hub.subscribe(SubscriptionFilter::default(), None);
        let scoped = hub.subscribe(
            SubscriptionFilter {
                subject_key: Some("banjara-hills".into()),
                categories: Some(vec!["alert".into()]),
            },
            None,
        );

        hub.publish("analysis", Priority::Low, "jubilee-hills", serde_json::json!({}));
        hub.publish("alert", Priority::High, "banjara-hills", serde_json::json!({}));

        assert_eq!(all.queued(), 2);
        assert_eq!(scoped.queued(), 1);
    }

    #[test]
    fn disconnect_closes_and_unregisters() {
        let hub = hub();
        let conn = hub.subscribe(SubscriptionFilter::default(), None);
        hub.disconnect(conn.id());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(hub.stats().connections, 0);
    }
}
