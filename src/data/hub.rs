use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use uuid::Uuid;

use crate::data::models::{Timestamp, TrackedStock};

pub type SessionId = Uuid;

/// Which copy of an event a subscriber is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// The subscriber issued the command that caused this event.
    Local,
    /// Someone else did (another session, or the scheduler).
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WatchlistEvent {
    StockAdded {
        symbol: String,
        stock: TrackedStock,
        /// Session that added it; absent for system activity.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        by: Option<SessionId>,
    },
    StockRemoved {
        symbol: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        by: Option<SessionId>,
    },
    PriceUpdated {
        symbol: String,
        price: f64,
        change: f64,
        #[serde(rename = "changePercent")]
        change_percent: f64,
        /// When the server observed the tick.
        timestamp: Timestamp,
    },
    ClientCount {
        count: usize,
    },
}

impl WatchlistEvent {
    pub fn symbol(&self) -> Option<&str> {
        match self {
            WatchlistEvent::StockAdded { symbol, .. }
            | WatchlistEvent::StockRemoved { symbol, .. }
            | WatchlistEvent::PriceUpdated { symbol, .. } => Some(symbol),
            WatchlistEvent::ClientCount { .. } => None,
        }
    }
}

/// One subscriber's copy of an event, tagged relative to that subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(flatten)]
    pub event: WatchlistEvent,
    pub origin: Origin,
}

/// What travels through the channel: the event plus the session that caused it.
#[derive(Debug)]
struct Envelope {
    source: Option<SessionId>,
    event: WatchlistEvent,
}

#[derive(Debug, Clone)]
pub struct SubscriberInfo {
    pub session_id: SessionId,
    pub connected_at: DateTime<Utc>,
}

/// Fan-out of watchlist events to every connected session.
///
/// Each subscriber reads from its own bounded window of the channel. Publishing
/// never waits: a subscriber that falls more than `capacity` events behind loses
/// its oldest undelivered events and keeps the newest ones.
pub struct BroadcastHub {
    tx: broadcast::Sender<Arc<Envelope>>,
    subscribers: Registry,
    capacity: usize,
}

type Registry = Arc<Mutex<HashMap<SessionId, SubscriberInfo>>>;

fn lock_registry(registry: &Registry) -> MutexGuard<'_, HashMap<SessionId, SubscriberInfo>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            capacity,
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<SessionId, SubscriberInfo>> {
        lock_registry(&self.subscribers)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Registers a new subscriber. It only sees events published from now on.
    pub fn subscribe(&self) -> Subscription {
        let session_id = Uuid::new_v4();
        let rx = self.tx.subscribe();

        self.registry().insert(session_id, SubscriberInfo {
            session_id,
            connected_at: Utc::now(),
        });

        info!("Session {} subscribed to watchlist events", session_id);
        Subscription {
            session_id,
            rx,
            dropped: 0,
            registry: self.subscribers.clone(),
        }
    }

    /// Deregisters a subscriber and drops its queue.
    ///
    /// Dropping a [`Subscription`] has the same effect, so a session task that
    /// is aborted mid-flight still leaves the registry clean.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Queues `event` for every current subscriber and returns how many there were.
    ///
    /// `source` is the session that issued the command, or `None` for
    /// system-driven activity, which every subscriber sees as `Remote`.
    pub fn publish(&self, source: Option<SessionId>, event: WatchlistEvent) -> usize {
        match self.tx.send(Arc::new(Envelope { source, event })) {
            Ok(count) => count,
            // No receivers right now; nothing to deliver.
            Err(_) => 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry().len()
    }

    /// Publishes the current subscriber count as a system `ClientCount`.
    ///
    /// The count is read and sent under the registry lock, so racing joins
    /// and leaves publish their counts in the order the registry changed and
    /// the last one sent is always current.
    pub fn publish_subscriber_count(&self) -> usize {
        let registry = self.registry();
        let count = registry.len();
        self.publish(None, WatchlistEvent::ClientCount { count });
        count
    }

    pub fn is_subscribed(&self, session_id: &SessionId) -> bool {
        self.registry().contains_key(session_id)
    }

    pub fn subscriber_info(&self, session_id: &SessionId) -> Option<SubscriberInfo> {
        self.registry().get(session_id).cloned()
    }
}

/// A subscriber's handle: its identity plus its private event queue.
pub struct Subscription {
    session_id: SessionId,
    rx: broadcast::Receiver<Arc<Envelope>>,
    dropped: u64,
    registry: Registry,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if lock_registry(&self.registry).remove(&self.session_id).is_some() {
            info!("Session {} unsubscribed from watchlist events", self.session_id);
        }
    }
}

impl Subscription {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Total events shed because this subscriber fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn tag(&self, envelope: &Envelope) -> Notification {
        let origin = if envelope.source == Some(self.session_id) {
            Origin::Local
        } else {
            Origin::Remote
        };
        Notification {
            event: envelope.event.clone(),
            origin,
        }
    }

    fn record_lag(&mut self, skipped: u64) {
        self.dropped += skipped;
        warn!(
            "Session {} lagged, dropped {} oldest notifications",
            self.session_id, skipped
        );
    }

    /// Waits for the next notification. Returns `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => return Some(self.tag(&envelope)),
                Err(RecvError::Lagged(skipped)) => self.record_lag(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next queued notification without waiting.
    pub fn try_recv(&mut self) -> Option<Notification> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => return Some(self.tag(&envelope)),
                Err(TryRecvError::Lagged(skipped)) => self.record_lag(skipped),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn removed(symbol: &str) -> WatchlistEvent {
        WatchlistEvent::StockRemoved {
            symbol: symbol.to_string(),
            by: None,
        }
    }

    #[test]
    fn test_origin_tagging() {
        let hub = BroadcastHub::new(16);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        let mut c = hub.subscribe();

        assert_eq!(hub.publish(Some(a.session_id()), removed("AAPL")), 3);

        assert_eq!(a.try_recv().unwrap().origin, Origin::Local);
        assert_eq!(b.try_recv().unwrap().origin, Origin::Remote);
        assert_eq!(c.try_recv().unwrap().origin, Origin::Remote);

        // Exactly one copy each.
        assert!(a.try_recv().is_none());
        assert!(b.try_recv().is_none());
        assert!(c.try_recv().is_none());
    }

    #[test]
    fn test_system_events_are_remote_for_everyone() {
        let hub = BroadcastHub::new(16);
        let mut a = hub.subscribe();

        hub.publish(None, removed("MSFT"));
        assert_eq!(a.try_recv().unwrap().origin, Origin::Remote);
    }

    #[test]
    fn test_no_replay_on_join() {
        let hub = BroadcastHub::new(16);
        let mut early = hub.subscribe();
        hub.publish(None, removed("E1"));
        hub.publish(None, removed("E2"));

        let mut late = hub.subscribe();
        assert!(late.try_recv().is_none());

        hub.publish(None, removed("E3"));
        assert_eq!(late.try_recv().unwrap().event, removed("E3"));
        assert_eq!(early.try_recv().unwrap().event, removed("E1"));
    }

    #[test]
    fn test_full_buffer_drops_oldest() {
        let hub = BroadcastHub::new(4);
        let mut slow = hub.subscribe();

        for i in 0..10 {
            hub.publish(None, removed(&format!("S{}", i)));
        }

        let received: Vec<_> = std::iter::from_fn(|| slow.try_recv())
            .map(|n| n.event.symbol().unwrap().to_string())
            .collect();

        assert_eq!(received, vec!["S6", "S7", "S8", "S9"]);
        assert_eq!(slow.dropped(), 6);
    }

    #[test]
    fn test_slow_subscriber_does_not_affect_others() {
        let hub = BroadcastHub::new(4);
        let _stalled = hub.subscribe();
        let mut active = hub.subscribe();

        for i in 0..20 {
            hub.publish(None, removed(&format!("S{}", i)));
            assert_eq!(active.try_recv().unwrap().event, removed(&format!("S{}", i)));
        }
        assert_eq!(active.dropped(), 0);
    }

    #[test]
    fn test_unsubscribe() {
        let hub = BroadcastHub::new(8);
        let a = hub.subscribe();
        let mut b = hub.subscribe();
        let a_id = a.session_id();
        assert_eq!(hub.subscriber_count(), 2);
        assert!(hub.subscriber_info(&a_id).is_some());

        hub.unsubscribe(a);
        assert_eq!(hub.subscriber_count(), 1);
        assert!(!hub.is_subscribed(&a_id));

        assert_eq!(hub.publish(Some(a_id), removed("AMZN")), 1);
        // The departed session's id no longer matches anyone.
        assert_eq!(b.try_recv().unwrap().origin, Origin::Remote);
    }

    #[test]
    fn test_dropped_subscription_deregisters() {
        let hub = BroadcastHub::new(8);
        let sub = hub.subscribe();
        let id = sub.session_id();
        assert!(hub.is_subscribed(&id));

        drop(sub);
        assert!(!hub.is_subscribed(&id));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = BroadcastHub::new(8);
        assert_eq!(hub.publish(None, removed("TSLA")), 0);
    }

    #[tokio::test]
    async fn test_per_symbol_fifo_across_tasks() {
        let hub = Arc::new(BroadcastHub::new(64));
        let mut sub = hub.subscribe();

        let publisher = {
            let hub = hub.clone();
            tokio::spawn(async move {
                for i in 0..20 {
                    hub.publish(None, WatchlistEvent::PriceUpdated {
                        symbol: "AAPL".to_string(),
                        price: i as f64,
                        change: 1.0,
                        change_percent: 0.5,
                        timestamp: Timestamp::Instant(Utc::now()),
                    });
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut prices = Vec::new();
        while prices.len() < 20 {
            match sub.recv().await.unwrap().event {
                WatchlistEvent::PriceUpdated { price, .. } => prices.push(price),
                other => panic!("unexpected event {:?}", other),
            }
        }
        publisher.await.unwrap();

        let expected: Vec<f64> = (0..20).map(|i| i as f64).collect();
        assert_eq!(prices, expected);
    }

    #[test]
    fn test_notification_wire_format() {
        let at = DateTime::parse_from_rfc3339("2024-03-01T14:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let notification = Notification {
            event: WatchlistEvent::PriceUpdated {
                symbol: "NVDA".to_string(),
                price: 486.1,
                change: 1.0,
                change_percent: 0.21,
                timestamp: Timestamp::Instant(at),
            },
            origin: Origin::Remote,
        };

        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "price_updated",
                "symbol": "NVDA",
                "price": 486.1,
                "change": 1.0,
                "changePercent": 0.21,
                "timestamp": "2024-03-01T14:30:00Z",
                "origin": "remote"
            })
        );
    }

    #[test]
    fn test_actor_is_carried_only_when_known() {
        let session = Uuid::new_v4();
        let by_user = serde_json::to_value(WatchlistEvent::StockRemoved {
            symbol: "AAPL".to_string(),
            by: Some(session),
        })
        .unwrap();
        assert_eq!(by_user["by"], serde_json::json!(session.to_string()));

        let by_system = serde_json::to_value(removed("AAPL")).unwrap();
        assert!(by_system.get("by").is_none());
    }

    #[test]
    fn test_racing_joins_and_leaves_end_on_current_count() {
        let hub = Arc::new(BroadcastHub::new(4096));
        let mut observer = hub.subscribe();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let hub = hub.clone();
                scope.spawn(move || {
                    for _ in 0..50 {
                        let sub = hub.subscribe();
                        hub.publish_subscriber_count();
                        drop(sub);
                        hub.publish_subscriber_count();
                    }
                });
            }
        });

        let counts: Vec<usize> = std::iter::from_fn(|| observer.try_recv())
            .filter_map(|n| match n.event {
                WatchlistEvent::ClientCount { count } => Some(count),
                _ => None,
            })
            .collect();
        assert_eq!(counts.len(), 800);
        assert_eq!(observer.dropped(), 0);
        assert_eq!(counts.last(), Some(&1));
        assert_eq!(hub.subscriber_count(), 1);
    }
}
