//! EventPublisher - Status Event Fan-out
//!
//! ## Responsibilities
//!
//! - Subscriber management for SSE and WebSocket viewers
//! - Deliver every published StatusEvent to every current subscriber
//! - Bound each subscriber queue; a subscriber that falls behind is
//!   disconnected instead of buffering without limit
//! - Terminal signal to all subscribers on shutdown
//!
//! Subscriptions start empty: a new subscriber only sees events published
//! after it subscribed.

use crate::models::StatusEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Default per-subscriber queue length
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Why a subscriber was dropped during publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("subscriber {0} queue full")]
    Backpressure(Uuid),

    #[error("subscriber {0} disconnected")]
    Disconnected(Uuid),
}

/// Outcome of one publish
#[derive(Debug, Default)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: Vec<DeliveryError>,
}

struct Subscriber {
    tx: mpsc::Sender<StatusEvent>,
}

/// Receiving end of one subscription
///
/// `recv` returns `None` once the subscriber was dropped by the publisher
/// (backpressure or shutdown).
pub struct SubscriberHandle {
    id: Uuid,
    rx: mpsc::Receiver<StatusEvent>,
}

impl SubscriberHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn recv(&mut self) -> Option<StatusEvent> {
        self.rx.recv().await
    }

    /// Next queued event without waiting
    pub fn try_recv(&mut self) -> Option<StatusEvent> {
        self.rx.try_recv().ok()
    }
}

/// EventPublisher instance
pub struct EventPublisher {
    subscribers: RwLock<HashMap<Uuid, Subscriber>>,
    queue_capacity: usize,
    published: AtomicU64,
    closed: AtomicBool,
}

impl EventPublisher {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
            published: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a new subscriber
    pub async fn subscribe(&self) -> SubscriberHandle {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        let mut subscribers = self.subscribers.write().await;
        // Checked under the lock so close_all cannot miss this subscriber
        if self.closed.load(Ordering::Acquire) {
            tracing::debug!(subscriber_id = %id, "Subscribe after shutdown");
            return SubscriberHandle { id, rx };
        }
        subscribers.insert(id, Subscriber { tx });
        drop(subscribers);

        tracing::info!(subscriber_id = %id, "Subscriber connected");
        SubscriberHandle { id, rx }
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub async fn unsubscribe(&self, id: &Uuid) {
        let mut subscribers = self.subscribers.write().await;
        if subscribers.remove(id).is_some() {
            tracing::info!(subscriber_id = %id, "Subscriber disconnected");
        }
    }

    /// Deliver `event` to every subscriber without waiting on any of them
    pub async fn publish(&self, event: StatusEvent) -> PublishReport {
        let mut report = PublishReport::default();

        {
            let subscribers = self.subscribers.read().await;
            tracing::debug!(
                subscriber_count = subscribers.len(),
                door = ?event.door,
                motion = ?event.motion,
                image = ?event.image,
                "Publishing status event"
            );

            for (id, subscriber) in subscribers.iter() {
                match subscriber.tx.try_send(event.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        report.dropped.push(DeliveryError::Backpressure(*id))
                    }
                    Err(TrySendError::Closed(_)) => {
                        report.dropped.push(DeliveryError::Disconnected(*id))
                    }
                }
            }
        }

        if !report.dropped.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for failure in &report.dropped {
                let id = match failure {
                    DeliveryError::Backpressure(id) | DeliveryError::Disconnected(id) => id,
                };
                subscribers.remove(id);
                tracing::warn!(subscriber_id = %id, error = %failure, "Subscriber dropped");
            }
        }

        self.published.fetch_add(1, Ordering::Relaxed);
        report
    }

    /// Drop every subscriber; their `recv` then returns `None`
    pub async fn close_all(&self) {
        let mut subscribers = self.subscribers.write().await;
        self.closed.store(true, Ordering::Release);
        let count = subscribers.len();
        subscribers.clear();
        tracing::info!(subscriber_count = count, "Event publisher closed");
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Total events published since start
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DoorState, SensorState};
    use chrono::Local;
    use std::sync::Arc;
    use std::time::Duration;

    fn event(door_open: bool) -> StatusEvent {
        StatusEvent::new(SensorState::new(door_open, false), Local::now(), None)
    }

    #[tokio::test]
    async fn test_no_replay_for_late_subscriber() {
        let publisher = EventPublisher::default();
        for _ in 0..5 {
            publisher.publish(event(true)).await;
        }

        let mut late = publisher.subscribe().await;
        publisher.publish(event(false)).await;

        let received = late.recv().await.unwrap();
        assert_eq!(received.door, DoorState::Closed);
        assert!(late.try_recv().is_none());
        assert_eq!(publisher.published_count(), 6);
    }

    #[tokio::test]
    async fn test_fan_out_to_all_subscribers() {
        let publisher = EventPublisher::default();
        let mut a = publisher.subscribe().await;
        let mut b = publisher.subscribe().await;

        let report = publisher.publish(event(true)).await;
        assert_eq!(report.delivered, 2);
        assert!(report.dropped.is_empty());

        assert!(a.recv().await.is_some());
        assert!(b.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_slow_subscriber_dropped_others_unaffected() {
        let publisher = EventPublisher::new(2);
        let slow = publisher.subscribe().await;
        let mut fast = publisher.subscribe().await;

        for i in 0..3 {
            publisher.publish(event(i % 2 == 0)).await;
            assert!(fast.recv().await.is_some());
        }

        assert_eq!(publisher.subscriber_count().await, 1);

        // The slow subscriber keeps what was queued, then sees the end
        let mut slow = slow;
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_none());

        let report = publisher.publish(event(true)).await;
        assert_eq!(report.delivered, 1);
    }

    #[tokio::test]
    async fn test_dropped_handle_is_pruned() {
        let publisher = EventPublisher::default();
        let handle = publisher.subscribe().await;
        let id = handle.id();
        drop(handle);

        let report = publisher.publish(event(true)).await;
        assert_eq!(report.dropped, vec![DeliveryError::Disconnected(id)]);
        assert_eq!(publisher.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_during_publish() {
        let publisher = Arc::new(EventPublisher::new(1024));
        let mut handles = Vec::new();
        for _ in 0..16 {
            handles.push(publisher.subscribe().await);
        }
        let ids: Vec<Uuid> = handles.iter().map(|h| h.id()).collect();

        let publishing = {
            let publisher = publisher.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    publisher.publish(event(true)).await;
                }
            })
        };
        for id in &ids {
            publisher.unsubscribe(id).await;
        }
        publishing.await.unwrap();

        assert_eq!(publisher.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_close_all_releases_waiters() {
        let publisher = Arc::new(EventPublisher::default());
        let mut handle = publisher.subscribe().await;

        let waiter = tokio::spawn(async move { handle.recv().await });
        tokio::task::yield_now().await;
        publisher.close_all().await;

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_none());

        let mut after = publisher.subscribe().await;
        assert!(after.recv().await.is_none());
        assert!(publisher.is_closed());
    }
}
