//! Fire-and-forget event publishing.
//!
//! Delivery is best-effort by contract: a publish with no subscribers, or one
//! that lags every receiver, is counted and dropped. Nothing on the matching
//! critical path ever blocks on the bus.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Topics keyed by the entity id each event concerns.
pub mod topics {
    pub const RIDE_REQUESTED: &str = "ride.requested";
    pub const RIDE_MATCHED: &str = "ride.matched";
    pub const RIDE_ACCEPTED: &str = "ride.accepted";
    pub const RIDE_DECLINED: &str = "ride.declined";
    pub const RIDE_EXPIRED: &str = "ride.expired";
    pub const RIDE_CANCELLED: &str = "ride.cancelled";
    pub const DRIVER_LOCATION_UPDATED: &str = "driver.location.updated";
    pub const DRIVER_STATUS_CHANGED: &str = "driver.status.changed";
    pub const SURGE_UPDATED: &str = "surge.updated";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    /// Entity id the event is keyed by (ride, driver, or cell).
    pub key: String,
    pub data: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub published: u64,
    pub dropped: u64,
}

#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Publish an event. Returns whether any receiver observed it; failures
    /// are recorded, never propagated.
    pub fn publish(&self, event_type: &str, key: impl Into<String>, data: Value) -> bool {
        let envelope = EventEnvelope {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            key: key.into(),
            data,
        };
        match self.tx.send(envelope) {
            Ok(_) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(event_type, "event dropped: no live subscribers");
                false
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn publish_reaches_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        assert!(bus.publish(topics::RIDE_REQUESTED, "ride-1", json!({"rideId": "ride-1"})));

        let event = rx.try_recv().expect("event");
        assert_eq!(event.event_type, topics::RIDE_REQUESTED);
        assert_eq!(event.key, "ride-1");
        assert_eq!(event.data["rideId"], "ride-1");
        assert_eq!(bus.stats().published, 1);
    }

    #[test]
    fn publish_without_subscribers_is_counted_not_fatal() {
        let bus = EventBus::default();
        assert!(!bus.publish(topics::SURGE_UPDATED, "cell-1", json!({})));
        assert_eq!(bus.stats(), BusStats { published: 0, dropped: 1 });
    }
}
