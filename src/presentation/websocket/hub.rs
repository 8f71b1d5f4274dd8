//! Outbound event hub.
//!
//! Single choke point for server-to-client events. Serializes payloads
//! into the frame envelope, delivers through the registry, and keeps
//! per-event-type counters for the admin surface and Prometheus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use super::frames::Frame;
use super::registry::ConnectionRegistry;
use crate::infrastructure::metrics;

/// Snapshot of the hub's delivery counters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    pub total_sent: u64,
    pub counts_by_type: std::collections::HashMap<String, u64>,
    pub last_sent_by_type: std::collections::HashMap<String, DateTime<Utc>>,
}

pub struct EventHub {
    registry: Arc<ConnectionRegistry>,
    total_sent: AtomicU64,
    counts: DashMap<String, u64>,
    last_sent: DashMap<String, DateTime<Utc>>,
}

impl EventHub {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            total_sent: AtomicU64::new(0),
            counts: DashMap::new(),
            last_sent: DashMap::new(),
        }
    }

    /// Deliver one event to one user. Returns whether it was delivered.
    pub fn send_to_user<T: Serialize>(&self, user_id: i64, event_type: &str, payload: &T) -> bool {
        let frame = Frame::event(event_type, payload);
        let delivered = self.registry.send_to_user(user_id, frame);
        if delivered {
            self.record(event_type, 1);
        }
        delivered
    }

    /// Deliver one event to many users. Returns the delivery count.
    pub fn send_to_users<T: Serialize>(
        &self,
        user_ids: &[i64],
        event_type: &str,
        payload: &T,
    ) -> usize {
        let frame = Frame::event(event_type, payload);
        let delivered = self.registry.send_to_users(user_ids, &frame);
        if delivered > 0 {
            self.record(event_type, delivered as u64);
        }
        delivered
    }

    fn record(&self, event_type: &str, count: u64) {
        self.total_sent.fetch_add(count, Ordering::Relaxed);
        *self.counts.entry(event_type.to_string()).or_insert(0) += count;
        self.last_sent.insert(event_type.to_string(), Utc::now());
        metrics::record_events_sent(event_type, count);
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            total_sent: self.total_sent.load(Ordering::Relaxed),
            counts_by_type: self
                .counts
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            last_sent_by_type: self
                .last_sent
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
        }
    }

    /// Reset the counters (admin surface).
    pub fn reset_stats(&self) {
        self.total_sent.store(0, Ordering::Relaxed);
        self.counts.clear();
        self.last_sent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn hub_with_user(user_id: i64) -> (EventHub, mpsc::UnboundedReceiver<Frame>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(user_id, tx);
        (EventHub::new(registry), rx)
    }

    #[test]
    fn test_send_records_stats() {
        let (hub, mut rx) = hub_with_user(1);

        assert!(hub.send_to_user(1, "chat.message", &json!({"id": 5})));
        assert_eq!(rx.try_recv().unwrap().frame_type, "chat.message");

        let stats = hub.stats();
        assert_eq!(stats.total_sent, 1);
        assert_eq!(stats.counts_by_type.get("chat.message"), Some(&1));
        assert!(stats.last_sent_by_type.contains_key("chat.message"));
    }

    #[test]
    fn test_offline_user_not_counted() {
        let (hub, _rx) = hub_with_user(1);
        assert!(!hub.send_to_user(99, "chat.message", &json!({})));
        assert_eq!(hub.stats().total_sent, 0);
    }

    #[test]
    fn test_reset_stats() {
        let (hub, _rx) = hub_with_user(1);
        hub.send_to_user(1, "typing.indicator", &json!({}));
        hub.reset_stats();
        assert_eq!(hub.stats().total_sent, 0);
        assert!(hub.stats().counts_by_type.is_empty());
    }
}
