//! Connection registry.
//!
//! Maps user IDs to their single live WebSocket connection. A user has at
//! most one connection; a reconnect replaces the previous entry and the
//! superseded socket loop notices via [`ConnectionRegistry::owns`].

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::frames::Frame;
use crate::infrastructure::metrics;

/// One registered connection.
pub struct Connection {
    /// Distinguishes this connection from a replacement by the same user.
    pub id: Uuid,
    sender: mpsc::UnboundedSender<Frame>,
    /// Unix seconds of the last inbound activity.
    last_activity: AtomicI64,
}

impl Connection {
    fn new(id: Uuid, sender: mpsc::UnboundedSender<Frame>) -> Self {
        Self {
            id,
            sender,
            last_activity: AtomicI64::new(Utc::now().timestamp()),
        }
    }
}

/// Registry of live connections, keyed by user ID.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<i64, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for a user, replacing any previous one.
    ///
    /// Returns the ID assigned to the new connection.
    pub fn register(&self, user_id: i64, sender: mpsc::UnboundedSender<Frame>) -> Uuid {
        let id = Uuid::new_v4();
        if let Some(previous) = self.connections.insert(user_id, Connection::new(id, sender)) {
            tracing::info!(
                user_id,
                old_connection = %previous.id,
                new_connection = %id,
                "Connection replaced by reconnect"
            );
        }
        metrics::CONNECTIONS_ACTIVE.set(self.connections.len() as i64);
        id
    }

    /// Remove whatever connection the user currently has.
    pub fn unregister(&self, user_id: i64) {
        self.connections.remove(&user_id);
        metrics::CONNECTIONS_ACTIVE.set(self.connections.len() as i64);
    }

    /// Remove the user's connection only if it is still the given one.
    ///
    /// A socket loop that was superseded by a reconnect must not tear down
    /// the replacement's registration.
    pub fn unregister_connection(&self, user_id: i64, connection_id: Uuid) {
        self.connections
            .remove_if(&user_id, |_, conn| conn.id == connection_id);
        metrics::CONNECTIONS_ACTIVE.set(self.connections.len() as i64);
    }

    /// Whether `connection_id` is still the user's registered connection.
    pub fn owns(&self, user_id: i64, connection_id: Uuid) -> bool {
        self.connections
            .get(&user_id)
            .map(|conn| conn.id == connection_id)
            .unwrap_or(false)
    }

    /// Send a frame to a user, best effort.
    ///
    /// Returns `false` if the user has no connection or the send failed.
    /// A failed send prunes the dead entry so later liveness checks see
    /// the user as offline.
    pub fn send_to_user(&self, user_id: i64, frame: Frame) -> bool {
        // Clone out of the guard before any removal to avoid holding a
        // shard lock across remove_if.
        let (sender, conn_id) = match self.connections.get(&user_id) {
            Some(conn) => (conn.sender.clone(), conn.id),
            None => return false,
        };

        if sender.send(frame).is_ok() {
            return true;
        }

        self.connections
            .remove_if(&user_id, |_, conn| conn.id == conn_id);
        metrics::CONNECTIONS_ACTIVE.set(self.connections.len() as i64);
        tracing::debug!(user_id, "Pruned dead connection after failed send");
        false
    }

    /// Send the same frame to every listed user, skipping offline users.
    ///
    /// Returns the number of successful deliveries.
    pub fn send_to_users(&self, user_ids: &[i64], frame: &Frame) -> usize {
        user_ids
            .iter()
            .filter(|&&user_id| self.send_to_user(user_id, frame.clone()))
            .count()
    }

    /// Deliver a frame to every live connection, pruning failures in the
    /// same pass. Returns the number of successful deliveries.
    pub fn broadcast(&self, frame: &Frame) -> usize {
        let targets: Vec<i64> = self.connections.iter().map(|entry| *entry.key()).collect();
        targets
            .into_iter()
            .filter(|&user_id| self.send_to_user(user_id, frame.clone()))
            .count()
    }

    pub fn is_online(&self, user_id: i64) -> bool {
        self.connections.contains_key(&user_id)
    }

    /// Currently connected user IDs. Entries whose channel has closed are
    /// pruned on the way, so presence queries self-heal.
    pub fn online_user_ids(&self) -> Vec<i64> {
        self.connections
            .retain(|_, conn| !conn.sender.is_closed());
        metrics::CONNECTIONS_ACTIVE.set(self.connections.len() as i64);
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Record inbound activity for the user's connection.
    pub fn touch(&self, user_id: i64) {
        if let Some(conn) = self.connections.get(&user_id) {
            conn.last_activity
                .store(Utc::now().timestamp(), Ordering::Relaxed);
        }
    }

    /// Whether the given connection is gone, superseded, or idle past
    /// `max_idle_secs`. Used by the per-connection liveness tick.
    pub fn is_stale(&self, user_id: i64, connection_id: Uuid, max_idle_secs: i64) -> bool {
        match self.connections.get(&user_id) {
            Some(conn) if conn.id == connection_id => {
                let idle = Utc::now().timestamp() - conn.last_activity.load(Ordering::Relaxed);
                idle > max_idle_secs
            }
            // Superseded or already removed.
            _ => true,
        }
    }
}

pub type SharedRegistry = Arc<ConnectionRegistry>;
