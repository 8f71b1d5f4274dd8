//! Presence view.
//!
//! Online/offline status is derived directly from the connection registry;
//! there is no separate presence store to drift out of sync.

use std::sync::Arc;

use crate::presentation::websocket::registry::ConnectionRegistry;

pub struct PresenceCache {
    registry: Arc<ConnectionRegistry>,
}

impl PresenceCache {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn is_online(&self, user_id: i64) -> bool {
        self.registry.is_online(user_id)
    }

    pub fn online_user_ids(&self) -> Vec<i64> {
        self.registry.online_user_ids()
    }

    /// Filter a candidate list down to the users currently online.
    pub fn filter_online(&self, user_ids: &[i64]) -> Vec<i64> {
        user_ids
            .iter()
            .copied()
            .filter(|&id| self.registry.is_online(id))
            .collect()
    }
}
