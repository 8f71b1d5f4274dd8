//! Unread-count cache.
//!
//! Authoritative in-memory unread counters per (conversation, user).
//! Increments happen on the hot path of message fan-out; a background
//! task periodically writes a snapshot to the database so a restart
//! loses at most one sync interval of increments.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::domain::ParticipantRepository;

/// One dirty counter flushed to storage.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadEntry {
    pub conversation_id: i64,
    pub user_id: i64,
    pub count: i64,
}

#[derive(Default)]
pub struct UnreadCountCache {
    counts: DashMap<(i64, i64), i64>,
}

impl UnreadCountCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump the unread count for one (conversation, user) pair.
    pub fn increment(&self, conversation_id: i64, user_id: i64) -> i64 {
        let mut entry = self.counts.entry((conversation_id, user_id)).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn get(&self, conversation_id: i64, user_id: i64) -> i64 {
        self.counts
            .get(&(conversation_id, user_id))
            .map(|v| *v)
            .unwrap_or(0)
    }

    /// Zero the counter, e.g. when the user opens the conversation.
    pub fn reset(&self, conversation_id: i64, user_id: i64) {
        self.counts.insert((conversation_id, user_id), 0);
    }

    /// Snapshot every tracked counter.
    pub fn snapshot(&self) -> Vec<UnreadEntry> {
        self.counts
            .iter()
            .map(|entry| {
                let (conversation_id, user_id) = *entry.key();
                UnreadEntry {
                    conversation_id,
                    user_id,
                    count: *entry.value(),
                }
            })
            .collect()
    }

    /// Write the current snapshot to storage. Failed entries stay in the
    /// cache untouched and are retried on the next sync.
    pub async fn sync_to_database(&self, participants: &dyn ParticipantRepository) -> usize {
        let snapshot = self.snapshot();
        let mut synced = 0;
        for entry in &snapshot {
            match participants
                .set_unread_count(entry.conversation_id, entry.user_id, entry.count)
                .await
            {
                Ok(()) => synced += 1,
                Err(error) => {
                    tracing::warn!(
                        conversation_id = entry.conversation_id,
                        user_id = entry.user_id,
                        error = %error,
                        "Unread count sync failed"
                    );
                }
            }
        }
        if synced > 0 {
            tracing::debug!(synced, total = snapshot.len(), "Unread counts synced");
        }
        synced
    }
}

/// Periodic sync loop, spawned at startup.
pub async fn run_sync_task(
    cache: Arc<UnreadCountCache>,
    participants: Arc<dyn ParticipantRepository>,
    interval_secs: u64,
) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        cache.sync_to_database(participants.as_ref()).await;
    }
}
