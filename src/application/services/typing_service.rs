//! Typing Indicator Service
//!
//! Tracks who is typing in each conversation. Entries expire after a
//! short TTL so a client that vanishes mid-keystroke stops showing as
//! typing without an explicit stop frame.

use std::collections::HashSet;

use chrono::Utc;
use dashmap::DashMap;

/// Default typing TTL in seconds (Discord standard)
const DEFAULT_TYPING_TTL_SECS: i64 = 10;

/// Typing state per conversation
#[derive(Default)]
pub struct TypingService {
    /// (conversation_id, user_id) -> unix seconds of last typing signal
    typing: DashMap<(i64, i64), i64>,
    ttl_secs: i64,
}

impl TypingService {
    pub fn new() -> Self {
        Self {
            typing: DashMap::new(),
            ttl_secs: DEFAULT_TYPING_TTL_SECS,
        }
    }

    pub fn with_ttl(ttl_secs: i64) -> Self {
        Self {
            typing: DashMap::new(),
            ttl_secs,
        }
    }

    /// Mark a user as typing in a conversation.
    pub fn set_typing(&self, conversation_id: i64, user_id: i64) {
        self.typing
            .insert((conversation_id, user_id), Utc::now().timestamp());
    }

    /// Clear a user's typing state in a conversation.
    pub fn clear_typing(&self, conversation_id: i64, user_id: i64) {
        self.typing.remove(&(conversation_id, user_id));
    }

    /// Users currently typing in the conversation, with expired entries
    /// evicted on the way.
    pub fn typing_users(&self, conversation_id: i64) -> Vec<i64> {
        let cutoff = Utc::now().timestamp() - self.ttl_secs;
        let mut expired = Vec::new();
        let mut active = Vec::new();

        for entry in self.typing.iter() {
            let (conv, user) = *entry.key();
            if conv != conversation_id {
                continue;
            }
            if *entry.value() >= cutoff {
                active.push(user);
            } else {
                expired.push((conv, user));
            }
        }
        for key in expired {
            self.typing.remove(&key);
        }
        active.sort_unstable();
        active
    }

    /// Typing users visible to `viewer_id`.
    ///
    /// The viewer is excluded from their own list, unless the viewer is
    /// the conversation's only participant (a self-conversation shows
    /// the user their own indicator).
    pub fn visible_typing_users(
        &self,
        conversation_id: i64,
        viewer_id: i64,
        participant_count: usize,
    ) -> Vec<i64> {
        let users = self.typing_users(conversation_id);
        if participant_count <= 1 {
            return users;
        }
        users.into_iter().filter(|&u| u != viewer_id).collect()
    }

    /// Drop the user's typing state in every conversation. Called on
    /// disconnect; the indicator is left to expire on viewers' clients
    /// rather than re-broadcast.
    pub fn remove_user_everywhere(&self, user_id: i64) {
        let keys: HashSet<(i64, i64)> = self
            .typing
            .iter()
            .map(|entry| *entry.key())
            .filter(|(_, user)| *user == user_id)
            .collect();
        for key in keys {
            self.typing.remove(&key);
        }
    }
}
