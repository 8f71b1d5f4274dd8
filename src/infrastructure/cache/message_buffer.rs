//! Write-behind message buffer.
//!
//! New messages are appended here first and broadcast immediately; a
//! background task drains the buffer into the database periodically or
//! when the depth crosses a threshold. Messages carry their final ID
//! before they ever reach the buffer, so delivery never waits on storage.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::domain::{Message, MessageRepository};
use crate::infrastructure::metrics;

/// Outcome of one flush pass.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    pub flushed: usize,
    pub failed: usize,
}

/// Cumulative buffer counters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferStats {
    pub depth: usize,
    pub appended_total: u64,
    pub flushed_total: u64,
    pub failed_total: u64,
    pub discarded_total: u64,
}

pub struct MessageBuffer {
    queue: Mutex<VecDeque<Message>>,
    repository: Arc<dyn MessageRepository>,
    batch_threshold: usize,
    appended: AtomicU64,
    flushed: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

impl MessageBuffer {
    pub fn new(repository: Arc<dyn MessageRepository>, batch_threshold: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            repository,
            batch_threshold,
            appended: AtomicU64::new(0),
            flushed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Append a message. Returns the new buffer depth.
    pub fn append(&self, message: Message) -> usize {
        let depth = {
            let mut queue = self.queue.lock();
            queue.push_back(message);
            queue.len()
        };
        self.appended.fetch_add(1, Ordering::Relaxed);
        metrics::BUFFER_DEPTH.set(depth as i64);
        depth
    }

    /// Whether an append at this depth should trigger an immediate flush.
    pub fn over_threshold(&self, depth: usize) -> bool {
        depth >= self.batch_threshold
    }

    pub fn depth(&self) -> usize {
        self.queue.lock().len()
    }

    /// Find a buffered message by ID (reply-target validation looks here
    /// before asking storage, so replies to unflushed messages work).
    pub fn find(&self, message_id: i64) -> Option<Message> {
        self.queue
            .lock()
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
    }

    /// Drain the buffer into storage, one message at a time.
    ///
    /// Each unit is persisted independently; a failed unit goes back to
    /// the front of the queue for the next pass rather than blocking or
    /// discarding its neighbors.
    pub async fn flush(&self) -> FlushReport {
        let batch: Vec<Message> = {
            let mut queue = self.queue.lock();
            queue.drain(..).collect()
        };

        if batch.is_empty() {
            return FlushReport::default();
        }

        let mut report = FlushReport::default();
        let mut retry = Vec::new();
        for message in batch {
            match self.repository.insert(&message).await {
                Ok(()) => report.flushed += 1,
                Err(error) => {
                    tracing::warn!(
                        message_id = message.id,
                        error = %error,
                        "Message flush failed, will retry"
                    );
                    report.failed += 1;
                    retry.push(message);
                }
            }
        }

        let depth = {
            let mut queue = self.queue.lock();
            // Preserve original order ahead of anything appended mid-flush.
            for message in retry.into_iter().rev() {
                queue.push_front(message);
            }
            queue.len()
        };

        self.flushed
            .fetch_add(report.flushed as u64, Ordering::Relaxed);
        self.failed
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        metrics::BUFFER_DEPTH.set(depth as i64);
        metrics::BUFFER_FLUSHED_TOTAL
            .with_label_values(&["flushed"])
            .inc_by(report.flushed as u64);
        metrics::BUFFER_FLUSHED_TOTAL
            .with_label_values(&["failed"])
            .inc_by(report.failed as u64);

        if report.failed > 0 {
            tracing::warn!(
                flushed = report.flushed,
                failed = report.failed,
                "Buffer flush completed with failures"
            );
        } else {
            tracing::debug!(flushed = report.flushed, "Buffer flush completed");
        }
        report
    }

    /// Drop everything in the buffer without persisting (admin surface).
    /// Returns the number of discarded messages.
    pub fn clear(&self) -> usize {
        let discarded = {
            let mut queue = self.queue.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        self.discarded.fetch_add(discarded as u64, Ordering::Relaxed);
        metrics::BUFFER_DEPTH.set(0);
        if discarded > 0 {
            tracing::warn!(discarded, "Buffer cleared without flush");
        }
        discarded
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            depth: self.depth(),
            appended_total: self.appended.load(Ordering::Relaxed),
            flushed_total: self.flushed.load(Ordering::Relaxed),
            failed_total: self.failed.load(Ordering::Relaxed),
            discarded_total: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Periodic flush loop, spawned at startup.
pub async fn run_flush_task(buffer: Arc<MessageBuffer>, interval_secs: u64) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        buffer.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MockMessageRepository;
    use crate::shared::error::AppError;
    use chrono::Utc;

    fn message(id: i64) -> Message {
        Message {
            id,
            conversation_id: 1,
            sender_id: 1,
            content: format!("m{id}"),
            reply_to_id: None,
            mentions: vec![],
            sent_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_flush_persists_all() {
        let mut repo = MockMessageRepository::new();
        repo.expect_insert().times(2).returning(|_| Ok(()));
        let buffer = MessageBuffer::new(Arc::new(repo), 500);

        buffer.append(message(1));
        buffer.append(message(2));
        let report = buffer.flush().await;

        assert_eq!(report.flushed, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(buffer.depth(), 0);
    }

    #[tokio::test]
    async fn test_failed_unit_requeued_others_persisted() {
        let mut repo = MockMessageRepository::new();
        repo.expect_insert().returning(|m| {
            if m.id == 2 {
                Err(AppError::Internal("db down".into()))
            } else {
                Ok(())
            }
        });
        let buffer = MessageBuffer::new(Arc::new(repo), 500);

        buffer.append(message(1));
        buffer.append(message(2));
        buffer.append(message(3));
        let report = buffer.flush().await;

        assert_eq!(report.flushed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(buffer.depth(), 1);
        assert!(buffer.find(2).is_some());
    }

    #[test]
    fn test_find_buffered_message() {
        let repo = MockMessageRepository::new();
        let buffer = MessageBuffer::new(Arc::new(repo), 500);
        buffer.append(message(42));

        assert!(buffer.find(42).is_some());
        assert!(buffer.find(7).is_none());
    }

    #[test]
    fn test_clear_discards() {
        let repo = MockMessageRepository::new();
        let buffer = MessageBuffer::new(Arc::new(repo), 500);
        buffer.append(message(1));
        buffer.append(message(2));

        assert_eq!(buffer.clear(), 2);
        assert_eq!(buffer.depth(), 0);
        assert_eq!(buffer.stats().discarded_total, 2);
    }

    #[test]
    fn test_threshold() {
        let repo = MockMessageRepository::new();
        let buffer = MessageBuffer::new(Arc::new(repo), 2);
        let depth = buffer.append(message(1));
        assert!(!buffer.over_threshold(depth));
        let depth = buffer.append(message(2));
        assert!(buffer.over_threshold(depth));
    }
}
