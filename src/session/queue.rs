//! Offline queue for envelopes submitted while disconnected.
//!
//! Queuable sends issued outside the connected state land here and are
//! flushed in submission order when the connection (re)opens. The queue is
//! bounded per policy, and entries carry their enqueue time so stale
//! envelopes can be expired at flush instead of being replayed long after
//! the caller stopped caring.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

// ============================================================================
// QueuedEnvelope
// ============================================================================

/// One envelope waiting for the connection to come back.
#[derive(Debug)]
pub struct QueuedEnvelope {
    /// Correlation id of the pending request this frame belongs to.
    pub request_id: RequestId,

    /// Serialized outbound frame.
    pub frame: String,

    /// When the envelope was queued.
    pub queued_at: Instant,
}

// ============================================================================
// DrainOutcome
// ============================================================================

/// Result of draining the queue at flush time.
#[derive(Debug, Default)]
pub struct DrainOutcome {
    /// Envelopes still fresh enough to transmit, in submission order.
    pub ready: Vec<QueuedEnvelope>,

    /// Envelopes that sat in the queue longer than the TTL.
    pub expired: Vec<QueuedEnvelope>,
}

// ============================================================================
// OfflineQueue
// ============================================================================

/// Bounded FIFO of not-yet-sent envelopes.
#[derive(Debug, Default)]
pub struct OfflineQueue {
    entries: VecDeque<QueuedEnvelope>,
    max_len: usize,
}

impl OfflineQueue {
    /// Creates a queue with the given capacity (0 = unbounded).
    #[inline]
    #[must_use]
    pub fn new(max_len: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_len,
        }
    }

    /// Appends an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueFull`] when the bounded queue is at capacity.
    pub fn push(&mut self, entry: QueuedEnvelope) -> Result<()> {
        if self.max_len > 0 && self.entries.len() >= self.max_len {
            return Err(Error::queue_full(self.max_len));
        }
        self.entries.push_back(entry);
        Ok(())
    }

    /// Drains the queue, splitting fresh entries from TTL-expired ones.
    ///
    /// Order within `ready` is submission order.
    pub fn drain(&mut self, now: Instant, ttl: Duration) -> DrainOutcome {
        let mut outcome = DrainOutcome::default();

        for entry in self.entries.drain(..) {
            if now.saturating_duration_since(entry.queued_at) > ttl {
                outcome.expired.push(entry);
            } else {
                outcome.ready.push(entry);
            }
        }

        outcome
    }

    /// Removes every entry, for session teardown.
    pub fn drain_all(&mut self) -> Vec<QueuedEnvelope> {
        self.entries.drain(..).collect()
    }

    /// Returns the number of queued envelopes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is queued.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(frame: &str) -> QueuedEnvelope {
        QueuedEnvelope {
            request_id: RequestId::generate(),
            frame: frame.to_string(),
            queued_at: Instant::now(),
        }
    }

    #[test]
    fn test_push_and_drain_preserves_order() {
        let mut queue = OfflineQueue::new(0);
        queue.push(entry("a")).unwrap();
        queue.push(entry("b")).unwrap();
        queue.push(entry("c")).unwrap();

        let outcome = queue.drain(Instant::now(), Duration::from_secs(60));
        let frames: Vec<&str> = outcome.ready.iter().map(|e| e.frame.as_str()).collect();
        assert_eq!(frames, vec!["a", "b", "c"]);
        assert!(outcome.expired.is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_bounded_queue_rejects_overflow() {
        let mut queue = OfflineQueue::new(2);
        queue.push(entry("a")).unwrap();
        queue.push(entry("b")).unwrap();

        let err = queue.push(entry("c")).unwrap_err();
        assert!(matches!(err, Error::QueueFull { capacity: 2 }));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_expires_stale_entries() {
        let mut queue = OfflineQueue::new(0);
        queue.push(entry("stale")).unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        queue.push(entry("fresh")).unwrap();

        let outcome = queue.drain(Instant::now(), Duration::from_secs(5));
        assert_eq!(outcome.ready.len(), 1);
        assert_eq!(outcome.ready[0].frame, "fresh");
        assert_eq!(outcome.expired.len(), 1);
        assert_eq!(outcome.expired[0].frame, "stale");
    }

    #[test]
    fn test_unbounded_queue() {
        let mut queue = OfflineQueue::new(0);
        for i in 0..1000 {
            queue.push(entry(&i.to_string())).unwrap();
        }
        assert_eq!(queue.len(), 1000);
    }
}
