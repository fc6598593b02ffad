//! Request correlation tracking and timeout expiry.
//!
//! Every outbound request gets a [`Pending`] entry keyed by its correlation
//! id. The entry records what to do when the reply arrives (or fails to):
//! answer a caller, or complete an internal registry operation. Entries
//! leave the table exactly once, by reply, by timeout sweep, or by session
//! teardown; that is what makes the exactly-once callback guarantee hold.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::Result;
use crate::identifiers::RequestId;
use crate::protocol::Response;

use super::registry::RoomKey;

// ============================================================================
// PendingAction
// ============================================================================

/// What a pending entry does on completion.
pub enum PendingAction {
    /// Answer a caller's `send`.
    ///
    /// The oneshot is the two-branch continuation: sending consumes it, so
    /// a request can never be answered twice.
    Respond(oneshot::Sender<Result<Response>>),

    /// Complete a first-time subscribe for a room.
    Subscribe {
        /// Fingerprint of the room being established.
        key: RoomKey,
    },

    /// Complete a reconnect-replay subscribe for a room.
    Resubscribe {
        /// Fingerprint of the room being renewed.
        key: RoomKey,
    },

    /// Complete a best-effort unsubscribe; the local room is already gone.
    Unsubscribe,
}

impl PendingAction {
    /// Short tag for logging.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Respond(_) => "respond",
            Self::Subscribe { .. } => "subscribe",
            Self::Resubscribe { .. } => "resubscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

// ============================================================================
// Pending
// ============================================================================

/// One in-flight request.
pub struct Pending {
    /// Completion behavior.
    pub action: PendingAction,

    /// When the entry expires.
    pub deadline: Instant,

    /// The timeout budget, kept for error reporting.
    pub timeout_ms: u64,
}

// ============================================================================
// CorrelationTracker
// ============================================================================

/// Table of in-flight requests keyed by correlation id.
///
/// Mutated only from the session actor, so no interior locking is needed.
#[derive(Default)]
pub struct CorrelationTracker {
    pending: FxHashMap<RequestId, Pending>,
}

impl CorrelationTracker {
    /// Creates an empty tracker.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an in-flight request.
    ///
    /// Ids are UUIDs generated per request, so a live id is never reused;
    /// debug builds assert that.
    pub fn insert(&mut self, id: RequestId, action: PendingAction, deadline: Instant) {
        let timeout_ms = deadline
            .saturating_duration_since(Instant::now())
            .as_millis() as u64;
        let previous = self.pending.insert(
            id,
            Pending {
                action,
                deadline,
                timeout_ms,
            },
        );
        debug_assert!(previous.is_none(), "correlation id reused while pending");
    }

    /// Removes and returns the entry for a reply.
    ///
    /// `None` means a duplicate or stale reply; the caller discards the
    /// frame without error.
    #[inline]
    pub fn complete(&mut self, id: RequestId) -> Option<Pending> {
        self.pending.remove(&id)
    }

    /// Removes every entry whose deadline has passed.
    ///
    /// Returns the expired entries so the actor can fail them.
    pub fn sweep(&mut self, now: Instant) -> Vec<(RequestId, Pending)> {
        let expired: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.pending.remove(&id).map(|p| (id, p)))
            .collect()
    }

    /// Removes and returns every entry, for session teardown.
    pub fn drain_all(&mut self) -> Vec<(RequestId, Pending)> {
        self.pending.drain().collect()
    }

    /// Returns `true` if the id is still in flight.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: RequestId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Returns the number of in-flight requests.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if nothing is in flight.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
