//! Lifecycle event emitter.
//!
//! The session reports its state transitions through a small publish/
//! subscribe bus. Listeners run synchronously, in registration order, from
//! the session actor's dispatch point, never re-entrantly from inside a
//! `send` or `subscribe` call.
//!
//! A panicking listener does not prevent later listeners from running; the
//! failed listener ids are returned to the emitter's caller, which logs
//! them.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use serde_json::Value;

use crate::identifiers::ListenerId;

// ============================================================================
// EventKind
// ============================================================================

/// Kinds of lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// First successful connection.
    Connected,

    /// Connection re-established after a drop.
    Reconnected,

    /// Transport lost or session left the connected state.
    Disconnected,

    /// A room failed to survive a reconnect replay.
    SubscriptionLost,

    /// A pending request expired without a reply.
    RequestTimeout,

    /// The backend rejected a request because the auth token expired.
    TokenExpired,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connected => "connected",
            Self::Reconnected => "reconnected",
            Self::Disconnected => "disconnected",
            Self::SubscriptionLost => "subscription-lost",
            Self::RequestTimeout => "request-timeout",
            Self::TokenExpired => "token-expired",
        };
        f.write_str(name)
    }
}

// ============================================================================
// LifecycleEvent
// ============================================================================

/// One emitted lifecycle event.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    /// Event kind.
    pub kind: EventKind,

    /// Event-specific details (close reason, room filter, request id).
    pub payload: Value,
}

impl LifecycleEvent {
    /// Creates an event with a null payload.
    #[inline]
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            payload: Value::Null,
        }
    }

    /// Creates an event with a payload.
    #[inline]
    #[must_use]
    pub fn with_payload(kind: EventKind, payload: Value) -> Self {
        Self { kind, payload }
    }
}

// ============================================================================
// Types
// ============================================================================

/// Listener callback invoked for each matching event.
pub type EventListener = Box<dyn Fn(&LifecycleEvent) + Send + Sync>;

// ============================================================================
// EventEmitter
// ============================================================================

/// Maps event kinds to ordered listener lists.
#[derive(Default)]
pub struct EventEmitter {
    /// Registered listeners in registration order.
    listeners: Vec<ListenerEntry>,
}

struct ListenerEntry {
    id: ListenerId,
    kind: EventKind,
    listener: EventListener,
}

impl EventEmitter {
    /// Creates an empty emitter.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for one event kind.
    ///
    /// Returns the id used to remove it later.
    pub fn add_listener(&mut self, kind: EventKind, listener: EventListener) -> ListenerId {
        let id = ListenerId::next();
        self.listeners.push(ListenerEntry { id, kind, listener });
        id
    }

    /// Removes a listener by id.
    ///
    /// Removing an unknown or already-removed id is a no-op.
    pub fn remove_listener(&mut self, id: ListenerId) {
        self.listeners.retain(|entry| entry.id != id);
    }

    /// Returns the number of listeners registered for a kind.
    #[inline]
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.iter().filter(|e| e.kind == kind).count()
    }

    /// Emits an event to every listener for its kind, in registration
    /// order.
    ///
    /// A panicking listener is isolated so later listeners still run; the
    /// ids of failed listeners are returned for the caller to log.
    pub fn emit(&self, event: &LifecycleEvent) -> Vec<ListenerId> {
        let mut failed = Vec::new();

        for entry in self.listeners.iter().filter(|e| e.kind == event.kind) {
            let result = catch_unwind(AssertUnwindSafe(|| (entry.listener)(event)));
            if result.is_err() {
                failed.push(entry.id);
            }
        }

        failed
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
