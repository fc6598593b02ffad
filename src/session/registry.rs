//! Subscription registry: rooms, handles, and reconnect replay.
//!
//! A *room* is one server-side subscription for one distinct filter. Any
//! number of local handles may share a room; identical filters collapse by
//! fingerprint, so N listeners on the same filter cost exactly one
//! server-side subscription. The registry tracks room establishment,
//! notification routing, teardown on last detach, and the bookkeeping for
//! replaying every room after a reconnect without touching the attached
//! handles (listener identity survives reconnects).
//!
//! The registry is pure bookkeeping: the session actor drives it and owns
//! all network traffic.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::identifiers::{RequestId, RoomId, SubscriptionId};
use crate::protocol::Notification;

// ============================================================================
// Types
// ============================================================================

/// Canonical filter fingerprint; identical filters map to the same key.
pub type RoomKey = String;

/// Listener callback invoked for each notification on a room.
pub type NotificationHandler = Box<dyn Fn(&Notification) + Send + Sync>;

/// Computes the fingerprint of a filter.
///
/// `serde_json` orders object keys, so two filters that differ only in key
/// insertion order produce the same fingerprint.
#[must_use]
pub fn fingerprint(filter: &Value) -> RoomKey {
    filter.to_string()
}

// ============================================================================
// SubscriptionHandle
// ============================================================================

/// Caller-visible reference to one `subscribe` call.
///
/// Independent of how many other handles share the same room; passing it
/// to `unsubscribe` detaches exactly this listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
}

impl SubscriptionHandle {
    /// Creates a handle wrapping a local subscription id.
    #[inline]
    #[must_use]
    pub(crate) fn new(id: SubscriptionId) -> Self {
        Self { id }
    }

    /// Returns the local subscription id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.id.fmt(f)
    }
}

// ============================================================================
// Room Internals
// ============================================================================

/// A local listener attached to a room.
struct HandleEntry {
    id: SubscriptionId,
    handler: NotificationHandler,
}

/// A subscriber waiting for the room's subscribe ack.
struct Waiter {
    id: SubscriptionId,
    handler: NotificationHandler,
    reply: oneshot::Sender<Result<SubscriptionHandle>>,
}

/// Establishment state of one room.
enum RoomState {
    /// Subscribe request in flight; nobody is receiving yet.
    Pending {
        /// Correlation id of the in-flight subscribe, if one was issued.
        request_id: Option<RequestId>,
        /// Subscribers to attach (and answer) once the ack arrives.
        waiters: Vec<Waiter>,
    },

    /// Server acknowledged; notifications are routed by `room_id`.
    Active { room_id: RoomId },
}

/// One distinct subscription filter.
struct Room {
    filter: Value,
    state: RoomState,
    /// Attached listeners, in attachment order.
    handles: Vec<HandleEntry>,
}

impl Room {
    fn is_empty(&self) -> bool {
        let no_waiters = match &self.state {
            RoomState::Pending { waiters, .. } => waiters.is_empty(),
            RoomState::Active { .. } => true,
        };
        self.handles.is_empty() && no_waiters
    }
}

// ============================================================================
// PendingSubscription
// ============================================================================

/// A subscribe issued while the session was not connected.
///
/// Flushed through the normal subscribe path once the connection is up;
/// never survives a session close.
pub struct PendingSubscription {
    /// Preassigned local id.
    pub id: SubscriptionId,

    /// The requested filter.
    pub filter: Value,

    /// The listener to attach.
    pub handler: NotificationHandler,

    /// The caller waiting for a handle.
    pub reply: oneshot::Sender<Result<SubscriptionHandle>>,
}

// ============================================================================
// Outcomes
// ============================================================================

/// What the actor must do after a local subscribe.
pub enum SubscribeOutcome {
    /// Attached to an established room; the caller was already answered.
    Attached,

    /// Joined a room whose subscribe is already in flight.
    Joined,

    /// A new room was created; the actor must issue a subscribe request
    /// and report its correlation id via [`SubscriptionRegistry::set_room_request`].
    NeedsRequest {
        /// Fingerprint of the new room.
        key: RoomKey,
        /// Filter to put in the subscribe envelope.
        filter: Value,
    },

    /// Not connected; queued as a pending subscription.
    Deferred,
}

/// What the actor must do after a detach.
pub enum DetachOutcome {
    /// Other handles remain; nothing to send.
    Detached,

    /// Last handle removed; the room is destroyed. If it was active the
    /// actor sends a best-effort unsubscribe for `room_id`.
    RoomEmptied {
        /// Server room id, if the room was established.
        room_id: Option<RoomId>,
    },

    /// Unknown handle; detaching twice is a no-op.
    NotFound,
}

/// A room destroyed because its reconnect replay failed.
pub struct LostRoom {
    /// Fingerprint of the destroyed room.
    pub key: RoomKey,

    /// The room's filter, for the subscription-lost event payload.
    pub filter: Value,

    /// Handles that were attached when the room was lost.
    pub handle_ids: Vec<SubscriptionId>,
}

// ============================================================================
// SubscriptionRegistry
// ============================================================================

/// Bookkeeping for every room and local subscription in one session.
///
/// Mutated only from the session actor.
#[derive(Default)]
pub struct SubscriptionRegistry {
    /// Rooms by filter fingerprint.
    rooms: FxHashMap<RoomKey, Room>,

    /// Routing index: server room id to fingerprint.
    by_room_id: FxHashMap<RoomId, RoomKey>,

    /// Ownership index: local subscription id to fingerprint.
    subs: FxHashMap<SubscriptionId, RoomKey>,

    /// Subscribes deferred until the connection is up.
    pending_subs: Vec<PendingSubscription>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Subscribe / Unsubscribe
    // ========================================================================

    /// Registers a local subscribe.
    ///
    /// Attaches to an existing room when the fingerprint matches (the
    /// multiplexing guarantee), joins an in-flight establishment, defers
    /// while disconnected, or asks the actor to issue a new subscribe
    /// request.
    pub fn subscribe(
        &mut self,
        filter: Value,
        handler: NotificationHandler,
        reply: oneshot::Sender<Result<SubscriptionHandle>>,
        connected: bool,
    ) -> SubscribeOutcome {
        let key = fingerprint(&filter);
        let id = SubscriptionId::next();

        if let Some(room) = self.rooms.get_mut(&key) {
            match &mut room.state {
                RoomState::Active { .. } => {
                    room.handles.push(HandleEntry { id, handler });
                    self.subs.insert(id, key);
                    let _ = reply.send(Ok(SubscriptionHandle::new(id)));
                    return SubscribeOutcome::Attached;
                }
                RoomState::Pending { waiters, .. } => {
                    waiters.push(Waiter { id, handler, reply });
                    self.subs.insert(id, key);
                    return SubscribeOutcome::Joined;
                }
            }
        }

        if !connected {
            self.pending_subs.push(PendingSubscription {
                id,
                filter,
                handler,
                reply,
            });
            return SubscribeOutcome::Deferred;
        }

        self.rooms.insert(
            key.clone(),
            Room {
                filter: filter.clone(),
                state: RoomState::Pending {
                    request_id: None,
                    waiters: vec![Waiter { id, handler, reply }],
                },
                handles: Vec::new(),
            },
        );
        self.subs.insert(id, key.clone());

        SubscribeOutcome::NeedsRequest { key, filter }
    }

    /// Records the correlation id of the subscribe request issued for a
    /// pending room.
    pub fn set_room_request(&mut self, key: &str, request_id: RequestId) {
        if let Some(room) = self.rooms.get_mut(key)
            && let RoomState::Pending {
                request_id: slot, ..
            } = &mut room.state
        {
            *slot = Some(request_id);
        }
    }

    /// Completes a first-time subscribe.
    ///
    /// On success the room becomes active and every waiter is attached and
    /// answered with its handle. On error the room is destroyed and every
    /// waiter is answered with the error; nothing is created.
    pub fn complete_subscribe(&mut self, key: &str, result: Result<RoomId>) {
        let Some(mut room) = self.rooms.remove(key) else {
            return;
        };

        let waiters = match std::mem::replace(
            &mut room.state,
            RoomState::Pending {
                request_id: None,
                waiters: Vec::new(),
            },
        ) {
            RoomState::Pending { waiters, .. } => waiters,
            RoomState::Active { .. } => Vec::new(),
        };

        match result {
            Ok(room_id) => {
                for waiter in waiters {
                    room.handles.push(HandleEntry {
                        id: waiter.id,
                        handler: waiter.handler,
                    });
                    let _ = waiter.reply.send(Ok(SubscriptionHandle::new(waiter.id)));
                }
                room.state = RoomState::Active {
                    room_id: room_id.clone(),
                };
                self.by_room_id.insert(room_id, key.to_string());
                self.rooms.insert(key.to_string(), room);
            }
            Err(err) => {
                for waiter in waiters {
                    self.subs.remove(&waiter.id);
                    let _ = waiter.reply.send(Err(err.duplicate()));
                }
            }
        }
    }

    /// Detaches one handle from its room.
    ///
    /// Destroys the room when its last handle goes away; the actor then
    /// sends a best-effort unsubscribe for active rooms.
    pub fn detach(&mut self, id: SubscriptionId) -> DetachOutcome {
        let Some(key) = self.subs.remove(&id) else {
            return DetachOutcome::NotFound;
        };

        let Some(room) = self.rooms.get_mut(&key) else {
            return DetachOutcome::NotFound;
        };

        room.handles.retain(|h| h.id != id);
        if let RoomState::Pending { waiters, .. } = &mut room.state
            && let Some(pos) = waiters.iter().position(|w| w.id == id)
        {
            let waiter = waiters.remove(pos);
            let _ = waiter.reply.send(Err(Error::subscription_lost(
                "detached before the subscribe was acknowledged",
            )));
        }

        if room.is_empty() {
            let room_id = match self.rooms.remove(&key).map(|room| room.state) {
                Some(RoomState::Active { room_id }) => {
                    self.by_room_id.remove(&room_id);
                    Some(room_id)
                }
                _ => None,
            };
            return DetachOutcome::RoomEmptied { room_id };
        }

        DetachOutcome::Detached
    }

    // ========================================================================
    // Notification Routing
    // ========================================================================

    /// Delivers a notification to every handle of its room, in attachment
    /// order.
    ///
    /// Returns the number of listeners invoked; zero means the room is
    /// unknown (a late frame for a torn-down room) and the frame is
    /// silently discarded.
    pub fn route_notification(&self, notification: &Notification) -> usize {
        let Some(key) = self.by_room_id.get(&notification.room) else {
            return 0;
        };
        let Some(room) = self.rooms.get(key) else {
            return 0;
        };

        for entry in &room.handles {
            (entry.handler)(notification);
        }
        room.handles.len()
    }

    // ========================================================================
    // Reconnect Replay
    // ========================================================================

    /// Prepares every room for replay after a reconnect.
    ///
    /// Rooms re-enter the pending state with their handles untouched;
    /// rooms whose original establishment was still in flight keep their
    /// waiters. Returns, per room, the filter to resubscribe with and any
    /// stale in-flight correlation id the actor must drop.
    pub fn begin_renewal(&mut self) -> Vec<RenewalItem> {
        let mut items = Vec::new();

        for (key, room) in &mut self.rooms {
            let stale_request = match std::mem::replace(
                &mut room.state,
                RoomState::Pending {
                    request_id: None,
                    waiters: Vec::new(),
                },
            ) {
                RoomState::Active { room_id } => {
                    self.by_room_id.remove(&room_id);
                    None
                }
                RoomState::Pending {
                    request_id,
                    waiters,
                } => {
                    // Put the waiters back; they ride through the replay
                    room.state = RoomState::Pending {
                        request_id: None,
                        waiters,
                    };
                    request_id
                }
            };

            items.push(RenewalItem {
                key: key.clone(),
                filter: room.filter.clone(),
                stale_request,
            });
        }

        items
    }

    /// Completes a replay subscribe for one room.
    ///
    /// On success the backend may have assigned a new room id; handles
    /// stay attached and listeners are not re-registered. On failure the
    /// room is destroyed and returned so the actor can emit a
    /// subscription-lost event for its handles.
    pub fn complete_resubscribe(&mut self, key: &str, result: Result<RoomId>) -> Option<LostRoom> {
        match result {
            Ok(room_id) => {
                // Answer any waiters that rode through the replay
                self.complete_subscribe(key, Ok(room_id));
                None
            }
            Err(err) => {
                let room = self.rooms.remove(key)?;
                let mut handle_ids: Vec<SubscriptionId> =
                    room.handles.iter().map(|h| h.id).collect();

                if let RoomState::Pending { waiters, .. } = room.state {
                    let shared = err.to_string();
                    for waiter in waiters {
                        handle_ids.push(waiter.id);
                        let _ = waiter
                            .reply
                            .send(Err(Error::subscription_lost(shared.clone())));
                    }
                }
                for id in &handle_ids {
                    self.subs.remove(id);
                }

                Some(LostRoom {
                    key: key.to_string(),
                    filter: room.filter,
                    handle_ids,
                })
            }
        }
    }

    /// Takes every deferred subscription for flushing through the normal
    /// subscribe path.
    pub fn take_pending(&mut self) -> Vec<PendingSubscription> {
        std::mem::take(&mut self.pending_subs)
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Destroys every room and answers every outstanding subscriber with
    /// the given terminal error.
    ///
    /// Returns the number of rooms destroyed.
    pub fn fail_all(&mut self, err: &Error) -> usize {
        let message = err.to_string();
        let count = self.rooms.len();

        for (_, room) in self.rooms.drain() {
            if let RoomState::Pending { waiters, .. } = room.state {
                for waiter in waiters {
                    let _ = waiter
                        .reply
                        .send(Err(Error::connection_lost(message.clone())));
                }
            }
        }
        for pending in self.pending_subs.drain(..) {
            let _ = pending
                .reply
                .send(Err(Error::connection_lost(message.clone())));
        }
        self.by_room_id.clear();
        self.subs.clear();

        count
    }

    /// Answers every outstanding subscriber with [`Error::SessionClosed`]
    /// and clears the registry.
    pub fn close_all(&mut self) -> usize {
        let count = self.rooms.len();

        for (_, room) in self.rooms.drain() {
            if let RoomState::Pending { waiters, .. } = room.state {
                for waiter in waiters {
                    let _ = waiter.reply.send(Err(Error::SessionClosed));
                }
            }
        }
        for pending in self.pending_subs.drain(..) {
            let _ = pending.reply.send(Err(Error::SessionClosed));
        }
        self.by_room_id.clear();
        self.subs.clear();

        count
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Returns the number of rooms (any state).
    #[inline]
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Returns the number of deferred subscriptions.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending_subs.len()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("rooms", &self.rooms.len())
            .field("subs", &self.subs.len())
            .field("pending_subs", &self.pending_subs.len())
            .finish()
    }
}

// ============================================================================
// RenewalItem
// ============================================================================

/// One room to replay after a reconnect.
pub struct RenewalItem {
    /// Fingerprint of the room.
    pub key: RoomKey,

    /// Filter to resubscribe with.
    pub filter: Value,

    /// Correlation id of a subscribe that died with the old transport.
    pub stale_request: Option<RequestId>,
}

// ============================================================================
// Tests
// ============================================================================
