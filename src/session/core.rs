//! Session core: the connection state machine and its actor loop.
//!
//! One [`Session`] owns one logical connection. All mutable state (the
//! correlation tracker, the room registry, the offline queue, the state
//! machine itself) lives inside a single spawned actor task; public handles
//! talk to it over an unbounded command channel and get results back over
//! oneshot channels. Nothing blocks a caller: `send` and `subscribe` return
//! as soon as the actor has taken the command.
//!
//! # Actor Loop
//!
//! The loop multiplexes four sources:
//!
//! - commands from handles (send, subscribe, close, ...)
//! - inbound frames and close signals from the current transport handle
//! - the scheduled reconnect timer
//! - the periodic timeout sweep
//!
//! Because everything funnels through one task, the pending-request table
//! and the room table need no locks, and lifecycle listeners are never
//! invoked re-entrantly from a caller's `send` or `subscribe`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{ListenerId, RequestId, RoomId};
use crate::protocol::{Envelope, InboundFrame, Notification, Request, Response};
use crate::transport::{Transport, TransportEvent, TransportHandle};

use super::config::{MIN_SWEEP_INTERVAL, SendOptions, SessionConfig};
use super::events::{EventEmitter, EventKind, EventListener, LifecycleEvent};
use super::queue::{OfflineQueue, QueuedEnvelope};
use super::registry::{
    DetachOutcome, NotificationHandler, RoomKey, SubscribeOutcome, SubscriptionHandle,
    SubscriptionRegistry,
};
use super::tracker::{CorrelationTracker, Pending, PendingAction};

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of the logical connection.
///
/// `Disconnected` is both the initial state and the terminal state after
/// an explicit close; `Error` is terminal after the retry budget runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport; initial state, or final after `close()`.
    Disconnected,

    /// First connection attempt in progress.
    Connecting,

    /// Transport open; traffic flows.
    Connected,

    /// Transport lost; reconnection attempts scheduled.
    Reconnecting,

    /// Retry budget exhausted or recovery disabled. Terminal.
    Error,
}

impl ConnectionState {
    /// Returns `true` if no further traffic will ever be accepted.
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

// ============================================================================
// SessionCommand
// ============================================================================

/// Commands from public handles to the actor.
enum SessionCommand {
    Connect {
        reply: oneshot::Sender<Result<()>>,
    },
    Send {
        envelope: Envelope,
        options: SendOptions,
        reply: oneshot::Sender<Result<Response>>,
    },
    Subscribe {
        filter: Value,
        handler: NotificationHandler,
        reply: oneshot::Sender<Result<SubscriptionHandle>>,
    },
    Unsubscribe {
        handle: SubscriptionHandle,
        reply: oneshot::Sender<Result<()>>,
    },
    AddListener {
        kind: EventKind,
        listener: EventListener,
        reply: oneshot::Sender<ListenerId>,
    },
    RemoveListener {
        id: ListenerId,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

// ============================================================================
// Shared
// ============================================================================

/// State mirrored out of the actor for lock-free handle reads.
struct Shared {
    state: Mutex<ConnectionState>,
    pending: AtomicUsize,
}

// ============================================================================
// Session
// ============================================================================

/// Handle to one logical connection.
///
/// Cloneable and cheap; all clones talk to the same actor. Dropping every
/// clone shuts the actor down and fails whatever is still outstanding.
///
/// # Example
///
/// ```ignore
/// use roomlink::{Session, SessionConfig};
/// use roomlink::transport::WsTransport;
///
/// let transport = WsTransport::new("ws://localhost:7512")?;
/// let session = Session::spawn(transport, SessionConfig::default());
/// session.connect().await?;
///
/// let response = session.send(Envelope::new("server", "now")).await?;
/// ```
pub struct Session {
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    shared: Arc<Shared>,
}

impl Clone for Session {
    fn clone(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Session {
    /// Spawns the session actor over the given transport.
    ///
    /// The session starts in [`ConnectionState::Disconnected`]; call
    /// [`connect`](Self::connect) to bring it up.
    #[must_use]
    pub fn spawn<T: Transport>(transport: T, config: SessionConfig) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(ConnectionState::Disconnected),
            pending: AtomicUsize::new(0),
        });

        let queue = OfflineQueue::new(config.queue.max_len);
        let actor = SessionActor {
            transport,
            config,
            command_rx,
            shared: Arc::clone(&shared),
            state: ConnectionState::Disconnected,
            link: None,
            tracker: CorrelationTracker::new(),
            registry: SubscriptionRegistry::new(),
            queue,
            emitter: EventEmitter::new(),
            connect_waiters: Vec::new(),
            ever_connected: false,
            retry_attempt: 0,
            reconnect_at: None,
        };

        tokio::spawn(actor.run());

        Self { command_tx, shared }
    }

    /// Opens the connection.
    ///
    /// Resolves once the session reaches `Connected`, or with an error
    /// once it reaches the terminal `Error` state.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionLost`] if every attempt in the retry budget fails
    /// - [`Error::SessionClosed`] if the session was closed
    pub async fn connect(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(SessionCommand::Connect { reply })
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    /// Sends an envelope and resolves with its response.
    ///
    /// Uses session defaults for timeout and offline queuing.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if no reply arrives within the budget
    /// - [`Error::Protocol`] if the backend answers with an error status
    /// - [`Error::NotConnected`] / [`Error::QueueFull`] per queuing policy
    /// - [`Error::SessionClosed`] / [`Error::ConnectionLost`] on teardown
    pub async fn send(&self, envelope: Envelope) -> Result<Response> {
        self.send_with_options(envelope, SendOptions::new()).await
    }

    /// Sends an envelope with per-call overrides.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub async fn send_with_options(
        &self,
        envelope: Envelope,
        options: SendOptions,
    ) -> Result<Response> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(SessionCommand::Send {
                envelope,
                options,
                reply,
            })
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    /// Subscribes a listener to a realtime filter.
    ///
    /// Identical filters share one server-side room; the listener keeps
    /// receiving across reconnects without re-registration. While not
    /// connected the subscription is deferred and completes once the
    /// connection is up.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the backend rejects the subscription
    /// - [`Error::SessionClosed`] if the session closes first
    pub async fn subscribe<F>(&self, filter: Value, listener: F) -> Result<SubscriptionHandle>
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(SessionCommand::Subscribe {
                filter,
                handler: Box::new(listener),
                reply,
            })
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    /// Detaches one subscription handle.
    ///
    /// When the last handle of a room goes away the room is destroyed and
    /// a best-effort unsubscribe is sent; network failure during that
    /// request still destroys the local room. Unsubscribing twice is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session is gone.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(SessionCommand::Unsubscribe { handle, reply })
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    /// Registers a lifecycle listener.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session is gone.
    pub async fn add_listener<F>(&self, kind: EventKind, listener: F) -> Result<ListenerId>
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(SessionCommand::AddListener {
                kind,
                listener: Box::new(listener),
                reply,
            })
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    /// Removes a lifecycle listener. Removing twice is a no-op.
    pub fn remove_listener(&self, id: ListenerId) {
        let _ = self.command_tx.send(SessionCommand::RemoveListener { id });
    }

    /// Closes the session.
    ///
    /// Cancels scheduled reconnects, fails every pending request and
    /// deferred subscription with [`Error::SessionClosed`], destroys every
    /// room, and leaves the session in `Disconnected`.
    pub async fn close(&self) {
        let (reply, rx) = oneshot::channel();
        if self
            .command_tx
            .send(SessionCommand::Close { reply })
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Returns the current connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Returns the number of in-flight requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.load(Ordering::Relaxed)
    }
}

// ============================================================================
// SessionActor
// ============================================================================

/// Loop control for the actor.
#[derive(PartialEq)]
enum Flow {
    Continue,
    Stop,
}

struct SessionActor<T: Transport> {
    transport: T,
    config: SessionConfig,
    command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    shared: Arc<Shared>,

    state: ConnectionState,
    link: Option<TransportHandle>,
    tracker: CorrelationTracker,
    registry: SubscriptionRegistry,
    queue: OfflineQueue,
    emitter: EventEmitter,

    /// Callers awaiting the outcome of connect/reconnect.
    connect_waiters: Vec<oneshot::Sender<Result<()>>>,

    /// Whether any connection ever succeeded (selects connected vs
    /// reconnected on the next success).
    ever_connected: bool,

    /// Consecutive failed attempts in the current recovery.
    retry_attempt: u32,

    /// When the next reconnect attempt fires.
    reconnect_at: Option<Instant>,
}

/// Receives from the current transport handle, or parks forever when
/// there is none.
async fn transport_recv(link: &mut Option<TransportHandle>) -> Option<TransportEvent> {
    match link {
        Some(handle) => handle.inbound.recv().await,
        None => std::future::pending().await,
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365)
}

impl<T: Transport> SessionActor<T> {
    async fn run(mut self) {
        // Fields are public, so a zero period set directly is still caught
        let period = self.config.sweep_interval.max(MIN_SWEEP_INTERVAL);
        let mut sweep = tokio::time::interval(period);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        Some(command) => {
                            if self.handle_command(command).await == Flow::Stop {
                                break;
                            }
                        }
                        None => {
                            debug!("All session handles dropped");
                            self.teardown();
                            break;
                        }
                    }
                }

                event = transport_recv(&mut self.link) => {
                    match event {
                        Some(TransportEvent::Frame(text)) => self.handle_frame(&text),
                        Some(TransportEvent::Closed { reason }) => self.handle_transport_loss(&reason),
                        None => self.handle_transport_loss("transport channel dropped"),
                    }
                }

                _ = tokio::time::sleep_until(self.reconnect_at.unwrap_or_else(far_future)),
                    if self.reconnect_at.is_some() =>
                {
                    self.reconnect_at = None;
                    self.attempt_connect().await;
                }

                _ = sweep.tick() => {
                    self.sweep_timeouts();
                }
            }
        }

        debug!("Session actor terminated");
    }

    // ========================================================================
    // Commands
    // ========================================================================

    async fn handle_command(&mut self, command: SessionCommand) -> Flow {
        match command {
            SessionCommand::Connect { reply } => {
                match self.state {
                    ConnectionState::Connected => {
                        let _ = reply.send(Ok(()));
                    }
                    ConnectionState::Connecting | ConnectionState::Reconnecting => {
                        self.connect_waiters.push(reply);
                    }
                    ConnectionState::Disconnected | ConnectionState::Error => {
                        self.connect_waiters.push(reply);
                        self.set_state(ConnectionState::Connecting, None);
                        self.retry_attempt = 0;
                        self.attempt_connect().await;
                    }
                }
                Flow::Continue
            }

            SessionCommand::Send {
                envelope,
                options,
                reply,
            } => {
                self.handle_send(envelope, options, reply);
                Flow::Continue
            }

            SessionCommand::Subscribe {
                filter,
                handler,
                reply,
            } => {
                let connected = self.state == ConnectionState::Connected;
                let outcome = self.registry.subscribe(filter, handler, reply, connected);
                if let SubscribeOutcome::NeedsRequest { key, filter } = outcome {
                    self.issue_subscribe(key, filter, false);
                }
                self.mirror_pending();
                Flow::Continue
            }

            SessionCommand::Unsubscribe { handle, reply } => {
                match self.registry.detach(handle.id()) {
                    DetachOutcome::RoomEmptied {
                        room_id: Some(room_id),
                    } => self.issue_unsubscribe(&room_id),
                    DetachOutcome::RoomEmptied { room_id: None }
                    | DetachOutcome::Detached
                    | DetachOutcome::NotFound => {}
                }
                let _ = reply.send(Ok(()));
                Flow::Continue
            }

            SessionCommand::AddListener {
                kind,
                listener,
                reply,
            } => {
                let id = self.emitter.add_listener(kind, listener);
                let _ = reply.send(id);
                Flow::Continue
            }

            SessionCommand::RemoveListener { id } => {
                self.emitter.remove_listener(id);
                Flow::Continue
            }

            SessionCommand::Close { reply } => {
                self.teardown();
                let _ = reply.send(());
                Flow::Stop
            }
        }
    }

    fn handle_send(
        &mut self,
        envelope: Envelope,
        options: SendOptions,
        reply: oneshot::Sender<Result<Response>>,
    ) {
        if self.state == ConnectionState::Error {
            let _ = reply.send(Err(Error::connection_lost("session is in error state")));
            return;
        }

        let request = Request::new(envelope);
        let frame = match serde_json::to_string(&request) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = reply.send(Err(Error::Json(e)));
                return;
            }
        };

        let timeout = options.timeout.unwrap_or(self.config.request_timeout);
        let deadline = Instant::now() + timeout;

        if self.state == ConnectionState::Connected {
            self.tracker
                .insert(request.id, PendingAction::Respond(reply), deadline);
            self.mirror_pending();
            self.write_frame(&frame);
            trace!(request_id = %request.id, method = %request.envelope.method(), "Request sent");
            return;
        }

        // Not connected: queue or fail fast per policy
        let queuable = options.queuable.unwrap_or(self.config.queue.auto_queue);
        if !queuable {
            let _ = reply.send(Err(Error::NotConnected));
            return;
        }

        let entry = QueuedEnvelope {
            request_id: request.id,
            frame,
            queued_at: Instant::now(),
        };
        match self.queue.push(entry) {
            Ok(()) => {
                self.tracker
                    .insert(request.id, PendingAction::Respond(reply), deadline);
                self.mirror_pending();
                debug!(request_id = %request.id, queued = self.queue.len(), "Request queued offline");
            }
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }

    // ========================================================================
    // Connection Lifecycle
    // ========================================================================

    async fn attempt_connect(&mut self) {
        match self.transport.open().await {
            Ok(handle) => {
                self.link = Some(handle);
                self.on_connected();
            }
            Err(e) => {
                debug!(error = %e, attempt = self.retry_attempt, "Connection attempt failed");
                self.retry_attempt += 1;
                self.schedule_retry_or_fail(&e.to_string());
            }
        }
    }

    fn on_connected(&mut self) {
        let reconnection = self.ever_connected;
        self.ever_connected = true;
        self.retry_attempt = 0;
        self.reconnect_at = None;

        // Flush the offline queue in submission order
        let outcome = self
            .queue
            .drain(Instant::now(), self.config.queue.ttl);
        let ttl_ms = self.config.queue.ttl.as_millis() as u64;
        for entry in outcome.expired {
            if let Some(pending) = self.tracker.complete(entry.request_id) {
                let err = Error::timeout(entry.request_id, ttl_ms);
                self.fail_pending(entry.request_id, pending, err);
            }
        }
        for entry in outcome.ready {
            // Skip envelopes whose request already timed out while queued
            if self.tracker.contains(entry.request_id) {
                self.write_frame(&entry.frame);
            }
        }
        self.mirror_pending();

        // Replay every room; handles stay attached, waiters ride through
        let renewals = self.registry.begin_renewal();
        for item in renewals {
            if let Some(stale) = item.stale_request {
                let _ = self.tracker.complete(stale);
            }
            self.issue_subscribe(item.key, item.filter, true);
        }

        // Promote subscriptions deferred while offline
        for pending in self.registry.take_pending() {
            let outcome =
                self.registry
                    .subscribe(pending.filter, pending.handler, pending.reply, true);
            if let SubscribeOutcome::NeedsRequest { key, filter } = outcome {
                self.issue_subscribe(key, filter, false);
            }
        }
        self.mirror_pending();

        let kind = if reconnection {
            EventKind::Reconnected
        } else {
            EventKind::Connected
        };
        self.set_state(ConnectionState::Connected, Some(LifecycleEvent::new(kind)));

        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    fn handle_transport_loss(&mut self, reason: &str) {
        // Drop the dead handle first so the loop stops polling it
        self.link = None;
        if self.state != ConnectionState::Connected {
            return;
        }

        warn!(reason = %reason, "Transport lost");

        let policy = &self.config.reconnect;
        if policy.enabled && policy.max_attempts > 0 {
            self.retry_attempt = 0;
            self.reconnect_at = Some(Instant::now() + policy.delay_for_attempt(0));
            self.set_state(
                ConnectionState::Reconnecting,
                Some(LifecycleEvent::with_payload(
                    EventKind::Disconnected,
                    json!({ "reason": reason }),
                )),
            );
        } else {
            self.enter_error(reason);
        }
    }

    fn schedule_retry_or_fail(&mut self, reason: &str) {
        let policy = &self.config.reconnect;
        let recoverable =
            policy.enabled && policy.max_attempts > 0 && self.retry_attempt < policy.max_attempts;

        if recoverable {
            let delay = policy.delay_for_attempt(self.retry_attempt);
            self.reconnect_at = Some(Instant::now() + delay);
            if self.state != ConnectionState::Reconnecting {
                self.set_state(ConnectionState::Reconnecting, None);
            }
            debug!(attempt = self.retry_attempt, delay_ms = delay.as_millis() as u64, "Retry scheduled");
        } else {
            self.enter_error(reason);
        }
    }

    /// Terminal failure: every pending request and every room fails
    /// explicitly. There is no silent drop.
    fn enter_error(&mut self, reason: &str) {
        self.link = None;
        self.reconnect_at = None;

        for (id, pending) in self.tracker.drain_all() {
            self.fail_pending(id, pending, Error::connection_lost(reason.to_string()));
        }
        self.queue.drain_all();
        self.mirror_pending();

        let rooms = self
            .registry
            .fail_all(&Error::connection_lost(reason.to_string()));
        if rooms > 0 {
            self.dispatch(LifecycleEvent::with_payload(
                EventKind::SubscriptionLost,
                json!({ "rooms": rooms, "reason": reason }),
            ));
        }

        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(Error::connection_lost(reason.to_string())));
        }

        self.set_state(
            ConnectionState::Error,
            Some(LifecycleEvent::with_payload(
                EventKind::Disconnected,
                json!({ "reason": reason, "terminal": true }),
            )),
        );
    }

    /// Explicit close: cancel everything in one pass, then park in
    /// `Disconnected`.
    fn teardown(&mut self) {
        self.link = None;
        self.reconnect_at = None;

        for (_, pending) in self.tracker.drain_all() {
            match pending.action {
                PendingAction::Respond(tx) => {
                    let _ = tx.send(Err(Error::SessionClosed));
                }
                PendingAction::Subscribe { .. }
                | PendingAction::Resubscribe { .. }
                | PendingAction::Unsubscribe => {}
            }
        }
        self.queue.drain_all();
        self.registry.close_all();
        self.mirror_pending();

        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(Error::SessionClosed));
        }

        self.set_state(
            ConnectionState::Disconnected,
            Some(LifecycleEvent::with_payload(
                EventKind::Disconnected,
                json!({ "reason": "session closed" }),
            )),
        );
    }

    // ========================================================================
    // Inbound Frames
    // ========================================================================

    fn handle_frame(&mut self, text: &str) {
        match InboundFrame::parse(text) {
            Ok(InboundFrame::Response(response)) => self.handle_response(response),
            Ok(InboundFrame::Notification(notification)) => {
                let delivered = self.registry.route_notification(&notification);
                if delivered == 0 {
                    debug!(room = %notification.room, "Notification for unknown room discarded");
                }
            }
            Err(e) => {
                // Malformed frames never crash the session
                warn!(error = %e, "Inbound frame discarded");
            }
        }
    }

    fn handle_response(&mut self, response: Response) {
        if response.is_token_expired() {
            self.dispatch(LifecycleEvent::with_payload(
                EventKind::TokenExpired,
                json!({ "requestId": response.id }),
            ));
        }

        let Some(pending) = self.tracker.complete(response.id) else {
            debug!(request_id = %response.id, "Reply for unknown request discarded");
            return;
        };
        self.mirror_pending();

        match pending.action {
            PendingAction::Respond(tx) => {
                let outcome = if response.is_success() {
                    Ok(response)
                } else {
                    let message = response
                        .error
                        .map(|e| e.message)
                        .unwrap_or_else(|| "unknown error".to_string());
                    Err(Error::protocol(message))
                };
                let _ = tx.send(outcome);
            }
            PendingAction::Subscribe { key } => {
                self.registry
                    .complete_subscribe(&key, room_id_from(response));
            }
            PendingAction::Resubscribe { key } => {
                let lost = self
                    .registry
                    .complete_resubscribe(&key, room_id_from(response));
                self.report_lost_room(lost);
            }
            PendingAction::Unsubscribe => {
                if response.is_error() {
                    debug!(request_id = %response.id, "Unsubscribe rejected by backend");
                }
            }
        }
    }

    // ========================================================================
    // Timeouts
    // ========================================================================

    fn sweep_timeouts(&mut self) {
        let expired = self.tracker.sweep(Instant::now());
        if expired.is_empty() {
            return;
        }
        self.mirror_pending();

        for (id, pending) in expired {
            let err = Error::timeout(id, pending.timeout_ms);
            debug!(request_id = %id, action = pending.action.tag(), "Request timed out");
            self.fail_pending(id, pending, err);
        }
    }

    /// Routes a failure into whatever the pending entry was for.
    fn fail_pending(&mut self, id: RequestId, pending: Pending, err: Error) {
        match pending.action {
            PendingAction::Respond(tx) => {
                let timed_out = err.is_timeout();
                let _ = tx.send(Err(err));
                if timed_out {
                    self.dispatch(LifecycleEvent::with_payload(
                        EventKind::RequestTimeout,
                        json!({ "requestId": id }),
                    ));
                }
            }
            PendingAction::Subscribe { key } => {
                self.registry.complete_subscribe(&key, Err(err));
            }
            PendingAction::Resubscribe { key } => {
                let lost = self.registry.complete_resubscribe(&key, Err(err));
                self.report_lost_room(lost);
            }
            PendingAction::Unsubscribe => {}
        }
    }

    // ========================================================================
    // Outbound Helpers
    // ========================================================================

    /// Issues a subscribe request for a room being established or renewed.
    fn issue_subscribe(&mut self, key: RoomKey, filter: Value, renewal: bool) {
        let envelope = Envelope::new("realtime", "subscribe").with_body(filter);
        let request = Request::new(envelope);
        let frame = match serde_json::to_string(&request) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Subscribe envelope failed to serialize");
                self.registry
                    .complete_subscribe(&key, Err(Error::Json(e)));
                return;
            }
        };

        let action = if renewal {
            PendingAction::Resubscribe { key: key.clone() }
        } else {
            PendingAction::Subscribe { key: key.clone() }
        };
        self.tracker
            .insert(request.id, action, Instant::now() + self.config.request_timeout);
        self.registry.set_room_request(&key, request.id);
        self.mirror_pending();
        self.write_frame(&frame);

        trace!(request_id = %request.id, renewal, "Subscribe request sent");
    }

    /// Issues a best-effort unsubscribe; the local room is already gone.
    fn issue_unsubscribe(&mut self, room_id: &RoomId) {
        if self.state != ConnectionState::Connected {
            return;
        }

        let envelope =
            Envelope::new("realtime", "unsubscribe").with_body(json!({ "roomId": room_id }));
        let request = Request::new(envelope);
        let Ok(frame) = serde_json::to_string(&request) else {
            return;
        };

        self.tracker.insert(
            request.id,
            PendingAction::Unsubscribe,
            Instant::now() + self.config.request_timeout,
        );
        self.mirror_pending();
        self.write_frame(&frame);

        trace!(room = %room_id, "Unsubscribe request sent");
    }

    fn write_frame(&mut self, frame: &str) {
        if let Some(link) = &self.link {
            // A failed write means the transport just died; the Closed
            // event on the inbound side drives recovery
            let _ = link.outbound.send(frame.to_string());
        }
    }

    // ========================================================================
    // State & Events
    // ========================================================================

    /// Applies a state transition and dispatches its lifecycle event.
    ///
    /// Events are emitted only from here and from `dispatch`, both of
    /// which run on the actor task: listeners never run re-entrantly
    /// inside a caller's `send` or `subscribe`.
    fn set_state(&mut self, state: ConnectionState, event: Option<LifecycleEvent>) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "State transition");
        }
        self.state = state;
        *self.shared.state.lock() = state;

        if let Some(event) = event {
            self.dispatch(event);
        }
    }

    fn dispatch(&mut self, event: LifecycleEvent) {
        let failed = self.emitter.emit(&event);
        for id in failed {
            warn!(listener = %id, kind = %event.kind, "Lifecycle listener panicked");
        }
    }

    fn report_lost_room(&mut self, lost: Option<super::registry::LostRoom>) {
        if let Some(lost) = lost {
            warn!(handles = lost.handle_ids.len(), "Room lost during replay");
            self.dispatch(LifecycleEvent::with_payload(
                EventKind::SubscriptionLost,
                json!({
                    "filter": lost.filter,
                    "handles": lost.handle_ids,
                }),
            ));
        }
    }

    fn mirror_pending(&self) {
        self.shared
            .pending
            .store(self.tracker.len(), Ordering::Relaxed);
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Extracts the server-assigned room id from a subscribe ack.
fn room_id_from(response: Response) -> Result<RoomId> {
    let result = response.into_result()?;
    result
        .get("roomId")
        .and_then(|v| v.as_str())
        .map(RoomId::new)
        .ok_or_else(|| Error::protocol("subscribe ack missing roomId"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }

    #[test]
    fn test_state_terminal() {
        assert!(ConnectionState::Error.is_terminal());
        assert!(!ConnectionState::Disconnected.is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
    }

    #[test]
    fn test_room_id_extraction() {
        let response: Response = serde_json::from_str(
            r#"{
                "requestId": "550e8400-e29b-41d4-a716-446655440000",
                "status": "success",
                "result": {"roomId": "room-11"}
            }"#,
        )
        .expect("parse");

        let room_id = room_id_from(response).expect("room id");
        assert_eq!(room_id.as_str(), "room-11");
    }

    #[test]
    fn test_room_id_missing_is_protocol_error() {
        let response: Response = serde_json::from_str(
            r#"{
                "requestId": "550e8400-e29b-41d4-a716-446655440000",
                "status": "success",
                "result": {}
            }"#,
        )
        .expect("parse");

        assert!(matches!(
            room_id_from(response),
            Err(Error::Protocol { .. })
        ));
    }
}
