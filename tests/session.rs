//! End-to-end session behavior against a scripted in-memory transport.
//!
//! The mock transport exposes the test side of every opened channel, so
//! tests can read the frames the session writes, inject replies and
//! notifications, and drop the link to exercise reconnection.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc};

use roomlink::{
    ConnectionState, Envelope, Error, EventKind, QueuePolicy, ReconnectPolicy, Result, SendOptions,
    Session, SessionConfig, Transport, TransportEvent, TransportHandle,
};

/// Opt-in log output for test debugging (`RUST_LOG=roomlink=trace`).
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Mock Transport
// ============================================================================

/// Test side of one opened channel.
struct TestLink {
    /// Frames the session wrote.
    from_session: mpsc::UnboundedReceiver<String>,

    /// Injects frames and close signals into the session.
    to_session: mpsc::UnboundedSender<TransportEvent>,
}

impl TestLink {
    /// Reads the next outbound frame as JSON.
    async fn next_frame(&mut self) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(5), self.from_session.recv())
            .await
            .expect("timed out waiting for outbound frame")
            .expect("session dropped the link");
        serde_json::from_str(&text).expect("outbound frame is JSON")
    }

    /// Asserts that no outbound frame is waiting.
    async fn assert_no_frame(&mut self) {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert!(
            self.from_session.try_recv().is_err(),
            "unexpected outbound frame"
        );
    }

    /// Injects one inbound text frame.
    fn inject(&self, text: String) {
        self.to_session
            .send(TransportEvent::Frame(text))
            .expect("session gone");
    }

    /// Simulates a transport drop.
    fn drop_connection(&self) {
        let _ = self.to_session.send(TransportEvent::Closed {
            reason: "simulated drop".to_string(),
        });
    }
}

#[derive(Default)]
struct MockCtl {
    /// Upcoming opens to fail before succeeding again.
    fail_opens: AtomicUsize,

    /// Successful opens so far.
    opens: AtomicUsize,

    /// Test side of the most recent open, until claimed.
    link: Mutex<Option<TestLink>>,

    /// Signaled on every successful open.
    ready: Notify,
}

/// Transport whose every channel is driven by the test.
#[derive(Clone, Default)]
struct MockTransport {
    ctl: Arc<MockCtl>,
}

impl MockTransport {
    fn new() -> Self {
        init_logging();
        Self::default()
    }

    fn fail_next_opens(&self, count: usize) {
        self.ctl.fail_opens.store(count, Ordering::SeqCst);
    }

    fn open_count(&self) -> usize {
        self.ctl.opens.load(Ordering::SeqCst)
    }

    /// Waits for the session to open a channel and claims its test side.
    async fn take_link(&self) -> TestLink {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(link) = self.ctl.link.lock().take() {
                    return link;
                }
                self.ctl.ready.notified().await;
            }
        })
        .await
        .expect("timed out waiting for transport open")
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self) -> Result<TransportHandle> {
        let remaining = self.ctl.fail_opens.load(Ordering::SeqCst);
        if remaining > 0 {
            self.ctl.fail_opens.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::connection_lost("mock open refused"));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        *self.ctl.link.lock() = Some(TestLink {
            from_session: out_rx,
            to_session: in_tx,
        });
        self.ctl.opens.fetch_add(1, Ordering::SeqCst);
        self.ctl.ready.notify_one();

        Ok(TransportHandle::new(out_tx, in_rx))
    }
}

// ============================================================================
// Frame Builders
// ============================================================================

fn success_reply(frame: &Value, result: Value) -> String {
    json!({
        "requestId": frame["requestId"],
        "status": "success",
        "result": result,
    })
    .to_string()
}

fn error_reply(frame: &Value, code: &str, message: &str) -> String {
    json!({
        "requestId": frame["requestId"],
        "status": "error",
        "error": { "code": code, "message": message },
    })
    .to_string()
}

fn notification(room: &str, payload: Value) -> String {
    json!({ "room": room, "scope": "in", "payload": payload }).to_string()
}

// ============================================================================
// Harness Helpers
// ============================================================================

fn fast_config() -> SessionConfig {
    SessionConfig::new()
        .with_request_timeout(Duration::from_secs(5))
        .with_sweep_interval(Duration::from_millis(10))
        .with_reconnect(
            ReconnectPolicy::new()
                .with_base_delay(Duration::from_millis(20))
                .with_max_attempts(5),
        )
}

/// Spawns a session, connects it, and returns the live link.
async fn connected_session(config: SessionConfig) -> (Session, MockTransport, TestLink) {
    let transport = MockTransport::new();
    let session = Session::spawn(transport.clone(), config);
    session.connect().await.expect("connect");
    let link = transport.take_link().await;
    (session, transport, link)
}

/// Records lifecycle events of one kind.
async fn record_events(session: &Session, kind: EventKind) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let clone = Arc::clone(&counter);
    session
        .add_listener(kind, move |_| {
            clone.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .expect("add listener");
    counter
}

/// Subscribes and acknowledges the room in one step.
async fn subscribe_acked<F>(
    session: &Session,
    link: &mut TestLink,
    filter: Value,
    room: &str,
    listener: F,
) -> roomlink::SubscriptionHandle
where
    F: Fn(&roomlink::Notification) + Send + Sync + 'static,
{
    let sess = session.clone();
    let task = tokio::spawn(async move { sess.subscribe(filter, listener).await });

    let frame = link.next_frame().await;
    assert_eq!(frame["controller"], "realtime");
    assert_eq!(frame["action"], "subscribe");
    link.inject(success_reply(&frame, json!({ "roomId": room })));

    task.await.expect("join").expect("subscribe")
}

fn counting_listener(counter: Arc<AtomicUsize>) -> impl Fn(&roomlink::Notification) + Send + Sync {
    move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Request/Response
// ============================================================================

#[tokio::test]
async fn send_resolves_with_reply_and_discards_duplicates() {
    let (session, _transport, mut link) = connected_session(fast_config()).await;

    let sess = session.clone();
    let task = tokio::spawn(async move { sess.send(Envelope::new("server", "now")).await });

    let frame = link.next_frame().await;
    assert_eq!(frame["controller"], "server");
    assert_eq!(frame["action"], "now");

    link.inject(success_reply(&frame, json!({ "now": 1234 })));
    let response = task.await.expect("join").expect("send");
    assert!(response.is_success());
    assert_eq!(session.pending_count(), 0);

    // A duplicate reply for the same request is discarded without effect
    link.inject(success_reply(&frame, json!({ "now": 9999 })));
    link.assert_no_frame().await;
    assert_eq!(session.pending_count(), 0);
}

#[tokio::test]
async fn error_status_resolves_the_error_branch() {
    let (session, _transport, mut link) = connected_session(fast_config()).await;

    let sess = session.clone();
    let task = tokio::spawn(async move { sess.send(Envelope::new("document", "get")).await });

    let frame = link.next_frame().await;
    link.inject(error_reply(&frame, "document.not_found", "No such document"));

    let err = task.await.expect("join").unwrap_err();
    assert_eq!(err.to_string(), "Protocol error: No such document");
}

#[tokio::test(start_paused = true)]
async fn send_times_out_and_late_reply_is_discarded() {
    let (session, _transport, mut link) = connected_session(fast_config()).await;
    let timeouts = record_events(&session, EventKind::RequestTimeout).await;

    let sess = session.clone();
    let task = tokio::spawn(async move {
        sess.send_with_options(
            Envelope::new("server", "now"),
            SendOptions::new().with_timeout(Duration::from_millis(100)),
        )
        .await
    });

    let frame = link.next_frame().await;

    // No reply: the sweep fires the timeout
    let err = task.await.expect("join").unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(timeouts.load(Ordering::SeqCst), 1);

    // The reply arriving after the timeout is discarded without effect
    link.inject(success_reply(&frame, json!({})));
    link.assert_no_frame().await;
    assert_eq!(session.pending_count(), 0);
}

#[tokio::test]
async fn close_fails_pending_request_with_session_closed() {
    let (session, _transport, mut link) = connected_session(fast_config()).await;

    let sess = session.clone();
    let task = tokio::spawn(async move { sess.send(Envelope::new("server", "now")).await });

    // Wait until the request is in flight, then close before any reply
    let _frame = link.next_frame().await;
    session.close().await;

    let err = task.await.expect("join").unwrap_err();
    assert!(matches!(err, Error::SessionClosed));
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn fail_fast_send_while_disconnected() {
    let transport = MockTransport::new();
    let session = Session::spawn(transport, fast_config());

    let err = session
        .send_with_options(Envelope::new("server", "now"), SendOptions::new().fail_fast())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotConnected));
}

#[tokio::test]
async fn offline_queue_flushes_in_submission_order() {
    let transport = MockTransport::new();
    let session = Session::spawn(transport.clone(), fast_config());

    // Queue two requests before any connection exists, in a fixed order
    let sess_a = session.clone();
    let task_a = tokio::spawn(async move { sess_a.send(Envelope::new("server", "first")).await });
    while session.pending_count() < 1 {
        tokio::task::yield_now().await;
    }
    let sess_b = session.clone();
    let task_b = tokio::spawn(async move { sess_b.send(Envelope::new("server", "second")).await });
    while session.pending_count() < 2 {
        tokio::task::yield_now().await;
    }

    session.connect().await.expect("connect");
    let mut link = transport.take_link().await;

    let first = link.next_frame().await;
    assert_eq!(first["action"], "first");
    let second = link.next_frame().await;
    assert_eq!(second["action"], "second");

    link.inject(success_reply(&first, json!({})));
    link.inject(success_reply(&second, json!({})));
    assert!(task_a.await.expect("join").is_ok());
    assert!(task_b.await.expect("join").is_ok());
}

#[tokio::test(start_paused = true)]
async fn queued_request_expires_at_flush_after_ttl() {
    let config = fast_config().with_queue(QueuePolicy::new().with_ttl(Duration::from_millis(500)));
    let transport = MockTransport::new();
    let session = Session::spawn(transport.clone(), config);
    let timeouts = record_events(&session, EventKind::RequestTimeout).await;

    let sess = session.clone();
    let task = tokio::spawn(async move { sess.send(Envelope::new("server", "now")).await });
    while session.pending_count() < 1 {
        tokio::task::yield_now().await;
    }

    // The envelope outlives the queue TTL before the connection comes up
    tokio::time::advance(Duration::from_secs(1)).await;

    session.connect().await.expect("connect");
    let mut link = transport.take_link().await;

    let err = task.await.expect("join").unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(timeouts.load(Ordering::SeqCst), 1);
    assert_eq!(session.pending_count(), 0);

    // The expired envelope is never transmitted
    link.assert_no_frame().await;
}

#[tokio::test]
async fn zero_sweep_interval_does_not_kill_the_actor() {
    let mut config = fast_config();
    config.sweep_interval = Duration::ZERO;

    let transport = MockTransport::new();
    let session = Session::spawn(transport.clone(), config);
    session.connect().await.expect("connect");
    let mut link = transport.take_link().await;

    let sess = session.clone();
    let task = tokio::spawn(async move { sess.send(Envelope::new("server", "now")).await });
    let frame = link.next_frame().await;
    link.inject(success_reply(&frame, json!({})));
    assert!(task.await.expect("join").is_ok());
}

#[tokio::test]
async fn bounded_queue_rejects_overflow() {
    let config = fast_config().with_queue(QueuePolicy::new().with_max_len(1));
    let transport = MockTransport::new();
    let session = Session::spawn(transport, config);

    let sess = session.clone();
    let _queued = tokio::spawn(async move { sess.send(Envelope::new("server", "a")).await });
    while session.pending_count() < 1 {
        tokio::task::yield_now().await;
    }

    let err = session.send(Envelope::new("server", "b")).await.unwrap_err();
    assert!(matches!(err, Error::QueueFull { capacity: 1 }));
}

#[tokio::test]
async fn token_expired_reply_raises_lifecycle_event() {
    let (session, _transport, mut link) = connected_session(fast_config()).await;
    let expirations = record_events(&session, EventKind::TokenExpired).await;

    let sess = session.clone();
    let task = tokio::spawn(async move { sess.send(Envelope::new("auth", "check")).await });

    let frame = link.next_frame().await;
    link.inject(error_reply(
        &frame,
        "security.token.expired",
        "Token expired",
    ));

    assert!(task.await.expect("join").is_err());
    assert_eq!(expirations.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Subscriptions
// ============================================================================

#[tokio::test]
async fn identical_filters_share_one_room() {
    let (session, _transport, mut link) = connected_session(fast_config()).await;
    let filter = json!({"term": {"status": "open"}});

    let first_hits = Arc::new(AtomicUsize::new(0));
    let second_hits = Arc::new(AtomicUsize::new(0));

    let _h1 = subscribe_acked(
        &session,
        &mut link,
        filter.clone(),
        "room-1",
        counting_listener(Arc::clone(&first_hits)),
    )
    .await;

    // Second identical subscribe: no outbound request at all
    let _h2 = session
        .subscribe(filter, counting_listener(Arc::clone(&second_hits)))
        .await
        .expect("subscribe");
    link.assert_no_frame().await;

    // One notification reaches both handles
    link.inject(notification("room-1", json!({"_id": "doc-1"})));
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert_eq!(first_hits.load(Ordering::SeqCst), 1);
    assert_eq!(second_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn last_unsubscribe_destroys_room_and_next_subscribe_is_fresh() {
    let (session, _transport, mut link) = connected_session(fast_config()).await;
    let filter = json!({"exists": "assignee"});

    let handle = subscribe_acked(&session, &mut link, filter.clone(), "room-2", |_| {}).await;

    let sess = session.clone();
    let task = tokio::spawn(async move { sess.unsubscribe(handle).await });

    let frame = link.next_frame().await;
    assert_eq!(frame["action"], "unsubscribe");
    assert_eq!(frame["body"]["roomId"], "room-2");
    link.inject(success_reply(&frame, json!({})));
    task.await.expect("join").expect("unsubscribe");

    // Notifications for the dead room are silently discarded
    link.inject(notification("room-2", json!({})));
    link.assert_no_frame().await;

    // Same filter again: a brand new subscribe request goes out
    let _handle = subscribe_acked(&session, &mut link, filter, "room-3", |_| {}).await;
}

#[tokio::test]
async fn rejected_subscribe_creates_nothing() {
    let (session, _transport, mut link) = connected_session(fast_config()).await;

    let sess = session.clone();
    let task = tokio::spawn(async move { sess.subscribe(json!({"bad": true}), |_| {}).await });

    let frame = link.next_frame().await;
    link.inject(error_reply(&frame, "realtime.invalid_filter", "Bad filter"));

    assert!(task.await.expect("join").is_err());

    // The filter was not cached: trying again issues a new request
    let sess = session.clone();
    let task = tokio::spawn(async move { sess.subscribe(json!({"bad": true}), |_| {}).await });
    let frame = link.next_frame().await;
    link.inject(success_reply(&frame, json!({ "roomId": "room-4" })));
    assert!(task.await.expect("join").is_ok());
}

#[tokio::test(start_paused = true)]
async fn deferred_subscription_flushes_on_connect() {
    let transport = MockTransport::new();
    let session = Session::spawn(transport.clone(), fast_config());

    let hits = Arc::new(AtomicUsize::new(0));
    let sess = session.clone();
    let listener = counting_listener(Arc::clone(&hits));
    let task = tokio::spawn(async move { sess.subscribe(json!({"deferred": 1}), listener).await });

    // Nothing happens while disconnected
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert!(!task.is_finished());

    session.connect().await.expect("connect");
    let mut link = transport.take_link().await;

    // The deferred subscription turns into a real subscribe request
    let frame = link.next_frame().await;
    assert_eq!(frame["action"], "subscribe");
    link.inject(success_reply(&frame, json!({ "roomId": "room-5" })));
    task.await.expect("join").expect("subscribe");

    link.inject(notification("room-5", json!({})));
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Reconnection
// ============================================================================

#[tokio::test(start_paused = true)]
async fn reconnect_replays_rooms_and_preserves_listeners() {
    let (session, transport, mut link) = connected_session(fast_config()).await;
    let reconnects = record_events(&session, EventKind::Reconnected).await;
    let hits = Arc::new(AtomicUsize::new(0));

    let _handle = subscribe_acked(
        &session,
        &mut link,
        json!({"watched": true}),
        "room-old",
        counting_listener(Arc::clone(&hits)),
    )
    .await;

    link.drop_connection();
    let mut link = transport.take_link().await;

    // Exactly one replay subscribe, answered with a new room id
    let frame = link.next_frame().await;
    assert_eq!(frame["action"], "subscribe");
    link.inject(success_reply(&frame, json!({ "roomId": "room-new" })));
    link.assert_no_frame().await;

    // The original listener receives under the new room id without any
    // re-registration by the caller
    link.inject(notification("room-new", json!({})));
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(reconnects.load(Ordering::SeqCst), 1);

    // The old room id no longer routes
    link.inject(notification("room-old", json!({})));
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_replay_destroys_room_and_reports_loss() {
    let (session, transport, mut link) = connected_session(fast_config()).await;
    let losses = record_events(&session, EventKind::SubscriptionLost).await;

    let _handle = subscribe_acked(&session, &mut link, json!({"fragile": 1}), "room-6", |_| {}).await;

    link.drop_connection();
    let mut link = transport.take_link().await;

    let frame = link.next_frame().await;
    link.inject(error_reply(&frame, "realtime.denied", "Replay refused"));

    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert_eq!(losses.load(Ordering::SeqCst), 1);

    // The destroyed room is gone: the same filter subscribes from scratch
    let _handle = subscribe_acked(&session, &mut link, json!({"fragile": 1}), "room-7", |_| {}).await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_succeeds_on_third_attempt_with_one_event() {
    let (session, transport, link) = connected_session(fast_config()).await;
    let connected = record_events(&session, EventKind::Connected).await;
    let reconnected = record_events(&session, EventKind::Reconnected).await;
    let disconnected = record_events(&session, EventKind::Disconnected).await;

    transport.fail_next_opens(2);
    link.drop_connection();

    // The session passes through reconnecting while retrying
    while session.state() != ConnectionState::Reconnecting {
        tokio::task::yield_now().await;
    }

    let _link = transport.take_link().await;
    while session.state() != ConnectionState::Connected {
        tokio::task::yield_now().await;
    }

    // Two opens succeeded overall: the initial connect and the final retry
    assert_eq!(transport.open_count(), 2);
    assert_eq!(connected.load(Ordering::SeqCst), 0); // registered after connect
    assert_eq!(reconnected.load(Ordering::SeqCst), 1);
    assert_eq!(disconnected.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retry_budget_fails_everything() {
    let config = fast_config().with_reconnect(
        ReconnectPolicy::new()
            .with_base_delay(Duration::from_millis(10))
            .with_max_attempts(2),
    );
    let (session, transport, mut link) = connected_session(config).await;

    let sess = session.clone();
    let task = tokio::spawn(async move { sess.send(Envelope::new("server", "now")).await });
    let _frame = link.next_frame().await;

    transport.fail_next_opens(usize::MAX);
    link.drop_connection();

    // The pending request fails explicitly once the budget is exhausted
    let err = task.await.expect("join").unwrap_err();
    assert!(matches!(err, Error::ConnectionLost { .. }));

    while session.state() != ConnectionState::Error {
        tokio::task::yield_now().await;
    }

    // Terminal state rejects new traffic
    let err = session.send(Envelope::new("server", "now")).await.unwrap_err();
    assert!(matches!(err, Error::ConnectionLost { .. }));
}

#[tokio::test]
async fn disabled_reconnect_goes_terminal_on_drop() {
    let config = fast_config().with_reconnect(ReconnectPolicy::disabled());
    let (session, _transport, link) = connected_session(config).await;

    link.drop_connection();
    while session.state() != ConnectionState::Error {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Lifecycle Events
// ============================================================================

#[tokio::test]
async fn connected_event_fires_once_on_first_connect() {
    let transport = MockTransport::new();
    let session = Session::spawn(transport.clone(), fast_config());
    let connected = record_events(&session, EventKind::Connected).await;

    session.connect().await.expect("connect");
    let _link = transport.take_link().await;

    assert_eq!(connected.load(Ordering::SeqCst), 1);

    // Connecting again while connected is a no-op
    session.connect().await.expect("connect");
    assert_eq!(connected.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn remove_listener_stops_delivery() {
    let transport = MockTransport::new();
    let session = Session::spawn(transport.clone(), fast_config());

    let counter = Arc::new(AtomicUsize::new(0));
    let clone = Arc::clone(&counter);
    let id = session
        .add_listener(EventKind::Connected, move |_| {
            clone.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .expect("add listener");
    session.remove_listener(id);

    session.connect().await.expect("connect");
    let _link = transport.take_link().await;

    assert_eq!(counter.load(Ordering::SeqCst), 0);
}
