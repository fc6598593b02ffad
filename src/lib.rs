//! Roomlink - resilient client session layer for realtime backends.
//!
//! This library maintains one logical connection to a backend over a
//! possibly unreliable socket, multiplexes many independent request/response
//! exchanges and many independent realtime subscriptions over it, and keeps
//! delivery semantics consistent across transport drops.
//!
//! # Guarantees
//!
//! - **Exactly-once completion**: every accepted `send` resolves exactly
//!   once, with the reply, a timeout, or a teardown error. Never zero
//!   times, never twice.
//! - **Subscription multiplexing**: N local listeners on an identical
//!   filter share exactly one server-side room.
//! - **Reconnect replay**: after a transport drop every active room is
//!   resubscribed automatically; listeners keep their identity and keep
//!   receiving without caller intervention.
//!
//! # Quick Start
//!
//! ```no_run
//! use roomlink::{Envelope, Result, Session, SessionConfig};
//! use roomlink::transport::WsTransport;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let transport = WsTransport::new("ws://localhost:7512")?;
//!     let session = Session::spawn(transport, SessionConfig::default());
//!     session.connect().await?;
//!
//!     // One-shot request/response
//!     let envelope = Envelope::new("server", "now");
//!     let response = session.send(envelope).await?;
//!     println!("server time: {}", response.get_string("now"));
//!
//!     // Realtime subscription
//!     let handle = session
//!         .subscribe(json!({"term": {"status": "open"}}), |notification| {
//!             println!("update: {}", notification.payload);
//!         })
//!         .await?;
//!
//!     session.unsubscribe(handle).await?;
//!     session.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire message types |
//! | [`session`] | State machine, correlation, rooms, events |
//! | [`transport`] | Transport seam and the WebSocket implementation |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for session entities.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Wire message types.
///
/// Request envelopes, responses, and notification frames.
pub mod protocol;

/// Session core: state machine, correlation tracker, subscription
/// registry, and lifecycle events.
pub mod session;

/// Transport layer.
///
/// The socket seam under the session, plus the WebSocket implementation.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ListenerId, RequestId, RoomId, SubscriptionId};

// Protocol types
pub use protocol::{Envelope, Notification, Request, Response};

// Session types
pub use session::{
    ConnectionState, EventKind, LifecycleEvent, QueuePolicy, ReconnectPolicy, SendOptions, Session,
    SessionConfig, SubscriptionHandle,
};

// Transport types
pub use transport::{Transport, TransportEvent, TransportHandle};
