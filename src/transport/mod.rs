//! Transport layer: the socket seam under the session.
//!
//! The session never touches a socket directly. It asks a [`Transport`] for
//! a fresh [`TransportHandle`] on every (re)connection attempt, writes text
//! frames into the handle, and reads [`TransportEvent`]s out of it. Old
//! handles are discarded on reconnect, never reused.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                          ┌─────────────────┐
//! │  Session actor  │   TransportHandle        │  WsTransport    │
//! │                 │──── outbound frames ────►│  pump task      │◄──► socket
//! │                 │◄─── TransportEvent ──────│                 │
//! └─────────────────┘                          └─────────────────┘
//! ```
//!
//! Tests substitute an in-memory transport; the production implementation
//! is [`WsTransport`].

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket transport backed by tokio-tungstenite.
pub mod ws;

pub use ws::WsTransport;

// ============================================================================
// TransportEvent
// ============================================================================

/// Inbound signal from one transport handle.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A complete inbound text frame.
    Frame(String),

    /// The channel closed; no further frames will arrive on this handle.
    Closed {
        /// Human-readable close reason.
        reason: String,
    },
}

// ============================================================================
// TransportHandle
// ============================================================================

/// One live duplex channel to the backend.
///
/// Writing to `outbound` after the channel closed is a silent no-op; the
/// session learns about the loss from the `Closed` event instead.
#[derive(Debug)]
pub struct TransportHandle {
    /// Frames to write to the socket, in submission order.
    pub outbound: mpsc::UnboundedSender<String>,

    /// Frames and close signals read from the socket, in arrival order.
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

impl TransportHandle {
    /// Creates a handle from its channel halves.
    #[inline]
    #[must_use]
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self { outbound, inbound }
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Factory for transport handles.
///
/// `open` is called once per connection attempt. Implementations own the
/// actual socket plumbing; the session only sees channels.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens a new channel to the backend.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the channel cannot be established.
    /// The session maps failures into its reconnection policy.
    async fn open(&self) -> Result<TransportHandle>;
}
