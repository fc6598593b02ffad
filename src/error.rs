//! Error types for the session layer.
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use roomlink::{Result, Session};
//!
//! async fn example(session: &Session) -> Result<()> {
//!     let response = session.send(envelope).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Connection | [`Error::ConnectionLost`], [`Error::NotConnected`], [`Error::SessionClosed`] |
//! | Requests | [`Error::Timeout`], [`Error::QueueFull`] |
//! | Subscriptions | [`Error::SubscriptionLost`] |
//! | Protocol | [`Error::Protocol`] |
//! | Configuration | [`Error::Config`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::ChannelClosed`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::RequestId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport dropped and recovery is not possible.
    ///
    /// Returned to pending requests when the retry budget is exhausted
    /// or reconnection is disabled.
    #[error("Connection lost: {message}")]
    ConnectionLost {
        /// Description of how the connection was lost.
        message: String,
    },

    /// Operation requires a live connection and queuing was declined.
    ///
    /// Returned by fail-fast sends while the session is not connected.
    #[error("Not connected")]
    NotConnected,

    /// The session was explicitly closed by the caller.
    ///
    /// Every outstanding request and subscription fails with this
    /// variant during teardown.
    #[error("Session closed")]
    SessionClosed,

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// No reply arrived within the request's timeout budget.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    Timeout {
        /// The request id that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The offline queue is at capacity.
    ///
    /// Returned when a queuable send arrives while disconnected and the
    /// bounded queue cannot accept another envelope.
    #[error("Offline queue full: {capacity} entries")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    // ========================================================================
    // Subscription Errors
    // ========================================================================
    /// A room failed to survive a reconnect replay.
    ///
    /// The room is destroyed; resubscribing is the caller's decision.
    #[error("Subscription lost: {message}")]
    SubscriptionLost {
        /// Description of the lost room.
        message: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed or unmatchable inbound frame.
    ///
    /// Logged and discarded at the frame boundary; never fatal to the
    /// session.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid session configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a connection-lost error.
    #[inline]
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::ConnectionLost {
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::Timeout {
            request_id,
            timeout_ms,
        }
    }

    /// Creates a queue-full error.
    #[inline]
    pub fn queue_full(capacity: usize) -> Self {
        Self::QueueFull { capacity }
    }

    /// Creates a subscription-lost error.
    #[inline]
    pub fn subscription_lost(message: impl Into<String>) -> Self {
        Self::SubscriptionLost {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Rebuilds the error for delivery to multiple waiters.
    ///
    /// Keeps the variant, so predicates like [`is_timeout`](Self::is_timeout)
    /// hold on every copy. Variants wrapping external error types are not
    /// clonable and flatten to [`Error::Protocol`] with their display text.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        match self {
            Self::ConnectionLost { message } => Self::ConnectionLost {
                message: message.clone(),
            },
            Self::NotConnected => Self::NotConnected,
            Self::SessionClosed => Self::SessionClosed,
            Self::Timeout {
                request_id,
                timeout_ms,
            } => Self::Timeout {
                request_id: *request_id,
                timeout_ms: *timeout_ms,
            },
            Self::QueueFull { capacity } => Self::QueueFull {
                capacity: *capacity,
            },
            Self::SubscriptionLost { message } => Self::SubscriptionLost {
                message: message.clone(),
            },
            Self::Protocol { message } => Self::Protocol {
                message: message.clone(),
            },
            Self::Config { message } => Self::Config {
                message: message.clone(),
            },
            Self::Io(_) | Self::Json(_) | Self::WebSocket(_) | Self::ChannelClosed(_) => {
                Self::protocol(self.to_string())
            }
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost { .. } | Self::NotConnected | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error ends the session for the caller.
    ///
    /// Terminal errors mean no further requests will be accepted.
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SessionClosed | Self::ConnectionLost { .. })
    }

    /// Returns `true` if this error may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::NotConnected | Self::QueueFull { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
