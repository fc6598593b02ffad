//! Notification frames and inbound frame classification.
//!
//! Notifications are pushed by the backend for active rooms; they carry no
//! `requestId` and are routed to local listeners by room id.

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::RoomId;

// ============================================================================
// Notification
// ============================================================================

/// A realtime event for one room.
///
/// # Format
///
/// ```json
/// {
///   "room": "room-id",
///   "scope": "in",
///   "payload": { ... }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    /// Room this notification belongs to.
    pub room: RoomId,

    /// Whether the document entered or left the filter scope.
    #[serde(default)]
    pub scope: Option<String>,

    /// Event payload, delivered verbatim to listeners.
    #[serde(default)]
    pub payload: Value,
}

// ============================================================================
// InboundFrame
// ============================================================================

/// Classification of one inbound text frame.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// A reply to a pending request.
    Response(super::Response),

    /// A realtime event for a room.
    Notification(Notification),
}

impl InboundFrame {
    /// Parses an inbound text frame.
    ///
    /// A frame with a `requestId` and `status` is a response; a frame with
    /// a `room` is a notification.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the text is not valid JSON or matches
    /// neither shape. The session logs and discards such frames.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::protocol(format!("invalid JSON frame: {e}")))?;

        if value.get("requestId").is_some() && value.get("status").is_some() {
            let response = serde_json::from_value(value)
                .map_err(|e| Error::protocol(format!("malformed response frame: {e}")))?;
            return Ok(Self::Response(response));
        }

        if value.get("room").is_some() {
            let notification = serde_json::from_value(value)
                .map_err(|e| Error::protocol(format!("malformed notification frame: {e}")))?;
            return Ok(Self::Notification(notification));
        }

        Err(Error::protocol("unclassifiable inbound frame"))
    }
}

// ============================================================================
// Tests
// ============================================================================
