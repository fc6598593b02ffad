//! Request envelope and outbound frame types.
//!
//! An [`Envelope`] names a backend operation (`controller.action`) with an
//! optional resource qualifier (index/collection) and a JSON body. The
//! session never inspects the body; resource wrappers build envelopes and
//! hand them to [`Session::send`](crate::Session::send).

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::RequestId;

// ============================================================================
// Envelope
// ============================================================================

/// An opaque request payload: target operation plus arguments.
///
/// # Format
///
/// ```json
/// {
///   "controller": "document",
///   "action": "create",
///   "index": "main",
///   "collection": "users",
///   "body": { ... }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Target controller on the backend.
    pub controller: String,

    /// Action within the controller.
    pub action: String,

    /// Optional index qualifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,

    /// Optional collection qualifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,

    /// Operation arguments.
    #[serde(default)]
    pub body: Value,
}

impl Envelope {
    /// Creates an envelope targeting `controller.action` with a null body.
    #[inline]
    #[must_use]
    pub fn new(controller: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
            action: action.into(),
            index: None,
            collection: None,
            body: Value::Null,
        }
    }

    /// Sets the request body.
    #[inline]
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    /// Sets the index qualifier.
    #[inline]
    #[must_use]
    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Sets the collection qualifier.
    #[inline]
    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Returns the `controller.action` pair for logging.
    #[inline]
    #[must_use]
    pub fn method(&self) -> String {
        format!("{}.{}", self.controller, self.action)
    }
}

// ============================================================================
// Request
// ============================================================================

/// An outbound frame: correlation id plus envelope.
///
/// # Format
///
/// ```json
/// {
///   "requestId": "uuid",
///   "controller": "realtime",
///   "action": "subscribe",
///   "body": { ... }
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    /// Unique identifier for request/response correlation.
    #[serde(rename = "requestId")]
    pub id: RequestId,

    /// The operation being performed.
    #[serde(flatten)]
    pub envelope: Envelope,
}

impl Request {
    /// Creates a request with an auto-generated correlation id.
    #[inline]
    #[must_use]
    pub fn new(envelope: Envelope) -> Self {
        Self {
            id: RequestId::generate(),
            envelope,
        }
    }

    /// Creates a request with a specific correlation id.
    #[inline]
    #[must_use]
    pub fn with_id(id: RequestId, envelope: Envelope) -> Self {
        Self { id, envelope }
    }
}

// ============================================================================
// Tests
// ============================================================================
