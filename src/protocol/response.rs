//! Response frame types.
//!
//! A response answers exactly one request, matched by `requestId`. The
//! outcome marker is the `status` field; error responses carry a structured
//! [`ErrorPayload`].

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

// ============================================================================
// Constants
// ============================================================================

/// Error code marking an expired authentication token.
///
/// A response carrying this code additionally raises a token-expired
/// lifecycle event so the application can reauthenticate.
pub const TOKEN_EXPIRED_CODE: &str = "security.token.expired";

// ============================================================================
// Response
// ============================================================================

/// A reply from the backend to one request.
///
/// # Format
///
/// Success:
/// ```json
/// {
///   "requestId": "uuid",
///   "status": "success",
///   "result": { ... }
/// }
/// ```
///
/// Error:
/// ```json
/// {
///   "requestId": "uuid",
///   "status": "error",
///   "error": { "code": "...", "message": "..." }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    /// Matches the request's `requestId`.
    #[serde(rename = "requestId")]
    pub id: RequestId,

    /// Outcome marker.
    pub status: ResponseStatus,

    /// Result data (if success).
    #[serde(default)]
    pub result: Option<Value>,

    /// Error details (if error).
    #[serde(default)]
    pub error: Option<ErrorPayload>,
}

impl Response {
    /// Returns `true` if this is a success response.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Returns `true` if this is an error response.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status == ResponseStatus::Error
    }

    /// Returns `true` if this response reports an expired token.
    #[inline]
    #[must_use]
    pub fn is_token_expired(&self) -> bool {
        self.error
            .as_ref()
            .and_then(|e| e.code.as_deref())
            .is_some_and(|code| code == TOKEN_EXPIRED_CODE)
    }

    /// Extracts the result value, converting error responses to [`Error`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] carrying the backend's error message
    /// if the response was an error.
    pub fn into_result(self) -> Result<Value> {
        match self.status {
            ResponseStatus::Success => Ok(self.result.unwrap_or(Value::Null)),
            ResponseStatus::Error => {
                let message = self
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "unknown error".to_string());
                Err(Error::protocol(message))
            }
        }
    }

    /// Gets a string value from the result.
    ///
    /// Returns empty string if key not found or not a string.
    #[inline]
    #[must_use]
    pub fn get_string(&self, key: &str) -> String {
        self.result
            .as_ref()
            .and_then(|v| v.get(key))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }
}

// ============================================================================
// ResponseStatus
// ============================================================================

/// Response outcome discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// Successful response.
    Success,
    /// Error response.
    Error,
}

// ============================================================================
// ErrorPayload
// ============================================================================

/// Structured error details in an error response.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
    /// Machine-readable error code.
    #[serde(default)]
    pub code: Option<String>,

    /// Human-readable error message.
    pub message: String,
}

// ============================================================================
// Tests
// ============================================================================
