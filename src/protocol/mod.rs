//! Wire message types.
//!
//! Defines the JSON frame formats exchanged with the backend. Three frame
//! shapes exist on the wire:
//!
//! | Frame | Direction | Keyed by |
//! |-------|-----------|----------|
//! | [`Request`] | outbound | `requestId` |
//! | [`Response`] | inbound | `requestId` |
//! | [`Notification`] | inbound | `room` |
//!
//! Inbound text is classified by [`InboundFrame::parse`]: anything carrying
//! a `requestId` plus a `status` is a response, anything carrying a `room`
//! is a notification, everything else is a protocol error (discarded by the
//! session, never fatal).

// ============================================================================
// Submodules
// ============================================================================

/// Request envelopes and the outbound frame shape.
pub mod envelope;

/// Inbound notification frames and frame classification.
pub mod notification;

/// Inbound response frames.
pub mod response;

// ============================================================================
// Re-exports
// ============================================================================

pub use envelope::{Envelope, Request};
pub use notification::{InboundFrame, Notification};
pub use response::{ErrorPayload, Response, ResponseStatus};
