//! Session layer: state machine, correlation, rooms, and events.
//!
//! This is the core of the crate. One [`Session`] maintains one logical
//! connection and multiplexes every request and every room subscription
//! over it.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `config` | Timeouts, reconnection policy, queuing policy |
//! | `core` | State machine, actor loop, public [`Session`] handle |
//! | `events` | Lifecycle event emitter |
//! | `queue` | Offline queue for envelopes submitted while disconnected |
//! | `registry` | Rooms, subscription handles, reconnect replay |
//! | `tracker` | Request correlation and timeout expiry |

// ============================================================================
// Submodules
// ============================================================================

/// Session configuration and policies.
pub mod config;

/// State machine, actor loop, and the public session handle.
pub mod core;

/// Lifecycle event emitter.
pub mod events;

/// Offline queue.
pub mod queue;

/// Subscription registry.
pub mod registry;

/// Request correlation tracker.
pub mod tracker;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{QueuePolicy, ReconnectPolicy, SendOptions, SessionConfig};
pub use core::{ConnectionState, Session};
pub use events::{EventKind, LifecycleEvent};
pub use registry::SubscriptionHandle;
