//! Session configuration: timeouts, reconnection, and queuing policy.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use roomlink::{ReconnectPolicy, SessionConfig};
//!
//! let config = SessionConfig::new()
//!     .with_request_timeout(Duration::from_secs(10))
//!     .with_reconnect(ReconnectPolicy::new().with_max_attempts(5));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for one request/response exchange.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between timeout sweep passes.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Smallest accepted sweep interval; the sweep timer needs a nonzero
/// period.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Default delay before the first reconnect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Default cap on the backoff delay.
pub const DEFAULT_MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Default reconnect attempt budget.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Default offline queue capacity (0 = unbounded).
pub const DEFAULT_QUEUE_MAX_LEN: usize = 500;

/// Default lifetime of a queued envelope.
pub const DEFAULT_QUEUE_TTL: Duration = Duration::from_secs(120);

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Controls whether and how the session recovers from transport loss.
///
/// Delays grow exponentially: `base_delay * multiplier^attempt`, capped at
/// `max_delay`. When `max_attempts` consecutive attempts fail the session
/// moves to its terminal error state.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Whether to reconnect at all.
    pub enabled: bool,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff growth factor per failed attempt.
    pub multiplier: f64,

    /// Upper bound on the computed delay.
    pub max_delay: Duration,

    /// Consecutive failed attempts tolerated before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconnectPolicy {
    /// Creates the default policy: enabled, 1s base delay doubling up to
    /// 30s, 10 attempts.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            enabled: true,
            base_delay: DEFAULT_RECONNECT_DELAY,
            multiplier: 2.0,
            max_delay: DEFAULT_MAX_RECONNECT_DELAY,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }

    /// Creates a policy that never reconnects.
    ///
    /// Transport loss immediately fails every pending request.
    #[inline]
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            base_delay: DEFAULT_RECONNECT_DELAY,
            multiplier: 2.0,
            max_delay: DEFAULT_MAX_RECONNECT_DELAY,
            max_attempts: 0,
        }
    }

    /// Sets the base delay.
    #[inline]
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    ///
    /// Non-finite and sub-1.0 values are clamped to 1.0; a shrinking
    /// backoff is never scheduled.
    #[inline]
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = if multiplier.is_finite() {
            multiplier.max(1.0)
        } else {
            1.0
        };
        self
    }

    /// Sets the delay cap.
    #[inline]
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the attempt budget.
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Returns the delay before the given retry attempt (0-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(30) as i32);
        let delay = self.base_delay.mul_f64(factor.max(1.0));
        delay.min(self.max_delay)
    }
}

// ============================================================================
// QueuePolicy
// ============================================================================

/// Controls what happens to outbound envelopes while disconnected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePolicy {
    /// Default queuability of one-shot queries; per-call [`SendOptions`]
    /// override this.
    pub auto_queue: bool,

    /// Queue capacity; 0 means unbounded.
    pub max_len: usize,

    /// Queued envelopes older than this at flush time are expired with a
    /// timeout error.
    pub ttl: Duration,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl QueuePolicy {
    /// Creates the default policy: queuing on, 500 entries, 120s TTL.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            auto_queue: true,
            max_len: DEFAULT_QUEUE_MAX_LEN,
            ttl: DEFAULT_QUEUE_TTL,
        }
    }

    /// Disables queuing by default; offline sends fail fast unless the
    /// call opts in.
    #[inline]
    #[must_use]
    pub fn without_auto_queue(mut self) -> Self {
        self.auto_queue = false;
        self
    }

    /// Sets the queue capacity (0 = unbounded).
    #[inline]
    #[must_use]
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    /// Sets the queued-envelope lifetime.
    #[inline]
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

// ============================================================================
// SendOptions
// ============================================================================

/// Per-call overrides for one `send`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Queue while disconnected (`Some(true)`), fail fast (`Some(false)`),
    /// or follow [`QueuePolicy::auto_queue`] (`None`).
    pub queuable: Option<bool>,

    /// Timeout override for this request.
    pub timeout: Option<Duration>,
}

impl SendOptions {
    /// Creates options deferring everything to session policy.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            queuable: None,
            timeout: None,
        }
    }

    /// Forces queuing while disconnected.
    #[inline]
    #[must_use]
    pub const fn queuable(mut self) -> Self {
        self.queuable = Some(true);
        self
    }

    /// Forces fail-fast while disconnected.
    #[inline]
    #[must_use]
    pub const fn fail_fast(mut self) -> Self {
        self.queuable = Some(false);
        self
    }

    /// Sets a per-request timeout.
    #[inline]
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// ============================================================================
// SessionConfig
// ============================================================================

/// Top-level session configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Default timeout for one request/response exchange.
    pub request_timeout: Duration,

    /// Interval between timeout sweep passes.
    pub sweep_interval: Duration,

    /// Reconnection behavior.
    pub reconnect: ReconnectPolicy,

    /// Offline queuing behavior.
    pub queue: QueuePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfig {
    /// Creates the default configuration.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            reconnect: ReconnectPolicy::new(),
            queue: QueuePolicy::new(),
        }
    }

    /// Sets the default request timeout.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the timeout sweep interval.
    ///
    /// Clamped to at least 1ms; the sweep timer needs a nonzero period.
    #[inline]
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.max(MIN_SWEEP_INTERVAL);
        self
    }

    /// Sets the reconnection policy.
    #[inline]
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets the queuing policy.
    #[inline]
    #[must_use]
    pub fn with_queue(mut self, queue: QueuePolicy) -> Self {
        self.queue = queue;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
