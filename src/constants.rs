//! Timing and protocol constants.
//!
//! Centralizes magic numbers so the session, retry executor and token state
//! agree on them. Most of the durations are defaults that
//! [`ClientConfig`](crate::config::ClientConfig) can override.

use std::time::Duration;

// ============================================================================
// Tokens
// ============================================================================

/// Safety margin before token expiry.
///
/// A token is treated as expired once less than this much of its lifetime
/// remains, so a refresh always happens while the old token still works.
pub const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(180);

// ============================================================================
// Retry
// ============================================================================

/// Delay cap between retry attempts.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Upper bound of the random jitter added to each retry delay, in ms.
pub const RETRY_JITTER_MS: u64 = 1000;

/// Default number of guarded reconnect attempts.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;

/// Default number of guarded attempts for HTTP calls.
pub const DEFAULT_HTTP_ATTEMPTS: u32 = 2;

// ============================================================================
// Session
// ============================================================================

/// Interval between WebSocket pings while ready.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for any inbound frame after a ping.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for a postback answering a request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the outbound frame queue.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Close code of a normal, intentional close.
pub const NORMAL_CLOSE_CODE: u16 = 1000;

// ============================================================================
// HTTP
// ============================================================================

/// Timeout for individual HTTP requests.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Response bodies longer than this are truncated in error messages.
pub const HTTP_ERROR_BODY_LIMIT: usize = 512;

// ============================================================================
// Keyring
// ============================================================================

/// Attempts for a single keyring read.
pub const KEYRING_RETRY_ATTEMPTS: u32 = 2;

/// Pause between keyring read attempts.
pub const KEYRING_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Keyring service name.
pub const KEYRING_SERVICE: &str = "chatline";
