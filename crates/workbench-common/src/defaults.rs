//! Default tunables
//!
//! Shared defaults for reconciliation, redelivery, and credential exchange.

/// Default AWS region for credential exchange.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Conditional-write attempts per event before the handler reports a
/// concurrency conflict and hands the event back to the transport.
pub const DEFAULT_CAS_ATTEMPTS: u32 = 3;

/// Redelivery attempts the in-process pump grants a retryable event.
pub const DEFAULT_REDELIVERY_ATTEMPTS: u32 = 5;

/// Minimum redelivery backoff in milliseconds.
pub const DEFAULT_BACKOFF_MIN_MS: u64 = 500;

/// Maximum redelivery backoff in milliseconds.
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 10_000;

/// Lifetime requested for brokered session credentials, in seconds.
pub const DEFAULT_SESSION_DURATION_SECS: i32 = 900;

/// Buffer size for the engine event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 256;
