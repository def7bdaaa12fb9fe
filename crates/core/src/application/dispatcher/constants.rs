// Dispatcher constants (no magic values)
use std::time::Duration;

/// Default fixed polling interval between dispatch cycles (5s)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Default maximum records claimed per cycle
pub const DEFAULT_BATCH_SIZE: i64 = 10;

/// Default bound on concurrent engine calls per cycle
pub const DEFAULT_DISPATCH_CONCURRENCY: usize = 4;

/// Lock timeout after which a DISPATCHING record is considered stale (120s).
/// This is the system's sole timeout mechanism; a crashed dispatcher's
/// claims are recovered after this window.
pub const DEFAULT_LOCK_TIMEOUT_MS: i64 = 120_000;

/// Retry backoff floor (5s)
pub const RETRY_MIN_DELAY_SECS: i64 = 5;

/// Retry backoff cap (1h)
pub const RETRY_MAX_DELAY_SECS: i64 = 3600;

/// Multiplicative jitter range applied to the backoff delay
pub const RETRY_JITTER_MIN: f64 = 0.8;
pub const RETRY_JITTER_MAX: f64 = 1.2;
