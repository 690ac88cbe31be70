//! Deadline helpers shared by the blocking primitives.

use std::time::{Duration, Instant};

/// Longest wait any primitive will accept; longer timeouts are clamped.
pub(crate) const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Absolute deadline `timeout` from now, clamped to [`MAX_WAIT`].
#[inline]
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    Instant::now() + timeout.min(MAX_WAIT)
}
