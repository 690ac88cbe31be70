//! Metrics collection using metrics-rs.

use crate::component::PortDirection;
use metrics::{Counter, Gauge, Unit, counter, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

const BUFFERS_ACQUIRED: &str = "hwbridge_buffers_acquired";
const BUFFERS_RETURNED: &str = "hwbridge_buffers_returned";
const BUFFERS_IN_USE: &str = "hwbridge_buffers_in_use";
const BUFFERS_DELIVERED: &str = "hwbridge_buffers_delivered";
const BYTES_DELIVERED: &str = "hwbridge_bytes_delivered";
const DELIVERY_FAILURES: &str = "hwbridge_delivery_failures";
const WAIT_TIMEOUTS: &str = "hwbridge_wait_timeouts";
const BUSY_CONFLICTS: &str = "hwbridge_busy_conflicts";
const QUEUE_DEPTH: &str = "hwbridge_queue_depth";
const TRANSITION_TIME_NS: &str = "hwbridge_transition_time_ns";

/// Initialize metrics descriptions.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(
        BUFFERS_ACQUIRED,
        Unit::Count,
        "Buffers taken out of a port's free pool"
    );
    metrics::describe_counter!(
        BUFFERS_RETURNED,
        Unit::Count,
        "Buffers returned to a port's free pool"
    );
    metrics::describe_gauge!(
        BUFFERS_IN_USE,
        Unit::Count,
        "Buffers currently owned by someone other than the pool"
    );
    metrics::describe_counter!(
        BUFFERS_DELIVERED,
        Unit::Count,
        "Output buffers delivered downstream"
    );
    metrics::describe_counter!(BYTES_DELIVERED, Unit::Bytes, "Output bytes delivered downstream");
    metrics::describe_counter!(
        DELIVERY_FAILURES,
        Unit::Count,
        "Downstream deliveries that failed and paused the push task"
    );
    metrics::describe_counter!(
        WAIT_TIMEOUTS,
        Unit::Count,
        "Bounded waits that hit their deadline"
    );
    metrics::describe_counter!(
        BUSY_CONFLICTS,
        Unit::Count,
        "Buffer completions that did not change ownership"
    );
    metrics::describe_gauge!(
        QUEUE_DEPTH,
        Unit::Count,
        "Filled buffers waiting for delivery"
    );
    metrics::describe_histogram!(
        TRANSITION_TIME_NS,
        Unit::Nanoseconds,
        "Time from command to confirmed completion"
    );
}

/// Record a bounded wait hitting its deadline.
#[inline]
pub fn record_wait_timeout(component: &str, operation: &'static str) {
    counter!(WAIT_TIMEOUTS, "component" => component.to_string(), "operation" => operation)
        .increment(1);
}

/// Record a duplicate or unexpected buffer completion.
#[inline]
pub fn record_busy_conflict(component: &str, port: PortDirection) {
    counter!(BUSY_CONFLICTS, "component" => component.to_string(), "port" => port.as_str())
        .increment(1);
}

/// Record an output buffer delivered downstream.
#[inline]
pub fn record_buffer_delivered(component: &str, bytes: usize) {
    counter!(BUFFERS_DELIVERED, "component" => component.to_string()).increment(1);
    counter!(BYTES_DELIVERED, "component" => component.to_string()).increment(bytes as u64);
}

/// Record a failed downstream delivery.
#[inline]
pub fn record_delivery_failure(component: &str) {
    counter!(DELIVERY_FAILURES, "component" => component.to_string()).increment(1);
}

/// Record the number of buffers waiting in a transfer queue.
#[inline]
pub fn record_queue_depth(component: &str, depth: usize) {
    gauge!(QUEUE_DEPTH, "component" => component.to_string()).set(depth as f64);
}

/// Record how long a state or port transition took to be confirmed.
#[inline]
pub fn record_transition_time(component: &str, transition: &str, duration: Duration) {
    histogram!(
        TRANSITION_TIME_NS,
        "component" => component.to_string(),
        "transition" => transition.to_string()
    )
    .record(duration.as_nanos() as f64);
}

/// Metrics handles for one port's buffer pool.
///
/// Labels are resolved once at construction.
#[derive(Clone)]
pub struct PortMetrics {
    acquired: Counter,
    returned: Counter,
    in_use: Gauge,
}

impl PortMetrics {
    /// Create the metrics handles for a port.
    pub fn new(component: &str, port: PortDirection) -> Self {
        Self {
            acquired: counter!(
                BUFFERS_ACQUIRED,
                "component" => component.to_string(),
                "port" => port.as_str()
            ),
            returned: counter!(
                BUFFERS_RETURNED,
                "component" => component.to_string(),
                "port" => port.as_str()
            ),
            in_use: gauge!(
                BUFFERS_IN_USE,
                "component" => component.to_string(),
                "port" => port.as_str()
            ),
        }
    }

    /// Record a buffer leaving the free pool.
    #[inline]
    pub fn record_acquired(&self, in_use: usize) {
        self.acquired.increment(1);
        self.in_use.set(in_use as f64);
    }

    /// Record a buffer returning to the free pool.
    #[inline]
    pub fn record_returned(&self, in_use: usize) {
        self.returned.increment(1);
        self.in_use.set(in_use as f64);
    }

    /// Overwrite the in-use gauge.
    #[inline]
    pub fn set_in_use(&self, in_use: usize) {
        self.in_use.set(in_use as f64);
    }
}

impl std::fmt::Debug for PortMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_metrics();
        init_metrics();
        assert!(METRICS_INITIALIZED.load(Ordering::SeqCst));
    }

    #[test]
    fn test_recording_without_recorder() {
        // No recorder installed: every call is a no-op
        record_wait_timeout("dec0", "state Idle");
        record_busy_conflict("dec0", PortDirection::Input);
        record_buffer_delivered("dec0", 4096);
        record_delivery_failure("dec0");
        record_queue_depth("dec0", 3);
        record_transition_time("dec0", "Idle->Executing", Duration::from_millis(2));

        let port = PortMetrics::new("dec0", PortDirection::Output);
        port.record_acquired(1);
        port.record_returned(0);
        port.set_in_use(0);
    }
}
