//! Observability features: metrics and tracing.
//!
//! - **Metrics**: Counters, gauges, and histograms via `metrics-rs`
//! - **Tracing**: Structured logging and spans via `tracing`
//!
//! ## Metrics
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `hwbridge_buffers_acquired` | Counter | Buffers taken from a port's free pool |
//! | `hwbridge_buffers_returned` | Counter | Buffers returned to a port's free pool |
//! | `hwbridge_buffers_in_use` | Gauge | Buffers currently out of the pool |
//! | `hwbridge_buffers_delivered` | Counter | Output buffers delivered downstream |
//! | `hwbridge_bytes_delivered` | Counter | Output bytes delivered downstream |
//! | `hwbridge_delivery_failures` | Counter | Failed deliveries (push task paused) |
//! | `hwbridge_wait_timeouts` | Counter | Bounded waits that hit their deadline |
//! | `hwbridge_busy_conflicts` | Counter | Completions that did not change ownership |
//! | `hwbridge_queue_depth` | Gauge | Filled buffers waiting for delivery |
//! | `hwbridge_transition_time_ns` | Histogram | Command to confirmation latency |
//!
//! Nothing is exported unless the application installs a recorder.
//!
//! ## Tracing
//!
//! Driver callbacks only log at `trace`/`debug` level, except protocol
//! violations (`error`) and ownership conflicts (`warn`).

mod metrics;
mod tracing_support;

pub use metrics::{
    PortMetrics, init_metrics, record_buffer_delivered, record_busy_conflict,
    record_delivery_failure, record_queue_depth, record_transition_time, record_wait_timeout,
};
pub use tracing_support::{
    instrument_component, span_component, span_push_task, trace_buffer_acquired,
    trace_buffer_delivered, trace_buffer_returned, trace_buffer_submitted, trace_eos, trace_error,
    trace_state_change,
};
