//! Tracing integration for structured logging and spans.

use crate::buffer::BufferId;
use crate::component::{ComponentState, PortDirection};
use std::time::Duration;
use tracing::{Level, Span, span};

/// Create a span covering work done on behalf of a component instance.
///
/// # Example
///
/// ```rust,ignore
/// use hwbridge::observability::span_component;
///
/// let span = span_component("h264dec0");
/// let _guard = span.enter();
/// ```
#[inline]
pub fn span_component(component: &str) -> Span {
    span!(Level::DEBUG, "component", name = %component)
}

/// Create a span for the push task worker thread.
#[inline]
pub fn span_push_task(component: &str) -> Span {
    span!(Level::DEBUG, "push_task", component = %component)
}

/// Enter a component span and return the guard.
pub fn instrument_component(component: &str) -> tracing::span::EnteredSpan {
    span_component(component).entered()
}

/// Log a buffer taken from a port's pool.
#[inline]
pub fn trace_buffer_acquired(component: &str, port: PortDirection, id: BufferId) {
    tracing::trace!(
        component = %component,
        port = %port,
        buffer = %id,
        "buffer acquired"
    );
}

/// Log a buffer handed to the component.
#[inline]
pub fn trace_buffer_submitted(component: &str, port: PortDirection, id: BufferId, size: usize) {
    tracing::trace!(
        component = %component,
        port = %port,
        buffer = %id,
        size = size,
        "buffer submitted"
    );
}

/// Log a buffer returned to a port's pool.
#[inline]
pub fn trace_buffer_returned(component: &str, port: PortDirection, id: BufferId) {
    tracing::trace!(
        component = %component,
        port = %port,
        buffer = %id,
        "buffer returned"
    );
}

/// Log a buffer delivered downstream.
#[inline]
pub fn trace_buffer_delivered(component: &str, id: BufferId, size: usize) {
    tracing::trace!(
        component = %component,
        buffer = %id,
        size = size,
        "buffer delivered"
    );
}

/// Log a confirmed state change.
#[inline]
pub fn trace_state_change(
    component: &str,
    from: ComponentState,
    to: ComponentState,
    took: Duration,
) {
    tracing::debug!(
        component = %component,
        from = %from,
        to = %to,
        took_us = took.as_micros() as u64,
        "component state changed"
    );
}

/// Log an error.
#[inline]
pub fn trace_error(component: &str, error: &dyn std::error::Error) {
    tracing::error!(
        component = %component,
        error = %error,
        "component error"
    );
}

/// Log end-of-stream seen on the output port.
#[inline]
pub fn trace_eos(component: &str) {
    tracing::debug!(component = %component, "end of stream");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_creation() {
        let _span = span_component("dec0");
        let _span = span_push_task("dec0");
        let _guard = instrument_component("dec0");
    }

    #[test]
    fn test_trace_functions() {
        // These should not panic even without a subscriber
        trace_buffer_acquired("dec0", PortDirection::Input, BufferId(0));
        trace_buffer_submitted("dec0", PortDirection::Input, BufferId(0), 100);
        trace_buffer_returned("dec0", PortDirection::Input, BufferId(0));
        trace_buffer_delivered("dec0", BufferId(1), 100);
        trace_state_change(
            "dec0",
            ComponentState::Idle,
            ComponentState::Executing,
            Duration::from_micros(300),
        );
        trace_error("dec0", &crate::Error::Component { code: 1 });
        trace_eos("dec0");
    }
}
