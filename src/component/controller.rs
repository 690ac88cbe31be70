//! Synchronous waits over the component's asynchronous command protocol.
//!
//! Commands are fire-and-forget: the driver confirms them later from its own
//! thread. [`StateController`] holds the authoritative [`ComponentStatus`]
//! behind one mutex and condition variable. The callback thread mutates it
//! and broadcasts; requesting threads block in [`StateController::wait_for`]
//! on whatever predicate they care about (component state, a port's enabled
//! flag, a port's flushing flag).

use super::port::{PortDirection, PortStatus};
use super::state::ComponentState;
use crate::error::{Error, Result};
use crate::observability::record_wait_timeout;
use crate::wait::deadline_after;
use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Everything a waiter may want to observe about a component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComponentStatus {
    /// Last state confirmed by the driver.
    pub state: ComponentState,
    /// State requested but not yet confirmed.
    pub pending: Option<ComponentState>,
    /// Per-port status, indexed by [`PortDirection::index`].
    pub ports: [PortStatus; 2],
    /// Error code reported by the component, if any.
    pub error: Option<u32>,
}

impl ComponentStatus {
    /// Status of a freshly opened component.
    pub fn new(input_buffers: usize, output_buffers: usize) -> Self {
        Self {
            state: ComponentState::Invalid,
            pending: None,
            ports: [
                PortStatus::new(PortDirection::Input, input_buffers),
                PortStatus::new(PortDirection::Output, output_buffers),
            ],
            error: None,
        }
    }

    /// Status of a port.
    #[inline]
    pub fn port(&self, direction: PortDirection) -> &PortStatus {
        &self.ports[direction.index()]
    }

    /// Mutable status of a port.
    #[inline]
    pub fn port_mut(&mut self, direction: PortDirection) -> &mut PortStatus {
        &mut self.ports[direction.index()]
    }

    /// Whether buffers may currently flow through a port.
    ///
    /// Requires a processing state with no transition pending and an
    /// active port.
    pub fn accepts_buffers(&self, direction: PortDirection) -> bool {
        self.state.can_process()
            && self.pending.is_none()
            && self.error.is_none()
            && self.port(direction).is_active()
    }
}

/// Shared component status plus the condition variable waiters block on.
pub struct StateController {
    name: String,
    status: Mutex<ComponentStatus>,
    changed: Condvar,
}

impl StateController {
    /// Create a controller for a component with the given pool sizes.
    pub fn new(name: &str, input_buffers: usize, output_buffers: usize) -> Self {
        Self {
            name: name.to_string(),
            status: Mutex::new(ComponentStatus::new(input_buffers, output_buffers)),
            changed: Condvar::new(),
        }
    }

    /// Copy of the current status.
    pub fn snapshot(&self) -> ComponentStatus {
        *self.status.lock()
    }

    /// Last confirmed component state.
    pub fn state(&self) -> ComponentState {
        self.status.lock().state
    }

    /// Status of one port.
    pub fn port(&self, direction: PortDirection) -> PortStatus {
        *self.status.lock().port(direction)
    }

    /// Run `f` against the status under the lock without waking anyone.
    ///
    /// Lets callers make a decision and act on it atomically with respect to
    /// status changes. `f` must not call back into the controller.
    pub fn read<R>(&self, f: impl FnOnce(&ComponentStatus) -> R) -> R {
        f(&*self.status.lock())
    }

    /// Mutate the status under the lock, then wake every waiter.
    pub fn update<R>(&self, f: impl FnOnce(&mut ComponentStatus) -> R) -> R {
        let result = {
            let mut status = self.status.lock();
            f(&mut *status)
        };
        self.notify();
        result
    }

    /// Wake every waiter so it re-evaluates its predicate.
    pub fn notify(&self) {
        self.changed.notify_all();
    }

    /// Record a confirmed state; clears the pending request it satisfies.
    pub fn set_state(&self, state: ComponentState) {
        self.update(|status| {
            status.state = state;
            if status.pending == Some(state) {
                status.pending = None;
            }
        });
    }

    /// Record a confirmed port enable or disable.
    pub fn set_port_enabled(&self, direction: PortDirection, enabled: bool) {
        self.update(|status| {
            let port = status.port_mut(direction);
            port.enabled = enabled;
            if !enabled {
                port.disabling = false;
            }
        });
    }

    /// Raise or clear a port's flushing flag.
    pub fn set_port_flushing(&self, direction: PortDirection, flushing: bool) {
        self.update(|status| status.port_mut(direction).flushing = flushing);
    }

    /// Record an error reported by the component.
    ///
    /// Every current and future wait fails with [`Error::Component`] unless
    /// its predicate already holds.
    pub fn set_error(&self, code: u32) {
        self.update(|status| status.error = Some(code));
    }

    /// Block until `predicate` holds, the component reports an error, or
    /// `timeout` expires.
    ///
    /// Returns immediately if the predicate already holds. `operation`
    /// names what is awaited in the timeout error.
    pub fn wait_for(
        &self,
        operation: &'static str,
        timeout: Duration,
        mut predicate: impl FnMut(&ComponentStatus) -> bool,
    ) -> Result<()> {
        let deadline = deadline_after(timeout);
        let mut status = self.status.lock();

        loop {
            if predicate(&*status) {
                return Ok(());
            }
            if let Some(code) = status.error {
                return Err(Error::Component { code });
            }
            if self.changed.wait_until(&mut status, deadline).timed_out() {
                if predicate(&*status) {
                    return Ok(());
                }
                if let Some(code) = status.error {
                    return Err(Error::Component { code });
                }
                drop(status);

                record_wait_timeout(&self.name, operation);
                tracing::warn!(
                    component = %self.name,
                    operation,
                    waited_ms = timeout.as_millis() as u64,
                    "component did not confirm in time"
                );
                return Err(Error::Timeout {
                    operation,
                    waited: timeout,
                });
            }
        }
    }

    /// Block until the confirmed state equals `target`.
    pub fn wait_for_state(&self, target: ComponentState, timeout: Duration) -> Result<()> {
        self.wait_for(state_operation(target), timeout, |status| status.state == target)
    }
}

impl std::fmt::Debug for StateController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateController")
            .field("name", &self.name)
            .field("status", &*self.status.lock())
            .finish()
    }
}

fn state_operation(target: ComponentState) -> &'static str {
    match target {
        ComponentState::Invalid => "state Invalid",
        ComponentState::Loaded => "state Loaded",
        ComponentState::Idle => "state Idle",
        ComponentState::Executing => "state Executing",
        ComponentState::Pause => "state Pause",
    }
}
