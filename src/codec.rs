//! Pipeline-facing codec facade.
//!
//! [`HwCodec`] wraps one opened [`CodecComponent`] and drives it through its
//! lifecycle while keeping buffer ownership consistent between three
//! threads:
//!
//! - the **producer** (the pipeline's streaming thread) acquires, fills and
//!   submits input buffers
//! - the **driver callback thread** returns consumed input buffers and
//!   filled output buffers through [`ComponentContext`]
//! - the **push task** delivers filled output buffers downstream and sends
//!   them back to the component
//!
//! # Lifecycle
//!
//! ```text
//! new()    Loaded
//! start()  Loaded -> Idle (allocate) -> Executing, prime output, push task
//! pause()  Executing -> Pause          resume()  Pause -> Executing
//! stop()   -> Idle, drain, -> Loaded (free buffers), stop push task
//! ```
//!
//! A state or port transition that is not confirmed in time, or an error
//! event from the component, poisons the instance: every later call fails
//! with [`Error::ComponentLost`].
//!
//! # Example
//!
//! ```rust,ignore
//! use hwbridge::prelude::*;
//!
//! let session = DriverSession::new(driver);
//! let codec = HwCodec::new(&session, CodecConfig::new("h264dec0"))?;
//! codec.start(|frame: BufferHandle| {
//!     sink.push(&frame)?;
//!     Ok(())
//! })?;
//!
//! let mut input = codec.acquire_free_input_buffer()?;
//! input.set_filled(packet.len());
//! codec.submit_input_buffer(input)?;
//! ```

use crate::buffer::{BufferHandle, BufferId};
use crate::component::{
    ComponentContext, ComponentState, ComponentStatus, PortDirection, PortStatus,
};
use crate::config::CodecConfig;
use crate::driver::{CodecComponent, Command, ComponentCallbacks, DriverSession, SessionLease};
use crate::error::{Error, Result};
use crate::flow::QueueStats;
use crate::memory::TableStats;
use crate::observability::{
    init_metrics, instrument_component, record_buffer_delivered, record_transition_time, trace_buffer_acquired,
    trace_buffer_delivered, trace_buffer_returned, trace_buffer_submitted, trace_state_change,
};
use crate::task::{Deliver, DeliveryFailure, PushTask, PushTaskStats};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Snapshot of a codec instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecStats {
    /// Confirmed component state.
    pub state: ComponentState,
    /// Input pool usage.
    pub input: TableStats,
    /// Output pool usage.
    pub output: TableStats,
    /// Output queue counters.
    pub queue: QueueStats,
    /// Push task counters, once started.
    pub push: Option<PushTaskStats>,
    /// Input buffers handed to the component.
    pub submitted: u64,
}

/// A hardware codec component bridged to a synchronous pipeline.
///
/// All methods take `&self`; lifecycle and port operations are serialized
/// internally, buffer operations may run concurrently with them.
pub struct HwCodec {
    config: CodecConfig,
    ctx: Arc<ComponentContext>,
    push: Mutex<Option<PushTask<BufferHandle>>>,
    /// Serializes lifecycle and port operations.
    lifecycle: Mutex<()>,
    /// Set once the instance is unusable.
    poisoned: Mutex<Option<String>>,
    submitted: AtomicU64,
    component: Arc<dyn CodecComponent>,
    // Dropped after the component.
    _lease: SessionLease,
}

impl HwCodec {
    /// Open a component and bring it to `Loaded`.
    pub fn new(session: &DriverSession, config: CodecConfig) -> Result<Self> {
        config.validate()?;
        init_metrics();

        let ctx = Arc::new(ComponentContext::new(
            &config.component,
            config.input_buffers,
            config.output_buffers,
        ));
        let callbacks: Arc<dyn ComponentCallbacks> = ctx.clone();
        let (component, lease) = session.open_component(&config.component, callbacks)?;

        // A freshly opened component is loaded without a command round trip
        ctx.controller().set_state(ComponentState::Loaded);
        tracing::info!(component = %config.component, "component opened");

        Ok(Self {
            config,
            ctx,
            push: Mutex::new(None),
            lifecycle: Mutex::new(()),
            poisoned: Mutex::new(None),
            submitted: AtomicU64::new(0),
            component,
            _lease: lease,
        })
    }

    /// Component name.
    pub fn name(&self) -> &str {
        &self.config.component
    }

    /// Configuration this instance was opened with.
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Confirmed component state.
    pub fn state(&self) -> ComponentState {
        self.ctx.controller().state()
    }

    /// Full component status.
    pub fn status(&self) -> ComponentStatus {
        self.ctx.controller().snapshot()
    }

    /// Status of one port.
    pub fn port_status(&self, port: PortDirection) -> PortStatus {
        self.ctx.controller().port(port)
    }

    /// Whether a fatal error made this instance unusable.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.lock().is_some()
    }

    /// Shared context, for inspection.
    pub fn context(&self) -> &Arc<ComponentContext> {
        &self.ctx
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Allocate buffers, start processing and start delivering output to
    /// `sink`.
    ///
    /// The sink receives each filled output buffer and must be done with its
    /// memory when it returns; the buffer is then handed back to the
    /// component.
    pub fn start(&self, sink: impl Deliver<BufferHandle>) -> Result<()> {
        let _guard = self.lifecycle.lock();
        let _span = instrument_component(self.name());
        self.check_alive()?;

        // Only a loaded component has no buffers yet
        let state = self.state();
        if state != ComponentState::Loaded {
            return Err(Error::StateMismatch {
                from: state,
                to: ComponentState::Idle,
            });
        }

        let from = self.request_state(ComponentState::Idle)?;
        for port in PortDirection::ALL {
            if !self.ctx.controller().port(port).enabled {
                continue;
            }
            if let Err(err) = self.allocate_port(port) {
                return Err(self.poison(err));
            }
        }
        self.await_state(from, ComponentState::Idle)?;

        let from = self.request_state(ComponentState::Executing)?;
        self.await_state(from, ComponentState::Executing)?;

        let mut task = PushTask::new(
            self.name(),
            self.ctx.queue().clone(),
            OutputSink {
                ctx: Arc::clone(&self.ctx),
                component: Arc::clone(&self.component),
                downstream: Box::new(sink),
            },
        )
        .with_poll_interval(self.config.push_poll_interval);
        task.start()?;
        *self.push.lock() = Some(task);

        self.prime_output()
    }

    /// Suspend processing. Buffers stay with their current owners.
    pub fn pause(&self) -> Result<()> {
        let _guard = self.lifecycle.lock();
        self.check_alive()?;

        let from = self.begin_state(ComponentState::Pause)?;
        self.pause_push()?;
        self.send_state(ComponentState::Pause)?;
        self.await_state(from, ComponentState::Pause)
    }

    /// Resume processing after [`pause`](Self::pause).
    pub fn resume(&self) -> Result<()> {
        let _guard = self.lifecycle.lock();
        self.check_alive()?;

        let from = self.request_state(ComponentState::Executing)?;
        self.await_state(from, ComponentState::Executing)?;
        self.restart_push()?;
        self.prime_output()
    }

    /// Stop processing, wait for every buffer to come home, free them and
    /// return to `Loaded`.
    ///
    /// The producer must have submitted or released every input buffer it
    /// acquired. Stopping a loaded instance does nothing.
    pub fn stop(&self) -> Result<()> {
        let _guard = self.lifecycle.lock();
        let _span = instrument_component(self.name());
        self.check_alive()?;

        let state = self.state();
        if matches!(state, ComponentState::Loaded | ComponentState::Invalid) {
            return Ok(());
        }

        if state.can_process() {
            // Delivery is parked before the component is told to return
            // its buffers
            let from = self.begin_state(ComponentState::Idle)?;
            self.pause_push()?;
            self.return_queued()?;
            self.send_state(ComponentState::Idle)?;
            self.await_state(from, ComponentState::Idle)?;
        }

        for port in PortDirection::ALL {
            if let Err(err) = self.ctx.table(port).wait_drained(self.config.wait_timeout) {
                return Err(self.poison(err));
            }
        }

        let from = self.request_state(ComponentState::Loaded)?;
        for port in PortDirection::ALL {
            if let Err(err) = self.free_port(port) {
                return Err(self.poison(err));
            }
        }
        self.await_state(from, ComponentState::Loaded)?;

        if let Some(mut task) = self.push.lock().take() {
            task.stop()?;
        }
        self.ctx.queue().reset();
        tracing::info!(component = %self.name(), "component stopped");
        Ok(())
    }

    // ========================================================================
    // Ports
    // ========================================================================

    /// Disable a port and free its buffers.
    pub fn stop_port(&self, port: PortDirection) -> Result<()> {
        let _guard = self.lifecycle.lock();
        let _span = instrument_component(self.name());
        self.check_alive()?;

        if !self.ctx.controller().port(port).enabled {
            return Ok(());
        }

        self.ctx
            .controller()
            .update(|status| status.port_mut(port).disabling = true);
        if port == PortDirection::Output {
            self.pause_push()?;
            self.return_queued()?;
        }
        self.send(Command::PortDisable(port))?;

        if let Err(err) = self.free_port(port) {
            return Err(self.poison(err));
        }

        self.await_port("port disable", port, |status| !status.port(port).enabled)
    }

    /// Enable a port, allocate its buffers and resume traffic on it.
    pub fn start_port(&self, port: PortDirection) -> Result<()> {
        let _guard = self.lifecycle.lock();
        let _span = instrument_component(self.name());
        self.check_alive()?;

        if self.ctx.controller().port(port).enabled {
            return Ok(());
        }

        self.send(Command::PortEnable(port))?;
        // A loaded component gets its buffers when it is started
        if self.state() != ComponentState::Loaded {
            if let Err(err) = self.allocate_port(port) {
                return Err(self.poison(err));
            }
        }
        self.await_port("port enable", port, |status| status.port(port).enabled)?;

        self.ctx
            .controller()
            .update(|status| status.port_mut(port).settings_changed = false);
        if port == PortDirection::Output && self.state() == ComponentState::Executing {
            self.restart_push()?;
            self.prime_output()?;
        }
        Ok(())
    }

    /// Discard everything in flight on a port and return it to the pool.
    ///
    /// Input flushes must not race with [`submit_input_buffer`](Self::submit_input_buffer).
    pub fn flush_port(&self, port: PortDirection) -> Result<()> {
        let _guard = self.lifecycle.lock();
        let _span = instrument_component(self.name());
        self.check_alive()?;

        if !self.state().can_process() || !self.ctx.controller().port(port).enabled {
            return Ok(());
        }

        self.ctx.controller().set_port_flushing(port, true);
        if port == PortDirection::Output {
            self.pause_push()?;
            self.return_queued()?;
        }
        self.send(Command::Flush(port))?;
        self.await_port("port flush", port, |status| !status.port(port).flushing)?;

        if port == PortDirection::Output {
            if let Err(err) = self.ctx.output().wait_drained(self.config.wait_timeout) {
                return Err(self.poison(err));
            }
            if self.state() == ComponentState::Executing {
                self.restart_push()?;
            }
            self.prime_output()?;
        }
        tracing::debug!(component = %self.name(), port = %port, "port flushed");
        Ok(())
    }

    /// Whether the component reported new settings for a port; clears the
    /// flag.
    pub fn take_settings_changed(&self, port: PortDirection) -> bool {
        self.ctx.controller().update(|status| {
            std::mem::take(&mut status.port_mut(port).settings_changed)
        })
    }

    // ========================================================================
    // Input buffers
    // ========================================================================

    /// Take a free input buffer, blocking up to the configured wait timeout.
    ///
    /// The returned buffer is cleared. It belongs to the caller until it is
    /// submitted or released.
    pub fn acquire_free_input_buffer(&self) -> Result<BufferHandle> {
        self.check_alive()?;
        self.ensure_port_ready(PortDirection::Input)?;

        let mut handle = match self.ctx.input().acquire(self.config.wait_timeout) {
            Ok(handle) => handle,
            Err(Error::Timeout { waited, .. }) => {
                return Err(Error::ResourceExhausted {
                    port: PortDirection::Input,
                    waited,
                });
            }
            Err(err) => return Err(err),
        };
        handle.reset();
        trace_buffer_acquired(self.name(), PortDirection::Input, handle.id);
        Ok(handle)
    }

    /// Hand a filled input buffer to the component.
    ///
    /// On error the buffer still belongs to the caller.
    pub fn submit_input_buffer(&self, handle: BufferHandle) -> Result<()> {
        self.check_alive()?;

        if !handle.is_valid() {
            return Err(Error::InvalidInput(format!(
                "buffer {} fill {}+{} exceeds allocation {}",
                handle.id, handle.offset, handle.filled_len, handle.alloc_len
            )));
        }
        let (_, busy) = self.ctx.input().find(handle.id)?;
        if !busy {
            return Err(Error::InvalidInput(format!(
                "buffer {} was not acquired",
                handle.id
            )));
        }
        self.ensure_port_ready(PortDirection::Input)?;

        self.ctx.input().update(&handle)?;
        self.component.empty_this_buffer(&handle)?;

        self.submitted.fetch_add(1, Ordering::Relaxed);
        trace_buffer_submitted(
            self.name(),
            PortDirection::Input,
            handle.id,
            handle.filled_len,
        );
        Ok(())
    }

    /// Return an acquired input buffer without submitting it.
    ///
    /// Fails with [`Error::BusyConflict`] if the buffer is already free.
    pub fn release_input_buffer(&self, id: BufferId) -> Result<()> {
        if self.ctx.input().mark_free(id)? {
            trace_buffer_returned(self.name(), PortDirection::Input, id);
            Ok(())
        } else {
            Err(Error::BusyConflict(id))
        }
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Receiver for delivery failure notifications, once started.
    pub fn delivery_failures(&self) -> Option<kanal::Receiver<DeliveryFailure>> {
        self.push.lock().as_ref().map(PushTask::failures)
    }

    /// Acknowledge a delivery failure and resume delivery.
    ///
    /// Returns the failure that paused delivery, if any.
    pub fn acknowledge_failure(&self) -> Result<Option<DeliveryFailure>> {
        let _guard = self.lifecycle.lock();
        self.check_alive()?;

        let failure = self.push.lock().as_ref().and_then(PushTask::take_failure);
        if failure.is_some() && self.state() == ComponentState::Executing {
            self.restart_push()?;
            self.prime_output()?;
        }
        Ok(failure)
    }

    /// Snapshot of pools, queue and push task counters.
    pub fn stats(&self) -> CodecStats {
        CodecStats {
            state: self.state(),
            input: self.ctx.input().stats(),
            output: self.ctx.output().stats(),
            queue: self.ctx.queue().stats(),
            push: self.push.lock().as_ref().map(PushTask::stats),
            submitted: self.submitted.load(Ordering::Relaxed),
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn check_alive(&self) -> Result<()> {
        match &*self.poisoned.lock() {
            Some(reason) => Err(Error::ComponentLost(reason.clone())),
            None => Ok(()),
        }
    }

    /// Mark the instance unusable and hand the error back.
    fn poison(&self, err: Error) -> Error {
        let mut poisoned = self.poisoned.lock();
        if poisoned.is_none() {
            tracing::error!(component = %self.name(), error = %err, "component lost");
            *poisoned = Some(err.to_string());
        }
        err
    }

    fn ensure_port_ready(&self, port: PortDirection) -> Result<()> {
        self.ctx.controller().read(|status| {
            if let Some(code) = status.error {
                return Err(Error::Component { code });
            }
            if !status.state.can_process() {
                return Err(Error::InvalidInput(format!(
                    "component is {}, not processing",
                    status.state
                )));
            }
            if !status.port(port).is_active() {
                return Err(Error::Flushing(port));
            }
            Ok(())
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.component
            .send_command(command)
            .map_err(|err| self.poison(err))
    }

    /// Validate and send a state change; returns the state it starts from.
    fn request_state(&self, target: ComponentState) -> Result<ComponentState> {
        let from = self.begin_state(target)?;
        self.send_state(target)?;
        Ok(from)
    }

    /// Validate a state change and mark it pending without sending it.
    ///
    /// Output stops being accepted from here on.
    fn begin_state(&self, target: ComponentState) -> Result<ComponentState> {
        let from = self.ctx.controller().update(|status| {
            if status.state.can_transition_to(target) && status.pending.is_none() {
                status.pending = Some(target);
                Ok(status.state)
            } else {
                Err(Error::StateMismatch {
                    from: status.state,
                    to: target,
                })
            }
        })?;
        tracing::debug!(component = %self.name(), %from, to = %target, "requesting state");
        Ok(from)
    }

    fn send_state(&self, target: ComponentState) -> Result<()> {
        self.send(Command::StateSet(target))
    }

    fn await_state(&self, from: ComponentState, target: ComponentState) -> Result<()> {
        let started = Instant::now();
        if let Err(err) = self
            .ctx
            .controller()
            .wait_for_state(target, self.config.wait_timeout)
        {
            return Err(self.poison(err));
        }

        let took = started.elapsed();
        trace_state_change(self.name(), from, target, took);
        record_transition_time(self.name(), &format!("{from}->{target}"), took);
        Ok(())
    }

    fn await_port(
        &self,
        operation: &'static str,
        port: PortDirection,
        predicate: impl FnMut(&ComponentStatus) -> bool,
    ) -> Result<()> {
        let started = Instant::now();
        if let Err(err) =
            self.ctx
                .controller()
                .wait_for(operation, self.config.wait_timeout, predicate)
        {
            return Err(self.poison(err));
        }
        record_transition_time(
            self.name(),
            &format!("{operation} {port}"),
            started.elapsed(),
        );
        Ok(())
    }

    fn allocate_port(&self, port: PortDirection) -> Result<()> {
        let (count, size) = match port {
            PortDirection::Input => (self.config.input_buffers, self.config.input_buffer_size),
            PortDirection::Output => (self.config.output_buffers, self.config.output_buffer_size),
        };
        let handles = self
            .component
            .allocate_buffers(port, count, size, self.config.allocation())?;
        if handles.len() != count {
            tracing::warn!(
                component = %self.name(),
                port = %port,
                requested = count,
                allocated = handles.len(),
                "component allocated a different number of buffers"
            );
        }

        let allocated = handles.len();
        let table = self.ctx.table(port);
        for handle in handles {
            table.add(handle)?;
        }
        self.ctx
            .controller()
            .update(|status| status.port_mut(port).buffer_count = allocated);
        tracing::debug!(component = %self.name(), port = %port, allocated, "buffers allocated");
        Ok(())
    }

    /// Wait for each buffer of a port to come home, then free it.
    fn free_port(&self, port: PortDirection) -> Result<()> {
        let table = self.ctx.table(port);
        for id in table.ids() {
            let handle = table.remove(id, self.config.wait_timeout)?;
            self.component.free_buffer(port, &handle)?;
        }
        Ok(())
    }

    /// Send every free output buffer to the component.
    fn prime_output(&self) -> Result<()> {
        let output = self.ctx.output();
        while self
            .ctx
            .controller()
            .read(|status| status.accepts_buffers(PortDirection::Output))
        {
            let Some(handle) = output.try_acquire() else {
                break;
            };
            trace_buffer_acquired(self.name(), PortDirection::Output, handle.id);
            if let Err(err) = self.component.fill_this_buffer(&handle) {
                output.mark_free(handle.id)?;
                return Err(err);
            }
        }
        Ok(())
    }

    fn pause_push(&self) -> Result<()> {
        match self.push.lock().as_ref() {
            Some(task) => task
                .pause_and_wait(self.config.wait_timeout)
                .map_err(|err| self.poison(err)),
            None => Ok(()),
        }
    }

    /// Start the push task again, unless a delivery failure is still
    /// unacknowledged.
    fn restart_push(&self) -> Result<()> {
        let mut push = self.push.lock();
        let Some(task) = push.as_mut() else {
            return Ok(());
        };
        match task.start() {
            Err(Error::DeliveryFailed(message)) => {
                tracing::warn!(
                    component = %self.name(),
                    %message,
                    "delivery stays paused until the failure is acknowledged"
                );
                Ok(())
            }
            other => other,
        }
    }

    /// Return every queued output buffer to the pool.
    fn return_queued(&self) -> Result<()> {
        let drained = match self.push.lock().as_ref() {
            Some(task) => task.clear(),
            None => self.ctx.queue().drain(),
        };
        for handle in drained {
            self.ctx.output().mark_free(handle.id)?;
            trace_buffer_returned(self.name(), PortDirection::Output, handle.id);
        }
        Ok(())
    }
}

impl Drop for HwCodec {
    fn drop(&mut self) {
        if !self.is_poisoned() {
            if let Err(err) = self.stop() {
                tracing::warn!(component = %self.name(), error = %err, "stop on drop failed");
            }
        }
        if let Some(mut task) = self.push.lock().take() {
            let _ = task.stop();
        }
    }
}

impl std::fmt::Debug for HwCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HwCodec")
            .field("name", &self.config.component)
            .field("state", &self.state())
            .field("poisoned", &self.is_poisoned())
            .finish_non_exhaustive()
    }
}

/// Push task sink: deliver downstream, then recycle the buffer.
struct OutputSink {
    ctx: Arc<ComponentContext>,
    component: Arc<dyn CodecComponent>,
    downstream: Box<dyn Deliver<BufferHandle>>,
}

impl OutputSink {
    /// Clear the buffer and send it back to the component, or park it in
    /// the pool if the output port stopped accepting.
    fn recycle(&self, id: BufferId) -> Result<()> {
        let output = self.ctx.output();
        let (mut handle, _) = output.find(id)?;
        handle.reset();
        output.update(&handle)?;

        let accepting = self
            .ctx
            .controller()
            .read(|status| status.accepts_buffers(PortDirection::Output));
        if !accepting {
            output.mark_free(id)?;
            trace_buffer_returned(self.ctx.name(), PortDirection::Output, id);
            return Ok(());
        }

        if let Err(err) = self.component.fill_this_buffer(&handle) {
            output.mark_free(id)?;
            return Err(err);
        }
        Ok(())
    }
}

impl Deliver<BufferHandle> for OutputSink {
    fn deliver(&mut self, handle: BufferHandle) -> Result<()> {
        let id = handle.id;
        let size = handle.filled_len;

        if let Err(err) = self.downstream.deliver(handle) {
            self.ctx.output().mark_free(id)?;
            return Err(err);
        }

        record_buffer_delivered(self.ctx.name(), size);
        trace_buffer_delivered(self.ctx.name(), id, size);
        self.recycle(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BackingAddr, BufferFlags};
    use crate::testing::{LoopbackConfig, LoopbackDriver};
    use std::time::Duration;

    fn session() -> (Arc<LoopbackDriver>, DriverSession) {
        let driver = Arc::new(LoopbackDriver::new(LoopbackConfig::default()));
        let session = DriverSession::new(driver.clone());
        (driver, session)
    }

    fn config() -> CodecConfig {
        CodecConfig::new("loop0")
            .buffers(4, 4)
            .buffer_sizes(4096, 4096)
            .wait_timeout(Duration::from_secs(2))
            .push_poll_interval(Duration::from_millis(10))
    }

    fn collector() -> (Arc<Mutex<Vec<BufferHandle>>>, impl Deliver<BufferHandle>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |handle: BufferHandle| -> Result<()> {
            sink.lock().push(handle);
            Ok(())
        })
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn test_open_is_loaded() {
        let (_driver, session) = session();
        let codec = HwCodec::new(&session, config()).unwrap();
        assert_eq!(codec.state(), ComponentState::Loaded);
        assert_eq!(session.open_count(), 1);

        drop(codec);
        assert_eq!(session.open_count(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (_driver, session) = session();
        let result = HwCodec::new(&session, config().buffers(0, 4));
        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(session.open_count(), 0);
    }

    #[test]
    fn test_start_submit_deliver_stop() {
        let (_driver, session) = session();
        let codec = HwCodec::new(&session, config()).unwrap();
        let (seen, sink) = collector();
        codec.start(sink).unwrap();
        assert_eq!(codec.state(), ComponentState::Executing);

        for i in 0..10u64 {
            let mut input = codec.acquire_free_input_buffer().unwrap();
            input.set_filled(100 + i as usize);
            input.pts = Some(Duration::from_millis(i * 40));
            codec.submit_input_buffer(input).unwrap();
        }

        assert!(wait_until(|| seen.lock().len() == 10));
        let pts: Vec<_> = seen.lock().iter().map(|h| h.pts).collect();
        let expected: Vec<_> = (0..10u64).map(|i| Some(Duration::from_millis(i * 40))).collect();
        assert_eq!(pts, expected);

        codec.stop().unwrap();
        assert_eq!(codec.state(), ComponentState::Loaded);
        assert!(codec.context().input().is_empty());
        assert!(codec.context().output().is_empty());
        assert_eq!(codec.stats().submitted, 10);
    }

    #[test]
    fn test_acquire_before_start_fails() {
        let (_driver, session) = session();
        let codec = HwCodec::new(&session, config()).unwrap();
        assert!(matches!(
            codec.acquire_free_input_buffer(),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_submit_unacquired_buffer() {
        let (_driver, session) = session();
        let codec = HwCodec::new(&session, config()).unwrap();
        let (_seen, sink) = collector();
        codec.start(sink).unwrap();

        let input = codec.acquire_free_input_buffer().unwrap();
        codec.release_input_buffer(input.id).unwrap();
        assert!(matches!(
            codec.submit_input_buffer(input.clone()),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            codec.release_input_buffer(input.id),
            Err(Error::BusyConflict(_))
        ));

        let stray = BufferHandle::new(99u32, BackingAddr(1), 16);
        assert!(matches!(
            codec.submit_input_buffer(stray),
            Err(Error::NotFound(_))
        ));
        codec.stop().unwrap();
    }

    #[test]
    fn test_illegal_transition() {
        let (_driver, session) = session();
        let codec = HwCodec::new(&session, config()).unwrap();
        assert!(matches!(
            codec.pause(),
            Err(Error::StateMismatch {
                from: ComponentState::Loaded,
                to: ComponentState::Pause
            })
        ));
        assert!(!codec.is_poisoned());
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let (driver, session) = session();
        let codec = HwCodec::new(&session, config()).unwrap();
        let (_seen, sink) = collector();
        codec.start(sink).unwrap();

        let (_seen, again) = collector();
        assert!(matches!(
            codec.start(again),
            Err(Error::StateMismatch {
                from: ComponentState::Executing,
                to: ComponentState::Idle
            })
        ));
        assert!(!codec.is_poisoned());
        assert_eq!(codec.state(), ComponentState::Executing);
        let component = driver.component("loop0").unwrap();
        assert_eq!(component.allocated(PortDirection::Input), 4);
        assert_eq!(component.allocated(PortDirection::Output), 4);

        codec.pause().unwrap();
        let (_seen, paused) = collector();
        assert!(matches!(
            codec.start(paused),
            Err(Error::StateMismatch { from: ComponentState::Pause, .. })
        ));
        codec.stop().unwrap();
        assert!(!codec.is_poisoned());
    }

    #[test]
    fn test_pause_resume() {
        let (_driver, session) = session();
        let codec = HwCodec::new(&session, config()).unwrap();
        let (seen, sink) = collector();
        codec.start(sink).unwrap();

        codec.pause().unwrap();
        assert_eq!(codec.state(), ComponentState::Pause);
        codec.resume().unwrap();
        assert_eq!(codec.state(), ComponentState::Executing);

        let mut input = codec.acquire_free_input_buffer().unwrap();
        input.set_filled(8);
        input.flags = BufferFlags::eos();
        codec.submit_input_buffer(input).unwrap();
        assert!(wait_until(|| seen.lock().len() == 1));
        assert!(seen.lock()[0].is_eos());

        codec.stop().unwrap();
    }

    #[test]
    fn test_settings_changed_flag() {
        let (_driver, session) = session();
        let codec = HwCodec::new(&session, config()).unwrap();
        codec
            .context()
            .controller()
            .update(|s| s.port_mut(PortDirection::Output).settings_changed = true);

        assert!(codec.take_settings_changed(PortDirection::Output));
        assert!(!codec.take_settings_changed(PortDirection::Output));
    }
}
